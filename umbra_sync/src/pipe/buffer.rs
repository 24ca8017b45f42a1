//! Raw backing storage for the pipe.
//!
//! The buffer is a plain byte allocation obtained zero-initialized from the
//! platform allocator; the copy helpers split at the physical end of the
//! allocation, so a run of elements (and even a single element) may straddle
//! the wrap point.

use core::alloc::Layout;
use core::ptr::{self, NonNull};

use crate::error::{SyncError, SyncResult};

/// Smallest power of two strictly greater than `value`.
///
/// Note the asymmetry: an exact power of two is rounded *up* (8 → 16, not 8).
/// Saturates at `usize::MAX` instead of overflowing.
pub fn next_power_of_two(value: usize) -> usize {
    let mut power = 1usize;
    while power <= value {
        match power.checked_mul(2) {
            Some(next) => power = next,
            None => return usize::MAX,
        }
    }
    power
}

/// Allocate `cap` zeroed bytes. Allocator failure is reported, not fatal.
pub(crate) fn alloc_buffer(cap: usize) -> SyncResult<NonNull<u8>> {
    debug_assert!(cap > 0);
    let Ok(layout) = Layout::from_size_align(cap, 1) else {
        return Err(SyncError::InvalidArgument);
    };
    let raw = unsafe { alloc::alloc::alloc_zeroed(layout) };
    NonNull::new(raw).ok_or(SyncError::OutOfMemory)
}

/// Return a buffer allocated by [`alloc_buffer`].
///
/// # Safety
///
/// `buf` must have been allocated by [`alloc_buffer`] with this `cap` and
/// not freed since.
pub(crate) unsafe fn free_buffer(buf: NonNull<u8>, cap: usize) {
    alloc::alloc::dealloc(buf.as_ptr(), Layout::from_size_align_unchecked(cap, 1));
}

/// Copy `data` into the ring at `offset`, wrapping at `cap`.
///
/// # Safety
///
/// The caller must hold the lock of the end it is writing and guarantee
/// `offset < cap` and `data.len() < cap`, with the written range disjoint
/// from the unread region.
pub(crate) unsafe fn copy_in(buf: NonNull<u8>, cap: usize, offset: usize, data: &[u8]) {
    debug_assert!(offset < cap);
    debug_assert!(data.len() < cap);
    let first = data.len().min(cap - offset);
    ptr::copy_nonoverlapping(data.as_ptr(), buf.as_ptr().add(offset), first);
    ptr::copy_nonoverlapping(data.as_ptr().add(first), buf.as_ptr(), data.len() - first);
}

/// Copy bytes out of the ring starting at `offset`, wrapping at `cap`.
///
/// # Safety
///
/// Same contract as [`copy_in`], for the reading end.
pub(crate) unsafe fn copy_out(buf: NonNull<u8>, cap: usize, offset: usize, out: &mut [u8]) {
    debug_assert!(offset < cap);
    debug_assert!(out.len() < cap);
    let first = out.len().min(cap - offset);
    ptr::copy_nonoverlapping(buf.as_ptr().add(offset), out.as_mut_ptr(), first);
    ptr::copy_nonoverlapping(buf.as_ptr(), out.as_mut_ptr().add(first), out.len() - first);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_power_of_two_is_strictly_greater() {
        assert_eq!(next_power_of_two(0), 1);
        assert_eq!(next_power_of_two(1), 2);
        assert_eq!(next_power_of_two(5), 8);
        // An exact power of two is not its own successor.
        assert_eq!(next_power_of_two(8), 16);
        assert_eq!(next_power_of_two(255), 256);
        assert_eq!(next_power_of_two(256), 512);
    }

    #[test]
    fn test_next_power_of_two_saturates() {
        assert_eq!(next_power_of_two(usize::MAX), usize::MAX);
        assert_eq!(next_power_of_two(usize::MAX / 2 + 1), usize::MAX);
    }

    #[test]
    fn test_copy_round_trip_with_wrap() {
        let cap = 16usize;
        let buf = alloc_buffer(cap).unwrap();
        let data = [1u8, 2, 3, 4, 5, 6];
        // Offset 13 forces a split: 3 bytes at the end, 3 at the start.
        unsafe { copy_in(buf, cap, 13, &data) };
        let mut out = [0u8; 6];
        unsafe { copy_out(buf, cap, 13, &mut out) };
        assert_eq!(out, data);
        unsafe { free_buffer(buf, cap) };
    }
}
