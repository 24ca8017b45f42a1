//! Growable circular pipe with blocking push/pop.
//!
//! A pipe carries fixed-size elements through a byte-oriented ring buffer
//! shared by any number of [`Producer`] and [`Consumer`] handles. Each end
//! is guarded by its own spinlock, so a concurrent push and pop never
//! contend; the buffer itself is only reallocated or released while *both*
//! locks are held, always acquired in the fixed order end-lock → begin-lock.
//!
//! The buffer starts at a small fixed capacity and grows by powers of two up
//! to the limit chosen at creation (zero = unbounded); when usage falls to a
//! quarter of the capacity it is halved again, never below the initial
//! minimum. One element of dead capacity always separates the write cursor
//! from the read cursor, so `begin == end` unambiguously means "empty".
//!
//! Lifetime is reference-counted per side. When the last consumer goes
//! away the backing buffer is freed at once and blocked producers are
//! released (their pushes succeed without writing, since nobody is left to
//! read). When the last producer goes away, blocked consumers are released
//! to drain whatever is left and then observe end-of-producers.

mod buffer;

pub use buffer::next_power_of_two;

use alloc::sync::Arc;
use core::cell::UnsafeCell;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{SyncError, SyncResult};
use crate::spinlock::Spinlock;
use crate::wait_queue::WaitQueue;

/// Initial (and smallest) buffer capacity in bytes, sentinel included.
pub const MIN_PIPE_CAPACITY: usize = 256;

struct Shared {
    element_size: usize,
    /// Floor for shrinking; also the initial capacity.
    min_cap: usize,
    /// Ceiling for growth; `usize::MAX` when unbounded.
    max_cap: usize,
    /// Current capacity in bytes; zero once the buffer has been released.
    cap: AtomicUsize,
    /// Offset of the first unread byte. Written only under `begin_lock`.
    begin: AtomicUsize,
    /// Offset where the next byte will be written. Written only under
    /// `end_lock`.
    end: AtomicUsize,
    /// Valid while `cap != 0`. Dereferenced only under at least one of the
    /// two locks; swapped only under both.
    buf: UnsafeCell<NonNull<u8>>,
    producers: AtomicUsize,
    consumers: AtomicUsize,
    /// Producer-side lock (the "end" of the ring).
    end_lock: Spinlock<()>,
    /// Consumer-side lock (the "begin" of the ring).
    begin_lock: Spinlock<()>,
    /// Signaled after data was written; consumers wait here.
    on_pushed: WaitQueue,
    /// Signaled after data was read; producers wait here.
    on_popped: WaitQueue,
}

unsafe impl Send for Shared {}
unsafe impl Sync for Shared {}

impl Drop for Shared {
    fn drop(&mut self) {
        // The last consumer normally frees the buffer; this is idempotent.
        unsafe { self.release_buffer() };
    }
}

impl Shared {
    /// Bytes of unread data. Tolerates torn cross-side reads (the result is
    /// then garbage, and every caller that acts on it re-checks under a
    /// lock).
    fn used_bytes(&self) -> usize {
        let cap = self.cap.load(Ordering::Acquire);
        if cap == 0 {
            return 0;
        }
        let begin = self.begin.load(Ordering::Acquire);
        let end = self.end.load(Ordering::Acquire);
        end.wrapping_add(cap).wrapping_sub(begin) % cap
    }

    /// Bytes that can still be written without moving the read cursor.
    fn free_bytes(&self) -> usize {
        let cap = self.cap.load(Ordering::Acquire);
        if cap == 0 {
            return 0;
        }
        (cap - self.element_size).saturating_sub(self.used_bytes())
    }

    /// True when not even one more element fits.
    fn is_full(&self) -> bool {
        let cap = self.cap.load(Ordering::Acquire);
        cap != 0 && self.free_bytes() < self.element_size
    }

    /// Copy `data` into the ring at the write cursor and publish the new
    /// cursor.
    ///
    /// # Safety
    ///
    /// `end_lock` must be held, the buffer must be live and `data.len()`
    /// must not exceed the free space.
    unsafe fn write_at_end(&self, data: &[u8]) {
        let cap = self.cap.load(Ordering::Acquire);
        let end = self.end.load(Ordering::Acquire);
        buffer::copy_in(*self.buf.get(), cap, end, data);
        self.end.store((end + data.len()) % cap, Ordering::Release);
    }

    /// Copy bytes out of the ring at the read cursor and publish the new
    /// cursor.
    ///
    /// # Safety
    ///
    /// `begin_lock` must be held, the buffer must be live and `out.len()`
    /// must not exceed the unread bytes.
    unsafe fn read_at_begin(&self, out: &mut [u8]) {
        let cap = self.cap.load(Ordering::Acquire);
        let begin = self.begin.load(Ordering::Acquire);
        buffer::copy_out(*self.buf.get(), cap, begin, out);
        self.begin.store((begin + out.len()) % cap, Ordering::Release);
    }

    /// Move the ring into a fresh allocation of `new_cap` bytes, unwrapping
    /// the unread data to offset zero. Requires both locks.
    fn resize(&self, new_cap: usize) -> SyncResult<()> {
        let old_cap = self.cap.load(Ordering::Acquire);
        let used = self.used_bytes();
        debug_assert!(new_cap >= used + self.element_size);
        let new_buf = buffer::alloc_buffer(new_cap)?;
        unsafe {
            let old_buf = *self.buf.get();
            let begin = self.begin.load(Ordering::Acquire);
            let unread = core::slice::from_raw_parts_mut(new_buf.as_ptr(), used);
            buffer::copy_out(old_buf, old_cap, begin, unread);
            buffer::free_buffer(old_buf, old_cap);
            *self.buf.get() = new_buf;
        }
        self.begin.store(0, Ordering::Release);
        self.end.store(used, Ordering::Release);
        self.cap.store(new_cap, Ordering::Release);
        log::trace!("pipe: resized buffer {} -> {} bytes", old_cap, new_cap);
        Ok(())
    }

    /// Halve the buffer if usage allows it. Called with no lock held; takes
    /// both in the fixed order and re-checks before committing. A failed
    /// shrink allocation keeps the current buffer.
    fn maybe_shrink(&self) {
        // Racy pre-check so the common case stays single-lock.
        let cap = self.cap.load(Ordering::Acquire);
        if cap == 0 || cap / 2 < self.min_cap || self.used_bytes() * 4 > cap {
            return;
        }
        let end_guard = self.end_lock.lock();
        let begin_guard = self.begin_lock.lock();
        let cap = self.cap.load(Ordering::Acquire);
        let used = self.used_bytes();
        let half = cap / 2;
        if cap != 0 && half >= self.min_cap && used * 4 <= cap && used + self.element_size <= half {
            if self.resize(half).is_err() {
                log::trace!("pipe: shrink allocation failed, keeping {} bytes", cap);
            }
        }
        drop(begin_guard);
        drop(end_guard);
    }

    /// Free the backing buffer. Requires both locks; idempotent.
    ///
    /// # Safety
    ///
    /// No push or pop may be in flight (guaranteed by holding both locks).
    unsafe fn release_buffer(&self) {
        let cap = self.cap.swap(0, Ordering::AcqRel);
        if cap != 0 {
            buffer::free_buffer(*self.buf.get(), cap);
            *self.buf.get() = NonNull::dangling();
        }
    }
}

/// Create a pipe for elements of `element_size` bytes and hand back its
/// first producer/consumer handle pair.
///
/// `limit` bounds the buffer to that many elements (rounded up to the next
/// strictly-greater power of two of bytes, sentinel included); zero means
/// the buffer may grow without bound. The initial capacity is
/// [`MIN_PIPE_CAPACITY`] regardless of `limit`, raised only when two
/// elements would not fit.
pub fn create(element_size: usize, limit: usize) -> SyncResult<(Producer, Consumer)> {
    if element_size == 0 {
        return Err(SyncError::InvalidArgument);
    }
    let two_elements = element_size.saturating_mul(2);
    let min_cap = MIN_PIPE_CAPACITY.max(next_power_of_two(two_elements - 1));
    let max_cap = if limit == 0 {
        usize::MAX
    } else {
        let wanted = limit
            .saturating_add(1)
            .saturating_mul(element_size);
        next_power_of_two(wanted).max(min_cap)
    };
    let buf = buffer::alloc_buffer(min_cap)?;
    let shared = Arc::new(Shared {
        element_size,
        min_cap,
        max_cap,
        cap: AtomicUsize::new(min_cap),
        begin: AtomicUsize::new(0),
        end: AtomicUsize::new(0),
        buf: UnsafeCell::new(buf),
        producers: AtomicUsize::new(1),
        consumers: AtomicUsize::new(1),
        end_lock: Spinlock::new(()),
        begin_lock: Spinlock::new(()),
        on_pushed: WaitQueue::new(),
        on_popped: WaitQueue::new(),
    });
    Ok((
        Producer {
            shared: shared.clone(),
        },
        Consumer { shared },
    ))
}

/// Writing handle of a pipe. Cloning attaches another producer.
pub struct Producer {
    shared: Arc<Shared>,
}

impl Producer {
    /// Element size this pipe was created with.
    pub fn element_size(&self) -> usize {
        self.shared.element_size
    }

    /// Current backing capacity in bytes (sentinel included).
    pub fn capacity_bytes(&self) -> usize {
        let _guard = self.shared.end_lock.lock();
        self.shared.cap.load(Ordering::Acquire)
    }

    /// Push whole elements into the pipe, blocking while it is full at its
    /// capacity limit and a consumer is still attached.
    ///
    /// `data.len()` must be a multiple of the element size. When the last
    /// consumer has detached the call succeeds immediately without writing,
    /// as there is nobody left to read. Growth failure reports
    /// [`SyncError::OutOfMemory`]; elements accepted by earlier rounds of a
    /// large push stay in the pipe.
    pub fn push(&self, data: &[u8]) -> SyncResult<()> {
        let shared = &*self.shared;
        let elem = shared.element_size;
        if data.len() % elem != 0 {
            return Err(SyncError::InvalidArgument);
        }
        let mut remaining = data;
        while !remaining.is_empty() {
            let guard = shared.end_lock.lock();
            if shared.consumers.load(Ordering::Acquire) == 0 {
                return Ok(());
            }
            let cap = shared.cap.load(Ordering::Acquire);
            let mut free = shared.free_bytes();
            // Grow first when the remainder does not fit and the cap allows.
            if free < remaining.len() && cap < shared.max_cap {
                let required = shared
                    .used_bytes()
                    .saturating_add(remaining.len())
                    .saturating_add(elem);
                let target = next_power_of_two(required).min(shared.max_cap);
                if target > cap {
                    let begin_guard = shared.begin_lock.lock();
                    let grown = shared.resize(target);
                    drop(begin_guard);
                    grown?;
                    free = shared.free_bytes();
                }
            }
            if free < elem {
                // Full at the limit: wait for a consumer to make room. The
                // predicate also watches the consumer count so a departing
                // last consumer cannot strand us.
                let guard = shared.on_popped.wait_until(guard, || {
                    shared.consumers.load(Ordering::Acquire) == 0 || !shared.is_full()
                });
                drop(guard);
                continue;
            }
            let take = remaining.len().min((free / elem) * elem);
            // SAFETY: end lock held, consumer count checked above keeps the
            // buffer live, `take` bounded by the free space.
            unsafe { shared.write_at_end(&remaining[..take]) };
            remaining = &remaining[take..];
            drop(guard);
            if take == elem {
                shared.on_pushed.signal();
            } else {
                shared.on_pushed.broadcast();
            }
        }
        Ok(())
    }
}

impl Clone for Producer {
    fn clone(&self) -> Self {
        let _guard = self.shared.end_lock.lock();
        self.shared.producers.fetch_add(1, Ordering::Release);
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl Drop for Producer {
    fn drop(&mut self) {
        let guard = self.shared.end_lock.lock();
        let remaining = self.shared.producers.fetch_sub(1, Ordering::AcqRel) - 1;
        drop(guard);
        if remaining == 0 {
            log::debug!("pipe: last producer detached");
            // Let blocked consumers drain and observe end-of-producers.
            self.shared.on_pushed.broadcast();
        }
    }
}

/// Reading handle of a pipe. Cloning attaches another consumer.
pub struct Consumer {
    shared: Arc<Shared>,
}

impl Consumer {
    /// Element size this pipe was created with.
    pub fn element_size(&self) -> usize {
        self.shared.element_size
    }

    /// Current backing capacity in bytes (sentinel included).
    pub fn capacity_bytes(&self) -> usize {
        let _guard = self.shared.begin_lock.lock();
        self.shared.cap.load(Ordering::Acquire)
    }

    /// Elements currently buffered.
    pub fn len(&self) -> usize {
        let _guard = self.shared.begin_lock.lock();
        self.shared.used_bytes() / self.shared.element_size
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pop whole elements, blocking until `out` is completely filled or the
    /// pipe yields nothing more (empty with no producer attached). Returns
    /// the number of elements read, which is less than requested only in
    /// the end-of-producers case.
    pub fn pop(&self, out: &mut [u8]) -> SyncResult<usize> {
        self.pop_inner(out, true)
    }

    /// Eagerly pop at most what is available right now, without blocking.
    /// Returns the number of elements read, zero included.
    pub fn pop_available(&self, out: &mut [u8]) -> SyncResult<usize> {
        self.pop_inner(out, false)
    }

    fn pop_inner(&self, out: &mut [u8], blocking: bool) -> SyncResult<usize> {
        let shared = &*self.shared;
        let elem = shared.element_size;
        if out.len() % elem != 0 {
            return Err(SyncError::InvalidArgument);
        }
        let mut read = 0usize;
        while read < out.len() {
            let mut guard = shared.begin_lock.lock();
            if blocking {
                while shared.used_bytes() == 0 {
                    if shared.producers.load(Ordering::Acquire) == 0 {
                        drop(guard);
                        return Ok(read / elem);
                    }
                    guard = shared.on_pushed.wait_until(guard, || {
                        shared.producers.load(Ordering::Acquire) == 0
                            || shared.used_bytes() != 0
                    });
                }
            } else if shared.used_bytes() == 0 {
                drop(guard);
                return Ok(read / elem);
            }
            let used = shared.used_bytes();
            let take = (out.len() - read).min((used / elem) * elem);
            // SAFETY: begin lock held and this handle keeps the consumer
            // count above zero, so the buffer is live; `take` is bounded by
            // the unread bytes.
            unsafe { shared.read_at_begin(&mut out[read..read + take]) };
            read += take;
            drop(guard);
            shared.maybe_shrink();
            if take == elem {
                shared.on_popped.signal();
            } else {
                shared.on_popped.broadcast();
            }
            if !blocking {
                break;
            }
        }
        Ok(read / elem)
    }
}

impl Clone for Consumer {
    fn clone(&self) -> Self {
        let _guard = self.shared.begin_lock.lock();
        self.shared.consumers.fetch_add(1, Ordering::Release);
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl Drop for Consumer {
    fn drop(&mut self) {
        // Both locks, end before begin, so no producer is mid-copy when the
        // buffer goes away.
        let end_guard = self.shared.end_lock.lock();
        let begin_guard = self.shared.begin_lock.lock();
        let remaining = self.shared.consumers.fetch_sub(1, Ordering::AcqRel) - 1;
        if remaining == 0 {
            // SAFETY: both locks held.
            unsafe { self.shared.release_buffer() };
            log::debug!("pipe: last consumer detached, buffer released");
        }
        drop(begin_guard);
        drop(end_guard);
        if remaining == 0 {
            // Blocked producers observe the consumer count and return.
            self.shared.on_popped.broadcast();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use alloc::vec::Vec;
    use static_assertions::const_assert;

    const_assert!(MIN_PIPE_CAPACITY.is_power_of_two());

    #[test]
    fn test_zero_element_size_rejected() {
        assert_eq!(create(0, 0).err(), Some(SyncError::InvalidArgument));
    }

    #[test]
    fn test_misaligned_slice_rejected() {
        let (tx, rx) = create(4, 0).unwrap();
        assert_eq!(tx.push(&[0u8; 6]), Err(SyncError::InvalidArgument));
        let mut out = [0u8; 6];
        assert_eq!(rx.pop_available(&mut out), Err(SyncError::InvalidArgument));
    }

    #[test]
    fn test_empty_push_is_noop() {
        let (tx, rx) = create(4, 0).unwrap();
        tx.push(&[]).unwrap();
        assert_eq!(rx.len(), 0);
    }

    #[test]
    fn test_single_thread_round_trip() {
        let (tx, rx) = create(1, 0).unwrap();
        let data: Vec<u8> = (0..64).collect();
        tx.push(&data).unwrap();
        let mut out = vec![0u8; 64];
        assert_eq!(rx.pop(&mut out).unwrap(), 64);
        assert_eq!(out, data);
    }

    #[test]
    fn test_growth_keeps_order_and_respects_bounds() {
        // Push far beyond the initial capacity with nobody popping: the
        // buffer must grow instead of blocking (unbounded pipe).
        let (tx, rx) = create(4, 0).unwrap();
        let mut data = Vec::new();
        for i in 0..2000u32 {
            data.extend_from_slice(&i.to_ne_bytes());
        }
        tx.push(&data).unwrap();
        assert!(rx.capacity_bytes() > MIN_PIPE_CAPACITY);
        assert!(rx.capacity_bytes().is_power_of_two());

        let mut out = vec![0u8; data.len()];
        assert_eq!(rx.pop(&mut out).unwrap(), 2000);
        assert_eq!(out, data);
    }

    #[test]
    fn test_shrink_never_below_minimum() {
        let (tx, rx) = create(4, 0).unwrap();
        let data = vec![7u8; 4096];
        tx.push(&data).unwrap();
        let grown = rx.capacity_bytes();
        assert!(grown >= 4096);
        let mut out = vec![0u8; 4096];
        rx.pop(&mut out).unwrap();
        // Draining must have shrunk the buffer, but not past the floor.
        assert!(rx.capacity_bytes() < grown);
        assert!(rx.capacity_bytes() >= MIN_PIPE_CAPACITY);
    }

    #[test]
    fn test_bounded_pipe_capacity_cap() {
        // limit = 63 elements of 4 bytes: max_cap is the next power of two
        // strictly above (63 + 1) * 4 = 256 bytes.
        let (tx, rx) = create(4, 63).unwrap();
        let data = vec![1u8; 256];
        tx.push(&data).unwrap();
        assert!(rx.capacity_bytes() <= 512);
        let mut out = vec![0u8; 256];
        assert_eq!(rx.pop(&mut out).unwrap(), 64);
    }

    #[test]
    fn test_pop_available_does_not_block() {
        let (tx, rx) = create(4, 0).unwrap();
        let mut out = [0u8; 8];
        assert_eq!(rx.pop_available(&mut out).unwrap(), 0);
        tx.push(&1u32.to_ne_bytes()).unwrap();
        assert_eq!(rx.pop_available(&mut out).unwrap(), 1);
        assert_eq!(out[..4], 1u32.to_ne_bytes());
    }

    #[test]
    fn test_clone_tracks_reference_counts() {
        let (tx, rx) = create(4, 0).unwrap();
        let tx2 = tx.clone();
        drop(tx);
        // One producer left: a blocking pop on an empty pipe would still
        // wait, so only check the surviving handles work.
        tx2.push(&5u32.to_ne_bytes()).unwrap();
        let mut out = [0u8; 4];
        assert_eq!(rx.pop(&mut out).unwrap(), 1);
    }
}
