//! CPU-reentrant lock.
//!
//! A spinlock augmented with the identity of the owning processor, so the
//! owner may call [`lock`](ReentrantLock::lock) again without deadlocking.
//! There is no hold counter: however many times the owner re-enters, a
//! single [`unlock`](ReentrantLock::unlock) releases the lock. The lock is
//! not fair, and a non-owner has no try-acquire path.

use core::sync::atomic::{AtomicU32, Ordering};

use crate::cpu::{self, CpuId};
use crate::spinlock::RawSpinlock;

/// Sentinel stored while nobody owns the lock.
const NO_OWNER: u32 = u32::MAX;

/// A spinlock that the owning processor may re-acquire.
pub struct ReentrantLock {
    lock: RawSpinlock,
    owner: AtomicU32,
}

impl ReentrantLock {
    /// Create a new, unowned lock.
    pub const fn new() -> Self {
        Self {
            lock: RawSpinlock::new(),
            owner: AtomicU32::new(NO_OWNER),
        }
    }

    /// Acquire as the calling processor, per the registered identity source
    /// (the boot processor while none is registered).
    pub fn lock(&self) {
        self.lock_as(cpu::current());
    }

    /// Release as the calling processor.
    pub fn unlock(&self) {
        self.unlock_as(cpu::current());
    }

    /// Acquire on behalf of `cpu`. Returns immediately if `cpu` already owns
    /// the lock; otherwise busy-waits for the underlying spinlock.
    pub fn lock_as(&self, cpu: CpuId) {
        if self.owner.load(Ordering::Acquire) == cpu.0 {
            // Ré-entrée : le verrou est déjà à nous.
            return;
        }
        self.lock.acquire();
        self.owner.store(cpu.0, Ordering::Release);
    }

    /// Release on behalf of `cpu`, which must be the current owner. A
    /// release by a non-owner is a programming error.
    pub fn unlock_as(&self, cpu: CpuId) {
        debug_assert_eq!(
            self.owner.load(Ordering::Acquire),
            cpu.0,
            "reentrant lock released by a processor that does not own it"
        );
        self.owner.store(NO_OWNER, Ordering::Release);
        self.lock.release();
    }

    /// Identity of the current owner, if any.
    pub fn owner(&self) -> Option<CpuId> {
        match self.owner.load(Ordering::Acquire) {
            NO_OWNER => None,
            id => Some(CpuId(id)),
        }
    }
}

impl Default for ReentrantLock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reenter_same_cpu() {
        let lock = ReentrantLock::new();
        lock.lock_as(CpuId(3));
        // Second acquisition by the owner must not deadlock.
        lock.lock_as(CpuId(3));
        assert_eq!(lock.owner(), Some(CpuId(3)));
        lock.unlock_as(CpuId(3));
        assert_eq!(lock.owner(), None);
    }

    #[test]
    fn test_default_identity() {
        let lock = ReentrantLock::new();
        lock.lock();
        assert_eq!(lock.owner(), Some(cpu::current()));
        lock.unlock();
    }
}
