//! Wait queue
//!
//! A FIFO condition variable for an environment without a scheduler: a
//! waiter cannot sleep, so it busy-polls a per-waiter flag, yielding the
//! processor each iteration. Waiters are woken strictly oldest-first.
//!
//! [`WaitQueue::wait`] implements the classic monitor discipline: it is
//! correct when every writer of the awaited predicate holds the same
//! [`Spinlock`] the waiter passes in, because the waiter is enqueued before
//! that lock is released. When waiter and signaler deliberately use
//! different locks (the pipe guards its two ends separately), that guarantee
//! is unavailable; such callers use [`WaitQueue::wait_until`], whose spin
//! loop re-polls an atomic predicate so a wake-up published through another
//! lock cannot be missed.

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, Ordering};
use spin::Mutex;

use crate::cpu;
use crate::spinlock::{Spinlock, SpinlockGuard};

/// Per-waiter parking flag. Lives only for the duration of one wait.
struct Waiter {
    triggered: AtomicBool,
}

impl Waiter {
    fn new() -> Self {
        Self {
            triggered: AtomicBool::new(false),
        }
    }
}

/// A FIFO queue of busy-polling waiters.
pub struct WaitQueue {
    waiters: Mutex<VecDeque<Arc<Waiter>>>,
}

impl WaitQueue {
    /// Create a new, empty wait queue.
    pub const fn new() -> Self {
        Self {
            waiters: Mutex::new(VecDeque::new()),
        }
    }

    /// Atomically release `guard`, wait until signaled, then re-acquire the
    /// lock and return the new guard.
    ///
    /// The waiter is enqueued before the lock is released, so a signaler
    /// that makes the awaited condition true while holding the same lock is
    /// guaranteed to observe this waiter. There is no timeout: the call only
    /// returns once another caller signals or broadcasts.
    pub fn wait<'a, T>(&self, guard: SpinlockGuard<'a, T>) -> SpinlockGuard<'a, T> {
        let waiter = Arc::new(Waiter::new());
        self.waiters.lock().push_back(waiter.clone());

        let lock: &'a Spinlock<T> = guard.spinlock();
        drop(guard);

        while !waiter.triggered.load(Ordering::Acquire) {
            cpu::relax();
        }
        lock.lock()
    }

    /// Like [`wait`](Self::wait), but the spin loop also polls `ready` and
    /// returns as soon as either the waiter is signaled or `ready` reports
    /// true. `ready` must only read atomics; it runs without any lock held.
    ///
    /// A waiter that leaves because of the predicate withdraws itself from
    /// the queue so it cannot swallow a later signal meant for someone else.
    pub fn wait_until<'a, T, P>(&self, guard: SpinlockGuard<'a, T>, ready: P) -> SpinlockGuard<'a, T>
    where
        P: Fn() -> bool,
    {
        let waiter = Arc::new(Waiter::new());
        self.waiters.lock().push_back(waiter.clone());

        let lock: &'a Spinlock<T> = guard.spinlock();
        drop(guard);

        while !waiter.triggered.load(Ordering::Acquire) && !ready() {
            cpu::relax();
        }

        if !waiter.triggered.load(Ordering::Acquire) {
            // Left on the predicate. If the waiter is still queued nobody
            // signaled it; dequeue it. If it is gone, a signal raced us and
            // already consumed it, which is equivalent to a normal wake-up.
            let mut queue = self.waiters.lock();
            if let Some(pos) = queue.iter().position(|w| Arc::ptr_eq(w, &waiter)) {
                queue.remove(pos);
            }
        }
        lock.lock()
    }

    /// Wake the oldest waiter, if any.
    pub fn signal(&self) {
        let woken = self.waiters.lock().pop_front();
        if let Some(waiter) = woken {
            waiter.triggered.store(true, Ordering::Release);
        }
    }

    /// Wake every current waiter.
    pub fn broadcast(&self) {
        let mut queue = self.waiters.lock();
        while let Some(waiter) = queue.pop_front() {
            waiter.triggered.store(true, Ordering::Release);
        }
    }

    /// Number of waiters currently parked.
    pub fn waiter_count(&self) -> usize {
        self.waiters.lock().len()
    }
}

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
    }
}
