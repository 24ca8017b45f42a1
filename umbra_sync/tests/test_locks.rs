//! Lock and wait-queue tests with real contention.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use umbra_sync::{CpuId, ReentrantLock, Spinlock, WaitQueue};

#[test]
fn test_spinlock_serializes_increments() {
    const THREADS: usize = 8;
    const PER_THREAD: usize = 1000;

    let counter = Arc::new(Spinlock::new(0u64));
    let mut handles = Vec::new();
    for _ in 0..THREADS {
        let counter = counter.clone();
        handles.push(thread::spawn(move || {
            for _ in 0..PER_THREAD {
                *counter.lock() += 1;
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(*counter.lock(), (THREADS * PER_THREAD) as u64);
}

#[test]
fn test_reentrant_lock_blocks_other_context_until_release() {
    let lock = Arc::new(ReentrantLock::new());
    lock.lock_as(CpuId(0));
    // Re-entry by the owner must not deadlock.
    lock.lock_as(CpuId(0));

    let acquired = Arc::new(AtomicBool::new(false));
    let other = {
        let lock = lock.clone();
        let acquired = acquired.clone();
        thread::spawn(move || {
            lock.lock_as(CpuId(1));
            acquired.store(true, Ordering::Release);
            lock.unlock_as(CpuId(1));
        })
    };

    thread::sleep(Duration::from_millis(50));
    assert!(
        !acquired.load(Ordering::Acquire),
        "a different processor acquired a held lock"
    );

    lock.unlock_as(CpuId(0));
    other.join().unwrap();
    assert!(acquired.load(Ordering::Acquire));
}

#[test]
fn test_wait_queue_wakes_in_fifo_order() {
    let lock = Arc::new(Spinlock::new(()));
    let queue = Arc::new(WaitQueue::new());
    let order = Arc::new(std::sync::Mutex::new(Vec::new()));

    // Park three waiters in a known order, using the queue length to
    // sequence the enqueues deterministically.
    let mut handles = Vec::new();
    for id in 0..3u32 {
        while queue.waiter_count() < id as usize {
            thread::yield_now();
        }
        let lock = lock.clone();
        let queue_t = queue.clone();
        let order = order.clone();
        handles.push(thread::spawn(move || {
            let guard = lock.lock();
            let _guard = queue_t.wait(guard);
            order.lock().unwrap().push(id);
        }));
        while queue.waiter_count() < (id + 1) as usize {
            thread::yield_now();
        }
    }

    for expected in 1..=3usize {
        queue.signal();
        while order.lock().unwrap().len() < expected {
            thread::yield_now();
        }
    }
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
}

#[test]
fn test_signal_wakes_exactly_one() {
    let lock = Arc::new(Spinlock::new(()));
    let queue = Arc::new(WaitQueue::new());
    let woken = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..4 {
        let lock = lock.clone();
        let queue = queue.clone();
        let woken = woken.clone();
        handles.push(thread::spawn(move || {
            let guard = lock.lock();
            let _guard = queue.wait(guard);
            woken.fetch_add(1, Ordering::AcqRel);
        }));
    }
    while queue.waiter_count() < 4 {
        thread::yield_now();
    }

    queue.signal();
    while woken.load(Ordering::Acquire) < 1 {
        thread::yield_now();
    }
    // The other three stay parked: signal consumed exactly one waiter.
    thread::sleep(Duration::from_millis(30));
    assert_eq!(woken.load(Ordering::Acquire), 1);
    assert_eq!(queue.waiter_count(), 3);

    queue.broadcast();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(woken.load(Ordering::Acquire), 4);
}

#[test]
fn test_monitor_discipline_round_trip() {
    // Classic condition-variable usage: the predicate is only written under
    // the same lock the waiter holds.
    let state = Arc::new(Spinlock::new(0u32));
    let queue = Arc::new(WaitQueue::new());

    let waiter = {
        let state = state.clone();
        let queue = queue.clone();
        thread::spawn(move || {
            let mut guard = state.lock();
            while *guard == 0 {
                guard = queue.wait(guard);
            }
            *guard
        })
    };

    while queue.waiter_count() == 0 {
        thread::yield_now();
    }
    {
        let mut guard = state.lock();
        *guard = 7;
    }
    queue.signal();
    assert_eq!(waiter.join().unwrap(), 7);
}
