//! Lock-free single-producer/single-consumer ring queue.
//!
//! A fixed-capacity array ring with one slot of slack: the producer is the
//! only writer of `tail`, the consumer the only writer of `head`, so no lock
//! is needed. The one-writer-per-index contract is enforced by ownership:
//! [`SpscQueue::split`] hands out exactly one [`SpscProducer`] and one
//! [`SpscConsumer`], neither of which is cloneable.
//!
//! Elements are copied in and out by value (`T: Copy`); a full push and an
//! empty pop report [`SyncError::NotReady`] instead of blocking.

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::cell::UnsafeCell;
use core::mem::MaybeUninit;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{SyncError, SyncResult};

struct Shared<T> {
    /// `depth + 1` slots; the extra sentinel slot keeps `head == tail`
    /// unambiguous with "empty".
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
    capacity: usize,
    /// Read index, written only by the consumer.
    head: AtomicUsize,
    /// Write index, written only by the producer.
    tail: AtomicUsize,
}

unsafe impl<T: Send> Send for Shared<T> {}
unsafe impl<T: Send> Sync for Shared<T> {}

/// A fixed-depth SPSC ring queue. Split it to use it.
pub struct SpscQueue<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Copy> SpscQueue<T> {
    /// Create a queue holding up to `depth` elements. A zero depth is a
    /// caller error.
    pub fn with_depth(depth: usize) -> SyncResult<Self> {
        if depth == 0 {
            return Err(SyncError::InvalidArgument);
        }
        let capacity = depth + 1;
        let mut slots = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            slots.push(UnsafeCell::new(MaybeUninit::uninit()));
        }
        Ok(Self {
            shared: Arc::new(Shared {
                slots: slots.into_boxed_slice(),
                capacity,
                head: AtomicUsize::new(0),
                tail: AtomicUsize::new(0),
            }),
        })
    }

    /// Hand out the two endpoint handles.
    pub fn split(self) -> (SpscProducer<T>, SpscConsumer<T>) {
        (
            SpscProducer {
                shared: self.shared.clone(),
            },
            SpscConsumer {
                shared: self.shared,
            },
        )
    }
}

/// The writing half of an [`SpscQueue`].
pub struct SpscProducer<T> {
    shared: Arc<Shared<T>>,
}

unsafe impl<T: Send> Send for SpscProducer<T> {}

impl<T: Copy> SpscProducer<T> {
    /// Copy `value` into the queue. Fails with [`SyncError::NotReady`] when
    /// the queue is full.
    pub fn push(&mut self, value: T) -> SyncResult<()> {
        let shared = &*self.shared;
        let tail = shared.tail.load(Ordering::Relaxed);
        let next_tail = (tail + 1) % shared.capacity;
        if next_tail == shared.head.load(Ordering::Acquire) {
            return Err(SyncError::NotReady);
        }
        // SAFETY: slot `tail` is outside [head, tail), so the consumer will
        // not read it until the tail store below publishes it.
        unsafe {
            (*shared.slots[tail].get()).write(value);
        }
        shared.tail.store(next_tail, Ordering::Release);
        Ok(())
    }

    /// Number of elements currently queued (racy snapshot).
    pub fn len(&self) -> usize {
        len_of(&self.shared)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The reading half of an [`SpscQueue`].
pub struct SpscConsumer<T> {
    shared: Arc<Shared<T>>,
}

unsafe impl<T: Send> Send for SpscConsumer<T> {}

impl<T: Copy> SpscConsumer<T> {
    /// Copy the oldest element out of the queue. Fails with
    /// [`SyncError::NotReady`] when the queue is empty.
    pub fn pop(&mut self) -> SyncResult<T> {
        let shared = &*self.shared;
        let head = shared.head.load(Ordering::Relaxed);
        if head == shared.tail.load(Ordering::Acquire) {
            return Err(SyncError::NotReady);
        }
        // SAFETY: head != tail, so slot `head` was published by a producer
        // store with Release ordering.
        let value = unsafe { (*shared.slots[head].get()).assume_init_read() };
        shared.head.store((head + 1) % shared.capacity, Ordering::Release);
        Ok(value)
    }

    /// Number of elements currently queued (racy snapshot).
    pub fn len(&self) -> usize {
        len_of(&self.shared)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn len_of<T>(shared: &Shared<T>) -> usize {
    let head = shared.head.load(Ordering::Acquire);
    let tail = shared.tail.load(Ordering::Acquire);
    (tail + shared.capacity - head) % shared.capacity
}
