// src/lib.rs
// Point d'entrée de la bibliothèque de synchronisation
#![no_std]

//! Synchronization primitives and concurrent containers for a freestanding
//! multiprocessor environment.
//!
//! There is no operating-system scheduler underneath this crate: "blocking"
//! means busy-polling a per-waiter flag while yielding the processor, and
//! every wake-up comes from another processor calling [`WaitQueue::signal`]
//! or [`WaitQueue::broadcast`]. The crate provides:
//!
//! - [`Spinlock`] / [`RawSpinlock`]: busy-wait mutual exclusion
//! - [`Once`]: one-shot initialization
//! - [`WaitQueue`]: a FIFO condition variable built on busy-polling
//! - [`ReentrantLock`]: a spinlock the owning processor may re-acquire
//! - [`List`]: a spinlock-protected doubly linked list
//! - [`CachedList`]: a list that recycles its node allocations
//! - [`SpscQueue`]: a lock-free single-producer/single-consumer ring
//! - [`pipe`]: a growable circular buffer with blocking push/pop and
//!   reference-counted producer/consumer handles
//!
//! The only services consumed from the environment are the global allocator
//! and the `spin` crate's lock for the small amounts of internal bookkeeping
//! state; everything else is implemented manually.

extern crate alloc;

pub mod cpu;
pub mod error;
pub mod list;
pub mod once;
pub mod pipe;
pub mod reentrant;
pub mod spinlock;
pub mod spsc;
pub mod wait_queue;

pub use cpu::CpuId;
pub use error::{SyncError, SyncResult};
pub use list::{CachedList, EntryRef, List};
pub use once::Once;
pub use reentrant::ReentrantLock;
pub use spinlock::{RawSpinlock, Spinlock, SpinlockGuard};
pub use spsc::{SpscConsumer, SpscProducer, SpscQueue};
pub use wait_queue::WaitQueue;
