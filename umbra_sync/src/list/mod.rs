//! Spinlock-protected doubly linked list.
//!
//! Nodes are individual heap allocations owned by the list that links them;
//! an [`EntryRef`] is a non-owning handle to one linked entry, usable for
//! O(1) removal. Each list stamps its own id into the nodes it links, and
//! removal checks the stamp, so a handle cannot silently splice a node out
//! of the wrong list.
//!
//! Every operation exists in two forms: the locking form on [`List`], and
//! the pre-locked form on [`RawList`], reached through the guard returned by
//! [`List::lock`]; holding the guard *is* holding the lock, so batching
//! several operations under one acquisition is safe by construction.

mod cached;

pub use cached::CachedList;

use core::alloc::Layout;
use core::convert::Infallible;
use core::mem::MaybeUninit;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{SyncError, SyncResult};
use crate::spinlock::{Spinlock, SpinlockGuard};

/// Stamp meaning "not linked into any list".
const UNLINKED: usize = 0;

/// Source of per-list stamps. Starts above [`UNLINKED`].
static NEXT_LIST_ID: AtomicUsize = AtomicUsize::new(1);

/// One heap-allocated link in a list.
///
/// The data slot is only initialized while the node is linked (or freshly
/// allocated on its way into a list); pooled nodes in a [`CachedList`] keep
/// the slot uninitialized.
pub(crate) struct Node<T> {
    next: Option<NonNull<Node<T>>>,
    prev: Option<NonNull<Node<T>>>,
    list_id: usize,
    data: MaybeUninit<T>,
}

impl<T> Node<T> {
    /// Allocate an unlinked node holding `data`. Allocator failure is
    /// reported instead of aborting.
    pub(crate) fn allocate(data: T) -> SyncResult<NonNull<Node<T>>> {
        let layout = Layout::new::<Node<T>>();
        let raw = unsafe { alloc::alloc::alloc(layout) } as *mut Node<T>;
        let Some(node) = NonNull::new(raw) else {
            return Err(SyncError::OutOfMemory);
        };
        unsafe {
            node.as_ptr().write(Node {
                next: None,
                prev: None,
                list_id: UNLINKED,
                data: MaybeUninit::new(data),
            });
        }
        Ok(node)
    }

    /// Move the data out of an unlinked node, leaving the slot uninitialized.
    ///
    /// # Safety
    ///
    /// The node's data slot must be initialized, and must not be read again
    /// until rewritten.
    pub(crate) unsafe fn take_data(node: NonNull<Node<T>>) -> T {
        (*node.as_ptr()).data.assume_init_read()
    }

    /// Return a node's memory to the platform allocator.
    ///
    /// # Safety
    ///
    /// The node must be unlinked and its data slot must already have been
    /// taken or dropped.
    pub(crate) unsafe fn release(node: NonNull<Node<T>>) {
        alloc::alloc::dealloc(node.as_ptr() as *mut u8, Layout::new::<Node<T>>());
    }

    /// Reset the link fields of a node about to enter a pool or a list.
    pub(crate) fn reset_links(node: NonNull<Node<T>>) {
        unsafe {
            let n = node.as_ptr();
            (*n).next = None;
            (*n).prev = None;
            (*n).list_id = UNLINKED;
        }
    }

    /// Write a fresh value into a pooled node's (uninitialized) data slot.
    pub(crate) fn store_data(node: NonNull<Node<T>>, data: T) {
        unsafe {
            (*node.as_ptr()).data.write(data);
        }
    }

    pub(crate) fn next_of(node: NonNull<Node<T>>) -> Option<NonNull<Node<T>>> {
        unsafe { (*node.as_ptr()).next }
    }

    pub(crate) fn set_next(node: NonNull<Node<T>>, next: Option<NonNull<Node<T>>>) {
        unsafe {
            (*node.as_ptr()).next = next;
        }
    }
}

/// Non-owning handle to an entry currently linked into a list.
pub struct EntryRef<T> {
    node: NonNull<Node<T>>,
}

impl<T> Clone for EntryRef<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for EntryRef<T> {}

impl<T> PartialEq for EntryRef<T> {
    fn eq(&self, other: &Self) -> bool {
        self.node == other.node
    }
}

impl<T> Eq for EntryRef<T> {}

/// The unlocked list state. Obtained through [`List::lock`]; every method
/// here is a "caller already holds the lock" operation.
pub struct RawList<T> {
    front: Option<NonNull<Node<T>>>,
    back: Option<NonNull<Node<T>>>,
    count: usize,
    id: usize,
}

unsafe impl<T: Send> Send for RawList<T> {}

impl<T> RawList<T> {
    fn new() -> Self {
        Self {
            front: None,
            back: None,
            count: 0,
            id: NEXT_LIST_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Number of linked entries.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Link an already-allocated node at the front.
    pub(crate) fn push_front_node(&mut self, node: NonNull<Node<T>>) {
        unsafe {
            let n = node.as_ptr();
            (*n).prev = None;
            (*n).next = self.front;
            (*n).list_id = self.id;
            match self.front {
                Some(front) => (*front.as_ptr()).prev = Some(node),
                None => {
                    debug_assert!(self.back.is_none(), "empty list with a back entry");
                    self.back = Some(node);
                }
            }
            self.front = Some(node);
        }
        self.count += 1;
    }

    /// Link an already-allocated node at the back.
    pub(crate) fn push_back_node(&mut self, node: NonNull<Node<T>>) {
        unsafe {
            let n = node.as_ptr();
            (*n).next = None;
            (*n).prev = self.back;
            (*n).list_id = self.id;
            match self.back {
                Some(back) => (*back.as_ptr()).next = Some(node),
                None => {
                    debug_assert!(self.front.is_none(), "empty list with a front entry");
                    self.front = Some(node);
                }
            }
            self.back = Some(node);
        }
        self.count += 1;
    }

    /// Splice a node out of the link chain without touching its data.
    ///
    /// # Safety
    ///
    /// `node` must currently be linked into this list.
    unsafe fn unlink(&mut self, node: NonNull<Node<T>>) {
        let n = node.as_ptr();
        debug_assert_eq!((*n).list_id, self.id, "entry is not linked into this list");
        debug_assert!(self.count > 0, "removal from a list whose count is zero");
        match (*n).prev {
            Some(prev) => (*prev.as_ptr()).next = (*n).next,
            None => self.front = (*n).next,
        }
        match (*n).next {
            Some(next) => (*next.as_ptr()).prev = (*n).prev,
            None => self.back = (*n).prev,
        }
        (*n).next = None;
        (*n).prev = None;
        (*n).list_id = UNLINKED;
        self.count -= 1;
        debug_assert!(
            (self.count == 0) == (self.front.is_none() && self.back.is_none()),
            "list count disagrees with its endpoints"
        );
    }

    /// Unlink and return the front node, data still inside.
    pub(crate) fn pop_front_node(&mut self) -> Option<NonNull<Node<T>>> {
        let node = self.front?;
        unsafe { self.unlink(node) };
        Some(node)
    }

    /// Unlink and return the back node, data still inside.
    pub(crate) fn pop_back_node(&mut self) -> Option<NonNull<Node<T>>> {
        let node = self.back?;
        unsafe { self.unlink(node) };
        Some(node)
    }

    /// Allocate a node for `data` and link it at the front.
    pub fn push_front(&mut self, data: T) -> SyncResult<EntryRef<T>> {
        let node = Node::allocate(data)?;
        self.push_front_node(node);
        Ok(EntryRef { node })
    }

    /// Allocate a node for `data` and link it at the back.
    pub fn push_back(&mut self, data: T) -> SyncResult<EntryRef<T>> {
        let node = Node::allocate(data)?;
        self.push_back_node(node);
        Ok(EntryRef { node })
    }

    /// Remove the front entry and return its data.
    pub fn pop_front(&mut self) -> Option<T> {
        let node = self.pop_front_node()?;
        let data = unsafe { Node::take_data(node) };
        unsafe { Node::release(node) };
        Some(data)
    }

    /// Remove the back entry and return its data.
    pub fn pop_back(&mut self) -> Option<T> {
        let node = self.pop_back_node()?;
        let data = unsafe { Node::take_data(node) };
        unsafe { Node::release(node) };
        Some(data)
    }

    /// Peek at the front entry without removing it.
    pub fn front(&self) -> Option<&T> {
        self.front
            .map(|node| unsafe { (*node.as_ptr()).data.assume_init_ref() })
    }

    /// Peek at the back entry without removing it.
    pub fn back(&self) -> Option<&T> {
        self.back
            .map(|node| unsafe { (*node.as_ptr()).data.assume_init_ref() })
    }

    /// Handle to the front entry.
    pub fn front_entry(&self) -> Option<EntryRef<T>> {
        self.front.map(|node| EntryRef { node })
    }

    /// Handle to the back entry.
    pub fn back_entry(&self) -> Option<EntryRef<T>> {
        self.back.map(|node| EntryRef { node })
    }

    /// Read the data behind an entry handle.
    ///
    /// # Safety
    ///
    /// `entry` must refer to an entry currently linked into this list.
    pub unsafe fn get(&self, entry: EntryRef<T>) -> &T {
        let n = entry.node.as_ptr();
        debug_assert_eq!((*n).list_id, self.id, "entry is not linked into this list");
        (*n).data.assume_init_ref()
    }

    /// Remove an arbitrary entry and return its data.
    ///
    /// # Safety
    ///
    /// `entry` must refer to an entry currently linked into this list, and
    /// must not be used again afterwards.
    pub unsafe fn remove(&mut self, entry: EntryRef<T>) -> T {
        self.unlink(entry.node);
        let data = Node::take_data(entry.node);
        Node::release(entry.node);
        data
    }

    /// Walk the list front to back, invoking `f` on each entry.
    ///
    /// Each entry's successor is captured *before* `f` runs, so `f` may
    /// remove (and thereby free) the entry it was handed. Removing any other
    /// entry from inside `f` is not supported. Stops at the first error and
    /// returns it.
    pub fn try_for_each<E, F>(&mut self, mut f: F) -> Result<(), E>
    where
        F: FnMut(&mut Self, EntryRef<T>) -> Result<(), E>,
    {
        let mut cursor = self.front;
        while let Some(node) = cursor {
            cursor = unsafe { (*node.as_ptr()).next };
            f(self, EntryRef { node })?;
        }
        Ok(())
    }

    /// Keep only the entries for which `keep` returns true.
    pub fn retain<F>(&mut self, mut keep: F)
    where
        F: FnMut(&T) -> bool,
    {
        let _: Result<(), Infallible> = self.try_for_each(|list, entry| {
            // SAFETY: `entry` is the live entry for this iteration step.
            if !keep(unsafe { list.get(entry) }) {
                drop(unsafe { list.remove(entry) });
            }
            Ok(())
        });
    }

    /// Remove every entry, dropping the data.
    pub fn clear(&mut self) {
        while self.pop_front().is_some() {}
    }
}

impl<T> Drop for RawList<T> {
    fn drop(&mut self) {
        self.clear();
    }
}

/// Guard over the unlocked list state; see [`List::lock`].
pub type ListGuard<'a, T> = SpinlockGuard<'a, RawList<T>>;

/// A doubly linked list guarded by one spinlock.
pub struct List<T> {
    inner: Spinlock<RawList<T>>,
}

impl<T> List<T> {
    /// Create a new, empty list.
    pub fn new() -> Self {
        Self {
            inner: Spinlock::new(RawList::new()),
        }
    }

    /// Take the list's lock. Every [`RawList`] operation is available on the
    /// returned guard.
    pub fn lock(&self) -> ListGuard<'_, T> {
        self.inner.lock()
    }

    pub fn push_front(&self, data: T) -> SyncResult<EntryRef<T>> {
        self.lock().push_front(data)
    }

    pub fn push_back(&self, data: T) -> SyncResult<EntryRef<T>> {
        self.lock().push_back(data)
    }

    pub fn pop_front(&self) -> Option<T> {
        self.lock().pop_front()
    }

    pub fn pop_back(&self) -> Option<T> {
        self.lock().pop_back()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Locked peek at the front entry, handed to `f` under the lock.
    pub fn with_front<R, F>(&self, f: F) -> R
    where
        F: FnOnce(Option<&T>) -> R,
    {
        f(self.lock().front())
    }

    /// Locked peek at the back entry, handed to `f` under the lock.
    pub fn with_back<R, F>(&self, f: F) -> R
    where
        F: FnOnce(Option<&T>) -> R,
    {
        f(self.lock().back())
    }

    /// Locked [`RawList::remove`].
    ///
    /// # Safety
    ///
    /// Same contract: `entry` must be linked into this list and unused
    /// afterwards.
    pub unsafe fn remove(&self, entry: EntryRef<T>) -> T {
        self.lock().remove(entry)
    }

    /// Locked [`RawList::try_for_each`].
    pub fn try_for_each<E, F>(&self, f: F) -> Result<(), E>
    where
        F: FnMut(&mut RawList<T>, EntryRef<T>) -> Result<(), E>,
    {
        self.lock().try_for_each(f)
    }

    /// Locked [`RawList::retain`].
    pub fn retain<F>(&self, keep: F)
    where
        F: FnMut(&T) -> bool,
    {
        self.lock().retain(keep)
    }

    /// Locked [`RawList::clear`].
    pub fn clear(&self) {
        self.lock().clear()
    }
}

impl<T> Default for List<T> {
    fn default() -> Self {
        Self::new()
    }
}
