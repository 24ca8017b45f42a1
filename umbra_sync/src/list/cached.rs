//! List with entry recycling.
//!
//! A [`CachedList`] keeps the node allocations of popped entries in a pool
//! and reuses them for later pushes, so steady-state traffic does not touch
//! the platform allocator at all. Every node this structure ever allocates
//! is at any moment either linked into the live list or parked in the pool;
//! teardown returns all of them to the allocator.

use core::ptr::NonNull;
use spin::Mutex;

use super::{List, Node};
use crate::error::SyncResult;

/// Pool of spare node allocations, chained through their `next` fields.
struct NodePool<T> {
    head: Option<NonNull<Node<T>>>,
    len: usize,
}

unsafe impl<T: Send> Send for NodePool<T> {}

impl<T> NodePool<T> {
    const fn new() -> Self {
        Self { head: None, len: 0 }
    }

    fn push(&mut self, node: NonNull<Node<T>>) {
        Node::set_next(node, self.head);
        self.head = Some(node);
        self.len += 1;
    }

    fn pop(&mut self) -> Option<NonNull<Node<T>>> {
        let node = self.head?;
        self.head = Node::next_of(node);
        self.len -= 1;
        Some(node)
    }
}

impl<T> Drop for NodePool<T> {
    fn drop(&mut self) {
        // Pooled nodes carry no live data; only their memory goes back.
        while let Some(node) = self.pop() {
            unsafe { Node::release(node) };
        }
    }
}

/// A [`List`] that recycles its node structures instead of freeing them.
pub struct CachedList<T> {
    live: List<T>,
    cache: Mutex<NodePool<T>>,
}

impl<T> CachedList<T> {
    /// Create a new cached list with an empty pool.
    pub fn new() -> Self {
        Self {
            live: List::new(),
            cache: Mutex::new(NodePool::new()),
        }
    }

    /// Obtain a node for `data`: recycle one from the pool if available,
    /// otherwise ask the platform allocator.
    fn allocate_entry(&self, data: T) -> SyncResult<NonNull<Node<T>>> {
        let recycled = self.cache.lock().pop();
        match recycled {
            Some(node) => {
                Node::reset_links(node);
                Node::store_data(node, data);
                Ok(node)
            }
            None => Node::allocate(data),
        }
    }

    /// Park an emptied node in the pool for reuse.
    fn free_entry(&self, node: NonNull<Node<T>>) {
        Node::reset_links(node);
        self.cache.lock().push(node);
    }

    /// Append `data` at the back of the live list.
    pub fn push_back(&self, data: T) -> SyncResult<()> {
        let node = self.allocate_entry(data)?;
        self.live.lock().push_back_node(node);
        Ok(())
    }

    /// Prepend `data` at the front of the live list.
    pub fn push_front(&self, data: T) -> SyncResult<()> {
        let node = self.allocate_entry(data)?;
        self.live.lock().push_front_node(node);
        Ok(())
    }

    /// Remove and return the front entry; its node goes back to the pool.
    pub fn pop_front(&self) -> Option<T> {
        let node = self.live.lock().pop_front_node()?;
        // SAFETY: the node just left the live list, so its data is initialized
        // and nobody else can reach it.
        let data = unsafe { Node::take_data(node) };
        self.free_entry(node);
        Some(data)
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Number of nodes currently parked in the pool.
    pub fn cache_len(&self) -> usize {
        self.cache.lock().len
    }

    /// Drop every live entry, pooling the freed nodes.
    pub fn clear(&self) {
        loop {
            let node = self.live.lock().pop_front_node();
            match node {
                Some(node) => {
                    // SAFETY: freshly unlinked, data initialized.
                    drop(unsafe { Node::take_data(node) });
                    self.free_entry(node);
                }
                None => break,
            }
        }
    }
}

impl<T> Default for CachedList<T> {
    fn default() -> Self {
        Self::new()
    }
}

// Teardown: the live list's own Drop releases linked nodes (dropping their
// data), the pool's Drop releases the spares.

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    #[test]
    fn test_fifo_order() {
        let list = CachedList::new();
        for i in 0..8 {
            list.push_back(i).unwrap();
        }
        let popped: Vec<i32> = core::iter::from_fn(|| list.pop_front()).collect();
        assert_eq!(popped, (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn test_nodes_are_recycled() {
        let list = CachedList::new();
        for i in 0..4 {
            list.push_back(i).unwrap();
        }
        assert_eq!(list.cache_len(), 0);
        for _ in 0..4 {
            list.pop_front();
        }
        // All four nodes went to the pool, none to the allocator.
        assert_eq!(list.len(), 0);
        assert_eq!(list.cache_len(), 4);
        // Pushing again drains the pool before allocating.
        for i in 0..4 {
            list.push_back(i).unwrap();
        }
        assert_eq!(list.cache_len(), 0);
        assert_eq!(list.len(), 4);
    }

    #[test]
    fn test_every_node_in_exactly_one_place() {
        let list = CachedList::new();
        for i in 0..10 {
            list.push_back(i).unwrap();
        }
        for _ in 0..3 {
            list.pop_front();
        }
        list.push_front(99).unwrap();
        // 10 nodes ever allocated: 8 live, 2 pooled.
        assert_eq!(list.len() + list.cache_len(), 10);
    }

    #[test]
    fn test_clear_pools_all_nodes() {
        let list = CachedList::new();
        for i in 0..5 {
            list.push_back(i).unwrap();
        }
        list.clear();
        assert!(list.is_empty());
        assert_eq!(list.cache_len(), 5);
    }
}
