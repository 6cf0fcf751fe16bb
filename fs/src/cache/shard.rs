//! # Shard Recency List
//!
//! Circular doubly linked list of buffer slots ordered by release time.
//! The links live in a node table indexed by slot, with one extra sentinel
//! node at index `nbuf`: `sentinel.next` is the most recently released
//! buffer, `sentinel.prev` the least recently released one.
//!
//! Every shard owns a full node table but only the slots currently assigned
//! to it are linked in. A slot is linked into exactly one shard at a time,
//! so its key and reference count are always read and written under that
//! shard's guard.

use super::BlockKey;
use alloc::vec::Vec;

/// Link node and metadata of one buffer slot.
#[derive(Debug, Clone, Copy)]
struct Node {
    /// Towards the most recently released end
    prev: usize,
    /// Towards the least recently released end
    next: usize,
    /// Block held by the buffer, if it ever held one
    key: Option<BlockKey>,
    /// Holders plus pins
    refcnt: u32,
    /// Is the slot linked into this list?
    linked: bool,
}

impl Node {
    const fn unlinked() -> Self {
        Self {
            prev: 0,
            next: 0,
            key: None,
            refcnt: 0,
            linked: false,
        }
    }
}

/// Recency list of one shard.
#[derive(Debug)]
pub struct Shard {
    /// Slot nodes followed by the sentinel
    nodes: Vec<Node>,
}

impl Shard {
    /// Empty list able to hold slots `0..nbuf`
    pub fn new(nbuf: usize) -> Self {
        let mut nodes = alloc::vec![Node::unlinked(); nbuf + 1];
        nodes[nbuf].prev = nbuf;
        nodes[nbuf].next = nbuf;
        nodes[nbuf].linked = true;
        Self { nodes }
    }

    #[inline]
    fn head(&self) -> usize {
        self.nodes.len() - 1
    }

    /// Number of buffers assigned to this shard
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.iter_mru().count()
    }

    /// Does the shard hold no buffers?
    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.iter_mru().next().is_none()
    }

    /// Is slot `index` linked into this shard?
    #[inline]
    pub fn contains(&self, index: usize) -> bool {
        index < self.head() && self.nodes[index].linked
    }

    fn node(&self, index: usize) -> &Node {
        assert!(self.contains(index), "shard: slot {} not linked", index);
        &self.nodes[index]
    }

    fn node_mut(&mut self, index: usize) -> &mut Node {
        assert!(self.contains(index), "shard: slot {} not linked", index);
        &mut self.nodes[index]
    }

    /// Key of a linked slot
    pub fn key(&self, index: usize) -> Option<BlockKey> {
        self.node(index).key
    }

    /// Reference count of a linked slot
    pub fn refcnt(&self, index: usize) -> u32 {
        self.node(index).refcnt
    }

    /// Mutable reference count of a linked slot
    pub fn refcnt_mut(&mut self, index: usize) -> &mut u32 {
        &mut self.node_mut(index).refcnt
    }

    /// Give a linked slot a new identity
    pub fn assign(&mut self, index: usize, key: BlockKey, refcnt: u32) {
        let node = self.node_mut(index);
        node.key = Some(key);
        node.refcnt = refcnt;
    }

    /// Slots from most to least recently released
    pub fn iter_mru(&self) -> impl Iterator<Item = usize> + '_ {
        let head = self.head();
        let mut cursor = self.nodes[head].next;
        core::iter::from_fn(move || {
            if cursor == head {
                return None;
            }
            let index = cursor;
            cursor = self.nodes[index].next;
            Some(index)
        })
    }

    /// Slots from least to most recently released
    pub fn iter_lru(&self) -> impl Iterator<Item = usize> + '_ {
        let head = self.head();
        let mut cursor = self.nodes[head].prev;
        core::iter::from_fn(move || {
            if cursor == head {
                return None;
            }
            let index = cursor;
            cursor = self.nodes[index].prev;
            Some(index)
        })
    }

    /// Slot holding `key`
    pub fn find(&self, key: BlockKey) -> Option<usize> {
        self.iter_mru().find(|&i| self.nodes[i].key == Some(key))
    }

    /// Least recently released slot nobody references
    pub fn find_free(&self) -> Option<usize> {
        self.iter_lru().find(|&i| self.nodes[i].refcnt == 0)
    }

    /// Link an unlinked slot at the most recently released end
    pub fn push_mru(&mut self, index: usize, key: Option<BlockKey>, refcnt: u32) {
        let head = self.head();
        self.link_after(head, index, key, refcnt);
    }

    /// Link an unlinked slot at the least recently released end
    pub fn push_lru(&mut self, index: usize, key: Option<BlockKey>, refcnt: u32) {
        let tail = self.nodes[self.head()].prev;
        self.link_after(tail, index, key, refcnt);
    }

    fn link_after(&mut self, at: usize, index: usize, key: Option<BlockKey>, refcnt: u32) {
        assert!(index < self.head(), "shard: slot {} out of range", index);
        assert!(!self.nodes[index].linked, "shard: slot {} already linked", index);

        let next = self.nodes[at].next;
        self.nodes[index] = Node {
            prev: at,
            next,
            key,
            refcnt,
            linked: true,
        };
        self.nodes[at].next = index;
        self.nodes[next].prev = index;
    }

    /// Unlink a slot, returning its key and reference count
    pub fn remove(&mut self, index: usize) -> (Option<BlockKey>, u32) {
        let node = *self.node(index);
        self.nodes[node.prev].next = node.next;
        self.nodes[node.next].prev = node.prev;
        self.nodes[index] = Node::unlinked();
        (node.key, node.refcnt)
    }

    /// Move a linked slot to the most recently released end
    pub fn touch(&mut self, index: usize) {
        let (key, refcnt) = self.remove(index);
        self.push_mru(index, key, refcnt);
    }
}
