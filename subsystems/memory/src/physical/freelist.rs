//! # Page Freelist
//!
//! LIFO list of free page indices, linked through a side table instead of
//! through the free pages themselves.

use alloc::vec;
use alloc::boxed::Box;

/// End of list marker
const NIL: usize = usize::MAX;

/// Singly linked stack of page indices.
#[derive(Debug)]
pub struct FreeList {
    /// Most recently freed page
    head: usize,
    /// Next link for every page index
    next: Box<[usize]>,
}

impl FreeList {
    /// Empty list able to hold indices `0..capacity`
    pub fn new(capacity: usize) -> Self {
        Self {
            head: NIL,
            next: vec![NIL; capacity].into_boxed_slice(),
        }
    }

    /// Push a page onto the list
    #[inline]
    pub fn push(&mut self, index: usize) {
        self.next[index] = self.head;
        self.head = index;
    }

    /// Pop the most recently pushed page
    #[inline]
    pub fn pop(&mut self) -> Option<usize> {
        if self.head == NIL {
            return None;
        }
        let index = self.head;
        self.head = self.next[index];
        self.next[index] = NIL;
        Some(index)
    }

    /// Is the list empty?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head == NIL
    }

    /// Count entries by walking the list
    pub fn len(&self) -> usize {
        let mut count = 0;
        let mut cursor = self.head;
        while cursor != NIL {
            count += 1;
            cursor = self.next[cursor];
        }
        count
    }
}
