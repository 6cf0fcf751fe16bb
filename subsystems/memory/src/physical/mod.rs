//! # Physical Memory Management
//!
//! Page-granular allocation of physical memory with shared ownership.

pub mod arena;
pub mod freelist;
pub mod page_allocator;

pub use arena::{PageArena, PageFrame};
pub use page_allocator::PageAllocator;

/// Byte written over a page when it is handed out
pub const ALLOC_JUNK: u8 = 0x05;

/// Byte written over a page when it returns to the freelist
pub const FREE_JUNK: u8 = 0x01;

static_assertions::const_assert_ne!(ALLOC_JUNK, FREE_JUNK);

/// Allocator statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllocatorStats {
    /// Pages handed out by `allocate` or by a copy-on-write duplicate
    pub allocations: u64,
    /// Pages returned to the freelist
    pub deallocations: u64,
    /// Copy-on-write duplicates performed
    pub copies: u64,
    /// Pages in the managed extent
    pub total_pages: usize,
}

impl AllocatorStats {
    /// Pages currently owned by someone
    pub fn in_use(&self) -> u64 {
        self.allocations - self.deallocations
    }
}
