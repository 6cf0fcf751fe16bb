//! # Page Arena
//!
//! The memory behind the managed extent. Either owned (a heap allocation
//! standing in for the extent) or borrowed from a direct map where physical
//! addresses are usable as pointers.

use crate::PAGE_SIZE;
use alloc::boxed::Box;
use alloc::vec::Vec;
use core::ptr::{self, NonNull};

/// One page of physical memory
#[repr(C, align(4096))]
pub struct PageFrame([u8; PAGE_SIZE]);

static_assertions::const_assert_eq!(core::mem::size_of::<PageFrame>(), PAGE_SIZE);

impl PageFrame {
    /// Zeroed frame
    pub const fn zeroed() -> Self {
        Self([0; PAGE_SIZE])
    }
}

/// Contiguous run of page frames.
pub struct PageArena {
    /// First frame
    base: NonNull<PageFrame>,
    /// Number of frames
    pages: usize,
    /// Was the memory allocated by us?
    owned: bool,
}

// SAFETY: the arena is plain memory; who may touch which frame is decided
// by the allocator's refcount and freelist locks.
unsafe impl Send for PageArena {}
unsafe impl Sync for PageArena {}

impl PageArena {
    /// Allocate `pages` zeroed frames on the heap
    pub fn new(pages: usize) -> Self {
        let frames: Box<[PageFrame]> = (0..pages)
            .map(|_| PageFrame::zeroed())
            .collect::<Vec<_>>()
            .into_boxed_slice();
        let raw = Box::into_raw(frames);
        Self {
            // SAFETY: Box::into_raw never returns null.
            base: unsafe { NonNull::new_unchecked(raw as *mut PageFrame) },
            pages,
            owned: true,
        }
    }

    /// Use memory that is already mapped at `base`.
    ///
    /// # Safety
    ///
    /// `base` must be page aligned and valid for reads and writes of
    /// `pages * PAGE_SIZE` bytes for as long as the arena lives, and nothing
    /// else may access that memory except through the arena.
    pub unsafe fn from_raw(base: NonNull<u8>, pages: usize) -> Self {
        debug_assert_eq!(base.as_ptr() as usize % PAGE_SIZE, 0);
        Self {
            base: base.cast(),
            pages,
            owned: false,
        }
    }

    /// Number of frames
    #[inline]
    pub fn pages(&self) -> usize {
        self.pages
    }

    /// Raw pointer to frame `index`
    #[inline]
    pub fn frame_ptr(&self, index: usize) -> *mut u8 {
        assert!(index < self.pages, "page arena: frame {} out of range", index);
        // SAFETY: index is in bounds of the allocation.
        unsafe { self.base.as_ptr().add(index) as *mut u8 }
    }

    /// Overwrite frame `index` with `byte`.
    ///
    /// # Safety
    ///
    /// No other reference to the frame may be live.
    pub unsafe fn fill(&self, index: usize, byte: u8) {
        // SAFETY: frame_ptr is valid for PAGE_SIZE bytes; exclusivity is on the caller.
        unsafe { ptr::write_bytes(self.frame_ptr(index), byte, PAGE_SIZE) };
    }

    /// Copy frame `src` over frame `dst`.
    ///
    /// # Safety
    ///
    /// `dst` must not be referenced elsewhere and nobody may write `src`
    /// during the copy.
    pub unsafe fn copy(&self, src: usize, dst: usize) {
        assert_ne!(src, dst);
        // SAFETY: distinct frames never overlap.
        unsafe { ptr::copy_nonoverlapping(self.frame_ptr(src), self.frame_ptr(dst), PAGE_SIZE) };
    }
}

impl Drop for PageArena {
    fn drop(&mut self) {
        if self.owned {
            let slice = ptr::slice_from_raw_parts_mut(self.base.as_ptr(), self.pages);
            // SAFETY: produced by Box::into_raw in `new` with the same length.
            drop(unsafe { Box::from_raw(slice) });
        }
    }
}

impl core::fmt::Debug for PageArena {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PageArena")
            .field("base", &self.base)
            .field("pages", &self.pages)
            .field("owned", &self.owned)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owned_arena_is_page_aligned() {
        let arena = PageArena::new(3);
        assert_eq!(arena.pages(), 3);
        for i in 0..3 {
            assert_eq!(arena.frame_ptr(i) as usize % PAGE_SIZE, 0);
        }
        assert_eq!(arena.frame_ptr(1) as usize - arena.frame_ptr(0) as usize, PAGE_SIZE);
    }

    #[test]
    fn test_fill_and_copy() {
        let arena = PageArena::new(2);
        unsafe {
            arena.fill(0, 0xAB);
            arena.fill(1, 0x00);
            arena.copy(0, 1);
            let dst = core::slice::from_raw_parts(arena.frame_ptr(1), PAGE_SIZE);
            assert!(dst.iter().all(|&b| b == 0xAB));
        }
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_frame_out_of_range() {
        let arena = PageArena::new(1);
        arena.frame_ptr(1);
    }
}
