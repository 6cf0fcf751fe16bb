//! # Reference-Counted Page Allocator
//!
//! Hands out whole pages from a fixed extent. Every page carries a reference
//! count so that several owners (for example a parent and child after `fork`)
//! can share it until one of them needs to write.
//!
//! Two spinlocks guard the allocator:
//! - the refcount lock, over the table of per-page counts
//! - the freelist lock, over the list of free pages
//!
//! When both are needed the refcount lock is taken first.

use super::freelist::FreeList;
use super::{AllocatorStats, PageArena, ALLOC_JUNK, FREE_JUNK};
use crate::{MemError, MemResult, PhysAddr, PhysExtent, PAGE_SIZE};
use alloc::boxed::Box;
use alloc::vec;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicU64, Ordering};
use spin::Mutex;

/// Physical page allocator with per-page reference counts.
pub struct PageAllocator {
    /// First page in the extent
    base: PhysAddr,
    /// End of the last whole page
    end: PhysAddr,
    /// Memory backing the extent
    arena: PageArena,
    /// Free pages
    freelist: Mutex<FreeList>,
    /// Owners per page; zero means free
    refcounts: Mutex<Box<[u32]>>,
    /// Statistics
    allocations: AtomicU64,
    deallocations: AtomicU64,
    copies: AtomicU64,
}

impl PageAllocator {
    /// Create an allocator over `extent`, backed by heap memory
    pub fn new(extent: PhysExtent) -> MemResult<Self> {
        let pages = extent.page_count();
        if pages == 0 {
            return Err(MemError::InvalidRegion);
        }
        Ok(Self::with_arena(extent, PageArena::new(pages)))
    }

    /// Create an allocator over memory that is mapped at its own physical
    /// address (identity or direct map).
    ///
    /// # Safety
    ///
    /// Every page of `extent` must be mapped read/write at the address equal
    /// to its physical address, and must not be used by anything else for
    /// the lifetime of the allocator.
    pub unsafe fn from_direct_map(extent: PhysExtent) -> MemResult<Self> {
        let pages = extent.page_count();
        let base = NonNull::new(extent.first_page().as_u64() as usize as *mut u8)
            .ok_or(MemError::InvalidAddress)?;
        if pages == 0 {
            return Err(MemError::InvalidRegion);
        }
        // SAFETY: forwarded to the caller.
        let arena = unsafe { PageArena::from_raw(base, pages) };
        Ok(Self::with_arena(extent, arena))
    }

    fn with_arena(extent: PhysExtent, arena: PageArena) -> Self {
        let pages = arena.pages();
        let base = extent.first_page();
        let mut freelist = FreeList::new(pages);

        // Push in ascending order; the highest page is handed out first.
        for index in 0..pages {
            // SAFETY: the allocator is not shared yet.
            unsafe { arena.fill(index, FREE_JUNK) };
            freelist.push(index);
        }

        log::info!(
            "Page allocator initialized: {} pages in [{}, {})",
            pages,
            base,
            base.add((pages * PAGE_SIZE) as u64)
        );

        Self {
            base,
            end: base.add((pages * PAGE_SIZE) as u64),
            arena,
            freelist: Mutex::new(freelist),
            refcounts: Mutex::new(vec![0u32; pages].into_boxed_slice()),
            allocations: AtomicU64::new(0),
            deallocations: AtomicU64::new(0),
            copies: AtomicU64::new(0),
        }
    }

    /// Translate an address into a page index
    pub fn index_of(&self, pa: PhysAddr) -> MemResult<usize> {
        if !pa.is_page_aligned() || pa < self.base || pa >= self.end {
            return Err(MemError::InvalidAddress);
        }
        Ok(((pa.as_u64() - self.base.as_u64()) / PAGE_SIZE as u64) as usize)
    }

    #[inline]
    fn addr_of(&self, index: usize) -> PhysAddr {
        self.base.add((index * PAGE_SIZE) as u64)
    }

    /// Index of `pa`, or halt: the caller handed us something we never gave out.
    fn page_index(&self, pa: PhysAddr, who: &str) -> usize {
        match self.index_of(pa) {
            Ok(index) => index,
            Err(_) => {
                log::error!("{}: bad page address {}", who, pa);
                panic!("{}: bad page address {}", who, pa);
            }
        }
    }

    /// Give a page that was just taken off the freelist its first owner.
    ///
    /// The refcount lock must be held; `refcounts` is its guarded table.
    fn init_allocated(&self, refcounts: &mut [u32], index: usize) {
        debug_assert_eq!(refcounts[index], 0);
        refcounts[index] = 1;
        self.allocations.fetch_add(1, Ordering::Relaxed);
    }

    /// Allocate one page.
    ///
    /// The page comes back with a refcount of one and filled with junk.
    pub fn allocate(&self) -> MemResult<PhysAddr> {
        let index = match self.freelist.lock().pop() {
            Some(index) => index,
            None => {
                log::debug!("kalloc: out of pages");
                return Err(MemError::OutOfMemory);
            }
        };

        let mut refcounts = self.refcounts.lock();
        self.init_allocated(&mut refcounts, index);
        drop(refcounts);

        // SAFETY: the page is off the freelist and the caller has not seen it yet.
        unsafe { self.arena.fill(index, ALLOC_JUNK) };
        Ok(self.addr_of(index))
    }

    /// Drop one reference to `pa`; the last one returns it to the freelist.
    ///
    /// Halts on addresses outside the extent, unaligned addresses, and pages
    /// that are already free.
    pub fn free(&self, pa: PhysAddr) {
        let index = self.page_index(pa, "kfree");

        let mut refcounts = self.refcounts.lock();
        match refcounts[index] {
            0 => {
                drop(refcounts);
                log::error!("kfree: page {} is not allocated", pa);
                panic!("kfree: page {} is not allocated", pa);
            }
            1 => {}
            _ => {
                refcounts[index] -= 1;
                return;
            }
        }

        refcounts[index] = 0;
        drop(refcounts);

        // Fill with junk to catch dangling refs.
        // SAFETY: the last owner just gave the page up and it is not on the
        // freelist yet, so nobody else can reach it.
        unsafe { self.arena.fill(index, FREE_JUNK) };
        self.freelist.lock().push(index);

        self.deallocations.fetch_add(1, Ordering::Relaxed);
    }

    /// Add an owner to an allocated page
    pub fn add_ref(&self, pa: PhysAddr) {
        let index = self.page_index(pa, "refpa");
        let mut refcounts = self.refcounts.lock();
        if refcounts[index] == 0 {
            drop(refcounts);
            log::error!("refpa: page {} is not allocated", pa);
            panic!("refpa: page {} is not allocated", pa);
        }
        match refcounts[index].checked_add(1) {
            Some(count) => refcounts[index] = count,
            None => {
                drop(refcounts);
                log::error!("refpa: page {} has too many owners", pa);
                panic!("refpa: refcount overflow on page {}", pa);
            }
        }
    }

    /// Current number of owners of `pa`
    pub fn ref_count(&self, pa: PhysAddr) -> u32 {
        let index = self.page_index(pa, "getref");
        self.refcounts.lock()[index]
    }

    /// Get a page the caller may write to.
    ///
    /// A sole owner gets `pa` back untouched. A shared page is copied into a
    /// fresh page, the caller's reference to the original is dropped and the
    /// copy is returned with a refcount of one.
    pub fn duplicate_if_shared(&self, pa: PhysAddr) -> MemResult<PhysAddr> {
        let index = self.page_index(pa, "copypa");

        let mut refcounts = self.refcounts.lock();
        if refcounts[index] <= 1 {
            return Ok(pa);
        }

        let copy = match self.freelist.lock().pop() {
            Some(copy) => copy,
            None => {
                log::debug!("copypa: out of pages duplicating {}", pa);
                return Err(MemError::OutOfMemory);
            }
        };
        self.init_allocated(&mut refcounts, copy);
        // No junk fill: the copy overwrites the whole page.
        // SAFETY: `copy` is brand new; shared pages are not written by their owners.
        unsafe { self.arena.copy(index, copy) };
        refcounts[index] -= 1;
        drop(refcounts);

        self.copies.fetch_add(1, Ordering::Relaxed);
        log::trace!("copypa: {} -> {}", pa, self.addr_of(copy));
        Ok(self.addr_of(copy))
    }

    /// Number of pages on the freelist.
    ///
    /// Walks the whole list; meant for diagnostics and tests.
    pub fn free_count(&self) -> usize {
        self.freelist.lock().len()
    }

    /// Number of pages in the extent
    pub fn total_pages(&self) -> usize {
        self.arena.pages()
    }

    /// Get statistics
    pub fn stats(&self) -> AllocatorStats {
        AllocatorStats {
            allocations: self.allocations.load(Ordering::Relaxed),
            deallocations: self.deallocations.load(Ordering::Relaxed),
            copies: self.copies.load(Ordering::Relaxed),
            total_pages: self.arena.pages(),
        }
    }

    /// Contents of `pa`.
    ///
    /// # Safety
    ///
    /// The caller must own a reference to the page and no owner may write it
    /// while the returned borrow is live.
    pub unsafe fn page_bytes(&self, pa: PhysAddr) -> &[u8; PAGE_SIZE] {
        let index = self.page_index(pa, "page_bytes");
        // SAFETY: frame is PAGE_SIZE bytes; sharing rules are on the caller.
        unsafe { &*(self.arena.frame_ptr(index) as *const [u8; PAGE_SIZE]) }
    }

    /// Mutable contents of `pa`.
    ///
    /// # Safety
    ///
    /// The caller must be the only owner (refcount of one, for example after
    /// [`duplicate_if_shared`](Self::duplicate_if_shared)) and hold no other
    /// borrow of the page.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn page_bytes_mut(&self, pa: PhysAddr) -> &mut [u8; PAGE_SIZE] {
        let index = self.page_index(pa, "page_bytes_mut");
        // SAFETY: frame is PAGE_SIZE bytes; exclusivity is on the caller.
        unsafe { &mut *(self.arena.frame_ptr(index) as *mut [u8; PAGE_SIZE]) }
    }
}

impl core::fmt::Debug for PageAllocator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PageAllocator")
            .field("base", &self.base)
            .field("end", &self.end)
            .field("stats", &self.stats())
            .finish()
    }
}
