//! # Physical Memory Layout
//!
//! Where RAM lives and which part of it the page allocator may hand out.

use crate::{HalError, HalResult, PhysAddr, PAGE_SIZE};
use static_assertions::const_assert;

/// Physical address where the kernel image is loaded (start of RAM)
pub const KERNBASE: u64 = 0x8000_0000;

/// Amount of RAM managed by the kernel
pub const PHYS_MEMORY_SIZE: u64 = 128 * 1024 * 1024;

/// End of usable RAM
pub const PHYSTOP: u64 = KERNBASE + PHYS_MEMORY_SIZE;

const_assert!(KERNBASE % PAGE_SIZE as u64 == 0);
const_assert!(PHYSTOP % PAGE_SIZE as u64 == 0);

/// A half-open range of physical memory `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhysExtent {
    /// First byte of the range
    pub start: PhysAddr,
    /// One past the last byte
    pub end: PhysAddr,
}

impl PhysExtent {
    /// Create a new extent
    pub fn new(start: PhysAddr, end: PhysAddr) -> HalResult<Self> {
        if end < start {
            return Err(HalError::InvalidParameter);
        }
        Ok(Self { start, end })
    }

    /// Extent running from `start` to the top of RAM.
    ///
    /// `start` is normally the first address past the kernel image.
    pub fn up_to_phystop(start: PhysAddr) -> HalResult<Self> {
        if start.as_u64() < KERNBASE {
            return Err(HalError::InvalidAddress);
        }
        Self::new(start, PhysAddr::new(PHYSTOP))
    }

    /// First page boundary inside the extent
    #[inline]
    pub fn first_page(&self) -> PhysAddr {
        self.start.page_round_up()
    }

    /// Number of whole pages that fit in the extent
    pub fn page_count(&self) -> usize {
        let first = self.first_page().as_u64();
        let end = self.end.as_u64();
        if first >= end {
            0
        } else {
            ((end - first) / PAGE_SIZE as u64) as usize
        }
    }

    /// Check if address is within this extent
    #[inline]
    pub fn contains(&self, addr: PhysAddr) -> bool {
        addr >= self.start && addr < self.end
    }
}
