//! # Sable Memory Subsystem
//!
//! The memory subsystem provides:
//! - A physical page allocator carved from a fixed extent at boot
//! - Per-page reference counts so pages can be shared between owners
//! - The copy-on-write primitive used by the fault handler and `fork`
//!
//! Physical memory is handed out one [`PAGE_SIZE`] page at a time.
//! Running out of pages is an ordinary, recoverable condition reported
//! as [`MemError::OutOfMemory`]; misuse of the allocator (freeing an
//! address it never handed out, double free) halts the kernel.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

#[cfg(test)]
extern crate std;

pub mod physical;

pub use physical::{AllocatorStats, PageAllocator};
pub use sable_hal::{PhysAddr, PhysExtent, PAGE_SIZE};

/// Memory subsystem result type
pub type MemResult<T> = Result<T, MemError>;

/// Memory subsystem errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemError {
    /// Out of memory
    OutOfMemory,
    /// Invalid address
    InvalidAddress,
    /// Invalid region
    InvalidRegion,
}

impl MemError {
    /// Human readable description
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OutOfMemory => "out of physical pages",
            Self::InvalidAddress => "address outside the managed extent",
            Self::InvalidRegion => "extent holds no whole page",
        }
    }
}

impl core::fmt::Display for MemError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
