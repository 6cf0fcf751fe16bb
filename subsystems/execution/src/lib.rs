//! # Sable Execution Subsystem
//!
//! The execution subsystem provides:
//! - Thread identity
//! - The [`Park`] hook through which blocking primitives suspend and wake threads
//! - Sleeping locks for sections that may block for a long time
//!
//! ## Key Principle
//!
//! The scheduler itself lives elsewhere. Everything in here talks to it only
//! through [`Park`], so the same locks run on the kernel scheduler and, with
//! the `std` feature, on host threads.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

#[cfg(any(test, feature = "std"))]
extern crate std;

pub mod park;
pub mod sync;

pub use park::Park;
#[cfg(any(test, feature = "std"))]
pub use park::StdPark;
pub use sync::{SleepLock, SleepLockGuard};

use core::sync::atomic::{AtomicU64, Ordering};
use static_assertions::assert_impl_all;

/// Unique identifier for threads
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(u64);

assert_impl_all!(ThreadId: Send, Sync, Copy);

impl ThreadId {
    /// Create a new thread ID
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the kernel idle thread ID
    pub const fn idle() -> Self {
        Self(0)
    }

    /// Wrap an ID handed out by the scheduler
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw ID value
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Default for ThreadId {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_ids_are_unique() {
        let a = ThreadId::new();
        let b = ThreadId::new();
        assert_ne!(a, b);
        assert_ne!(a, ThreadId::idle());
        assert_eq!(ThreadId::from_raw(a.as_u64()), a);
    }
}
