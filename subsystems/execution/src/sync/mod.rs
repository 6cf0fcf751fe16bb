//! # Synchronization
//!
//! Locks that may put the caller to sleep. Short critical sections use
//! `spin::Mutex` directly; these are for sections that can last across I/O.

pub mod sleeplock;

pub use sleeplock::{SleepLock, SleepLockGuard};
