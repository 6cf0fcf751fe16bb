//! # Sable FS - Block Buffer Cache
//!
//! The lowest layer of the Sable filesystem: an in-memory cache of disk
//! blocks sitting directly on top of the block device driver.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │            Filesystem (log, inodes, dirs)            │
//! ├──────────────────────────────────────────────────────┤
//! │                    BufferCache                       │
//! │  ┌────────┐ ┌────────┐ ┌────────┐       ┌────────┐   │
//! │  │ shard 0│ │ shard 1│ │ shard 2│  ...  │shard K-1│  │
//! │  └────────┘ └────────┘ └────────┘       └────────┘   │
//! │       per-buffer SleepLock over block contents       │
//! ├──────────────────────────────────────────────────────┤
//! │                   BlockDevice                        │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! The cache serves two purposes:
//! - at most one in-memory copy of any disk block exists, so every user of
//!   a block sees the same bytes and access to them is serialized;
//! - popular blocks stay in memory, and the least recently released buffer
//!   is reused when a new block must be brought in.
//!
//! Buffers are spread over [`NBUCKET`] shards keyed by block number so that
//! acquires of unrelated blocks do not contend on a single lock. A shard
//! that runs out of free buffers steals one from another shard.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

#[cfg(test)]
extern crate std;

pub mod cache;
pub mod disk;

pub use cache::{BlockData, BlockKey, Buf, BufId, BufferCache, CacheStats, SlotInfo};
pub use disk::{BlockDevice, DeviceStats, MemoryDisk};

// ============================================================================
// Configuration
// ============================================================================

/// Size of a disk block in bytes
pub const BSIZE: usize = 1024;

/// Number of buffers in the default cache
pub const NBUF: usize = 30;

/// Number of shards in the default cache (prime, spreads block numbers)
pub const NBUCKET: usize = 13;

static_assertions::const_assert!(BSIZE.is_power_of_two());
static_assertions::const_assert!(NBUCKET > 0);
static_assertions::const_assert!(NBUF >= NBUCKET);

/// Buffer cache with the default sizes
pub type Bcache<D, P> = BufferCache<D, P, NBUF, NBUCKET>;
