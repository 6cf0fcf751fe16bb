//! # Buffer Cache
//!
//! Fixed pool of block buffers shared by the whole kernel.
//!
//! ## Design
//!
//! - **Shards**: buffers are partitioned into `NBUCKET` recency lists keyed
//!   by `blockno % NBUCKET`, each behind its own spinlock
//! - **LRU reuse**: a miss recycles the least recently released free buffer
//!   of the home shard
//! - **Steal**: if the home shard has no free buffer, one is taken from
//!   another shard under a single coordinator lock
//! - **Content lock**: each buffer's bytes sit behind a [`SleepLock`], so
//!   holders may sleep on disk I/O while holding a buffer
//!
//! [`SleepLock`]: sable_execution::SleepLock

pub mod buffer;
pub(crate) mod shard;

pub use buffer::{BlockData, Buf, BufId, BufferCache};

use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

// ============================================================================
// Block Key
// ============================================================================

/// Identity of a disk block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockKey {
    /// Device number
    pub dev: u32,
    /// Block number on the device
    pub blockno: u32,
}

impl BlockKey {
    /// Create new key
    pub const fn new(dev: u32, blockno: u32) -> Self {
        Self { dev, blockno }
    }

    /// Shard owning this block in a cache with `nbucket` shards
    #[inline]
    pub const fn shard(&self, nbucket: usize) -> usize {
        self.blockno as usize % nbucket
    }
}

impl fmt::Display for BlockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.dev, self.blockno)
    }
}

// ============================================================================
// Introspection
// ============================================================================

/// One entry of a shard's recency list.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotInfo {
    /// Buffer slot
    pub index: usize,
    /// Block the buffer holds
    pub key: Option<BlockKey>,
    /// Holders plus pins
    pub refcnt: u32,
}

// ============================================================================
// Cache Statistics
// ============================================================================

/// Snapshot of cache counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Acquires that found the block already cached
    pub hits: u64,
    /// Acquires that had to assign a buffer
    pub misses: u64,
    /// Misses served from the home shard
    pub recycles: u64,
    /// Misses served by taking a buffer from another shard
    pub steals: u64,
    /// Acquires that found no free buffer at home and went to the coordinator
    pub steal_attempts: u64,
    /// Blocks read from the device
    pub disk_reads: u64,
    /// Blocks written to the device
    pub disk_writes: u64,
}

impl CacheStats {
    /// Hit ratio in percent
    pub fn hit_ratio(&self) -> u64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0
        } else {
            self.hits * 100 / total
        }
    }
}

/// Live counters behind [`CacheStats`].
#[derive(Debug, Default)]
pub(crate) struct CacheCounters {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub recycles: AtomicU64,
    pub steals: AtomicU64,
    pub steal_attempts: AtomicU64,
    pub disk_reads: AtomicU64,
    pub disk_writes: AtomicU64,
}

impl CacheCounters {
    #[inline]
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            recycles: self.recycles.load(Ordering::Relaxed),
            steals: self.steals.load(Ordering::Relaxed),
            steal_attempts: self.steal_attempts.load(Ordering::Relaxed),
            disk_reads: self.disk_reads.load(Ordering::Relaxed),
            disk_writes: self.disk_writes.load(Ordering::Relaxed),
        }
    }
}
