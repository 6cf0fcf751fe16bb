//! Block device abstraction layer.
//!
//! The buffer cache talks to the disk driver only through [`BlockDevice`].
//! Transfers are always one whole block of [`BSIZE`] bytes.

use crate::BSIZE;
use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use core::sync::atomic::{AtomicU64, Ordering};
use spin::Mutex;

// ============================================================================
// Block Device Trait
// ============================================================================

/// Driver interface used by the buffer cache.
///
/// Both calls block the caller until the transfer is complete. The driver
/// owns error recovery; a transfer it cannot complete is fatal for the
/// kernel, so neither call reports failure.
pub trait BlockDevice: Send + Sync {
    /// Fill `buf` with block `blockno` of device `dev`
    fn read_block(&self, dev: u32, blockno: u32, buf: &mut [u8; BSIZE]);

    /// Store `buf` as block `blockno` of device `dev`
    fn write_block(&self, dev: u32, blockno: u32, buf: &[u8; BSIZE]);
}

impl<D: BlockDevice + ?Sized> BlockDevice for &D {
    fn read_block(&self, dev: u32, blockno: u32, buf: &mut [u8; BSIZE]) {
        (**self).read_block(dev, blockno, buf)
    }

    fn write_block(&self, dev: u32, blockno: u32, buf: &[u8; BSIZE]) {
        (**self).write_block(dev, blockno, buf)
    }
}

// ============================================================================
// Device Statistics
// ============================================================================

/// Transfer counters of a device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceStats {
    /// Blocks read
    pub blocks_read: u64,
    /// Blocks written
    pub blocks_written: u64,
}

// ============================================================================
// Memory Disk
// ============================================================================

/// RAM-backed block device.
///
/// Blocks are allocated on first write; reading a block that was never
/// written yields zeros. Any number of devices share one `MemoryDisk`,
/// told apart by the `dev` argument.
pub struct MemoryDisk {
    /// Written blocks keyed by (device, block number)
    blocks: Mutex<BTreeMap<(u32, u32), Box<[u8; BSIZE]>>>,
    /// Blocks read
    reads: AtomicU64,
    /// Blocks written
    writes: AtomicU64,
}

impl MemoryDisk {
    /// Create an empty (all zero) disk
    pub const fn new() -> Self {
        Self {
            blocks: Mutex::new(BTreeMap::new()),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    /// Store a block without counting it as a transfer
    pub fn preload(&self, dev: u32, blockno: u32, data: &[u8; BSIZE]) {
        self.blocks.lock().insert((dev, blockno), Box::new(*data));
    }

    /// Current on-disk contents of a block, without counting a transfer
    pub fn peek(&self, dev: u32, blockno: u32) -> [u8; BSIZE] {
        self.blocks
            .lock()
            .get(&(dev, blockno))
            .map_or([0; BSIZE], |block| **block)
    }

    /// Number of blocks ever written
    pub fn blocks_stored(&self) -> usize {
        self.blocks.lock().len()
    }

    /// Transfer counters
    pub fn stats(&self) -> DeviceStats {
        DeviceStats {
            blocks_read: self.reads.load(Ordering::Relaxed),
            blocks_written: self.writes.load(Ordering::Relaxed),
        }
    }
}

impl Default for MemoryDisk {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockDevice for MemoryDisk {
    fn read_block(&self, dev: u32, blockno: u32, buf: &mut [u8; BSIZE]) {
        match self.blocks.lock().get(&(dev, blockno)) {
            Some(block) => buf.copy_from_slice(&block[..]),
            None => buf.fill(0),
        }
        self.reads.fetch_add(1, Ordering::Relaxed);
    }

    fn write_block(&self, dev: u32, blockno: u32, buf: &[u8; BSIZE]) {
        self.blocks
            .lock()
            .entry((dev, blockno))
            .and_modify(|block| block.copy_from_slice(buf))
            .or_insert_with(|| Box::new(*buf));
        self.writes.fetch_add(1, Ordering::Relaxed);
    }
}

impl core::fmt::Debug for MemoryDisk {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MemoryDisk")
            .field("blocks_stored", &self.blocks_stored())
            .field("stats", &self.stats())
            .finish()
    }
}
