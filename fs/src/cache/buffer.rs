//! # Buffer Pool
//!
//! The cache proper: a fixed array of buffers, the shard lists that index
//! them, and the handles through which callers use them.
//!
//! ## Locking
//!
//! - shard guard: key and reference count of every buffer linked into the
//!   shard, and the shard's recency order
//! - coordinator: serializes cross-shard steals; always taken before any
//!   shard guard, and no thread ever holds two shard guards
//! - content lock: a [`SleepLock`] per buffer over the block bytes and the
//!   `valid` flag; held for as long as the caller keeps its [`Buf`]
//!
//! A buffer with a non-zero reference count never changes identity, so a
//! caller that bumped the count under the shard guard can drop the guard
//! and sleep on the content lock.

use super::shard::Shard;
use super::{BlockKey, CacheCounters, CacheStats, SlotInfo};
use crate::disk::BlockDevice;
use crate::BSIZE;
use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt;
use core::mem::ManuallyDrop;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};
use sable_execution::{Park, SleepLock, SleepLockGuard};
use spin::Mutex;

/// Contents of one block
pub type BlockData = [u8; BSIZE];

/// One slot of the pool.
struct Buffer<P: Park> {
    /// Do the contents match the disk?
    ///
    /// Read and written under the content lock, except that it is cleared
    /// under the shard guard when the buffer is given a new block, at which
    /// point nobody holds the content lock.
    valid: AtomicBool,
    /// Block contents
    data: SleepLock<BlockData, P>,
}

// ============================================================================
// Buffer Cache
// ============================================================================

/// Sharded LRU cache of `NBUF` disk blocks over `NBUCKET` shards.
pub struct BufferCache<D: BlockDevice, P: Park, const NBUF: usize, const NBUCKET: usize> {
    /// Disk driver
    device: D,
    /// Recency lists, home of block `b` is `b % NBUCKET`
    shards: [Mutex<Shard>; NBUCKET],
    /// Coordinator for cross-shard steals
    steal_lock: Mutex<()>,
    /// Buffer storage, indexed by slot
    buffers: Box<[Buffer<P>]>,
    /// Statistics
    counters: CacheCounters,
}

impl<D: BlockDevice, P: Park, const NBUF: usize, const NBUCKET: usize>
    BufferCache<D, P, NBUF, NBUCKET>
{
    /// Build the pool on top of `device`.
    ///
    /// Every buffer starts out holding no block, linked into shard 0.
    pub fn new(device: D) -> Self {
        assert!(NBUCKET > 0, "binit: no shards");
        assert!(NBUF > 0, "binit: no buffers");

        let shards: [Mutex<Shard>; NBUCKET] =
            core::array::from_fn(|_| Mutex::new(Shard::new(NBUF)));
        {
            let mut first = shards[0].lock();
            for index in 0..NBUF {
                first.push_mru(index, None, 0);
            }
        }

        let buffers = (0..NBUF)
            .map(|_| Buffer {
                valid: AtomicBool::new(false),
                data: SleepLock::new([0; BSIZE], "buffer"),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        log::info!(
            "bcache: {} buffers of {} bytes in {} shards",
            NBUF,
            BSIZE,
            NBUCKET
        );

        Self {
            device,
            shards,
            steal_lock: Mutex::new(()),
            buffers,
            counters: CacheCounters::default(),
        }
    }

    /// The underlying device
    pub fn device(&self) -> &D {
        &self.device
    }

    /// Get exclusive use of the buffer for block `blockno` of `dev`.
    ///
    /// Sleeps while another caller holds the same block. The returned
    /// buffer may not hold the block's contents yet; see [`Self::read`].
    ///
    /// # Panics
    ///
    /// Panics if the block is not cached and every buffer is in use.
    pub fn acquire(&self, dev: u32, blockno: u32) -> Buf<'_, D, P, NBUF, NBUCKET> {
        let key = BlockKey::new(dev, blockno);
        let home = key.shard(NBUCKET);

        let index = match self.lookup_or_recycle(key, home) {
            Some(index) => index,
            None => self.steal(key, home),
        };
        log::trace!("bget: {} -> buffer {}", key, index);

        let guard = self.buffers[index].data.lock();
        Buf {
            cache: self,
            index,
            key,
            guard: ManuallyDrop::new(guard),
        }
    }

    /// Find `key` in its home shard, or give it the least recently released
    /// free buffer there.
    fn lookup_or_recycle(&self, key: BlockKey, home: usize) -> Option<usize> {
        let mut shard = self.shards[home].lock();

        if let Some(index) = shard.find(key) {
            *shard.refcnt_mut(index) += 1;
            CacheCounters::bump(&self.counters.hits);
            return Some(index);
        }

        let index = shard.find_free()?;
        shard.assign(index, key, 1);
        self.buffers[index].valid.store(false, Ordering::Release);
        CacheCounters::bump(&self.counters.misses);
        CacheCounters::bump(&self.counters.recycles);
        Some(index)
    }

    /// Take a free buffer from another shard and bring it home for `key`.
    fn steal(&self, key: BlockKey, home: usize) -> usize {
        CacheCounters::bump(&self.counters.steal_attempts);
        let coordinator = self.steal_lock.lock();

        // The home guard was dropped before the coordinator was taken.
        if let Some(index) = self.lookup_or_recycle(key, home) {
            return index;
        }

        if let Some((index, donor)) = self.take_from_donor(home) {
            return self.adopt(index, key, home, donor);
        }

        drop(coordinator);
        log::error!("bget: no free buffer for {} in {} shards", key, NBUCKET);
        panic!("bget: no buffers");
    }

    /// Unlink the least recently released free buffer of the first shard
    /// after `home` that has one. The caller holds the coordinator.
    fn take_from_donor(&self, home: usize) -> Option<(usize, usize)> {
        (1..NBUCKET)
            .map(|offset| (home + offset) % NBUCKET)
            .find_map(|donor| {
                let mut shard = self.shards[donor].lock();
                let index = shard.find_free()?;
                shard.remove(index);
                Some((index, donor))
            })
    }

    /// Link the unlinked buffer `index` into the home shard as `key`.
    fn adopt(&self, index: usize, key: BlockKey, home: usize, donor: usize) -> usize {
        self.buffers[index].valid.store(false, Ordering::Release);

        let mut shard = self.shards[home].lock();

        // Recycles in the home shard do not take the coordinator.
        if let Some(existing) = shard.find(key) {
            shard.push_lru(index, None, 0);
            *shard.refcnt_mut(existing) += 1;
            CacheCounters::bump(&self.counters.hits);
            return existing;
        }

        shard.push_mru(index, Some(key), 1);
        CacheCounters::bump(&self.counters.misses);
        CacheCounters::bump(&self.counters.steals);
        log::debug!(
            "bget: buffer {} moved from shard {} to shard {} for {}",
            index,
            donor,
            home,
            key
        );
        index
    }

    /// Make sure `buf` holds the block's contents, reading the disk if it
    /// does not.
    pub fn read<'b>(&self, buf: &'b mut Buf<'_, D, P, NBUF, NBUCKET>) -> &'b mut BlockData {
        self.check_owner(buf);

        let valid = &self.buffers[buf.index].valid;
        if !valid.load(Ordering::Acquire) {
            let key = buf.key;
            self.device.read_block(key.dev, key.blockno, &mut buf.guard);
            valid.store(true, Ordering::Release);
            CacheCounters::bump(&self.counters.disk_reads);
        }
        &mut buf.guard
    }

    /// Return a buffer holding the contents of block `blockno` of `dev`.
    pub fn bread(&self, dev: u32, blockno: u32) -> Buf<'_, D, P, NBUF, NBUCKET> {
        let mut buf = self.acquire(dev, blockno);
        self.read(&mut buf);
        buf
    }

    /// Write the contents of `buf` to disk.
    pub fn write(&self, buf: &Buf<'_, D, P, NBUF, NBUCKET>) {
        self.check_owner(buf);
        if !buf.holding() {
            log::error!("bwrite: buffer {} ({}) not locked by caller", buf.index, buf.key);
            panic!("bwrite");
        }

        self.device.write_block(buf.key.dev, buf.key.blockno, &buf.guard);
        CacheCounters::bump(&self.counters.disk_writes);
    }

    /// Give up a buffer.
    ///
    /// Same as dropping it, but checks the caller still holds the lock.
    pub fn release(&self, buf: Buf<'_, D, P, NBUF, NBUCKET>) {
        self.check_owner(&buf);
        if !buf.holding() {
            log::error!("brelse: buffer {} ({}) not locked by caller", buf.index, buf.key);
            panic!("brelse");
        }
        drop(buf);
    }

    /// Drop one reference. Runs after the content lock is released.
    fn unref(&self, index: usize, key: BlockKey) {
        let mut shard = self.shards[key.shard(NBUCKET)].lock();
        debug_assert_eq!(shard.key(index), Some(key));

        let refcnt = shard.refcnt_mut(index);
        if *refcnt == 0 {
            drop(shard);
            log::error!("brelse: buffer {} ({}) has no references", index, key);
            panic!("brelse: refcnt underflow");
        }
        *refcnt -= 1;
        if *refcnt == 0 {
            // No one is waiting for it.
            shard.touch(index);
        }
    }

    /// Keep the buffer `id` from being reused after its holder releases it.
    ///
    /// The buffer must currently be referenced.
    pub fn pin(&self, id: BufId) {
        let mut shard = self.shards[id.key.shard(NBUCKET)].lock();
        if !Self::refers_to(&shard, id) || shard.refcnt(id.index) == 0 {
            drop(shard);
            log::error!("bpin: buffer {} ({}) is not held", id.index, id.key);
            panic!("bpin");
        }
        *shard.refcnt_mut(id.index) += 1;
    }

    /// Undo one [`Self::pin`].
    pub fn unpin(&self, id: BufId) {
        let mut shard = self.shards[id.key.shard(NBUCKET)].lock();
        if !Self::refers_to(&shard, id) || shard.refcnt(id.index) == 0 {
            drop(shard);
            log::error!("bunpin: buffer {} ({}) is not pinned", id.index, id.key);
            panic!("bunpin");
        }
        *shard.refcnt_mut(id.index) -= 1;
    }

    fn refers_to(shard: &Shard, id: BufId) -> bool {
        shard.contains(id.index) && shard.key(id.index) == Some(id.key)
    }

    fn check_owner(&self, buf: &Buf<'_, D, P, NBUF, NBUCKET>) {
        assert!(
            core::ptr::eq(self, buf.cache),
            "bcache: buffer {} belongs to another cache",
            buf.index
        );
    }

    // ========================================================================
    // Diagnostics
    // ========================================================================

    /// Counter snapshot
    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot()
    }

    /// Contents of shard `shard`, most recently released first
    pub fn shard_members(&self, shard: usize) -> Vec<SlotInfo> {
        assert!(shard < NBUCKET, "bcache: shard {} out of range", shard);
        let list = self.shards[shard].lock();
        list.iter_mru()
            .map(|index| SlotInfo {
                index,
                key: list.key(index),
                refcnt: list.refcnt(index),
            })
            .collect()
    }

    /// Shard the buffer `index` is linked into, if it is not in transit
    pub fn shard_of(&self, index: usize) -> Option<usize> {
        self.shards
            .iter()
            .position(|shard| shard.lock().contains(index))
    }

    /// Number of buffers in the pool
    pub const fn capacity(&self) -> usize {
        NBUF
    }
}

impl<D: BlockDevice, P: Park, const NBUF: usize, const NBUCKET: usize> fmt::Debug
    for BufferCache<D, P, NBUF, NBUCKET>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferCache")
            .field("buffers", &NBUF)
            .field("shards", &NBUCKET)
            .field("stats", &self.stats())
            .finish()
    }
}

// ============================================================================
// Buffer Handles
// ============================================================================

/// Copyable name of a cached buffer, used to pin it beyond a [`Buf`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufId {
    index: usize,
    key: BlockKey,
}

impl BufId {
    /// Buffer slot
    pub fn index(&self) -> usize {
        self.index
    }

    /// Block held by the buffer
    pub fn key(&self) -> BlockKey {
        self.key
    }
}

/// A locked buffer. Dereferences to the block contents.
///
/// Dropping the handle releases the buffer.
pub struct Buf<'a, D: BlockDevice, P: Park, const NBUF: usize, const NBUCKET: usize> {
    cache: &'a BufferCache<D, P, NBUF, NBUCKET>,
    index: usize,
    key: BlockKey,
    guard: ManuallyDrop<SleepLockGuard<'a, BlockData, P>>,
}

impl<D: BlockDevice, P: Park, const NBUF: usize, const NBUCKET: usize>
    Buf<'_, D, P, NBUF, NBUCKET>
{
    /// Name for pinning
    pub fn id(&self) -> BufId {
        BufId {
            index: self.index,
            key: self.key,
        }
    }

    /// Block held by the buffer
    pub fn key(&self) -> BlockKey {
        self.key
    }

    /// Device number
    pub fn dev(&self) -> u32 {
        self.key.dev
    }

    /// Block number
    pub fn blockno(&self) -> u32 {
        self.key.blockno
    }

    /// Buffer slot
    pub fn index(&self) -> usize {
        self.index
    }

    /// Have the contents been read from disk?
    pub fn is_valid(&self) -> bool {
        self.cache.buffers[self.index].valid.load(Ordering::Acquire)
    }

    /// Does the calling thread hold the content lock?
    pub fn holding(&self) -> bool {
        self.guard.lock().holding()
    }
}

impl<D: BlockDevice, P: Park, const NBUF: usize, const NBUCKET: usize> Deref
    for Buf<'_, D, P, NBUF, NBUCKET>
{
    type Target = BlockData;

    fn deref(&self) -> &BlockData {
        &self.guard
    }
}

impl<D: BlockDevice, P: Park, const NBUF: usize, const NBUCKET: usize> DerefMut
    for Buf<'_, D, P, NBUF, NBUCKET>
{
    fn deref_mut(&mut self) -> &mut BlockData {
        &mut self.guard
    }
}

impl<D: BlockDevice, P: Park, const NBUF: usize, const NBUCKET: usize> Drop
    for Buf<'_, D, P, NBUF, NBUCKET>
{
    fn drop(&mut self) {
        // SAFETY: the guard is never used again.
        unsafe { ManuallyDrop::drop(&mut self.guard) };
        self.cache.unref(self.index, self.key);
    }
}

impl<D: BlockDevice, P: Park, const NBUF: usize, const NBUCKET: usize> fmt::Debug
    for Buf<'_, D, P, NBUF, NBUCKET>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buf")
            .field("index", &self.index)
            .field("key", &self.key)
            .field("valid", &self.is_valid())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::MemoryDisk;
    use sable_execution::StdPark;
    use std::panic::{self, AssertUnwindSafe};
    use std::thread;
    use std::time::Duration;
    use std::vec::Vec;

    type TestCache<D, const NBUF: usize, const NBUCKET: usize> =
        BufferCache<D, StdPark, NBUF, NBUCKET>;

    fn slot(index: usize, blockno: u32, refcnt: u32) -> SlotInfo {
        SlotInfo {
            index,
            key: Some(BlockKey::new(1, blockno)),
            refcnt,
        }
    }

    #[test]
    fn test_initial_layout() {
        let cache = TestCache::<_, 4, 2>::new(MemoryDisk::new());
        let first = cache.shard_members(0);
        assert_eq!(first.len(), 4);
        assert!(first.iter().all(|s| s.key.is_none() && s.refcnt == 0));
        assert!(cache.shard_members(1).is_empty());
        assert_eq!(cache.shard_of(3), Some(0));
        assert_eq!(cache.capacity(), 4);
    }

    #[test]
    fn test_read_hits_disk_once() {
        let disk = MemoryDisk::new();
        disk.preload(1, 5, &[0x5A; BSIZE]);
        let cache = TestCache::<_, 4, 1>::new(&disk);

        let buf = cache.bread(1, 5);
        assert!(buf.is_valid());
        assert_eq!(buf[0], 0x5A);
        cache.release(buf);

        let buf = cache.bread(1, 5);
        assert_eq!(buf[BSIZE - 1], 0x5A);
        drop(buf);

        assert_eq!(disk.stats().blocks_read, 1);
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.disk_reads), (1, 1, 1));
    }

    #[test]
    fn test_acquire_without_read_is_invalid() {
        let disk = MemoryDisk::new();
        let cache = TestCache::<_, 2, 1>::new(&disk);

        let mut buf = cache.acquire(1, 3);
        assert!(!buf.is_valid());
        assert_eq!(disk.stats().blocks_read, 0);

        cache.read(&mut buf);
        assert!(buf.is_valid());
        cache.read(&mut buf);
        assert_eq!(disk.stats().blocks_read, 1);
    }

    #[test]
    fn test_write_goes_to_disk() {
        let disk = MemoryDisk::new();
        let cache = TestCache::<_, 2, 1>::new(&disk);

        let mut buf = cache.bread(1, 8);
        buf[..4].copy_from_slice(b"sabl");
        cache.write(&buf);
        cache.release(buf);

        assert_eq!(&disk.peek(1, 8)[..4], b"sabl");
        assert_eq!(disk.stats().blocks_written, 1);
        assert_eq!(cache.stats().disk_writes, 1);
    }

    #[test]
    fn test_recycled_buffer_is_reread() {
        let disk = MemoryDisk::new();
        let cache = TestCache::<_, 1, 1>::new(&disk);

        let mut buf = cache.bread(1, 1);
        buf.fill(0xAA);
        let index = buf.index();
        drop(buf);

        // Same slot, different block: stale bytes must not leak through.
        let buf = cache.bread(1, 2);
        assert_eq!(buf.index(), index);
        assert!(buf.iter().all(|&b| b == 0));
        drop(buf);

        // The unwritten change to block 1 is gone.
        let buf = cache.bread(1, 1);
        assert!(buf.iter().all(|&b| b == 0));
        assert_eq!(disk.stats().blocks_read, 3);
    }

    #[test]
    fn test_lru_reuses_least_recently_released() {
        let disk = MemoryDisk::new();
        let cache = TestCache::<_, 3, 1>::new(&disk);

        let b1 = cache.bread(1, 1);
        let b2 = cache.bread(1, 2);
        let b3 = cache.bread(1, 3);
        let (i1, i2, i3) = (b1.index(), b2.index(), b3.index());

        cache.release(b2);
        cache.release(b1);
        cache.release(b3);
        assert_eq!(
            cache.shard_members(0),
            [slot(i3, 3, 0), slot(i1, 1, 0), slot(i2, 2, 0)]
        );

        let b4 = cache.bread(1, 4);
        assert_eq!(b4.index(), i2);

        // Block 1 is still cached.
        let b1 = cache.bread(1, 1);
        assert_eq!(b1.index(), i1);
        assert_eq!(disk.stats().blocks_read, 4);

        let b2 = cache.bread(1, 2);
        assert_eq!(b2.index(), i3);
        assert_eq!(disk.stats().blocks_read, 5);
    }

    #[test]
    fn test_release_moves_to_front_only_at_zero() {
        let cache = TestCache::<_, 2, 1>::new(MemoryDisk::new());

        let a = cache.acquire(1, 1);
        let ia = a.index();
        cache.pin(a.id());
        let b = cache.acquire(1, 2);
        let ib = b.index();
        drop(b);
        assert_eq!(cache.shard_members(0)[0], slot(ib, 2, 0));

        // Still pinned: refcnt drops to 1 and the order stays put.
        drop(a);
        assert_eq!(cache.shard_members(0), [slot(ib, 2, 0), slot(ia, 1, 1)]);
    }

    #[test]
    fn test_dropped_handle_is_released() {
        let cache = TestCache::<_, 2, 1>::new(MemoryDisk::new());
        {
            let _buf = cache.bread(1, 9);
        }
        assert!(cache.shard_members(0).iter().all(|s| s.refcnt == 0));
        let buf = cache.acquire(1, 9);
        assert!(buf.is_valid());
        assert!(buf.holding());
    }

    #[test]
    fn test_pinned_buffer_survives_eviction() {
        let cache = TestCache::<_, 2, 1>::new(MemoryDisk::new());

        let buf = cache.bread(1, 1);
        let id = buf.id();
        cache.pin(id);
        cache.release(buf);

        let other = cache.bread(1, 2);
        let other_index = other.index();
        cache.release(other);

        let buf = cache.acquire(1, 3);
        assert_eq!(buf.index(), other_index);
        drop(buf);

        cache.unpin(id);
        // Unpinning does not refresh recency: block 1 is now the LRU victim.
        let buf = cache.acquire(1, 4);
        assert_eq!(buf.index(), id.index());
        assert!(!buf.is_valid());
    }

    #[test]
    #[should_panic(expected = "bpin")]
    fn test_pin_unheld_panics() {
        let cache = TestCache::<_, 2, 1>::new(MemoryDisk::new());
        // The handle is gone once the statement ends.
        let id = cache.acquire(1, 1).id();
        cache.pin(id);
    }

    #[test]
    #[should_panic(expected = "bunpin")]
    fn test_unpin_below_zero_panics() {
        let cache = TestCache::<_, 2, 1>::new(MemoryDisk::new());
        let id = cache.acquire(1, 1).id();
        cache.unpin(id);
    }

    #[test]
    #[should_panic(expected = "bget: no buffers")]
    fn test_exhaustion_panics() {
        let cache = TestCache::<_, 2, 2>::new(MemoryDisk::new());
        let _a = cache.acquire(1, 0);
        let _b = cache.acquire(1, 1);
        let _c = cache.acquire(1, 2);
    }

    #[test]
    fn test_steal_from_other_shard() {
        let cache = TestCache::<_, 3, 3>::new(MemoryDisk::new());

        // Block 4 lives in shard 1, which starts out empty.
        let buf = cache.bread(1, 4);
        assert_eq!(cache.shard_of(buf.index()), Some(1));
        assert_eq!(cache.shard_members(1), [slot(buf.index(), 4, 1)]);
        assert_eq!(cache.shard_members(0).len(), 2);
        assert_eq!(cache.stats().steals, 1);
        drop(buf);

        // Second use is a plain hit in the new home.
        let again = cache.bread(1, 4);
        assert_eq!(cache.shard_members(1), [slot(again.index(), 4, 1)]);
        assert_eq!(cache.stats().steals, 1);
        assert_eq!(cache.stats().hits, 1);
    }

    type PairCache = TestCache<MemoryDisk, 3, 2>;
    type PairBuf<'a> = Buf<'a, MemoryDisk, StdPark, 3, 2>;

    /// Shard 0 full (blocks 0 and 2 held), block 1 cached but free in shard 1.
    fn home_full_with_spare(cache: &PairCache) -> (PairBuf<'_>, PairBuf<'_>) {
        drop(cache.acquire(1, 1));
        let b0 = cache.acquire(1, 0);
        let b2 = cache.acquire(1, 2);
        assert_eq!(cache.shard_members(1), [slot(0, 1, 0)]);
        assert!(cache.shard_members(0).iter().all(|s| s.refcnt == 1));
        assert_eq!(cache.stats().steals, 1);
        (b0, b2)
    }

    #[test]
    fn test_steal_recheck_finds_concurrent_recycle() {
        let cache = PairCache::new(MemoryDisk::new());
        let (b0, b2) = home_full_with_spare(&cache);
        let attempts = cache.stats().steal_attempts;

        thread::scope(|s| {
            let coordinator = cache.steal_lock.lock();
            let stealer = s.spawn(|| cache.acquire(1, 4).index());

            // Home is full, so the other thread is headed for the coordinator.
            while cache.stats().steal_attempts == attempts {
                thread::sleep(Duration::from_millis(1));
            }

            // Free a home buffer and bring block 4 in without the coordinator.
            drop(b2);
            let mine = cache.acquire(1, 4);
            let index = mine.index();
            drop(coordinator);
            drop(mine);

            assert_eq!(stealer.join().unwrap(), index);
        });

        let stats = cache.stats();
        assert_eq!(stats.steals, 1);
        assert_eq!(stats.hits, 1);
        let home = cache.shard_members(0);
        assert_eq!(
            home.iter()
                .filter(|s| s.key == Some(BlockKey::new(1, 4)))
                .count(),
            1
        );
        // The spare in shard 1 was left alone.
        assert_eq!(cache.shard_members(1), [slot(0, 1, 0)]);
        drop(b0);
    }

    #[test]
    fn test_stolen_buffer_parked_when_block_arrived_meanwhile() {
        let cache = PairCache::new(MemoryDisk::new());
        let (b0, b2) = home_full_with_spare(&cache);
        let key = BlockKey::new(1, 4);
        let (i0, i2) = (b0.index(), b2.index());

        // First half of a steal: nothing at home, spare unlinked from shard 1.
        let coordinator = cache.steal_lock.lock();
        assert_eq!(cache.lookup_or_recycle(key, 0), None);
        let (stolen, donor) = cache.take_from_donor(0).unwrap();
        assert_eq!((stolen, donor), (0, 1));
        assert!(cache.shard_members(1).is_empty());
        assert_eq!(cache.shard_of(stolen), None);

        // Meanwhile block 4 is recycled into the home shard.
        drop(b2);
        let mine = cache.acquire(1, 4);
        assert_eq!(mine.index(), i2);

        let got = cache.adopt(stolen, key, 0, donor);
        assert_eq!(got, i2);
        assert_eq!(
            cache.shard_members(0),
            [
                slot(i2, 4, 2),
                slot(i0, 0, 1),
                SlotInfo {
                    index: stolen,
                    key: None,
                    refcnt: 0,
                },
            ]
        );
        assert_eq!(cache.stats().steals, 1);

        cache.unref(got, key);
        drop(coordinator);
        drop(mine);

        // The parked buffer is the next one recycled at home.
        let next = cache.acquire(1, 6);
        assert_eq!(next.index(), stolen);
        drop((b0, next));
    }

    #[test]
    fn test_four_buffers_two_shards() {
        let cache = TestCache::<_, 4, 2>::new(MemoryDisk::new());

        let b10 = cache.acquire(1, 10);
        let b11 = cache.acquire(1, 11);
        let b12 = cache.acquire(1, 12);
        assert_eq!(cache.stats().steals, 1);

        // Shard 1 holds only block 11; block 13 must come from shard 0.
        let b13 = cache.acquire(1, 13);
        assert_eq!(cache.stats().steals, 2);
        assert_eq!(
            cache.shard_members(1),
            [slot(b13.index(), 13, 1), slot(b11.index(), 11, 1)]
        );
        assert_eq!(
            cache.shard_members(0),
            [slot(b12.index(), 12, 1), slot(b10.index(), 10, 1)]
        );

        let exhausted = panic::catch_unwind(AssertUnwindSafe(|| {
            cache.acquire(1, 14);
        }));
        assert!(exhausted.is_err());

        let freed = b12.index();
        cache.release(b12);
        let b14 = cache.acquire(1, 14);
        assert_eq!(b14.index(), freed);
        assert_eq!(cache.stats().recycles, 3);

        drop((b10, b11, b13, b14));
    }

    #[test]
    fn test_same_block_waits_for_holder() {
        let disk = MemoryDisk::new();
        let cache = TestCache::<_, 4, 2>::new(&disk);

        let mut held = cache.bread(1, 5);

        thread::scope(|s| {
            let waiter = s.spawn(|| {
                let buf = cache.bread(1, 5);
                buf[0]
            });

            // The waiter has its reference once it is counted as a hit.
            while cache.stats().hits == 0 {
                thread::sleep(Duration::from_millis(1));
            }
            thread::sleep(Duration::from_millis(10));
            held[0] = 42;
            cache.release(held);

            assert_eq!(waiter.join().unwrap(), 42);
        });

        assert_eq!(disk.stats().blocks_read, 1);
    }

    #[test]
    fn test_concurrent_blocks_stay_unique() {
        const THREADS: u32 = 4;
        const ROUNDS: u32 = 400;
        const BLOCKS: u32 = 12;
        const BUFS: usize = 16;

        let disk = MemoryDisk::new();
        let cache = TestCache::<_, BUFS, 3>::new(&disk);

        thread::scope(|s| {
            for t in 0..THREADS {
                let cache = &cache;
                s.spawn(move || {
                    for round in 0..ROUNDS {
                        let blockno = (t * 7 + round * 5 + round / 3) % BLOCKS;
                        let mut buf = cache.bread(1, blockno);
                        let mut counter = [0u8; 8];
                        counter.copy_from_slice(&buf[..8]);
                        let next = u64::from_le_bytes(counter) + 1;
                        if round % 4 == 0 {
                            thread::yield_now();
                        }
                        buf[..8].copy_from_slice(&next.to_le_bytes());
                        cache.write(&buf);
                        cache.release(buf);
                    }
                });
            }
        });

        // A duplicate buffer for a block would have lost increments.
        let total: u64 = (0..BLOCKS)
            .map(|b| {
                let mut counter = [0u8; 8];
                counter.copy_from_slice(&disk.peek(1, b)[..8]);
                u64::from_le_bytes(counter)
            })
            .sum();
        assert_eq!(total, u64::from(THREADS * ROUNDS));

        let members: Vec<SlotInfo> = (0..3).flat_map(|k| cache.shard_members(k)).collect();
        assert_eq!(members.len(), BUFS);
        assert!(members.iter().all(|s| s.refcnt == 0));
        let mut keys: Vec<BlockKey> = members.iter().filter_map(|s| s.key).collect();
        let cached = keys.len();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), cached);
        for s in &members {
            if let Some(key) = s.key {
                assert_eq!(cache.shard_of(s.index), Some(key.shard(3)));
            }
        }
    }
}
