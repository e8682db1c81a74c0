//! Buffer cache and segment builder.
//!
//! This is the hard core of the online write path: an LRU-managed pool of fixed-size
//! block buffers (component C) that doubles as the staging area for the segment
//! currently being built (component D). The two are implemented together because they
//! share a single pair of locks and because every cache entry point must serialize
//! behind an in-progress segment flush (`waitseg`).

use std::io;
use std::mem::{self, ManuallyDrop};
use std::sync::{Condvar, Mutex, MutexGuard};

use zerocopy::{AsBytes, FromBytes};

use crate::buf::{BufData, BufFlags};
use crate::device::BlockDevice;
use crate::ondisk::Superblock;
use crate::param::{BSIZE, NBUF_TOTAL, SEGBLOCKS, SEGMETABLOCKS, SUPERBLOCK_TAG};

/// Metadata for one cache slot: identity, flags, and its position in the LRU ring.
struct SlotMeta {
    dev: u32,
    block: u32,
    flags: BufFlags,
}

impl SlotMeta {
    fn empty() -> Self {
        Self {
            dev: 0,
            block: 0,
            flags: BufFlags::empty(),
        }
    }
}

/// The LRU ring, as an array of slots plus a reserved sentinel index. `SENTINEL` is
/// `slots.len()`; `next[SENTINEL]` is the most-recently-used slot and
/// `prev[SENTINEL]` is the least-recently-used slot.
struct CacheMeta {
    slots: Vec<SlotMeta>,
    next: Vec<usize>,
    prev: Vec<usize>,
}

impl CacheMeta {
    fn new(capacity: usize) -> Self {
        let sentinel = capacity;
        let mut next: Vec<usize> = (0..=capacity).collect();
        let mut prev: Vec<usize> = (0..=capacity).collect();
        // Build an empty ring, then insert every slot at the head in order. Initial
        // recency order is arbitrary; nothing depends on it.
        next[sentinel] = sentinel;
        prev[sentinel] = sentinel;
        let mut meta = Self {
            slots: (0..capacity).map(|_| SlotMeta::empty()).collect(),
            next,
            prev,
        };
        for idx in 0..capacity {
            meta.insert_at_head(idx);
        }
        meta
    }

    fn sentinel(&self) -> usize {
        self.slots.len()
    }

    fn remove(&mut self, idx: usize) {
        let (p, n) = (self.prev[idx], self.next[idx]);
        self.next[p] = n;
        self.prev[n] = p;
    }

    fn insert_at_head(&mut self, idx: usize) {
        let sentinel = self.sentinel();
        let old_head = self.next[sentinel];
        self.next[idx] = old_head;
        self.prev[idx] = sentinel;
        self.prev[old_head] = idx;
        self.next[sentinel] = idx;
    }

    fn move_to_head(&mut self, idx: usize) {
        self.remove(idx);
        self.insert_at_head(idx);
    }
}

/// The open segment's bookkeeping, plus the in-memory mirror of the superblock.
///
/// `sb.nblocks` doubles as the "next free block" cursor (see `DESIGN.md`): in a pure
/// log-structured layout with no cleaner, the next unwritten block is always exactly
/// the count of blocks written so far, so no separate on-disk field is needed.
struct SegState {
    start: u32,
    /// Slot indices staged into the open segment, in commit order.
    blocks: Vec<usize>,
    busy: bool,
    sb: Superblock,
}

impl SegState {
    fn next_block(&self) -> u32 {
        self.sb.nblocks
    }
}

/// A single log-structured file system instance bound to one block device and device
/// number. Owns the buffer cache and the segment builder.
pub struct Lfs<D: BlockDevice> {
    device: D,
    dev: u32,
    meta: Mutex<CacheMeta>,
    data: Vec<Mutex<BufData>>,
    seg: Mutex<SegState>,
    seg_cond: Condvar,
}

impl<D: BlockDevice> Lfs<D> {
    /// Builds a fresh `Lfs` around `device`, seeded with `superblock` (typically just
    /// read from block 0).
    pub fn new(device: D, dev: u32, superblock: Superblock) -> Self {
        let capacity = NBUF_TOTAL;
        Self {
            device,
            dev,
            meta: Mutex::new(CacheMeta::new(capacity)),
            data: (0..capacity).map(|_| Mutex::new(BufData::zeroed())).collect(),
            seg: Mutex::new(SegState {
                start: 0,
                blocks: Vec::with_capacity(SEGMETABLOCKS as usize),
                busy: false,
                sb: superblock,
            }),
            seg_cond: Condvar::new(),
        }
    }

    /// Reads the superblock off `device` and opens an `Lfs` on top of it.
    pub fn open(device: D, dev: u32) -> io::Result<Self> {
        let mut block = [0u8; BSIZE];
        device.read_block(dev, 0, &mut block)?;
        let sb = Superblock::read_from_prefix(&block[..]).expect("superblock does not fit in one block");
        Ok(Self::new(device, dev, sb))
    }

    /// Returns a snapshot of the current in-memory superblock.
    pub fn superblock(&self) -> Superblock {
        self.seg.lock().expect("segment lock poisoned").sb
    }

    /// Blocks while a segment flush is in progress. Called at the entry of every cache
    /// operation so no reader ever observes half-committed segment state.
    fn waitseg(&self) {
        let guard = self.seg.lock().expect("segment lock poisoned");
        let _guard = self
            .seg_cond
            .wait_while(guard, |seg| seg.busy)
            .expect("segment lock poisoned");
    }

    fn in_open_segment_range(&self, block: u32) -> bool {
        let seg = self.seg.lock().expect("segment lock poisoned");
        seg.start != 0 && block > seg.start && block < seg.start + SEGBLOCKS
    }

    /// Returns an exclusively-owned buffer for `(dev, block)`, allocating a fresh slot
    /// if none is cached. Panics if `block` is 0 (reserved). Also panics if `block`
    /// falls inside the open segment's range on a genuine cache miss (invariant 4:
    /// a reader other than the writer that staged it there would be a
    /// use-before-flush) — the writer itself always finds its own staged block as a
    /// cache hit below, so that case never reaches the guard.
    pub fn bget(&self, block: u32) -> Buf<'_, D> {
        assert_ne!(block, 0, "bget: block 0 is reserved for the superblock tag");
        loop {
            self.waitseg();

            let mut meta = self.meta.lock().expect("cache lock poisoned");
            let sentinel = meta.sentinel();

            // MRU -> LRU scan for an existing match.
            let mut cur = meta.next[sentinel];
            let mut found = None;
            while cur != sentinel {
                if meta.slots[cur].dev == self.dev && meta.slots[cur].block == block {
                    found = Some(cur);
                    break;
                }
                cur = meta.next[cur];
            }

            if let Some(idx) = found {
                if meta.slots[idx].flags.contains(BufFlags::BUSY) {
                    drop(meta);
                    // Sleep on the buffer until its holder releases it, then restart
                    // the scan: the slot may have been recycled under another
                    // identity while we were waiting.
                    drop(self.data[idx].lock().expect("buffer lock poisoned"));
                    continue;
                }
                meta.slots[idx].flags.insert(BufFlags::BUSY);
                drop(meta);
                let guard = self.data[idx]
                    .try_lock()
                    .unwrap_or_else(|_| panic!("bget: slot marked free but its data mutex is held"));
                return Buf::new(self, idx, guard);
            }
            drop(meta);

            assert!(
                !self.in_open_segment_range(block),
                "bget: block {block} lies inside the open segment's range — use-before-flush"
            );

            // No match: allocate a fresh slot (balloc_buffer), scanning LRU -> MRU for
            // the first buffer that is neither busy nor dirty.
            let mut meta = self.meta.lock().expect("cache lock poisoned");
            let mut cur = meta.prev[sentinel];
            let mut victim = None;
            while cur != sentinel {
                let slot = &meta.slots[cur];
                if !slot.flags.contains(BufFlags::BUSY) && !slot.flags.contains(BufFlags::DIRTY) {
                    victim = Some(cur);
                    break;
                }
                cur = meta.prev[cur];
            }
            let idx = victim.unwrap_or_else(|| panic!("balloc_buffer: no free buffers"));
            meta.slots[idx].dev = self.dev;
            meta.slots[idx].block = block;
            meta.slots[idx].flags = BufFlags::BUSY;
            let guard = self.data[idx]
                .try_lock()
                .unwrap_or_else(|_| panic!("balloc_buffer: victim's data mutex unexpectedly held"));
            drop(meta);
            return Buf::new(self, idx, guard);
        }
    }

    /// Like [`Lfs::bget`], reading the block from the device if it was not already
    /// cached valid.
    pub fn bread(&self, block: u32) -> Buf<'_, D> {
        let mut buf = self.bget(block);
        if !buf.is_valid() {
            self.device
                .read_block(self.dev, block, &mut buf.data)
                .expect("device read failed");
            buf.mark_valid();
        }
        buf
    }

    /// Commits `buf`'s data into the log, returning the physical block number it was
    /// (or already had been) assigned. The superblock is the sole exception: it is
    /// written in place and always returns 0.
    pub fn bwrite(&self, buf: &mut Buf<'_, D>) -> u32 {
        if buf.block() == SUPERBLOCK_TAG {
            let mut seg = self.seg.lock().expect("segment lock poisoned");
            self.device
                .write_block(self.dev, 0, &buf.data)
                .expect("device write failed (superblock checkpoint)");
            // Keep the in-memory mirror in lockstep with what was just written, so a
            // later segment seal's checkpoint doesn't overwrite this edit with stale
            // state.
            seg.sb = Superblock::read_from_prefix(&buf.data[..])
                .expect("superblock does not fit in one block");
            drop(seg);
            buf.meta_flags_insert(BufFlags::DIRTY);
            return 0;
        }

        self.waitseg();
        let mut seg = self.seg.lock().expect("segment lock poisoned");

        if buf.is_dirty() {
            // Already staged in the open segment; nothing to re-enlist.
            return buf.block();
        }

        if seg.start == 0 {
            seg.start = seg.next_block();
        }

        let offset = seg.blocks.len() as u32;
        let assigned = seg.start + SEGMETABLOCKS + offset;
        seg.blocks.push(buf.index);
        buf.set_block(assigned);
        buf.meta_flags_insert(BufFlags::DIRTY);

        if seg.blocks.len() as u32 == crate::param::SEGDATABLOCKS {
            self.seal(&mut seg, buf);
        }

        assigned
    }

    /// Writes the superblock block in place and clears any pending in-memory mirror
    /// staleness. Called both for the dedicated superblock buffer and, implicitly, at
    /// the end of a segment seal.
    fn checkpoint_locked(&self, seg: &SegState) {
        let mut block = [0u8; BSIZE];
        block[..mem::size_of::<Superblock>()].copy_from_slice(seg.sb.as_bytes());
        self.device
            .write_block(self.dev, 0, &block)
            .expect("device write failed (superblock checkpoint)");
    }

    /// Seals a full segment: writes the zero metadata block(s), then every staged data
    /// block, then checkpoints the superblock. `current` is the buffer the caller of
    /// `bwrite` still holds (its data mutex is already locked by that same call, so it
    /// is read directly rather than re-locked).
    fn seal(&self, seg: &mut SegState, current: &Buf<'_, D>) {
        seg.busy = true;

        for k in 0..SEGMETABLOCKS {
            let zero = [0u8; BSIZE];
            self.device
                .write_block(self.dev, seg.start + k, &zero)
                .expect("device write failed (segment metadata)");
        }

        for &idx in &seg.blocks {
            if idx == current.index {
                self.device
                    .write_block(self.dev, current.block(), &current.data)
                    .expect("device write failed (segment data)");
            } else {
                let guard = self.data[idx]
                    .try_lock()
                    .unwrap_or_else(|_| panic!("seal: staged buffer unexpectedly held by another owner"));
                let block = {
                    let meta = self.meta.lock().expect("cache lock poisoned");
                    meta.slots[idx].block
                };
                self.device
                    .write_block(self.dev, block, &guard)
                    .expect("device write failed (segment data)");
            }
        }

        {
            let mut meta = self.meta.lock().expect("cache lock poisoned");
            for &idx in &seg.blocks {
                meta.slots[idx].flags.remove(BufFlags::DIRTY);
            }
        }

        seg.sb.segment = seg.start;
        seg.sb.nblocks += SEGBLOCKS;
        seg.sb.nsegs += 1;
        self.checkpoint_locked(&*seg);

        seg.blocks.clear();
        seg.start = 0;
        seg.busy = false;
        self.seg_cond.notify_all();
    }

    /// Releases ownership of `buf`, moving it to the head of the LRU list. Called by
    /// [`Buf::brelse`]; exposed here so the segment-sealing path (which never hands out
    /// a [`Buf`] of its own) can reuse the same bookkeeping.
    fn release(&self, idx: usize) {
        self.waitseg();
        let mut meta = self.meta.lock().expect("cache lock poisoned");
        meta.slots[idx].flags.remove(BufFlags::BUSY);
        meta.move_to_head(idx);
    }
}

/// An exclusively-owned, locked buffer. The only way to reach its data.
///
/// Mirrors the teaching kernel's own `Buf`: releasing is a deliberate act
/// (`brelse`/`unlock`), and dropping one without releasing is a bug, not a silent
/// leak — `Drop` panics so the mistake surfaces immediately instead of wedging the
/// cache with a buffer stuck `BUSY` forever.
pub struct Buf<'a, D: BlockDevice> {
    lfs: &'a Lfs<D>,
    index: usize,
    data: ManuallyDrop<MutexGuard<'a, BufData>>,
}

impl<'a, D: BlockDevice> Buf<'a, D> {
    fn new(lfs: &'a Lfs<D>, index: usize, data: MutexGuard<'a, BufData>) -> Self {
        Self {
            lfs,
            index,
            data: ManuallyDrop::new(data),
        }
    }

    fn meta_flags_insert(&self, flags: BufFlags) {
        let mut meta = self.lfs.meta.lock().expect("cache lock poisoned");
        meta.slots[self.index].flags.insert(flags);
    }

    fn set_block(&self, block: u32) {
        let mut meta = self.lfs.meta.lock().expect("cache lock poisoned");
        meta.slots[self.index].block = block;
    }

    /// The physical block number this buffer currently represents.
    pub fn block(&self) -> u32 {
        self.lfs.meta.lock().expect("cache lock poisoned").slots[self.index].block
    }

    pub fn is_valid(&self) -> bool {
        self.lfs.meta.lock().expect("cache lock poisoned").slots[self.index]
            .flags
            .contains(BufFlags::VALID)
    }

    pub fn is_dirty(&self) -> bool {
        self.lfs.meta.lock().expect("cache lock poisoned").slots[self.index]
            .flags
            .contains(BufFlags::DIRTY)
    }

    pub fn mark_valid(&mut self) {
        self.meta_flags_insert(BufFlags::VALID);
    }

    pub fn data(&self) -> &BufData {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut BufData {
        &mut self.data
    }

    /// Releases ownership, moving the buffer to the head of the LRU list.
    pub fn brelse(mut self) {
        // SAFETY: `self` is forgotten right after, so `self.data` is never touched
        // again — this is the one legal use of the dropped guard.
        unsafe { ManuallyDrop::drop(&mut self.data) };
        self.lfs.release(self.index);
        mem::forget(self);
    }
}

impl<'a, D: BlockDevice> std::ops::Deref for Buf<'a, D> {
    type Target = BufData;
    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

impl<'a, D: BlockDevice> std::ops::DerefMut for Buf<'a, D> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.data
    }
}

impl<'a, D: BlockDevice> Drop for Buf<'a, D> {
    fn drop(&mut self) {
        panic!("Buf dropped without brelse");
    }
}
