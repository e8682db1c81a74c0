//! Wires the indirect-tree walker (component E) to the buffer cache and segment
//! builder (components C+D), giving `Lfs` a `bmap` that resolves a logical offset to a
//! physical block the way an inode-layer caller above the cache would use it.

use crate::cache::Lfs;
use crate::device::BlockDevice;
use crate::indirect::{self, IndirectIo};
use crate::param::{NADDRS, NINDIRECT};

/// Cache keys for blocks this process is about to allocate but has not yet learned the
/// real physical address of. Chosen far above any realistic image size so they never
/// collide with a committed block number; never written to disk under this identity —
/// `bwrite` replaces it with the real assigned number before the buffer is released.
const PLACEHOLDER_BASE: u32 = 0xf000_0000;

struct CacheIo<'a, D: BlockDevice> {
    lfs: &'a Lfs<D>,
    next_placeholder: u32,
}

impl<'a, D: BlockDevice> IndirectIo for CacheIo<'a, D> {
    fn alloc_zeroed(&mut self) -> u32 {
        let placeholder = self.next_placeholder;
        self.next_placeholder += 1;

        let mut buf = self.lfs.bget(placeholder);
        buf.data_mut().fill(0);
        buf.mark_valid();
        let assigned = self.lfs.bwrite(&mut buf);
        buf.brelse();
        assigned
    }

    fn read_pointers(&mut self, block: u32) -> [u32; NINDIRECT] {
        let buf = self.lfs.bread(block);
        let mut out = [0u32; NINDIRECT];
        for (slot, chunk) in out.iter_mut().zip(buf.chunks_exact(4)) {
            *slot = u32::from_le_bytes(chunk.try_into().expect("4-byte chunk"));
        }
        buf.brelse();
        out
    }

    fn write_pointers(&mut self, block: u32, pointers: &[u32; NINDIRECT]) {
        let mut buf = self.lfs.bget(block);
        for (chunk, &p) in buf.data_mut().chunks_exact_mut(4).zip(pointers.iter()) {
            chunk.copy_from_slice(&p.to_le_bytes());
        }
        buf.mark_valid();
        self.lfs.bwrite(&mut buf);
        buf.brelse();
    }
}

impl<D: BlockDevice> Lfs<D> {
    /// Resolves the physical block hosting byte offset `offset` of a file described by
    /// `addrs`, allocating along the path through the buffer cache/segment builder as
    /// needed. `addrs` is mutated in place; persisting the owning inode is the caller's
    /// job (inode lookup and storage live in the VFS layer, out of scope here).
    pub fn bmap(&self, addrs: &mut [u32; NADDRS], offset: u64) -> u32 {
        let mut io = CacheIo {
            lfs: self,
            next_placeholder: PLACEHOLDER_BASE,
        };
        indirect::resolve(addrs, offset, &mut io)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemBlockDevice;
    use crate::ondisk::Superblock;
    use crate::param::{BSIZE, MAXFILE, NDIRECT, NINDIRECT};

    fn fresh_lfs() -> Lfs<MemBlockDevice> {
        Lfs::new(
            MemBlockDevice::new(),
            1,
            Superblock {
                nblocks: 10,
                ..Default::default()
            },
        )
    }

    #[test]
    fn bmap_round_trips_a_byte_at_every_level() {
        let lfs = fresh_lfs();
        let mut addrs = [0u32; NADDRS];

        let offsets = [
            0u64,
            (NDIRECT as u64 - 1) * BSIZE as u64,
            NDIRECT as u64 * BSIZE as u64,
            (NDIRECT as u64 + NINDIRECT as u64) * BSIZE as u64,
            (MAXFILE - 1) * BSIZE as u64,
        ];

        for &off in &offsets {
            let block = lfs.bmap(&mut addrs, off);
            let mut buf = lfs.bget(block);
            buf.data_mut()[0] = 0x42;
            buf.mark_valid();
            lfs.bwrite(&mut buf);
            buf.brelse();
        }

        for &off in &offsets {
            let block = lfs.bmap(&mut addrs, off);
            let buf = lfs.bread(block);
            assert_eq!(buf[0], 0x42, "byte written at offset {off} did not round-trip");
            buf.brelse();
        }
    }

    #[test]
    fn level_boundaries_resolve_to_distinct_blocks() {
        let lfs = fresh_lfs();
        let mut addrs = [0u32; NADDRS];
        let direct = lfs.bmap(&mut addrs, (NDIRECT as u64 - 1) * BSIZE as u64);
        let single = lfs.bmap(&mut addrs, NDIRECT as u64 * BSIZE as u64);
        let double = lfs.bmap(&mut addrs, (NDIRECT as u64 + NINDIRECT as u64) * BSIZE as u64);
        assert_ne!(direct, single);
        assert_ne!(single, double);
        assert_ne!(addrs[NDIRECT], 0, "single-indirect slot should be populated");
        assert_ne!(addrs[NDIRECT + 1], 0, "double-indirect slot should be populated");
    }
}
