//! Fundamental constants shared by the online write path and `mkfs`.
//!
//! These must match exactly between the two sides: the image `mkfs` produces is only
//! readable by the kernel side if both agree on block size, segment geometry and the
//! inode address layout.

/// Block size, in bytes.
pub const BSIZE: usize = 2048;

/// Segment size, in bytes.
pub const SEGSIZE: usize = 524_288;

/// Blocks per segment.
pub const SEGBLOCKS: u32 = (SEGSIZE / BSIZE) as u32;

/// Metadata blocks reserved at the start of every segment.
///
/// Currently zero-filled; the space is reserved for future inode-change summaries.
pub const SEGMETABLOCKS: u32 = 1;

/// Payload blocks available per segment.
pub const SEGDATABLOCKS: u32 = SEGBLOCKS - SEGMETABLOCKS;

/// Sector size of the underlying block device.
pub const SECTOR_SIZE: usize = 512;

/// Sectors per block.
pub const SECTORS_PER_BLOCK: usize = BSIZE / SECTOR_SIZE;

/// Buffer cache capacity requested by the caller (working-set headroom beyond a
/// segment's worth of dirty buffers). Sized generously for a teaching system; production
/// sizing would come from measuring the concurrent working set.
pub const NBUF: usize = 64;

/// Total number of buffer-cache slots. A full open segment pins `SEGDATABLOCKS` dirty
/// buffers at once, so the pool must hold that many plus the `NBUF` working set or
/// `balloc_buffer` can never find a victim.
pub const NBUF_TOTAL: usize = NBUF + SEGBLOCKS as usize;

/// Number of block-pointer slots in a disk inode.
///
/// `(64 - 12) / 4`: 64-byte inode minus the 12 bytes of scalar fields, divided by the
/// 4-byte width of a block pointer.
pub const NADDRS: usize = (64 - 12) / 4;

/// Number of indirection levels: one single-indirect, one double-indirect.
pub const INDIRECT_LEVELS: usize = 2;

/// Number of direct block pointers.
pub const NDIRECT: usize = NADDRS - INDIRECT_LEVELS;

/// Block pointers per indirect block.
pub const NINDIRECT: usize = BSIZE / 4;

/// Per-level capacity, in blocks: direct, single-indirect, double-indirect.
pub const LEVEL_SIZES: [u64; INDIRECT_LEVELS + 1] = [
    NDIRECT as u64,
    NINDIRECT as u64,
    (NINDIRECT * NINDIRECT) as u64,
];

/// Maximum file size, in blocks.
pub const MAXFILE: u64 = LEVEL_SIZES[0] + LEVEL_SIZES[1] + LEVEL_SIZES[2];

/// Inode-map entries per block (one block holds the whole map).
pub const IPB: usize = BSIZE / 4;

/// Maximum number of inodes an image can hold (bounded by a single inode-map block).
pub const MAX_INODES: usize = IPB;

/// Directory entry name length.
pub const DIRNAME_LEN: usize = 14;

/// Root directory inode number.
pub const ROOTINO: u32 = 1;

/// Inode-cache key the superblock's dedicated buffer is tagged with.
///
/// The superblock itself always lives at physical block 0 of the image, but `bget`
/// rejects block 0 as a programmer error (see [`crate::cache`]), so the buffer that
/// shadows it in the cache is tagged with this sentinel block number instead. `bwrite`
/// recognizes the tag and performs the in-place write to block 0 directly.
pub const SUPERBLOCK_TAG: u32 = 1;

static_assertions::const_assert_eq!(SEGBLOCKS, 256);
static_assertions::const_assert_eq!(SEGDATABLOCKS, 255);
static_assertions::const_assert_eq!(NADDRS, 13);
static_assertions::const_assert_eq!(NDIRECT, 11);
static_assertions::const_assert_eq!(NINDIRECT, 512);
