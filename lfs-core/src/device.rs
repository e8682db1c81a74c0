//! The block device interface.
//!
//! This is the one primitive left external: `iderw`, which
//! transfers exactly one block in either direction, always synchronously. Everything
//! above this trait (buffer cache, segment builder, indirect walker) is written against
//! it; swapping in a real disk driver means implementing [`BlockDevice`], nothing else.

use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::Mutex;

use crate::param::{BSIZE, SECTOR_SIZE};

/// Reads or writes a single `BSIZE`-byte block on `dev`.
///
/// Block 0 of a device is reserved for the superblock; by convention block addresses
/// are measured from the start of the boot sector, so block `b` begins at byte offset
/// `SECTOR_SIZE + b * BSIZE` (sector 0 holds the opaque boot record).
pub trait BlockDevice: Send + Sync {
    fn read_block(&self, dev: u32, block: u32, out: &mut [u8; BSIZE]) -> io::Result<()>;
    fn write_block(&self, dev: u32, block: u32, data: &[u8; BSIZE]) -> io::Result<()>;
}

fn block_offset(block: u32) -> u64 {
    SECTOR_SIZE as u64 + block as u64 * BSIZE as u64
}

/// A [`BlockDevice`] backed by a single host file, used both by the online side in
/// tests and by `mkfs` to materialize an image. Single-device only: `dev` is accepted
/// but unused beyond bookkeeping.
pub struct FileBlockDevice {
    file: Mutex<std::fs::File>,
}

impl FileBlockDevice {
    pub fn new(file: std::fs::File) -> Self {
        Self {
            file: Mutex::new(file),
        }
    }

    pub fn create(path: &std::path::Path) -> io::Result<Self> {
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(Self::new(file))
    }

    pub fn open(path: &std::path::Path) -> io::Result<Self> {
        let file = std::fs::OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self::new(file))
    }
}

impl BlockDevice for FileBlockDevice {
    fn read_block(&self, _dev: u32, block: u32, out: &mut [u8; BSIZE]) -> io::Result<()> {
        let mut file = self.file.lock().expect("device lock poisoned");
        file.seek(SeekFrom::Start(block_offset(block)))?;
        file.read_exact(out)
    }

    fn write_block(&self, _dev: u32, block: u32, data: &[u8; BSIZE]) -> io::Result<()> {
        let mut file = self.file.lock().expect("device lock poisoned");
        file.seek(SeekFrom::Start(block_offset(block)))?;
        file.write_all(data)
    }
}

/// An in-memory [`BlockDevice`], grown on demand. Used by the cache/segment-builder
/// test suite so it does not need a scratch file per test.
pub struct MemBlockDevice {
    blocks: Mutex<Vec<[u8; BSIZE]>>,
}

impl MemBlockDevice {
    pub fn new() -> Self {
        Self {
            blocks: Mutex::new(Vec::new()),
        }
    }
}

impl Default for MemBlockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockDevice for MemBlockDevice {
    fn read_block(&self, _dev: u32, block: u32, out: &mut [u8; BSIZE]) -> io::Result<()> {
        let blocks = self.blocks.lock().expect("device lock poisoned");
        match blocks.get(block as usize) {
            Some(b) => {
                out.copy_from_slice(b);
                Ok(())
            }
            None => {
                out.fill(0);
                Ok(())
            }
        }
    }

    fn write_block(&self, _dev: u32, block: u32, data: &[u8; BSIZE]) -> io::Result<()> {
        let mut blocks = self.blocks.lock().expect("device lock poisoned");
        if blocks.len() <= block as usize {
            blocks.resize(block as usize + 1, [0u8; BSIZE]);
        }
        blocks[block as usize] = *data;
        Ok(())
    }
}
