//! The offline image builder (component F).
//!
//! Single-threaded, no locks: every block is allocated and written synchronously, in
//! the same sequential order the online side would later assign them, so the image
//! this produces is byte-for-byte what the online write path would have produced had
//! it built the same tree itself.

use std::io;
use std::path::{Path, PathBuf};

use zerocopy::{AsBytes, FromBytes};

use lfs_core::device::{BlockDevice, FileBlockDevice};
use lfs_core::indirect::{self, IndirectIo};
use lfs_core::ondisk::{Dinode, Dirent, InodeType, Superblock};
use lfs_core::param::{BSIZE, MAX_INODES, NINDIRECT, ROOTINO, SEGDATABLOCKS, SEGMETABLOCKS};

const DEV: u32 = 0;

/// Builds a fresh image on `device`. Mirrors the online layout exactly: segments are
/// `SEGMETABLOCKS` zero blocks followed by `SEGDATABLOCKS` data blocks, so the image
/// this produces can be opened directly by `Lfs::open`.
pub struct ImageBuilder<D: BlockDevice> {
    device: D,
    sb: Superblock,
    imap: Vec<u32>,
    cur_block: u32,
    cur_inode: u32,
    seg_start: u32,
    seg_block: u32,
}

impl<D: BlockDevice> ImageBuilder<D> {
    pub fn new(device: D) -> io::Result<Self> {
        let zero = [0u8; BSIZE];
        for k in 0..SEGMETABLOCKS {
            device.write_block(DEV, 1 + k, &zero)?;
        }
        Ok(Self {
            device,
            sb: Superblock::default(),
            imap: vec![0u32; MAX_INODES],
            cur_block: 1 + SEGMETABLOCKS,
            cur_inode: ROOTINO,
            seg_start: 1,
            seg_block: 0,
        })
    }

    /// Returns the next sequential block, zero-filled. When the current segment's data
    /// region fills, writes the next segment's metadata blocks and advances past them,
    /// so the following `balloc` lands on the new segment's first data block.
    fn balloc(&mut self) -> io::Result<u32> {
        let zero = [0u8; BSIZE];
        self.device.write_block(DEV, self.cur_block, &zero)?;
        let allocated = self.cur_block;
        self.cur_block += 1;
        self.seg_block += 1;

        if self.seg_block == SEGDATABLOCKS {
            self.seg_block = 0;
            self.sb.segment = self.seg_start;
            self.sb.nsegs += 1;
            self.seg_start = self.cur_block;
            for k in 0..SEGMETABLOCKS {
                self.device.write_block(DEV, self.cur_block + k, &zero)?;
            }
            self.cur_block += SEGMETABLOCKS;
        }

        Ok(allocated)
    }

    /// Allocates a fresh inode of the given type, writing its (empty) on-disk form and
    /// registering it in the inode map. Returns the new inode number.
    fn ialloc(&mut self, typ: InodeType) -> io::Result<u32> {
        if self.cur_inode as usize >= MAX_INODES {
            return Err(io::Error::new(io::ErrorKind::Other, "inode limit exceeded"));
        }
        let inum = self.cur_inode;
        self.cur_inode += 1;

        let block = self.balloc()?;
        self.imap[inum as usize] = block;
        self.iwrite(inum, &Dinode::new(typ))?;
        Ok(inum)
    }

    fn iwrite(&mut self, inum: u32, di: &Dinode) -> io::Result<()> {
        let mut buf = [0u8; BSIZE];
        buf[..std::mem::size_of::<Dinode>()].copy_from_slice(di.as_bytes());
        self.device.write_block(DEV, self.imap[inum as usize], &buf)
    }

    fn iread(&self, inum: u32) -> io::Result<Dinode> {
        let mut buf = [0u8; BSIZE];
        self.device.read_block(DEV, self.imap[inum as usize], &mut buf)?;
        let di = Dinode::read_from_prefix(&buf[..]).expect("disk inode does not fit in one block");
        InodeType::from_raw(di.typ);
        Ok(di)
    }

    /// Appends `data` to inode `inum`'s contents, resolving and read-modify-writing
    /// blocks through the indirect-tree walker one block at a time.
    pub fn iappend(&mut self, inum: u32, data: &[u8]) -> io::Result<()> {
        let mut di = self.iread(inum)?;
        let mut wr = di.size;
        let max = wr + data.len() as u32;
        let mut consumed: usize = 0;

        while wr < max {
            let in_block = (wr % BSIZE as u32) as usize;
            let take = (BSIZE - in_block).min((max - wr) as usize);

            let block = {
                let mut io = BuilderIo { builder: self };
                indirect::resolve(&mut di.addrs, wr as u64, &mut io)
            };

            let mut buf = [0u8; BSIZE];
            self.device.read_block(DEV, block, &mut buf)?;
            buf[in_block..in_block + take].copy_from_slice(&data[consumed..consumed + take]);
            self.device.write_block(DEV, block, &buf)?;

            wr += take as u32;
            consumed += take;
        }

        di.size = wr;
        self.iwrite(inum, &di)?;
        Ok(())
    }

    /// Writes the inode map and finalizes the superblock. Consumes the builder: no
    /// further allocation is possible once the inode count and block count are frozen.
    pub fn finalize(mut self) -> io::Result<()> {
        let imap_block = self.balloc()?;
        let mut buf = [0u8; BSIZE];
        for (chunk, &b) in buf.chunks_exact_mut(4).zip(self.imap.iter()) {
            chunk.copy_from_slice(&b.to_le_bytes());
        }
        self.device.write_block(DEV, imap_block, &buf)?;

        self.sb.imap = imap_block;
        self.sb.nblocks = self.cur_block;
        // `cur_inode` is the next inode number to hand out; inode 0 is reserved, so the
        // count of inodes actually allocated is one less.
        self.sb.ninodes = self.cur_inode - ROOTINO;

        let mut sbblock = [0u8; BSIZE];
        sbblock[..std::mem::size_of::<Superblock>()].copy_from_slice(self.sb.as_bytes());
        self.device.write_block(DEV, 0, &sbblock)
    }
}

struct BuilderIo<'a, D: BlockDevice> {
    builder: &'a mut ImageBuilder<D>,
}

impl<'a, D: BlockDevice> IndirectIo for BuilderIo<'a, D> {
    fn alloc_zeroed(&mut self) -> u32 {
        self.builder.balloc().expect("mkfs: block allocation failed")
    }

    fn read_pointers(&mut self, block: u32) -> [u32; NINDIRECT] {
        let mut buf = [0u8; BSIZE];
        self.builder
            .device
            .read_block(DEV, block, &mut buf)
            .expect("mkfs: indirect block read failed");
        let mut out = [0u32; NINDIRECT];
        for (slot, chunk) in out.iter_mut().zip(buf.chunks_exact(4)) {
            *slot = u32::from_le_bytes(chunk.try_into().expect("4-byte chunk"));
        }
        out
    }

    fn write_pointers(&mut self, block: u32, pointers: &[u32; NINDIRECT]) {
        let mut buf = [0u8; BSIZE];
        for (chunk, &p) in buf.chunks_exact_mut(4).zip(pointers.iter()) {
            chunk.copy_from_slice(&p.to_le_bytes());
        }
        self.builder
            .device
            .write_block(DEV, block, &buf)
            .expect("mkfs: indirect block write failed");
    }
}

/// Builds a complete image at `image_path` containing a root directory and one regular
/// file per entry in `host_files`. A leading `_` in a host file's base name is stripped
/// (the kernel-embedded-tool naming convention), matching the original image builder.
pub fn build_image(image_path: &Path, host_files: &[PathBuf]) -> io::Result<()> {
    let device = FileBlockDevice::create(image_path)?;
    let mut builder = ImageBuilder::new(device)?;

    let root = builder.ialloc(InodeType::Dir)?;
    builder.iappend(root, Dirent::new(root, ".").as_bytes())?;
    builder.iappend(root, Dirent::new(root, "..").as_bytes())?;

    for path in host_files {
        let mut name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if let Some(stripped) = name.strip_prefix('_') {
            name = stripped.to_string();
        }

        let inum = builder.ialloc(InodeType::File)?;
        builder.iappend(root, Dirent::new(inum, &name).as_bytes())?;

        let contents = std::fs::read(path)?;
        for chunk in contents.chunks(BSIZE) {
            builder.iappend(inum, chunk)?;
        }
    }

    builder.finalize()
}
