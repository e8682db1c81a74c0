//! On-disk layout: superblock, inode, inode map and directory entry formats.
//!
//! Every type here is `repr(C)` and bit-for-bit identical to what `mkfs` writes and the
//! online side reads back.
//! Structures are read and written with [`zerocopy`] so the layout is never at the mercy
//! of field reordering, and serialization is just a reinterpret of the buffer bytes (the
//! same trick the original C `mkfs` used by casting a `char[BSIZE]` to a struct pointer).

use core::mem;

use zerocopy::{AsBytes, FromBytes, Unaligned};

use crate::param::{DIRNAME_LEN, NADDRS};

/// The superblock, written in place at block 0 of the image. It is the only block the
/// system ever rewrites in place; every other update is log-structured.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, FromBytes, AsBytes, Unaligned)]
#[repr(C)]
pub struct Superblock {
    /// Number of segments sealed so far.
    pub nsegs: u32,
    /// Block number of the most recently checkpointed segment's start.
    pub segment: u32,
    /// Block holding the inode-map table.
    pub imap: u32,
    /// Number of inodes allocated by `mkfs`.
    pub ninodes: u32,
    /// Total number of blocks ever written (`nsegs * SEGBLOCKS`, plus the blocks `mkfs`
    /// allocated before the first segment rolled over).
    pub nblocks: u32,
}

static_assertions::const_assert_eq!(mem::size_of::<Superblock>(), 20);

/// On-disk inode type tag.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(i16)]
pub enum InodeType {
    Free = 0,
    Dir = 1,
    File = 2,
    Device = 3,
}

impl InodeType {
    pub fn from_raw(raw: i16) -> Self {
        match raw {
            0 => InodeType::Free,
            1 => InodeType::Dir,
            2 => InodeType::File,
            3 => InodeType::Device,
            other => panic!("corrupt inode type {other}"),
        }
    }
}

/// The 64-byte on-disk inode. `addrs` holds `NDIRECT` direct pointers followed by one
/// single-indirect and one double-indirect pointer.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromBytes, AsBytes, Unaligned)]
#[repr(C)]
pub struct Dinode {
    pub typ: i16,
    pub major: i16,
    pub minor: i16,
    pub nlink: i16,
    pub size: u32,
    pub addrs: [u32; NADDRS],
}

static_assertions::const_assert_eq!(mem::size_of::<Dinode>(), 64);

impl Dinode {
    pub const fn zeroed() -> Self {
        Self {
            typ: 0,
            major: 0,
            minor: 0,
            nlink: 0,
            size: 0,
            addrs: [0; NADDRS],
        }
    }

    pub fn new(typ: InodeType) -> Self {
        Self {
            typ: typ as i16,
            nlink: 1,
            ..Self::zeroed()
        }
    }
}

/// A directory entry: a 16-byte inode number + fixed-width name pair.
///
/// An empty slot (`inum == 0`) is available for reuse; inode 0 itself is never valid
/// (see [`crate::param::ROOTINO`]).
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromBytes, AsBytes, Unaligned)]
#[repr(C)]
pub struct Dirent {
    pub inum: u16,
    pub name: [u8; DIRNAME_LEN],
}

static_assertions::const_assert_eq!(mem::size_of::<Dirent>(), 16);

impl Dirent {
    pub fn new(inum: u32, name: &str) -> Self {
        assert!(inum <= u16::MAX as u32, "inode number out of range");
        let bytes = name.as_bytes();
        assert!(bytes.len() <= DIRNAME_LEN, "directory entry name too long: {name}");
        let mut buf = [0u8; DIRNAME_LEN];
        buf[..bytes.len()].copy_from_slice(bytes);
        Self {
            inum: inum as u16,
            name: buf,
        }
    }

    pub fn name_str(&self) -> &str {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(self.name.len());
        core::str::from_utf8(&self.name[..len]).unwrap_or("")
    }

    pub fn is_empty(&self) -> bool {
        self.inum == 0
    }
}
