//! Buffer flags and the raw block-sized data payload.

use bitflags::bitflags;

use crate::param::BSIZE;

bitflags! {
    /// Per-buffer state bits. `BUSY` doubles as the buffer's mutex: a buffer with
    /// `BUSY` set is owned by exactly one caller until it calls `brelse`.
    pub struct BufFlags: u8 {
        const BUSY  = 0b001;
        const VALID = 0b010;
        const DIRTY = 0b100;
    }
}

/// A block-sized buffer payload.
///
/// `repr(align(4))` matches the teaching kernel's convention: callers are free to
/// reinterpret the contents as `u32` (inode arrays, indirect block pointers).
#[repr(align(4))]
#[derive(Clone)]
pub struct BufData {
    inner: [u8; BSIZE],
}

impl BufData {
    pub const fn zeroed() -> Self {
        Self { inner: [0; BSIZE] }
    }
}

impl Default for BufData {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl core::ops::Deref for BufData {
    type Target = [u8; BSIZE];
    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl core::ops::DerefMut for BufData {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}
