//! On-disk layout, buffer cache and segment builder for a log-structured teaching file
//! system.
//!
//! This crate is the online write path: everything between a caller that already knows
//! which inode and byte offset it wants and the raw block device. It is deliberately
//! silent about inodes-by-number, directory lookup and the rest of the VFS layer above
//! it — those are out of scope here and live in whatever consumes this crate.
//!
//! Module map:
//! - [`param`] — geometry constants shared with `mkfs`.
//! - [`ondisk`] — superblock, inode and directory entry binary layouts.
//! - [`device`] — the [`device::BlockDevice`] trait and its two implementations.
//! - [`buf`] — buffer flags and the raw block payload.
//! - [`cache`] — the buffer cache and segment builder ([`cache::Lfs`], [`cache::Buf`]).
//! - [`indirect`] — the inode address-array walker, shared with `mkfs`.
//! - [`bmap`] — wires `indirect` to `cache` for the online side.

pub mod bmap;
pub mod buf;
pub mod cache;
pub mod device;
pub mod indirect;
pub mod ondisk;
pub mod param;

pub use cache::{Buf, Lfs};
pub use device::BlockDevice;
pub use ondisk::{Dinode, Dirent, InodeType, Superblock};
