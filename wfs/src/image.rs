//! The image container: a fixed-size byte region holding the superblock and
//! the append-only log.
//!
//! Mutators never touch a byte below the published `head`; they write into
//! `[head, head + len)` and only then advance `head` in the superblock. That
//! append-then-publish ordering is the single correctness discipline
//! `spec.md` §5 calls for. [`Image::reserve`] and [`Image::publish`] are the
//! two halves of it.

use std::sync::atomic::{fence, Ordering};

use crate::error::{Error, Result};
use crate::superblock::{Superblock, SUPERBLOCK_SIZE};

/// The size, in bytes, of every WFS image. Shared at compile time by the
/// mounter, `mkfs`, and `fsck` so they can never disagree about it.
pub const DISK_SIZE: u64 = 16 * 1024 * 1024;

/// A byte-addressable backing store for an [`Image`]. Implemented for a
/// memory-mapped file (the real thing) and for `Vec<u8>` (tests), so the
/// rest of `wfs` never has to know which one it's holding.
pub trait Backing {
	/// Returns the full backing region. Must always be exactly `DISK_SIZE`
	/// bytes long.
	fn as_slice(&self) -> &[u8];
	/// Mutable view of the full backing region.
	fn as_mut_slice(&mut self) -> &mut [u8];
	/// Publishes pending writes to the backing medium. A no-op for `Vec<u8>`;
	/// for a memory map this is `msync`.
	fn flush(&mut self) -> std::io::Result<()>;
}

impl Backing for memmap2::MmapMut {
	fn as_slice(&self) -> &[u8] {
		self
	}

	fn as_mut_slice(&mut self) -> &mut [u8] {
		self
	}

	fn flush(&mut self) -> std::io::Result<()> {
		memmap2::MmapMut::flush(self)
	}
}

impl Backing for Vec<u8> {
	fn as_slice(&self) -> &[u8] {
		self
	}

	fn as_mut_slice(&mut self) -> &mut [u8] {
		self
	}

	fn flush(&mut self) -> std::io::Result<()> {
		Ok(())
	}
}

/// A WFS image: the superblock plus the log region, over some [`Backing`]
/// store.
pub struct Image<B: Backing> {
	backing: B,
}

impl<B: Backing> Image<B> {
	/// Wraps an existing backing region as an image, validating the
	/// superblock.
	pub fn open(backing: B) -> Result<Self> {
		if backing.as_slice().len() as u64 != DISK_SIZE {
			return Err(Error::Corruption("image size does not match DISK_SIZE"));
		}
		let image = Self { backing };
		// Validate eagerly: a bad magic should fail at mount/fsck time, not
		// on first access.
		image.superblock()?;
		Ok(image)
	}

	/// Initializes a fresh superblock plus a single root directory record
	/// (an empty directory, inode 0) into `backing`, which must already be
	/// `DISK_SIZE` bytes long and need not be zeroed.
	pub fn format(mut backing: B) -> Result<Self> {
		if backing.as_slice().len() as u64 != DISK_SIZE {
			return Err(Error::Corruption("image size does not match DISK_SIZE"));
		}
		backing.as_mut_slice().fill(0);
		let root = crate::record::InodeHeader {
			inode_number: crate::record::ROOT_INODE,
			deleted: 0,
			mode: crate::record::S_IFDIR | 0o755,
			uid: 0,
			gid: 0,
			flags: 0,
			size: 0,
			atime: 0,
			mtime: 0,
			ctime: 0,
			links: 1,
		};
		let mut buf = [0u8; crate::record::HEADER_SIZE];
		root.encode(&mut buf);
		backing.as_mut_slice()
			[SUPERBLOCK_SIZE..SUPERBLOCK_SIZE + crate::record::HEADER_SIZE]
			.copy_from_slice(&buf);
		let sb = Superblock::fresh(crate::record::HEADER_SIZE as u32);
		sb.encode(&mut backing.as_mut_slice()[0..SUPERBLOCK_SIZE]);
		backing.flush()?;
		Self::open(backing)
	}

	/// Unwraps the image back into its backing store, e.g. so `mkfs` can
	/// write a freshly formatted in-memory image out to a file.
	pub fn into_backing(self) -> B {
		self.backing
	}

	/// Reads the current superblock.
	pub fn superblock(&self) -> Result<Superblock> {
		Superblock::decode(&self.backing.as_slice()[0..SUPERBLOCK_SIZE])
	}

	/// The current log head: the byte offset one past the last published
	/// record.
	pub fn head(&self) -> Result<u64> {
		Ok(self.superblock()?.head as u64)
	}

	/// A read-only view of the log region up to `head`.
	pub fn log(&self) -> Result<&[u8]> {
		let head = self.head()? as usize;
		Ok(&self.backing.as_slice()[SUPERBLOCK_SIZE..head])
	}

	/// Reserves `len` bytes at the current head for an in-progress
	/// multi-record append, without yet publishing them. Fails with
	/// [`Error::NoSpace`] instead of writing anything if `head + len` would
	/// exceed [`DISK_SIZE`].
	///
	/// Returns the byte offset the reservation starts at and a mutable view
	/// of the reserved region. The caller must write every byte of it before
	/// calling [`Image::publish`] with `offset + len` as the new head.
	pub fn reserve(&mut self, len: u64) -> Result<(u64, &mut [u8])> {
		let head = self.head()?;
		let end = head
			.checked_add(len)
			.ok_or(Error::NoSpace)?;
		if end > DISK_SIZE {
			return Err(Error::NoSpace);
		}
		let slice = &mut self.backing.as_mut_slice()[head as usize..end as usize];
		Ok((head, slice))
	}

	/// Publishes a new head, making everything written into `[old_head,
	/// new_head)` visible to scanners. `new_head` must be `>=` the current
	/// head and `<= DISK_SIZE`.
	pub fn publish(&mut self, new_head: u64) -> Result<()> {
		debug_assert!(new_head <= DISK_SIZE);
		// The payload writes (via `reserve`) must be globally visible before
		// the head that advertises them. On strongly-ordered hardware this
		// is a no-op; it documents the requirement `spec.md` §5 calls out
		// for weak memory order platforms.
		fence(Ordering::Release);
		let mut sb = self.superblock()?;
		sb.head = new_head as u32;
		sb.encode(&mut self.backing.as_mut_slice()[0..SUPERBLOCK_SIZE]);
		self.backing.flush()?;
		Ok(())
	}
}
