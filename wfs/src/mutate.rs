//! The mutator: append-only create/write/unlink/rmdir (`spec.md` §4.4–§4.7).
//!
//! Every function here follows the same shape: resolve and validate
//! against the *current* state, build the new record(s) in memory, compute
//! their total length, reserve that many bytes at the head (failing with
//! [`Error::NoSpace`] before writing a single byte if it doesn't fit), write
//! every record into the reservation, then publish once. A multi-record
//! mutation (a child plus its re-appended parent) is therefore atomic from
//! a scanner's point of view: either both records are visible, or neither
//! is, because `head` only advances after both are written.

use crate::error::{Error, Result};
use crate::image::{Backing, Image};
use crate::record::{
	decode_dir_payload, DirEntry, InodeHeader, DIRENT_SIZE, HEADER_SIZE, S_IFDIR, S_IFMT,
};
use crate::resolve::{latest, latest_live, read_record};
use crate::scan::ScanIndex;

fn encode_record(header: &InodeHeader, payload: &[u8]) -> Vec<u8> {
	let mut buf = vec![0u8; HEADER_SIZE + payload.len()];
	header.encode(&mut buf[0..HEADER_SIZE]);
	buf[HEADER_SIZE..].copy_from_slice(payload);
	buf
}

fn encode_dir_payload(entries: &[DirEntry]) -> Result<Vec<u8>> {
	let mut payload = vec![0u8; entries.len() * DIRENT_SIZE];
	for (i, entry) in entries.iter().enumerate() {
		entry.encode(&mut payload[i * DIRENT_SIZE..(i + 1) * DIRENT_SIZE])?;
	}
	Ok(payload)
}

/// Appends one or more fully-built records as a single unit: either all of
/// them become visible, or (on [`Error::NoSpace`]) none do.
fn append_all<B: Backing>(
	image: &mut Image<B>,
	index: &mut ScanIndex,
	records: &[(InodeHeader, Vec<u8>)],
) -> Result<()> {
	let bufs: Vec<Vec<u8>> = records
		.iter()
		.map(|(h, p)| encode_record(h, p))
		.collect();
	let total: u64 = bufs.iter().map(|b| b.len() as u64).sum();
	let (start, slice) = image.reserve(total)?;
	let mut pos = 0usize;
	for buf in &bufs {
		slice[pos..pos + buf.len()].copy_from_slice(buf);
		pos += buf.len();
	}
	image.publish(start + total)?;
	let mut offset = start;
	for ((header, _), buf) in records.iter().zip(&bufs) {
		index.observe(offset, header);
		offset += buf.len() as u64;
	}
	Ok(())
}

#[allow(clippy::too_many_arguments)]
/// Creates a new regular file or directory named `name` inside `parent`.
pub fn create<B: Backing>(
	image: &mut Image<B>,
	index: &mut ScanIndex,
	parent: u32,
	name: &str,
	mode: u32,
	uid: u32,
	gid: u32,
	now: u32,
) -> Result<u32> {
	DirEntry::validate_name(name)?;
	let (parent_header, parent_payload) = latest_live(image, index, parent)?;
	if !parent_header.is_dir() {
		return Err(Error::NotDirectory);
	}
	let mut entries = decode_dir_payload(parent_payload)?;
	if entries.iter().any(|e| e.name == name) {
		return Err(Error::AlreadyExists);
	}

	let new_inode = index
		.largest_inode()
		.checked_add(1)
		.ok_or(Error::NoSpace)?;

	let child_header = InodeHeader {
		inode_number: new_inode,
		deleted: 0,
		mode,
		uid,
		gid,
		flags: 0,
		size: 0,
		atime: now,
		mtime: now,
		ctime: now,
		links: 1,
	};

	entries.push(DirEntry {
		name: name.to_owned(),
		inode_number: new_inode as u64,
	});
	let new_parent_payload = encode_dir_payload(&entries)?;
	let new_parent_header = InodeHeader {
		size: new_parent_payload.len() as u32,
		atime: now,
		mtime: now,
		ctime: now,
		..parent_header
	};

	append_all(
		image,
		index,
		&[
			(child_header, Vec::new()),
			(new_parent_header, new_parent_payload),
		],
	)?;
	Ok(new_inode)
}

/// Appends `buf` at `offset` into the regular file `inode`, growing it if
/// needed. Returns the number of bytes accepted, which is always
/// `buf.len()` on success (`spec.md` §9 standardizes this, unlike the
/// inconsistent return value of the system this was modeled on).
pub fn write<B: Backing>(
	image: &mut Image<B>,
	index: &mut ScanIndex,
	inode: u32,
	offset: u64,
	buf: &[u8],
	now: u32,
) -> Result<usize> {
	let (header, payload) = latest_live(image, index, inode)?;
	if header.is_dir() {
		return Err(Error::IsDirectory);
	}
	let old_size = payload.len() as u64;
	let new_size = old_size.max(
		offset
			.checked_add(buf.len() as u64)
			.ok_or(Error::NoSpace)?,
	);
	let new_size_usize = usize::try_from(new_size).map_err(|_| Error::NoSpace)?;

	let mut new_payload = vec![0u8; new_size_usize];
	new_payload[..payload.len()].copy_from_slice(payload);
	let offset_usize = usize::try_from(offset).map_err(|_| Error::NoSpace)?;
	new_payload[offset_usize..offset_usize + buf.len()].copy_from_slice(buf);

	let new_header = InodeHeader {
		size: new_size as u32,
		mtime: now,
		ctime: now,
		deleted: 0,
		..header
	};

	append_all(image, index, &[(new_header, new_payload)])?;
	Ok(buf.len())
}

/// Shared implementation of unlink/rmdir: removes `name` from `parent`,
/// tombstones the target, and re-appends the parent without that entry.
fn remove_entry<B: Backing>(
	image: &mut Image<B>,
	index: &mut ScanIndex,
	parent: u32,
	name: &str,
	want_dir: bool,
	now: u32,
) -> Result<()> {
	let (parent_header, parent_payload) = latest_live(image, index, parent)?;
	if !parent_header.is_dir() {
		return Err(Error::NotDirectory);
	}
	let mut entries = decode_dir_payload(parent_payload)?;
	let pos = entries
		.iter()
		.position(|e| e.name == name)
		.ok_or(Error::NotFound)?;
	let target_inode = entries[pos].inode_number as u32;

	let (target_header, target_payload) = latest_live(image, index, target_inode)?;
	let target_is_dir = target_header.mode & S_IFMT == S_IFDIR;
	if want_dir && !target_is_dir {
		return Err(Error::NotDirectory);
	}
	if !want_dir && target_is_dir {
		return Err(Error::IsDirectory);
	}
	if want_dir && !target_payload.is_empty() {
		return Err(Error::NotEmpty);
	}

	entries.remove(pos);
	let new_parent_payload = encode_dir_payload(&entries)?;
	let new_parent_header = InodeHeader {
		size: new_parent_payload.len() as u32,
		atime: now,
		mtime: now,
		ctime: now,
		..parent_header
	};

	let links = target_header.links.saturating_sub(1);
	let tombstone = InodeHeader {
		deleted: 1,
		size: 0,
		links,
		atime: now,
		mtime: now,
		ctime: now,
		..target_header
	};

	append_all(
		image,
		index,
		&[
			(tombstone, Vec::new()),
			(new_parent_header, new_parent_payload),
		],
	)
}

/// Removes the regular file named `name` from `parent` (`spec.md` §4.6).
pub fn unlink<B: Backing>(
	image: &mut Image<B>,
	index: &mut ScanIndex,
	parent: u32,
	name: &str,
	now: u32,
) -> Result<()> {
	remove_entry(image, index, parent, name, false, now)
}

/// Removes the empty directory named `name` from `parent` (`spec.md` §4.7).
pub fn rmdir<B: Backing>(
	image: &mut Image<B>,
	index: &mut ScanIndex,
	parent: u32,
	name: &str,
	now: u32,
) -> Result<()> {
	remove_entry(image, index, parent, name, true, now)
}

/// Reads up to `buf.len()` bytes from `inode` at `offset`, returning the
/// number of bytes copied (`spec.md` §4.8 `read`).
pub fn read<B: Backing>(
	image: &Image<B>,
	index: &ScanIndex,
	inode: u32,
	offset: u64,
	buf: &mut [u8],
) -> Result<usize> {
	let (header, payload) = latest_live(image, index, inode)?;
	if header.is_dir() {
		return Err(Error::IsDirectory);
	}
	let offset = usize::try_from(offset).unwrap_or(payload.len());
	if offset >= payload.len() {
		return Ok(0);
	}
	let n = buf.len().min(payload.len() - offset);
	buf[..n].copy_from_slice(&payload[offset..offset + n]);
	Ok(n)
}

/// Looks up a record by inode number regardless of liveness, used by
/// callers (e.g. `fsck`) that need to see tombstones too.
pub fn lookup_any<'a, B: Backing>(
	image: &'a Image<B>,
	index: &ScanIndex,
	inode: u32,
) -> Result<(InodeHeader, &'a [u8])> {
	latest(image, index, inode)
}

pub use read_record as raw_record_at;

#[cfg(test)]
mod test {
	use super::*;
	use crate::image::DISK_SIZE;
	use crate::record::{S_IFDIR, S_IFREG};
	use crate::resolve::resolve_path;

	fn fresh() -> (Image<Vec<u8>>, ScanIndex) {
		let image = Image::format(vec![0u8; DISK_SIZE as usize]).unwrap();
		let index = ScanIndex::build(&image).unwrap();
		(image, index)
	}

	#[test]
	fn create_then_resolve() {
		let (mut image, mut index) = fresh();
		let a = create(&mut image, &mut index, 0, "a", S_IFDIR | 0o755, 0, 0, 1).unwrap();
		let b = create(&mut image, &mut index, a, "b", S_IFDIR | 0o755, 0, 0, 1).unwrap();
		let c = create(&mut image, &mut index, b, "c", S_IFREG | 0o644, 0, 0, 1).unwrap();
		assert_eq!(resolve_path(&image, &index, "/a/b/c").unwrap(), c);
		let (header, _) = latest_live(&image, &index, c).unwrap();
		assert!(header.is_regular());
	}

	#[test]
	fn create_duplicate_name_rejected() {
		let (mut image, mut index) = fresh();
		create(&mut image, &mut index, 0, "f", S_IFREG | 0o644, 0, 0, 1).unwrap();
		assert!(matches!(
			create(&mut image, &mut index, 0, "f", S_IFREG | 0o644, 0, 0, 1),
			Err(Error::AlreadyExists)
		));
	}

	#[test]
	fn write_then_read_back() {
		let (mut image, mut index) = fresh();
		let f = create(&mut image, &mut index, 0, "f", S_IFREG | 0o644, 0, 0, 1).unwrap();
		write(&mut image, &mut index, f, 0, b"hello", 2).unwrap();
		write(&mut image, &mut index, f, 5, b"!", 3).unwrap();
		let mut buf = [0u8; 6];
		let n = read(&image, &index, f, 0, &mut buf).unwrap();
		assert_eq!(n, 6);
		assert_eq!(&buf, b"hello!");
	}

	#[test]
	fn write_gap_reads_as_zero() {
		let (mut image, mut index) = fresh();
		let f = create(&mut image, &mut index, 0, "f", S_IFREG | 0o644, 0, 0, 1).unwrap();
		write(&mut image, &mut index, f, 4, b"x", 2).unwrap();
		let mut buf = [0xffu8; 5];
		let n = read(&image, &index, f, 0, &mut buf).unwrap();
		assert_eq!(n, 5);
		assert_eq!(&buf, b"\0\0\0\0x");
	}

	#[test]
	fn write_on_directory_is_eisdir() {
		let (mut image, mut index) = fresh();
		let d = create(&mut image, &mut index, 0, "d", S_IFDIR | 0o755, 0, 0, 1).unwrap();
		assert!(matches!(
			write(&mut image, &mut index, d, 0, b"x", 1),
			Err(Error::IsDirectory)
		));
	}

	#[test]
	fn unlink_then_resolve_fails_and_leaves_tombstone() {
		let (mut image, mut index) = fresh();
		let f = create(&mut image, &mut index, 0, "f", S_IFREG | 0o644, 0, 0, 1).unwrap();
		unlink(&mut image, &mut index, 0, "f", 2).unwrap();
		assert!(matches!(
			resolve_path(&image, &index, "/f"),
			Err(Error::NotFound)
		));
		let (header, _) = lookup_any(&image, &index, f).unwrap();
		assert!(header.is_deleted());
	}

	#[test]
	fn unlink_on_directory_is_eisdir() {
		let (mut image, mut index) = fresh();
		create(&mut image, &mut index, 0, "d", S_IFDIR | 0o755, 0, 0, 1).unwrap();
		assert!(matches!(
			unlink(&mut image, &mut index, 0, "d", 1),
			Err(Error::IsDirectory)
		));
	}

	#[test]
	fn rmdir_requires_empty() {
		let (mut image, mut index) = fresh();
		let a = create(&mut image, &mut index, 0, "a", S_IFDIR | 0o755, 0, 0, 1).unwrap();
		create(&mut image, &mut index, a, "b", S_IFDIR | 0o755, 0, 0, 1).unwrap();
		assert!(matches!(
			rmdir(&mut image, &mut index, 0, "a", 2),
			Err(Error::NotEmpty)
		));
		rmdir(&mut image, &mut index, a, "b", 2).unwrap();
		rmdir(&mut image, &mut index, 0, "a", 2).unwrap();
		assert!(matches!(
			resolve_path(&image, &index, "/a"),
			Err(Error::NotFound)
		));
	}

	#[test]
	fn out_of_space_leaves_head_unchanged() {
		let (mut image, mut index) = fresh();
		let f = create(&mut image, &mut index, 0, "f", S_IFREG | 0o644, 0, 0, 1).unwrap();
		write(&mut image, &mut index, f, 0, b"hello", 1).unwrap();
		let head_before = image.head().unwrap();
		let huge = vec![0u8; DISK_SIZE as usize];
		assert!(matches!(
			write(&mut image, &mut index, f, 0, &huge, 2),
			Err(Error::NoSpace)
		));
		assert_eq!(image.head().unwrap(), head_before);
		let mut buf = [0u8; 5];
		read(&image, &index, f, 0, &mut buf).unwrap();
		assert_eq!(&buf, b"hello");
	}
}
