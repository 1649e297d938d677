//! Path resolution and "latest record wins" lookups (`spec.md` §4.3).

use crate::error::{Error, Result};
use crate::image::{Backing, Image};
use crate::record::{decode_dir_payload, InodeHeader, ROOT_INODE};
use crate::scan::ScanIndex;

/// Reads the header and payload of the record at `offset`.
pub fn read_record<'a, B: Backing>(
	image: &'a Image<B>,
	offset: u64,
) -> Result<(InodeHeader, &'a [u8])> {
	let log = image.log()?;
	let start = offset
		.checked_sub(crate::superblock::SUPERBLOCK_SIZE as u64)
		.ok_or(Error::Corruption("offset before start of log"))? as usize;
	let header = InodeHeader::decode(&log[start..])?;
	let payload_start = start + crate::record::HEADER_SIZE;
	let payload_end = payload_start + header.size as usize;
	if payload_end > log.len() {
		return Err(Error::Corruption("record runs past head"));
	}
	Ok((header, &log[payload_start..payload_end]))
}

/// Reads the latest record for inode `n`, live or deleted.
pub fn latest<'a, B: Backing>(
	image: &'a Image<B>,
	index: &ScanIndex,
	n: u32,
) -> Result<(InodeHeader, &'a [u8])> {
	let offset = index.latest(n).ok_or(Error::NotFound)?;
	read_record(image, offset)
}

/// Reads the latest *live* record for inode `n`; fails with
/// [`Error::NotFound`] if the inode doesn't exist or its latest record is a
/// tombstone.
pub fn latest_live<'a, B: Backing>(
	image: &'a Image<B>,
	index: &ScanIndex,
	n: u32,
) -> Result<(InodeHeader, &'a [u8])> {
	let (header, payload) = latest(image, index, n)?;
	if header.is_deleted() {
		return Err(Error::NotFound);
	}
	Ok((header, payload))
}

/// Resolves an absolute slash-separated path to an inode number, by
/// tokenizing on `/` and descending from the root, honoring "latest live
/// record wins" at each step.
pub fn resolve_path<B: Backing>(
	image: &Image<B>,
	index: &ScanIndex,
	path: &str,
) -> Result<u32> {
	let mut current = ROOT_INODE;
	for token in path.split('/').filter(|s| !s.is_empty()) {
		let (header, payload) = latest_live(image, index, current)?;
		if !header.is_dir() {
			return Err(Error::NotDirectory);
		}
		let entries = decode_dir_payload(payload)?;
		let entry = entries
			.iter()
			.find(|e| e.name == token)
			.ok_or(Error::NotFound)?;
		current = entry.inode_number as u32;
	}
	Ok(current)
}

/// Resolves a single name within a known parent directory to the inode it
/// names, without walking a path. This is the primitive a FUSE `lookup`
/// callback needs: the kernel already holds the parent's inode number and
/// only gives us one path component at a time.
pub fn lookup_child<B: Backing>(
	image: &Image<B>,
	index: &ScanIndex,
	parent: u32,
	name: &str,
) -> Result<u32> {
	let (header, payload) = latest_live(image, index, parent)?;
	if !header.is_dir() {
		return Err(Error::NotDirectory);
	}
	let entries = decode_dir_payload(payload)?;
	entries
		.iter()
		.find(|e| e.name == name)
		.map(|e| e.inode_number as u32)
		.ok_or(Error::NotFound)
}

/// Resolves a path to its parent directory's inode number and the final
/// path component, without requiring the final component itself to exist.
/// Used by mutators, which need the parent to append to and the target's
/// name but not necessarily its current inode.
pub fn resolve_parent<'a, B: Backing>(
	image: &Image<B>,
	index: &ScanIndex,
	path: &'a str,
) -> Result<(u32, &'a str)> {
	let trimmed = path.trim_end_matches('/');
	let (parent_path, name) = match trimmed.rsplit_once('/') {
		Some((p, n)) => (p, n),
		None => ("", trimmed),
	};
	if name.is_empty() {
		return Err(Error::NotFound);
	}
	let parent = resolve_path(image, index, parent_path)?;
	Ok((parent, name))
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::image::DISK_SIZE;
	use crate::mutate::create;
	use crate::record::S_IFDIR;

	fn fresh() -> (Image<Vec<u8>>, ScanIndex) {
		let image = Image::format(vec![0u8; DISK_SIZE as usize]).unwrap();
		let index = ScanIndex::build(&image).unwrap();
		(image, index)
	}

	#[test]
	fn root_resolves_to_zero() {
		let (image, index) = fresh();
		assert_eq!(resolve_path(&image, &index, "/").unwrap(), 0);
		assert_eq!(resolve_path(&image, &index, "").unwrap(), 0);
	}

	#[test]
	fn nested_lookup_and_missing_segment() {
		let (mut image, mut index) = fresh();
		let a = create(&mut image, &mut index, 0, "a", S_IFDIR | 0o755, 0, 0, 0).unwrap();
		let b = create(&mut image, &mut index, a, "b", S_IFDIR | 0o755, 0, 0, 0).unwrap();
		assert_eq!(resolve_path(&image, &index, "/a").unwrap(), a);
		assert_eq!(resolve_path(&image, &index, "/a/b").unwrap(), b);
		assert_eq!(resolve_path(&image, &index, "/a/b/").unwrap(), b);
		assert!(matches!(
			resolve_path(&image, &index, "/a/missing"),
			Err(Error::NotFound)
		));
	}

	#[test]
	fn non_terminal_file_is_not_a_directory() {
		let (mut image, mut index) = fresh();
		create(
			&mut image,
			&mut index,
			0,
			"f",
			crate::record::S_IFREG | 0o644,
			0,
			0,
			0,
		)
		.unwrap();
		assert!(matches!(
			resolve_path(&image, &index, "/f/x"),
			Err(Error::NotDirectory)
		));
	}
}
