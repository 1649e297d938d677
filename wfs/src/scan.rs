//! The log scanner: walks records in log order and derives the indices the
//! resolver and mutator need (`spec.md` §4.2).

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::image::{Backing, Image};
use crate::record::{InodeHeader, HEADER_SIZE};
use crate::superblock::SUPERBLOCK_SIZE;

/// One decoded record and the absolute offset (from the start of the image)
/// it starts at.
pub struct ScannedRecord<'a> {
	pub offset: u64,
	pub header: InodeHeader,
	pub payload: &'a [u8],
}

/// Forward iterator over the records in an image's log, from
/// `SUPERBLOCK_SIZE` up to `head`.
pub struct Scan<'a> {
	log: &'a [u8],
	base: u64,
	pos: usize,
	done: bool,
}

impl<'a> Scan<'a> {
	fn new(log: &'a [u8]) -> Self {
		Self {
			log,
			base: SUPERBLOCK_SIZE as u64,
			pos: 0,
			done: false,
		}
	}
}

impl<'a> Iterator for Scan<'a> {
	type Item = Result<ScannedRecord<'a>>;

	fn next(&mut self) -> Option<Self::Item> {
		if self.done || self.pos == self.log.len() {
			return None;
		}
		let header = match InodeHeader::decode(&self.log[self.pos..]) {
			Ok(h) => h,
			Err(e) => {
				self.done = true;
				return Some(Err(e));
			}
		};
		let total = HEADER_SIZE + header.size as usize;
		if self.pos + total > self.log.len() {
			self.done = true;
			return Some(Err(Error::Corruption(
				"record size runs past log head",
			)));
		}
		let payload = &self.log[self.pos + HEADER_SIZE..self.pos + total];
		let record = ScannedRecord {
			offset: self.base + self.pos as u64,
			header,
			payload,
		};
		self.pos += total;
		Some(Ok(record))
	}
}

/// Yields every record in `image`'s log, in order.
pub fn scan<B: Backing>(image: &Image<B>) -> Result<Scan<'_>> {
	Ok(Scan::new(image.log()?))
}

/// Cached derived state: the largest inode number ever allocated, and the
/// offset of the latest record for each inode number seen so far
/// (regardless of whether that record is a tombstone).
#[derive(Debug, Default, Clone)]
pub struct ScanIndex {
	largest_inode: u32,
	latest: HashMap<u32, u64>,
}

impl ScanIndex {
	/// Builds an index by scanning the image once from the start.
	pub fn build<B: Backing>(image: &Image<B>) -> Result<Self> {
		let mut index = Self::default();
		for record in scan(image)? {
			let record = record?;
			index.observe(record.offset, &record.header);
		}
		Ok(index)
	}

	/// Folds one more record into the index. Used both while building from
	/// a full scan and incrementally, right after the mutator appends a new
	/// record, so mutations don't need to rescan the whole log.
	pub fn observe(&mut self, offset: u64, header: &InodeHeader) {
		self.largest_inode = self.largest_inode.max(header.inode_number);
		self.latest.insert(header.inode_number, offset);
	}

	/// The largest inode number seen, live or deleted. The next inode
	/// allocated by `create` is this plus one.
	pub fn largest_inode(&self) -> u32 {
		self.largest_inode
	}

	/// The offset of the latest record for inode `n`, live or deleted.
	pub fn latest(&self, n: u32) -> Option<u64> {
		self.latest.get(&n).copied()
	}
}
