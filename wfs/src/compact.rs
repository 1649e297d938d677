//! The compactor: rewrites a log keeping only the latest surviving record
//! per inode (`spec.md` §4.9). Must not run concurrently with a mounted
//! filesystem; that is the caller's responsibility (`spec.md` §5).

use log::info;

use crate::error::Result;
use crate::image::{Backing, Image, DISK_SIZE};
use crate::record::HEADER_SIZE;
use crate::resolve::read_record;
use crate::scan::ScanIndex;
use crate::superblock::{Superblock, SUPERBLOCK_SIZE};

/// Rewrites `src`'s log into a freshly-allocated scratch buffer, keeping
/// exactly one record per live inode number in ascending inode order, and
/// returns that buffer. The caller is responsible for writing it back over
/// the original image (e.g. `fsck`'s `main`).
pub fn compact<B: Backing>(src: &Image<B>) -> Result<Vec<u8>> {
	let index = ScanIndex::build(src)?;
	let largest = index.largest_inode();

	let mut scratch = vec![0u8; DISK_SIZE as usize];
	let mut head = SUPERBLOCK_SIZE as u64;
	let mut kept = 0u32;
	let mut dropped = 0u32;

	for n in 0..=largest {
		let Some(offset) = index.latest(n) else {
			continue;
		};
		let (header, payload) = read_record(src, offset)?;
		if header.is_deleted() {
			dropped += 1;
			continue;
		}
		let total = HEADER_SIZE + payload.len();
		let end = head as usize + total;
		header.encode(&mut scratch[head as usize..head as usize + HEADER_SIZE]);
		scratch[head as usize + HEADER_SIZE..end].copy_from_slice(payload);
		head = end as u64;
		kept += 1;
	}

	let sb = Superblock {
		magic: crate::superblock::MAGIC,
		head: head as u32,
	};
	sb.encode(&mut scratch[0..SUPERBLOCK_SIZE]);

	info!(
		"compaction kept {kept} live inode(s), dropped {dropped} stale/tombstoned record(s); \
		 head {} -> {head}",
		src.head()?
	);
	Ok(scratch)
}
