//! The operation surface: the handlers a kernel bridge calls into
//! (`spec.md` §4.8). Each one resolves its path via the resolver, then
//! either reads the live inode directly or hands off to the mutator.
//!
//! This type owns the image and the cached scan index for its whole
//! lifetime, the way a mounted filesystem's in-memory state lives for the
//! lifetime of the mount (`spec.md` §4.9's note that the compactor must not
//! run concurrently with a mount is exactly why this type assumes exclusive
//! access to the image it holds).

use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, info, warn};

use crate::error::{Error, Result};
use crate::image::{Backing, Image};
use crate::record::{decode_dir_payload, S_IFDIR, S_IFMT};
use crate::resolve::{resolve_parent, resolve_path};
use crate::scan::ScanIndex;
use crate::{mutate, resolve};

/// A `getattr`-style snapshot of a live inode's metadata.
#[derive(Debug, Clone, Copy)]
pub struct Attr {
	pub inode: u32,
	pub mode: u32,
	pub uid: u32,
	pub gid: u32,
	pub size: u64,
	/// 512-byte blocks occupied, rounded up — the same convention the
	/// original C implementation under `original_source/` reports.
	pub blocks: u64,
	pub atime: u32,
	pub mtime: u32,
	pub ctime: u32,
	pub links: u32,
}

impl Attr {
	pub fn is_dir(&self) -> bool {
		self.mode & S_IFMT == S_IFDIR
	}
}

/// One entry as returned by `readdir`: a name, the inode it names, and
/// whether that inode is currently a directory (resolved once during the
/// scan so the bridge doesn't need a second round-trip per name).
#[derive(Debug, Clone)]
pub struct DirListEntry {
	pub name: String,
	pub inode: u32,
	pub is_dir: bool,
}

/// Returns the current time as seconds since the epoch, saturating rather
/// than panicking if the system clock is set before 1970.
pub fn now() -> u32 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map(|d| d.as_secs() as u32)
		.unwrap_or(0)
}

fn ceil_div_512(size: u64) -> u64 {
	(size + 511) / 512
}

/// The mountable filesystem: an image plus its cached scan index.
pub struct Filesystem<B: Backing> {
	image: Image<B>,
	index: ScanIndex,
}

impl<B: Backing> Filesystem<B> {
	/// Wraps an already-formatted image.
	pub fn new(image: Image<B>) -> Result<Self> {
		let index = ScanIndex::build(&image)?;
		Ok(Self { image, index })
	}

	/// Direct access to the underlying image, e.g. so a bridge adapter can
	/// perform inode-numbered operations FUSE itself works in terms of.
	pub fn image(&self) -> &Image<B> {
		&self.image
	}

	pub fn image_mut(&mut self) -> &mut Image<B> {
		&mut self.image
	}

	pub fn index(&self) -> &ScanIndex {
		&self.index
	}

	pub fn index_mut(&mut self) -> &mut ScanIndex {
		&mut self.index
	}

	fn attr_of(&self, inode: u32) -> Result<Attr> {
		let (header, payload) = resolve::latest_live(&self.image, &self.index, inode)?;
		Ok(Attr {
			inode,
			mode: header.mode,
			uid: header.uid,
			gid: header.gid,
			size: header.size as u64,
			blocks: ceil_div_512(header.size as u64),
			atime: header.atime,
			mtime: header.mtime,
			ctime: header.ctime,
			links: header.links,
		})
	}

	/// `getattr(path)`: fills an [`Attr`] from the live inode at `path`.
	pub fn getattr(&self, path: &str) -> Result<Attr> {
		debug!("getattr({path})");
		let inode = resolve_path(&self.image, &self.index, path)?;
		self.attr_of(inode).inspect_err(|e| warn!("getattr({path}): {e}"))
	}

	/// `getattr` by inode number, for bridges that already hold it.
	pub fn getattr_inode(&self, inode: u32) -> Result<Attr> {
		self.attr_of(inode)
	}

	fn create(&mut self, path: &str, mode: u32, uid: u32, gid: u32) -> Result<u32> {
		let (parent, name) = resolve_parent(&self.image, &self.index, path)?;
		let new_inode = mutate::create(
			&mut self.image,
			&mut self.index,
			parent,
			name,
			mode,
			uid,
			gid,
			now(),
		)?;
		info!("create {path} -> inode {new_inode}, head {}", self.image.head()?);
		Ok(new_inode)
	}

	/// `mknod(path, mode)`: creates a regular file.
	pub fn mknod(&mut self, path: &str, mode: u32, uid: u32, gid: u32) -> Result<u32> {
		debug!("mknod({path})");
		self.create(path, (mode & !S_IFMT) | crate::record::S_IFREG, uid, gid)
			.inspect_err(|e| warn!("mknod({path}): {e}"))
	}

	/// `mkdir(path, mode)`: creates an empty directory.
	pub fn mkdir(&mut self, path: &str, mode: u32, uid: u32, gid: u32) -> Result<u32> {
		debug!("mkdir({path})");
		self.create(path, (mode & !S_IFMT) | S_IFDIR, uid, gid)
			.inspect_err(|e| warn!("mkdir({path}): {e}"))
	}

	/// `read(path, buf, offset)`: copies bytes from the live record payload.
	pub fn read(&self, path: &str, buf: &mut [u8], offset: u64) -> Result<usize> {
		debug!("read({path}, offset={offset}, len={})", buf.len());
		let inode = resolve_path(&self.image, &self.index, path)?;
		mutate::read(&self.image, &self.index, inode, offset, buf)
			.inspect_err(|e| warn!("read({path}): {e}"))
	}

	/// `write(path, buf, offset)`: appends a new record per §4.5.
	pub fn write(&mut self, path: &str, buf: &[u8], offset: u64) -> Result<usize> {
		debug!("write({path}, offset={offset}, len={})", buf.len());
		let inode = resolve_path(&self.image, &self.index, path)?;
		let n = mutate::write(&mut self.image, &mut self.index, inode, offset, buf, now())
			.inspect_err(|e| warn!("write({path}): {e}"))?;
		info!("write {path} +{n}B, head {}", self.image.head()?);
		Ok(n)
	}

	/// `readdir(path)`: enumerates entries of the live directory record.
	pub fn readdir(&self, path: &str) -> Result<Vec<DirListEntry>> {
		debug!("readdir({path})");
		let inode = resolve_path(&self.image, &self.index, path)?;
		let (header, payload) = resolve::latest_live(&self.image, &self.index, inode)?;
		if !header.is_dir() {
			return Err(Error::NotDirectory);
		}
		let entries = decode_dir_payload(payload)?;
		entries
			.into_iter()
			.map(|e| -> Result<DirListEntry> {
				let child = e.inode_number as u32;
				let (child_header, _) = resolve::latest_live(&self.image, &self.index, child)?;
				Ok(DirListEntry {
					name: e.name,
					inode: child,
					is_dir: child_header.is_dir(),
				})
			})
			.collect::<Result<Vec<_>>>()
			.inspect_err(|e| warn!("readdir({path}): {e}"))
	}

	/// `unlink(path)`: removes a regular file per §4.6.
	pub fn unlink(&mut self, path: &str) -> Result<()> {
		debug!("unlink({path})");
		let (parent, name) = resolve_parent(&self.image, &self.index, path)?;
		mutate::unlink(&mut self.image, &mut self.index, parent, name, now())
			.inspect_err(|e| warn!("unlink({path}): {e}"))?;
		info!("unlink {path}, head {}", self.image.head()?);
		Ok(())
	}

	/// `rmdir(path)`: removes an empty directory per §4.7.
	pub fn rmdir(&mut self, path: &str) -> Result<()> {
		debug!("rmdir({path})");
		let (parent, name) = resolve_parent(&self.image, &self.index, path)?;
		mutate::rmdir(&mut self.image, &mut self.index, parent, name, now())
			.inspect_err(|e| warn!("rmdir({path}): {e}"))?;
		info!("rmdir {path}, head {}", self.image.head()?);
		Ok(())
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::image::DISK_SIZE;
	use crate::record::S_IFREG;

	fn fresh() -> Filesystem<Vec<u8>> {
		let image = Image::format(vec![0u8; DISK_SIZE as usize]).unwrap();
		Filesystem::new(image).unwrap()
	}

	#[test]
	fn scenario_mkdir_shows_three_records_and_listing() {
		let mut fs = fresh();
		fs.mkdir("/a", 0o755, 0, 0).unwrap();
		let entries = fs.readdir("/").unwrap();
		assert_eq!(entries.len(), 1);
		assert_eq!(entries[0].name, "a");
		assert!(entries[0].is_dir);

		let records: Vec<_> = crate::scan::scan(&fs.image)
			.unwrap()
			.collect::<Result<_>>()
			.unwrap();
		assert_eq!(records.len(), 3);
	}

	#[test]
	fn scenario_write_twice_then_read_back() {
		let mut fs = fresh();
		fs.mknod("/f", 0o644, 0, 0).unwrap();
		fs.write("/f", b"hello", 0).unwrap();
		fs.write("/f", b"!", 5).unwrap();
		let mut buf = [0u8; 6];
		let n = fs.read("/f", &mut buf, 0).unwrap();
		assert_eq!(n, 6);
		assert_eq!(&buf, b"hello!");

		let records: Vec<_> = crate::scan::scan(&fs.image)
			.unwrap()
			.collect::<Result<_>>()
			.unwrap();
		// root + create(/f) + re-appended root + write + write = 5, but only
		// the /f-specific records matter for this assertion: create + 2
		// writes = 3 records carrying inode 1.
		let f_inode = resolve_path(&fs.image, &fs.index, "/f").unwrap();
		let f_records = records
			.iter()
			.filter(|r| r.header.inode_number == f_inode)
			.count();
		assert_eq!(f_records, 3);
	}

	#[test]
	fn scenario_unlink_then_resolve_enoent() {
		let mut fs = fresh();
		fs.mknod("/f", 0o644, 0, 0).unwrap();
		fs.unlink("/f").unwrap();
		assert!(matches!(fs.getattr("/f"), Err(Error::NotFound)));
	}

	#[test]
	fn scenario_enospc_leaves_content_readable() {
		let mut fs = fresh();
		fs.mknod("/f", 0o644, 0, 0).unwrap();
		fs.write("/f", b"hello", 0).unwrap();
		let huge = vec![0u8; DISK_SIZE as usize];
		assert!(matches!(fs.write("/f", &huge, 0), Err(Error::NoSpace)));
		let mut buf = [0u8; 5];
		fs.read("/f", &mut buf, 0).unwrap();
		assert_eq!(&buf, b"hello");
	}

	#[test]
	fn scenario_rmdir_nonempty_then_empty() {
		let mut fs = fresh();
		fs.mkdir("/a", 0o755, 0, 0).unwrap();
		fs.mkdir("/a/b", 0o755, 0, 0).unwrap();
		assert!(matches!(fs.rmdir("/a"), Err(Error::NotEmpty)));
		fs.rmdir("/a/b").unwrap();
		fs.rmdir("/a").unwrap();
	}

	#[test]
	fn create_then_resolve_reports_regular_file() {
		let mut fs = fresh();
		fs.mkdir("/a", 0o755, 0, 0).unwrap();
		fs.mkdir("/a/b", 0o755, 0, 0).unwrap();
		fs.mknod("/a/b/c", 0o644, 0, 0).unwrap();
		let attr = fs.getattr("/a/b/c").unwrap();
		assert_eq!(attr.mode & S_IFMT, S_IFREG);
	}
}
