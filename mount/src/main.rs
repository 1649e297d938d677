//! The `mount` command bridges a WFS image to the kernel via FUSE.
//!
//! WFS's own inode numbering starts at 0 for the root, but FUSE reserves
//! ino 1 for the root and treats ino 0 as invalid. Every inode number that
//! crosses the bridge is translated with [`to_fuse_ino`]/[`to_wfs_inode`]
//! so the core library never has to know about the kernel's convention.

use std::collections::HashMap;
use std::env;
use std::ffi::OsStr;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::exit;
use std::time::{Duration, UNIX_EPOCH};

use fuser::{
	FileAttr, FileType, Filesystem as FuseFilesystem, MountOption, ReplyAttr, ReplyData,
	ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyWrite, Request,
};
use log::{debug, error};
use memmap2::MmapMut;

use wfs::error::Error as WfsError;
use wfs::fs::Filesystem as WfsFs;
use wfs::image::{Image, DISK_SIZE};

/// How long the kernel may cache attribute and entry replies before asking
/// again. WFS has no network latency to hide behind a long TTL, so we keep
/// it short rather than risk serving stale metadata after a mutation made
/// through another handle.
const ATTR_TTL: Duration = Duration::from_secs(1);

fn to_fuse_ino(wfs_inode: u32) -> u64 {
	wfs_inode as u64 + 1
}

fn to_wfs_inode(fuse_ino: u64) -> u32 {
	(fuse_ino - 1) as u32
}

fn errno(e: &WfsError) -> i32 {
	e.to_errno()
}

fn to_file_attr(attr: &wfs::fs::Attr) -> FileAttr {
	let epoch = UNIX_EPOCH;
	let time = |secs: u32| UNIX_EPOCH + Duration::from_secs(secs as u64);
	FileAttr {
		ino: to_fuse_ino(attr.inode),
		size: attr.size,
		blocks: attr.blocks,
		atime: time(attr.atime),
		mtime: time(attr.mtime),
		ctime: time(attr.ctime),
		crtime: epoch,
		kind: if attr.is_dir() {
			FileType::Directory
		} else {
			FileType::RegularFile
		},
		perm: (attr.mode & 0o7777) as u16,
		nlink: attr.links,
		uid: attr.uid,
		gid: attr.gid,
		rdev: 0,
		blksize: 512,
		flags: 0,
	}
}

/// Maps a `fuser` inode handle back onto the path the core library's
/// path-based operations expect, by recording `(parent, name)` as `lookup`
/// and `readdir` discover them. The kernel only ever gives us
/// `(parent_ino, name)` pairs, so a real FUSE bridge has to maintain a
/// cache like this one regardless of how the backing filesystem works.
struct PathCache {
	parents: HashMap<u64, (u64, String)>,
}

impl PathCache {
	fn new() -> Self {
		Self {
			parents: HashMap::new(),
		}
	}

	fn record(&mut self, ino: u64, parent: u64, name: &str) {
		self.parents.insert(ino, (parent, name.to_owned()));
	}

	fn forget(&mut self, ino: u64) {
		self.parents.remove(&ino);
	}

	fn path_of(&self, ino: u64) -> Option<String> {
		if ino == fuser::FUSE_ROOT_ID {
			return Some("/".to_owned());
		}
		let mut segments = Vec::new();
		let mut cur = ino;
		while cur != fuser::FUSE_ROOT_ID {
			let (parent, name) = self.parents.get(&cur)?;
			segments.push(name.clone());
			cur = *parent;
		}
		segments.reverse();
		Some(format!("/{}", segments.join("/")))
	}

	fn child_path(&self, parent: u64, name: &str) -> Option<String> {
		let base = self.path_of(parent)?;
		if base == "/" {
			Some(format!("/{name}"))
		} else {
			Some(format!("{base}/{name}"))
		}
	}
}

struct Bridge {
	fs: WfsFs<MmapMut>,
	paths: PathCache,
}

impl Bridge {
	fn new(fs: WfsFs<MmapMut>) -> Self {
		Self {
			fs,
			paths: PathCache::new(),
		}
	}
}

impl FuseFilesystem for Bridge {
	fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
		let Some(name) = name.to_str() else {
			reply.error(libc::EINVAL);
			return;
		};
		let parent_inode = to_wfs_inode(parent);
		match wfs::resolve::lookup_child(self.fs.image(), self.fs.index(), parent_inode, name) {
			Ok(child) => match self.fs.getattr_inode(child) {
				Ok(attr) => {
					self.paths.record(to_fuse_ino(child), parent, name);
					reply.entry(&ATTR_TTL, &to_file_attr(&attr), 0);
				}
				Err(e) => reply.error(errno(&e)),
			},
			Err(e) => reply.error(errno(&e)),
		}
	}

	fn forget(&mut self, _req: &Request, ino: u64, _nlookup: u64) {
		self.paths.forget(ino);
	}

	fn getattr(&mut self, _req: &Request, ino: u64, reply: ReplyAttr) {
		match self.fs.getattr_inode(to_wfs_inode(ino)) {
			Ok(attr) => reply.attr(&ATTR_TTL, &to_file_attr(&attr)),
			Err(e) => reply.error(errno(&e)),
		}
	}

	fn mknod(
		&mut self,
		req: &Request,
		parent: u64,
		name: &OsStr,
		mode: u32,
		_umask: u32,
		_rdev: u32,
		reply: ReplyEntry,
	) {
		let Some(path) = name.to_str().and_then(|n| self.paths.child_path(parent, n)) else {
			reply.error(libc::EINVAL);
			return;
		};
		match self.fs.mknod(&path, mode, req.uid(), req.gid()) {
			Ok(inode) => match self.fs.getattr_inode(inode) {
				Ok(attr) => {
					if let Some(name) = name.to_str() {
						self.paths.record(to_fuse_ino(inode), parent, name);
					}
					reply.entry(&ATTR_TTL, &to_file_attr(&attr), 0);
				}
				Err(e) => reply.error(errno(&e)),
			},
			Err(e) => reply.error(errno(&e)),
		}
	}

	fn mkdir(
		&mut self,
		req: &Request,
		parent: u64,
		name: &OsStr,
		mode: u32,
		_umask: u32,
		reply: ReplyEntry,
	) {
		let Some(path) = name.to_str().and_then(|n| self.paths.child_path(parent, n)) else {
			reply.error(libc::EINVAL);
			return;
		};
		match self.fs.mkdir(&path, mode, req.uid(), req.gid()) {
			Ok(inode) => match self.fs.getattr_inode(inode) {
				Ok(attr) => {
					if let Some(name) = name.to_str() {
						self.paths.record(to_fuse_ino(inode), parent, name);
					}
					reply.entry(&ATTR_TTL, &to_file_attr(&attr), 0);
				}
				Err(e) => reply.error(errno(&e)),
			},
			Err(e) => reply.error(errno(&e)),
		}
	}

	fn read(
		&mut self,
		_req: &Request,
		ino: u64,
		_fh: u64,
		offset: i64,
		size: u32,
		_flags: i32,
		_lock_owner: Option<u64>,
		reply: ReplyData,
	) {
		let Some(path) = self.paths.path_of(ino) else {
			reply.error(libc::ESTALE);
			return;
		};
		let mut buf = vec![0u8; size as usize];
		match self.fs.read(&path, &mut buf, offset.max(0) as u64) {
			Ok(n) => reply.data(&buf[..n]),
			Err(e) => reply.error(errno(&e)),
		}
	}

	fn write(
		&mut self,
		_req: &Request,
		ino: u64,
		_fh: u64,
		offset: i64,
		data: &[u8],
		_write_flags: u32,
		_flags: i32,
		_lock_owner: Option<u64>,
		reply: ReplyWrite,
	) {
		let Some(path) = self.paths.path_of(ino) else {
			reply.error(libc::ESTALE);
			return;
		};
		match self.fs.write(&path, data, offset.max(0) as u64) {
			Ok(n) => reply.written(n as u32),
			Err(e) => reply.error(errno(&e)),
		}
	}

	fn readdir(
		&mut self,
		_req: &Request,
		ino: u64,
		_fh: u64,
		offset: i64,
		mut reply: ReplyDirectory,
	) {
		let Some(path) = self.paths.path_of(ino) else {
			reply.error(libc::ESTALE);
			return;
		};
		let entries = match self.fs.readdir(&path) {
			Ok(entries) => entries,
			Err(e) => {
				reply.error(errno(&e));
				return;
			}
		};

		let mut all = vec![
			(ino, FileType::Directory, ".".to_owned()),
			(ino, FileType::Directory, "..".to_owned()),
		];
		for entry in &entries {
			let kind = if entry.is_dir {
				FileType::Directory
			} else {
				FileType::RegularFile
			};
			all.push((to_fuse_ino(entry.inode), kind, entry.name.clone()));
			self.paths.record(to_fuse_ino(entry.inode), ino, &entry.name);
		}

		for (i, (child_ino, kind, name)) in all.into_iter().enumerate().skip(offset as usize) {
			if reply.add(child_ino, (i + 1) as i64, kind, name) {
				break;
			}
		}
		reply.ok();
	}

	fn unlink(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
		let Some(path) = name.to_str().and_then(|n| self.paths.child_path(parent, n)) else {
			reply.error(libc::EINVAL);
			return;
		};
		match self.fs.unlink(&path) {
			Ok(()) => reply.ok(),
			Err(e) => reply.error(errno(&e)),
		}
	}

	fn rmdir(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
		let Some(path) = name.to_str().and_then(|n| self.paths.child_path(parent, n)) else {
			reply.error(libc::EINVAL);
			return;
		};
		match self.fs.rmdir(&path) {
			Ok(()) => reply.ok(),
			Err(e) => reply.error(errno(&e)),
		}
	}
}

#[derive(Default)]
struct Args {
	prog: String,
	help: bool,
	image_path: Option<PathBuf>,
	mount_point: Option<PathBuf>,
	read_only: bool,
	allow_other: bool,
	default_permissions: bool,
}

/// Recognized bridge-option tokens, each mapping onto one `fuser::MountOption`.
/// Matches `SPEC_FULL.md` §1.3: anything outside this set is rejected with a
/// usage message rather than silently ignored.
fn apply_bridge_option(args: &mut Args, token: &str) -> bool {
	match token {
		"ro" => args.read_only = true,
		"allow_other" => args.allow_other = true,
		"default_permissions" => args.default_permissions = true,
		_ => return false,
	}
	true
}

fn parse_args() -> Args {
	let mut args: Args = Default::default();
	let mut iter = env::args();

	args.prog = iter.next().unwrap_or("mount.wfs".to_owned());

	for arg in iter {
		match arg.as_str() {
			"-h" | "--help" => args.help = true,
			_ if args.image_path.is_none() => args.image_path = Some(PathBuf::from(arg)),
			_ if args.mount_point.is_none() => args.mount_point = Some(PathBuf::from(arg)),
			token => {
				if !apply_bridge_option(&mut args, token) {
					eprintln!("{}: unrecognized bridge option `{token}`", args.prog);
					exit(1);
				}
			}
		}
	}

	args
}

fn print_usage(prog: &str) {
	eprintln!("Usage:");
	eprintln!(" {prog} [-h] <image> <mount-point> [bridge-options...]");
	eprintln!();
	eprintln!("Recognized bridge options: ro, allow_other, default_permissions");
}

fn main() {
	env_logger::init();

	let args = parse_args();
	if args.help {
		print_usage(&args.prog);
		exit(0);
	}

	let (Some(image_path), Some(mount_point)) = (args.image_path, args.mount_point) else {
		print_usage(&args.prog);
		exit(1);
	};

	// The mapping is always read-write regardless of `ro`: read-only access
	// is enforced purely at the FUSE layer via `MountOption::RO` below, so
	// the fd and the mapping it backs must support both.
	let file = OpenOptions::new()
		.read(true)
		.write(true)
		.open(&image_path)
		.unwrap_or_else(|e| utils::error(&args.prog, format!("{}: {e}", image_path.display())));

	let len = file
		.metadata()
		.unwrap_or_else(|e| utils::error(&args.prog, format!("{}: {e}", image_path.display())))
		.len();
	if len != DISK_SIZE {
		utils::error(
			&args.prog,
			format!(
				"{}: not a {DISK_SIZE}-byte WFS image (got {len} bytes)",
				image_path.display()
			),
		);
	}

	let mmap = unsafe { MmapMut::map_mut(&file) }
		.unwrap_or_else(|e| utils::error(&args.prog, format!("{}: {e}", image_path.display())));

	let image = Image::open(mmap)
		.unwrap_or_else(|e| utils::error(&args.prog, format!("{}: {e}", image_path.display())));
	let wfs_fs = WfsFs::new(image)
		.unwrap_or_else(|e| utils::error(&args.prog, format!("failed to scan image: {e}")));

	let mut options = vec![MountOption::FSName("wfs".to_owned())];
	options.push(if args.read_only {
		MountOption::RO
	} else {
		MountOption::RW
	});
	if args.allow_other {
		options.push(MountOption::AllowOther);
	}
	if args.default_permissions {
		options.push(MountOption::DefaultPermissions);
	}

	debug!(
		"mounting {} at {} ({})",
		image_path.display(),
		mount_point.display(),
		if args.read_only { "ro" } else { "rw" }
	);

	if let Err(e) = fuser::mount2(Bridge::new(wfs_fs), &mount_point, &options) {
		error!("mount failed: {e}");
		exit(1);
	}
}
