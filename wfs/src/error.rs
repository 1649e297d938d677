//! The WFS error taxonomy.
//!
//! The on-disk log format doesn't map onto a single `std::io::Error` kind:
//! a caller needs to distinguish a missing path from a full image from a
//! corrupt record. This enum carries that distinction end to end, from the
//! mutator up to the FUSE operation surface, which turns it back into an
//! errno via [`Error::to_errno`].

use std::fmt;
use std::io;

/// An error produced by any `wfs` operation.
#[derive(Debug)]
pub enum Error {
	/// A path or inode number does not exist.
	NotFound,
	/// A name already exists in the target directory.
	AlreadyExists,
	/// The operation does not apply to the entity's type (file vs directory).
	NotDirectory,
	/// A directory was given where a non-directory was expected, e.g.
	/// `unlink` or `write` on a directory.
	IsDirectory,
	/// A non-empty directory was given to `rmdir`.
	NotEmpty,
	/// The log would overflow `DISK_SIZE` if the mutation were applied.
	NoSpace,
	/// A name does not fit in the 32-byte name buffer.
	NameTooLong,
	/// A directory's declared size is not a multiple of the entry stride.
	BadDirectorySize,
	/// A caller-supplied inode handle does not match any cached state.
	BadHandle,
	/// The log is corrupt: a record's declared size runs past `head`, or the
	/// superblock's magic number doesn't match.
	Corruption(&'static str),
	/// Propagated I/O failure (opening/reading/mapping the image file).
	Io(io::Error),
}

impl fmt::Display for Error {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::NotFound => write!(f, "no such file or directory"),
			Self::AlreadyExists => write!(f, "file exists"),
			Self::NotDirectory => write!(f, "not a directory"),
			Self::IsDirectory => write!(f, "is a directory"),
			Self::NotEmpty => write!(f, "directory not empty"),
			Self::NoSpace => write!(f, "no space left on device"),
			Self::NameTooLong => write!(f, "name too long"),
			Self::BadDirectorySize => write!(f, "corrupt directory payload"),
			Self::BadHandle => write!(f, "bad inode handle"),
			Self::Corruption(why) => write!(f, "corrupt image: {why}"),
			Self::Io(e) => write!(f, "i/o error: {e}"),
		}
	}
}

impl std::error::Error for Error {
	fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
		match self {
			Self::Io(e) => Some(e),
			_ => None,
		}
	}
}

impl From<io::Error> for Error {
	fn from(e: io::Error) -> Self {
		Self::Io(e)
	}
}

impl Error {
	/// Maps this error onto the errno the operation surface should hand back
	/// to the kernel bridge, per `spec.md` §7's taxonomy.
	pub fn to_errno(&self) -> i32 {
		match self {
			Self::NotFound => libc::ENOENT,
			Self::AlreadyExists => libc::EEXIST,
			Self::NotDirectory => libc::ENOTDIR,
			Self::IsDirectory => libc::EISDIR,
			Self::NotEmpty => libc::ENOTEMPTY,
			Self::NoSpace => libc::ENOSPC,
			Self::NameTooLong => libc::ENAMETOOLONG,
			Self::BadDirectorySize => libc::EIO,
			Self::BadHandle => libc::EBADF,
			Self::Corruption(_) => libc::EIO,
			Self::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
		}
	}
}

/// Shorthand used throughout `wfs`.
pub type Result<T> = std::result::Result<T, Error>;
