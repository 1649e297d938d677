//! The on-disk log format and the operations built on top of it: a single
//! append-only inode log, resolved by walking paths and folding "latest
//! record wins" over whatever has been appended so far.
//!
//! Callers generally want [`fs::Filesystem`], which wires the scanner,
//! resolver, and mutator together behind path-based methods. A kernel
//! bridge that already thinks in terms of inode numbers and parent/name
//! pairs (as FUSE does) can instead call [`resolve`] and [`mutate`]
//! directly against a [`Filesystem`]'s [`image::Image`] and
//! [`scan::ScanIndex`].

pub mod compact;
pub mod error;
pub mod fs;
pub mod image;
pub mod mutate;
pub mod record;
pub mod resolve;
pub mod scan;
pub mod superblock;

pub use error::{Error, Result};
pub use fs::Filesystem;
pub use image::{Backing, Image, DISK_SIZE};
