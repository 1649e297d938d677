//! This module implements features common to several commands.

pub mod disk;
pub mod prompt;
pub mod util;

use std::process::exit;

/// Prints `msg` prefixed with the current program's name to stderr, then
/// exits with status 1. The common way every binary in this workspace
/// reports a fatal, user-facing error.
pub fn error(prog: &str, msg: impl std::fmt::Display) -> ! {
	eprintln!("{prog}: {msg}");
	exit(1);
}
