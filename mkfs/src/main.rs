//! The `mkfs` tool creates a fresh WFS image at a given path.

use std::env;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::process::exit;

use utils::prompt::prompt;
use utils::util::ByteSize;
use wfs::image::{Image, DISK_SIZE};
use wfs::superblock::{Superblock, MAGIC};

/// Structure storing command line arguments.
#[derive(Default)]
struct Args {
	/// The name of the current program used in command line.
	prog: String,

	/// If true, print command line help.
	help: bool,

	/// The path to the file the image will be created at.
	image_path: Option<PathBuf>,
}

fn parse_args() -> Args {
	let mut args: Args = Default::default();
	let mut iter = env::args();

	args.prog = iter.next().unwrap_or("mkfs".to_owned());

	for arg in iter {
		match arg.as_str() {
			"-h" | "--help" => args.help = true,

			_ => {
				// TODO handle case when several paths are given
				args.image_path = Some(PathBuf::from(arg));
			}
		}
	}

	args
}

fn print_usage(prog: &str) {
	eprintln!("Usage:");
	eprintln!(" {prog} [-h]");
	eprintln!(" {prog} <image>");
	eprintln!();
	eprintln!("Creates a {} WFS image at <image>.", ByteSize(DISK_SIZE));
}

/// Returns whether the bytes at the start of `path` already look like a
/// WFS superblock.
fn looks_like_wfs(path: &std::path::Path) -> bool {
	let Ok(bytes) = std::fs::read(path) else {
		return false;
	};
	if bytes.len() < 8 {
		return false;
	}
	matches!(Superblock::decode(&bytes[0..8]), Ok(sb) if sb.magic == MAGIC)
}

fn main() {
	let args = parse_args();

	if args.help {
		print_usage(&args.prog);
		exit(0);
	}

	let image_path = args.image_path.unwrap_or_else(|| {
		print_usage(&args.prog);
		exit(1);
	});

	if image_path.exists() {
		if looks_like_wfs(&image_path) {
			println!("{} already contains a WFS image.", image_path.display());
		} else {
			println!("{} already exists.", image_path.display());
		}

		let confirm = prompt(Some("Overwrite? (y/N) "), false)
			.map(|s| s.to_lowercase() == "y")
			.unwrap_or(false);
		if !confirm {
			eprintln!("Abort.");
			exit(1);
		}
	}

	let mut file = OpenOptions::new()
		.create(true)
		.truncate(true)
		.write(true)
		.open(&image_path)
		.unwrap_or_else(|e| utils::error(&args.prog, format!("{}: {e}", image_path.display())));

	let image = Image::format(vec![0u8; DISK_SIZE as usize])
		.unwrap_or_else(|e| utils::error(&args.prog, format!("failed to format image: {e}")));
	file.write_all(&image.into_backing())
		.unwrap_or_else(|e| utils::error(&args.prog, format!("{}: {e}", image_path.display())));

	println!(
		"Created a {} WFS image at {}.",
		ByteSize(DISK_SIZE),
		image_path.display()
	);
}
