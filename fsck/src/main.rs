//! The `fsck` tool compacts a WFS image in place, dropping tombstones and
//! superseded records. Must not be run against a mounted image.

use std::env;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::exit;

use memmap2::MmapMut;
use wfs::image::{Image, DISK_SIZE};

#[derive(Default)]
struct Args {
	prog: String,
	help: bool,
	image_path: Option<PathBuf>,
}

fn parse_args() -> Args {
	let mut args: Args = Default::default();
	let mut iter = env::args();

	args.prog = iter.next().unwrap_or("fsck".to_owned());

	for arg in iter {
		match arg.as_str() {
			"-h" | "--help" => args.help = true,
			_ => args.image_path = Some(PathBuf::from(arg)),
		}
	}

	args
}

fn print_usage(prog: &str) {
	eprintln!("Usage:");
	eprintln!(" {prog} [-h]");
	eprintln!(" {prog} <image>");
	eprintln!();
	eprintln!("Compacts a WFS image in place, dropping tombstoned and stale records.");
	eprintln!("Do not run this against an image that is currently mounted.");
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

	let head_before = image.head().unwrap_or(0);
	let compacted = wfs::compact::compact(&image)
		.unwrap_or_else(|e| utils::error(&args.prog, format!("compaction failed: {e}")));

	let mut mmap = image.into_backing();
	mmap.copy_from_slice(&compacted);
	mmap.flush()
		.unwrap_or_else(|e| utils::error(&args.prog, format!("{}: {e}", image_path.display())));

	let reopened = Image::open(mmap)
		.unwrap_or_else(|e| utils::error(&args.prog, "compacted image failed to reopen"));
	println!(
		"{}: compacted, head {head_before} -> {}",
		image_path.display(),
		reopened.head().unwrap_or(0)
	);
}
