//! End-to-end scenarios exercised through the public surface only, against
//! an in-memory image. These mirror the walkthroughs a reviewer would run
//! by hand against a freshly mounted volume.

use wfs::error::Error;
use wfs::image::{Image, DISK_SIZE};
use wfs::record::{S_IFDIR, S_IFMT, S_IFREG};
use wfs::Filesystem;

fn fresh() -> Filesystem<Vec<u8>> {
	let image = Image::format(vec![0u8; DISK_SIZE as usize]).unwrap();
	Filesystem::new(image).unwrap()
}

#[test]
fn mkdir_then_readdir_shows_the_new_entry() {
	let mut fs = fresh();
	fs.mkdir("/docs", 0o755, 1000, 1000).unwrap();

	let root = fs.readdir("/").unwrap();
	assert_eq!(root.len(), 1);
	assert_eq!(root[0].name, "docs");
	assert!(root[0].is_dir);

	let attr = fs.getattr("/docs").unwrap();
	assert!(attr.is_dir());
	assert_eq!(attr.uid, 1000);
}

#[test]
fn mknod_write_write_read_round_trips_bytes() {
	let mut fs = fresh();
	fs.mknod("/notes.txt", 0o644, 0, 0).unwrap();
	fs.write("/notes.txt", b"draft one", 0).unwrap();
	fs.write("/notes.txt", b" and two", 9).unwrap();

	let attr = fs.getattr("/notes.txt").unwrap();
	assert_eq!(attr.size, 17);
	assert_eq!(attr.blocks, 1);

	let mut buf = vec![0u8; 17];
	let n = fs.read("/notes.txt", &mut buf, 0).unwrap();
	assert_eq!(n, 17);
	assert_eq!(&buf, b"draft one and two");
}

#[test]
fn unlink_removes_the_name_but_the_log_keeps_a_tombstone() {
	let mut fs = fresh();
	fs.mknod("/gone.txt", 0o644, 0, 0).unwrap();
	fs.write("/gone.txt", b"x", 0).unwrap();
	fs.unlink("/gone.txt").unwrap();

	assert!(matches!(fs.getattr("/gone.txt"), Err(Error::NotFound)));
	assert_eq!(fs.readdir("/").unwrap().len(), 0);
}

#[test]
fn filling_the_image_fails_closed_without_corrupting_existing_data() {
	let mut fs = fresh();
	fs.mknod("/payload.bin", 0o644, 0, 0).unwrap();
	fs.write("/payload.bin", b"keep me", 0).unwrap();

	let oversized = vec![7u8; DISK_SIZE as usize];
	let err = fs.write("/payload.bin", &oversized, 0).unwrap_err();
	assert!(matches!(err, Error::NoSpace));

	let mut buf = [0u8; 7];
	fs.read("/payload.bin", &mut buf, 0).unwrap();
	assert_eq!(&buf, b"keep me");
}

#[test]
fn rmdir_refuses_nonempty_then_succeeds_once_emptied() {
	let mut fs = fresh();
	fs.mkdir("/a", 0o755, 0, 0).unwrap();
	fs.mkdir("/a/b", 0o755, 0, 0).unwrap();

	assert!(matches!(fs.rmdir("/a"), Err(Error::NotEmpty)));

	fs.rmdir("/a/b").unwrap();
	fs.rmdir("/a").unwrap();
	assert!(matches!(fs.getattr("/a"), Err(Error::NotFound)));
}

#[test]
fn compacting_preserves_live_content_and_drops_history() {
	let mut fs = fresh();
	fs.mknod("/f", 0o644, 0, 0).unwrap();
	fs.write("/f", b"v1", 0).unwrap();
	fs.write("/f", b"v2!", 0).unwrap();
	fs.mkdir("/d", 0o755, 0, 0).unwrap();
	fs.mknod("/d/g", 0o600, 7, 7).unwrap();
	fs.unlink("/f").unwrap();

	let records_before: Vec<_> = wfs::scan::scan(fs.image()).unwrap().collect::<Result<_, _>>().unwrap();
	let compacted = wfs::compact::compact(fs.image()).unwrap();
	let compacted_image = Image::open(compacted).unwrap();

	let records_after: Vec<_> = wfs::scan::scan(&compacted_image)
		.unwrap()
		.collect::<Result<_, _>>()
		.unwrap();
	assert!(records_after.len() < records_before.len());

	// Inode numbers appear in ascending order after compaction.
	let numbers: Vec<u32> = records_after.iter().map(|r| r.header.inode_number).collect();
	let mut sorted = numbers.clone();
	sorted.sort_unstable();
	assert_eq!(numbers, sorted);

	// /f is gone (it was unlinked); /d/g survives with its content intact.
	let mut compacted_fs = Filesystem::new(compacted_image).unwrap();
	assert!(matches!(compacted_fs.getattr("/f"), Err(Error::NotFound)));
	let attr = compacted_fs.getattr("/d/g").unwrap();
	assert_eq!(attr.mode & S_IFMT, S_IFREG);
	assert_eq!(attr.uid, 7);
	let dir_attr = compacted_fs.getattr("/d").unwrap();
	assert_eq!(dir_attr.mode & S_IFMT, S_IFDIR);
}

#[test]
fn compacting_an_already_compacted_image_is_a_no_op() {
	let mut fs = fresh();
	fs.mknod("/f", 0o644, 0, 0).unwrap();
	fs.write("/f", b"v1", 0).unwrap();
	fs.write("/f", b"v2!", 0).unwrap();
	fs.mkdir("/d", 0o755, 0, 0).unwrap();
	fs.mknod("/d/g", 0o600, 7, 7).unwrap();
	fs.unlink("/f").unwrap();

	let once = wfs::compact::compact(fs.image()).unwrap();
	let once_image = Image::open(once.clone()).unwrap();
	let twice = wfs::compact::compact(&once_image).unwrap();

	assert_eq!(once, twice);
}
