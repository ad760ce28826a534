//! Concurrent extraction must land in the same state as sequential
//! extraction.

mod common;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tar_fs::fs::{FileKind, Filesystem, MemoryFs};
use tar_fs::{AsyncUnpacker, Error, UnpackOptions, Unpacker};
use tar_header::{EntryHeader, EntryType};

use common::ArchiveBuilder;

#[derive(Debug, PartialEq, Eq)]
struct Node {
    path: PathBuf,
    kind: FileKind,
    mode: u32,
    uid: u64,
    contents: Vec<u8>,
}

fn snapshot(fs: &MemoryFs) -> Vec<Node> {
    fs.paths()
        .into_iter()
        .map(|path| {
            let meta = fs.lstat(&path).unwrap();
            let contents = match meta.kind {
                FileKind::File => fs.read(&path).unwrap(),
                FileKind::Symlink => fs
                    .read_link(&path)
                    .unwrap()
                    .into_os_string()
                    .into_encoded_bytes(),
                _ => Vec::new(),
            };
            Node {
                path,
                kind: meta.kind,
                mode: meta.mode,
                uid: meta.uid,
                contents,
            }
        })
        .collect()
}

fn options() -> UnpackOptions {
    UnpackOptions {
        cwd: "/out".into(),
        preserve_owner: Some(false),
        ..Default::default()
    }
}

fn fresh() -> MemoryFs {
    let fs = MemoryFs::new();
    fs.mkdir(Path::new("/out"), 0o755).unwrap();
    fs
}

/// Many entries, several of which touch the same paths in ways that only
/// work out in archive order.
fn busy_archive() -> Vec<u8> {
    let mut builder = ArchiveBuilder::new().dir("shared/", 0o750);
    for i in 0..40 {
        builder = builder.file(&format!("shared/file-{i}"), format!("contents {i}\n").as_bytes());
    }
    builder
        .file("clash", b"first")
        .dir("clash/", 0o755)
        .file("clash/inner", b"inside")
        .file("again", b"one")
        .file("again", b"two, and longer")
        .file("target", b"linked")
        .hard_link("hard", "target")
        .symlink("soft", "shared/file-7")
        .file("soft", b"replaced the symlink")
        .dir("ro/", 0o500)
        .file("ro/late", &vec![b'r'; 70_000])
        .finish()
}

fn unpack_sync(archive: &[u8]) -> MemoryFs {
    let fs = fresh();
    Unpacker::with_filesystem(options(), Arc::new(fs.clone()))
        .unwrap()
        .unpack(archive)
        .unwrap();
    fs
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_matches_sequential() {
    let archive = busy_archive();
    let expected = snapshot(&unpack_sync(&archive));

    for jobs in [1, 2, 8] {
        let fs = fresh();
        let summary = AsyncUnpacker::with_filesystem(
            UnpackOptions { jobs, ..options() },
            Arc::new(fs.clone()),
        )
        .unwrap()
        .unpack(&archive[..])
        .await
        .unwrap();
        assert_eq!(summary.warnings, 0, "jobs={jobs}");
        similar_asserts::assert_eq!(snapshot(&fs), expected);
    }

    let fs = unpack_sync(&archive);
    assert_eq!(fs.read(Path::new("/out/again")).unwrap(), b"two, and longer");
    assert_eq!(fs.read(Path::new("/out/soft")).unwrap(), b"replaced the symlink");
    assert_eq!(fs.lstat(Path::new("/out/ro")).unwrap().mode, 0o500);
    assert_eq!(fs.lstat(Path::new("/out/hard")).unwrap().nlink, 2);
}

#[tokio::test]
async fn test_fragmented_input() {
    let archive = busy_archive();
    let expected = snapshot(&unpack_sync(&archive));

    let mut reader = tokio_test::io::Builder::new();
    for chunk in archive.chunks(333) {
        reader.read(chunk);
    }
    let fs = fresh();
    AsyncUnpacker::with_filesystem(options(), Arc::new(fs.clone()))
        .unwrap()
        .unpack(reader.build())
        .await
        .unwrap();
    similar_asserts::assert_eq!(snapshot(&fs), expected);
}

#[tokio::test]
async fn test_symlink_poisoning() {
    let fs = fresh();
    fs.mkdir(Path::new("/etc"), 0o755).unwrap();
    let archive = ArchiveBuilder::new()
        .symlink("evil", "/etc")
        .file("evil/passwd", b"pwned")
        .file("after", b"never")
        .finish();

    let err = AsyncUnpacker::with_filesystem(options(), Arc::new(fs.clone()))
        .unwrap()
        .unpack(&archive[..])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Symlink { .. }), "{err}");
    assert!(fs.lstat(Path::new("/etc/passwd")).is_err());
}

/// A file whose size field is base-256 encoded, followed by a normal entry.
fn base256_archive(size: usize) -> Vec<u8> {
    let mut header = EntryHeader::new(EntryType::Regular, "big");
    header.mode = 0o644;
    header.size = size as u64;
    let mut block = header.encode().block;
    let field = &mut block.as_mut_bytes()[124..136];
    field.fill(0);
    field[0] = 0x80;
    field[4..].copy_from_slice(&(size as u64).to_be_bytes());
    block.set_checksum();

    let body: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
    ArchiveBuilder::new()
        .raw(block.as_bytes(), &body)
        .file("after", b"tail")
        .finish()
}

#[tokio::test]
async fn test_base256_size_extracts_in_full() {
    const SIZE: usize = 70_000;
    let archive = base256_archive(SIZE);
    assert_eq!(archive[124], 0x80);

    let fs = fresh();
    let summary = Unpacker::with_filesystem(options(), Arc::new(fs.clone()))
        .unwrap()
        .unpack(&archive[..])
        .unwrap();
    assert_eq!((summary.created, summary.warnings), (2, 0));
    let data = fs.read(Path::new("/out/big")).unwrap();
    assert_eq!(data.len(), SIZE);
    assert!(data.iter().enumerate().all(|(i, &b)| b == (i % 251) as u8));
    assert_eq!(fs.read(Path::new("/out/after")).unwrap(), b"tail");

    let concurrent = fresh();
    AsyncUnpacker::with_filesystem(options(), Arc::new(concurrent.clone()))
        .unwrap()
        .unpack(&archive[..])
        .await
        .unwrap();
    similar_asserts::assert_eq!(snapshot(&concurrent), snapshot(&fs));
}

#[test]
fn test_ownership() {
    let fs = fresh();
    let mut header = EntryHeader::new(EntryType::Regular, "owned");
    header.mode = 0o640;
    header.uid = 1000;
    header.gid = 1000;
    let archive = ArchiveBuilder::new().entry(header, b"").finish();

    Unpacker::with_filesystem(
        UnpackOptions {
            preserve_owner: Some(true),
            force_chown: true,
            ..options()
        },
        Arc::new(fs.clone()),
    )
    .unwrap()
    .unpack(&archive[..])
    .unwrap();
    let meta = fs.lstat(Path::new("/out/owned")).unwrap();
    assert_eq!((meta.uid, meta.gid, meta.mode), (1000, 1000, 0o640));

    let fs = fresh();
    Unpacker::with_filesystem(
        UnpackOptions {
            uid: Some(42),
            gid: Some(43),
            ..options()
        },
        Arc::new(fs.clone()),
    )
    .unwrap()
    .unpack(&archive[..])
    .unwrap();
    let meta = fs.lstat(Path::new("/out/owned")).unwrap();
    assert_eq!((meta.uid, meta.gid), (42, 43));
}

#[test]
fn test_bad_options() {
    let err = Unpacker::new(UnpackOptions {
        uid: Some(1),
        ..Default::default()
    })
    .unwrap_err();
    assert!(matches!(err, Error::InvalidOptions(_)), "{err}");
}
