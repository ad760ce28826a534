//! Pack a directory tree and extract it again.

use std::fs;
use std::io::{Cursor, Read};
use std::os::unix::fs::{symlink, MetadataExt, PermissionsExt};
use std::path::Path;

use tar_fs::{PackOptions, Packer, UnpackOptions, Unpacker};
use tar_header::stream::TarStreamParser;
use tar_header::EntryType;

fn pack(cwd: &Path, paths: &[&str], options: PackOptions) -> anyhow::Result<Vec<u8>> {
    let mut packer = Packer::new(
        Vec::new(),
        PackOptions {
            cwd: cwd.to_path_buf(),
            ..options
        },
    )?;
    for path in paths {
        packer.add(path)?;
    }
    Ok(packer.finish()?)
}

#[test]
fn test_simple_listing() -> anyhow::Result<()> {
    let src = tempfile::tempdir()?;
    fs::write(src.path().join("a.txt"), "hi")?;
    fs::set_permissions(src.path().join("a.txt"), fs::Permissions::from_mode(0o644))?;
    fs::create_dir(src.path().join("b"))?;

    let data = pack(src.path(), &["a.txt", "b"], PackOptions::default())?;
    let mut parser = TarStreamParser::with_defaults(Cursor::new(&data));

    let mut entry = parser.next_entry()?.expect("a.txt");
    assert_eq!(entry.path(), b"a.txt");
    assert_eq!(entry.entry_type(), EntryType::Regular);
    assert_eq!(entry.header().mode, 0o644);
    let mut body = String::new();
    entry.read_to_string(&mut body)?;
    assert_eq!(body, "hi");

    let entry = parser.next_entry()?.expect("b/");
    assert_eq!(entry.path(), b"b/");
    assert_eq!(entry.entry_type(), EntryType::Directory);

    assert!(parser.next_entry()?.is_none());
    assert!(parser.warnings().is_empty());
    Ok(())
}

#[test]
fn test_tree_survives() -> anyhow::Result<()> {
    let src = tempfile::tempdir()?;
    let tree = src.path().join("tree");
    fs::create_dir_all(tree.join("nested/deeper"))?;
    fs::write(tree.join("nested/deeper/data.bin"), vec![0xa5u8; 100_000])?;
    fs::write(tree.join("script.sh"), "#!/bin/sh\necho hi\n")?;
    fs::set_permissions(tree.join("script.sh"), fs::Permissions::from_mode(0o755))?;
    fs::hard_link(tree.join("script.sh"), tree.join("alias.sh"))?;
    symlink("nested/deeper/data.bin", tree.join("shortcut"))?;
    let long = "n".repeat(150);
    fs::write(tree.join(&long), "long name")?;

    let data = pack(src.path(), &["tree"], PackOptions::default())?;

    let dst = tempfile::tempdir()?;
    let summary = Unpacker::new(UnpackOptions {
        cwd: dst.path().to_path_buf(),
        ..Default::default()
    })?
    .unpack(&data[..])?;
    assert_eq!(summary.warnings, 0);
    assert_eq!(summary.entries, 8);

    let out = dst.path().join("tree");
    assert_eq!(fs::read(out.join("nested/deeper/data.bin"))?, vec![0xa5u8; 100_000]);
    assert_eq!(fs::read(out.join(&long))?, b"long name");
    assert_eq!(fs::read_link(out.join("shortcut"))?, Path::new("nested/deeper/data.bin"));

    let script = fs::metadata(out.join("script.sh"))?;
    assert_eq!(script.permissions().mode() & 0o777, 0o755);
    assert_eq!(script.ino(), fs::metadata(out.join("alias.sh"))?.ino());
    assert_eq!(
        script.mtime(),
        fs::metadata(tree.join("script.sh"))?.mtime()
    );
    Ok(())
}

#[test]
fn test_portable_is_reproducible() -> anyhow::Result<()> {
    let src = tempfile::tempdir()?;
    fs::create_dir(src.path().join("d"))?;
    fs::write(src.path().join("d/f"), "same")?;

    let options = || PackOptions {
        portable: true,
        mtime: Some(tar_header::Timestamp::from_secs(1_700_000_000)),
        ..Default::default()
    };
    let first = pack(src.path(), &["d"], options())?;
    fs::set_permissions(src.path().join("d/f"), fs::Permissions::from_mode(0o640))?;
    let second = pack(src.path(), &["d"], options())?;
    // Group and other write bits are dropped; read bits are kept.
    assert_ne!(first, second);

    fs::set_permissions(src.path().join("d/f"), fs::Permissions::from_mode(0o666))?;
    let third = pack(src.path(), &["d"], options())?;
    fs::set_permissions(src.path().join("d/f"), fs::Permissions::from_mode(0o644))?;
    let fourth = pack(src.path(), &["d"], options())?;
    similar_asserts::assert_eq!(third, fourth);
    Ok(())
}

#[test]
fn test_prefix() -> anyhow::Result<()> {
    let src = tempfile::tempdir()?;
    fs::write(src.path().join("f"), "x")?;
    let data = pack(
        src.path(),
        &["f"],
        PackOptions {
            prefix: Some("release-1.0".into()),
            ..Default::default()
        },
    )?;

    let mut archive = tar::Archive::new(&data[..]);
    let paths: Vec<_> = archive
        .entries()?
        .map(|entry| entry.and_then(|e| Ok(e.path()?.into_owned())))
        .collect::<Result<_, _>>()?;
    assert_eq!(paths, [Path::new("release-1.0/f")]);
    Ok(())
}
