//! The real filesystem.

use std::ffi::OsString;
use std::fs::{self, DirBuilder, File, OpenOptions, Permissions};
use std::io::{self, Read, Write};
use std::os::unix::fs::{DirBuilderExt, MetadataExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

use nix::unistd::{Gid, Group, Uid, User};
use rustix::fs::{
    futimens, major, minor, utimensat, AtFlags, FileType, Timespec, Timestamps, CWD,
};
use tar_header::Timestamp;

use super::{CreateMode, FileKind, FileWriter, Filesystem, Metadata};

/// [`Filesystem`] backed by the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostFs;

impl HostFs {
    /// The host filesystem.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn convert(meta: &fs::Metadata) -> Metadata {
    let kind = match FileType::from_raw_mode(meta.mode()) {
        FileType::Directory => FileKind::Directory,
        FileType::Symlink => FileKind::Symlink,
        FileType::CharacterDevice => FileKind::CharDevice,
        FileType::BlockDevice => FileKind::BlockDevice,
        FileType::Fifo => FileKind::Fifo,
        FileType::Socket => FileKind::Socket,
        FileType::RegularFile | FileType::Unknown => FileKind::File,
    };
    let time = |secs: i64, nsec: i64| Timestamp::new(secs, u32::try_from(nsec).unwrap_or(0));
    Metadata {
        kind,
        mode: meta.mode() & 0o7777,
        uid: meta.uid().into(),
        gid: meta.gid().into(),
        size: meta.size(),
        atime: time(meta.atime(), meta.atime_nsec()),
        mtime: time(meta.mtime(), meta.mtime_nsec()),
        ctime: time(meta.ctime(), meta.ctime_nsec()),
        dev: meta.dev(),
        ino: meta.ino(),
        nlink: meta.nlink(),
        rdev_major: major(meta.rdev()),
        rdev_minor: minor(meta.rdev()),
    }
}

fn timestamps(atime: Timestamp, mtime: Timestamp) -> Timestamps {
    let timespec = |t: Timestamp| Timespec {
        tv_sec: t.secs,
        tv_nsec: t.nanos as _,
    };
    Timestamps {
        last_access: timespec(atime),
        last_modification: timespec(mtime),
    }
}

fn owner(id: u64) -> io::Result<u32> {
    u32::try_from(id).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("id {id} does not fit the host's id type"),
        )
    })
}

struct HostWriter {
    file: File,
}

impl Write for HostWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl FileWriter for HostWriter {
    fn set_times(&mut self, atime: Timestamp, mtime: Timestamp) -> io::Result<()> {
        futimens(&self.file, &timestamps(atime, mtime))?;
        Ok(())
    }

    fn chown(&mut self, uid: u64, gid: u64) -> io::Result<()> {
        std::os::unix::fs::fchown(&self.file, Some(owner(uid)?), Some(owner(gid)?))
    }

    fn chmod(&mut self, mode: u32) -> io::Result<()> {
        self.file.set_permissions(Permissions::from_mode(mode))
    }
}

impl Filesystem for HostFs {
    fn stat(&self, path: &Path) -> io::Result<Metadata> {
        fs::metadata(path).map(|m| convert(&m))
    }

    fn lstat(&self, path: &Path) -> io::Result<Metadata> {
        fs::symlink_metadata(path).map(|m| convert(&m))
    }

    fn mkdir(&self, path: &Path, mode: u32) -> io::Result<()> {
        DirBuilder::new().mode(mode).create(path)
    }

    fn create_file(
        &self,
        path: &Path,
        mode: u32,
        how: CreateMode,
    ) -> io::Result<Box<dyn FileWriter>> {
        let mut options = OpenOptions::new();
        options.write(true).mode(mode);
        match how {
            CreateMode::Truncate => options.create(true).truncate(true),
            CreateMode::Exclusive => options.create_new(true),
        };
        let file = options.open(path)?;
        Ok(Box::new(HostWriter { file }))
    }

    fn open(&self, path: &Path) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(File::open(path)?))
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<OsString>> {
        fs::read_dir(path)?
            .map(|entry| entry.map(|e| e.file_name()))
            .collect()
    }

    fn read_link(&self, path: &Path) -> io::Result<PathBuf> {
        fs::read_link(path)
    }

    fn symlink(&self, target: &Path, path: &Path) -> io::Result<()> {
        std::os::unix::fs::symlink(target, path)
    }

    fn hard_link(&self, target: &Path, path: &Path) -> io::Result<()> {
        fs::hard_link(target, path)
    }

    fn unlink(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn rmdir(&self, path: &Path) -> io::Result<()> {
        fs::remove_dir(path)
    }

    fn chmod(&self, path: &Path, mode: u32) -> io::Result<()> {
        fs::set_permissions(path, Permissions::from_mode(mode))
    }

    fn chown(&self, path: &Path, uid: u64, gid: u64, follow: bool) -> io::Result<()> {
        let (uid, gid) = (Some(owner(uid)?), Some(owner(gid)?));
        if follow {
            std::os::unix::fs::chown(path, uid, gid)
        } else {
            std::os::unix::fs::lchown(path, uid, gid)
        }
    }

    fn set_times(
        &self,
        path: &Path,
        atime: Timestamp,
        mtime: Timestamp,
        follow: bool,
    ) -> io::Result<()> {
        let flags = if follow {
            AtFlags::empty()
        } else {
            AtFlags::SYMLINK_NOFOLLOW
        };
        utimensat(CWD, path, &timestamps(atime, mtime), flags)?;
        Ok(())
    }

    fn user_name(&self, uid: u64) -> Option<String> {
        let uid = Uid::from_raw(u32::try_from(uid).ok()?);
        match User::from_uid(uid) {
            Ok(user) => user.map(|u| u.name),
            Err(err) => {
                log::debug!("looking up user {uid}: {err}");
                None
            }
        }
    }

    fn group_name(&self, gid: u64) -> Option<String> {
        let gid = Gid::from_raw(u32::try_from(gid).ok()?);
        match Group::from_gid(gid) {
            Ok(group) => group.map(|g| g.name),
            Err(err) => {
                log::debug!("looking up group {gid}: {err}");
                None
            }
        }
    }
}
