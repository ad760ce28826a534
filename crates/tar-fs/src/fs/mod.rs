//! The filesystem collaborator.
//!
//! Extraction and packing never touch the filesystem directly; they go
//! through [`Filesystem`]. [`HostFs`] is the real thing, [`MemoryFs`] an
//! in-memory double for tests.

use std::ffi::OsString;
use std::fmt;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use tar_header::{EntryType, Timestamp};

mod host;
mod memory;

pub use host::HostFs;
pub use memory::MemoryFs;

/// Kind of a filesystem object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    /// Regular file.
    File,
    /// Directory.
    Directory,
    /// Symbolic link.
    Symlink,
    /// Character device.
    CharDevice,
    /// Block device.
    BlockDevice,
    /// Named pipe.
    Fifo,
    /// Unix domain socket.
    Socket,
}

impl FileKind {
    /// The tar entry type used to archive this kind, if it can be archived.
    #[must_use]
    pub fn entry_type(self) -> Option<EntryType> {
        match self {
            FileKind::File => Some(EntryType::Regular),
            FileKind::Directory => Some(EntryType::Directory),
            FileKind::Symlink => Some(EntryType::Symlink),
            FileKind::CharDevice => Some(EntryType::Char),
            FileKind::BlockDevice => Some(EntryType::Block),
            FileKind::Fifo => Some(EntryType::Fifo),
            FileKind::Socket => None,
        }
    }
}

/// The subset of `stat(2)` that tar cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    /// Object kind.
    pub kind: FileKind,
    /// Permission bits including setuid/setgid/sticky.
    pub mode: u32,
    /// Owner user ID.
    pub uid: u64,
    /// Owner group ID.
    pub gid: u64,
    /// Size in bytes.
    pub size: u64,
    /// Access time.
    pub atime: Timestamp,
    /// Modification time.
    pub mtime: Timestamp,
    /// Status change time.
    pub ctime: Timestamp,
    /// Device containing the object.
    pub dev: u64,
    /// Inode number.
    pub ino: u64,
    /// Number of hard links.
    pub nlink: u64,
    /// Device major number, for device nodes.
    pub rdev_major: u32,
    /// Device minor number, for device nodes.
    pub rdev_minor: u32,
}

impl Metadata {
    /// Whether this is a directory.
    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Directory
    }

    /// Whether this is a regular file.
    #[must_use]
    pub fn is_file(&self) -> bool {
        self.kind == FileKind::File
    }

    /// Whether this is a symbolic link.
    #[must_use]
    pub fn is_symlink(&self) -> bool {
        self.kind == FileKind::Symlink
    }
}

/// How [`Filesystem::create_file`] treats an existing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    /// Create or truncate.
    Truncate,
    /// Fail if the file exists.
    Exclusive,
}

/// An open file being written during extraction.
pub trait FileWriter: Write + Send {
    /// Set access and modification times through the open handle.
    fn set_times(&mut self, atime: Timestamp, mtime: Timestamp) -> io::Result<()>;

    /// Change ownership through the open handle.
    fn chown(&mut self, uid: u64, gid: u64) -> io::Result<()>;

    /// Change permissions through the open handle.
    fn chmod(&mut self, mode: u32) -> io::Result<()>;
}

/// Capability-style filesystem interface.
///
/// All paths are absolute. Methods mirror the system calls of the same
/// name; errors carry the usual `io::ErrorKind`s (`NotFound`,
/// `AlreadyExists`, ...), which callers rely on.
pub trait Filesystem: Send + Sync + fmt::Debug {
    /// Metadata, following a final symbolic link.
    fn stat(&self, path: &Path) -> io::Result<Metadata>;

    /// Metadata of the object itself.
    fn lstat(&self, path: &Path) -> io::Result<Metadata>;

    /// Create a single directory.
    fn mkdir(&self, path: &Path, mode: u32) -> io::Result<()>;

    /// Create all missing directories on the way to `path`.
    fn mkdir_all(&self, path: &Path, mode: u32) -> io::Result<()> {
        match self.stat(path) {
            Ok(meta) if meta.is_dir() => return Ok(()),
            Ok(_) => return Err(io::Error::from(io::ErrorKind::AlreadyExists)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err),
        }
        if let Some(parent) = path.parent() {
            self.mkdir_all(parent, mode)?;
        }
        match self.mkdir(path, mode) {
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => match self.stat(path) {
                Ok(meta) if meta.is_dir() => Ok(()),
                _ => Err(err),
            },
            other => other,
        }
    }

    /// Open a file for writing.
    fn create_file(
        &self,
        path: &Path,
        mode: u32,
        how: CreateMode,
    ) -> io::Result<Box<dyn FileWriter>>;

    /// Open a file for reading.
    fn open(&self, path: &Path) -> io::Result<Box<dyn Read + Send>>;

    /// Names in a directory, without `.` and `..`, in no particular order.
    fn read_dir(&self, path: &Path) -> io::Result<Vec<OsString>>;

    /// Target of a symbolic link.
    fn read_link(&self, path: &Path) -> io::Result<PathBuf>;

    /// Create a symbolic link at `path` pointing to `target`.
    fn symlink(&self, target: &Path, path: &Path) -> io::Result<()>;

    /// Create a hard link at `path` to the existing `target`.
    fn hard_link(&self, target: &Path, path: &Path) -> io::Result<()>;

    /// Remove a non-directory.
    fn unlink(&self, path: &Path) -> io::Result<()>;

    /// Remove an empty directory.
    fn rmdir(&self, path: &Path) -> io::Result<()>;

    /// Change permissions, following symbolic links.
    fn chmod(&self, path: &Path, mode: u32) -> io::Result<()>;

    /// Change ownership. Symbolic links themselves are changed when
    /// `follow` is false.
    fn chown(&self, path: &Path, uid: u64, gid: u64, follow: bool) -> io::Result<()>;

    /// Set access and modification times. Symbolic links themselves are
    /// changed when `follow` is false.
    fn set_times(
        &self,
        path: &Path,
        atime: Timestamp,
        mtime: Timestamp,
        follow: bool,
    ) -> io::Result<()>;

    /// Name of the user with ID `uid`, if there is one.
    fn user_name(&self, _uid: u64) -> Option<String> {
        None
    }

    /// Name of the group with ID `gid`, if there is one.
    fn group_name(&self, _gid: u64) -> Option<String> {
        None
    }
}
