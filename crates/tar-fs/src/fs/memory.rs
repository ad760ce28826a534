//! An in-memory filesystem double.

use std::collections::{BTreeMap, HashMap};
use std::ffi::OsString;
use std::io::{self, Cursor, Read, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use rustix::io::Errno;
use tar_header::Timestamp;

use super::{CreateMode, FileKind, FileWriter, Filesystem, Metadata};

const MAX_SYMLINK_HOPS: usize = 40;
const ROOT_INO: u64 = 1;

#[derive(Debug, Clone)]
struct Inode {
    kind: FileKind,
    mode: u32,
    uid: u64,
    gid: u64,
    data: Vec<u8>,
    target: PathBuf,
    atime: Timestamp,
    mtime: Timestamp,
    ctime: Timestamp,
    nlink: u64,
    rdev: (u32, u32),
}

impl Inode {
    fn new(kind: FileKind, mode: u32) -> Self {
        let now = Timestamp::from_system_time(SystemTime::now());
        Self {
            kind,
            mode: mode & 0o7777,
            uid: 0,
            gid: 0,
            data: Vec::new(),
            target: PathBuf::new(),
            atime: now,
            mtime: now,
            ctime: now,
            nlink: 1,
            rdev: (0, 0),
        }
    }
}

#[derive(Debug)]
struct State {
    names: BTreeMap<PathBuf, u64>,
    inodes: HashMap<u64, Inode>,
    next_ino: u64,
    users: HashMap<u64, String>,
    groups: HashMap<u64, String>,
}

/// [`Filesystem`] kept entirely in memory.
///
/// Symbolic links are resolved in intermediate path components the way the
/// kernel does, so path-safety logic can be exercised without touching
/// disk. Cloning yields another handle to the same tree.
///
/// ```
/// use std::path::Path;
/// use tar_fs::fs::{Filesystem, MemoryFs};
///
/// let fs = MemoryFs::new();
/// fs.mkdir(Path::new("/a"), 0o755).unwrap();
/// fs.write(Path::new("/a/f"), b"hi").unwrap();
/// assert_eq!(fs.read(Path::new("/a/f")).unwrap(), b"hi");
/// ```
#[derive(Debug, Clone)]
pub struct MemoryFs {
    state: Arc<Mutex<State>>,
}

impl Default for MemoryFs {
    fn default() -> Self {
        Self::new()
    }
}

fn errno(errno: Errno) -> io::Error {
    io::Error::from(errno)
}

impl State {
    fn inode(&self, path: &Path) -> io::Result<&Inode> {
        self.names
            .get(path)
            .and_then(|ino| self.inodes.get(ino))
            .ok_or_else(|| errno(Errno::NOENT))
    }

    fn inode_mut(&mut self, path: &Path) -> io::Result<&mut Inode> {
        let ino = *self.names.get(path).ok_or_else(|| errno(Errno::NOENT))?;
        self.inodes.get_mut(&ino).ok_or_else(|| errno(Errno::NOENT))
    }

    /// Resolve symbolic links in every component except possibly the
    /// last. The result names an object that may not exist yet, but its
    /// parent does.
    fn resolve(&self, path: &Path, follow_last: bool) -> io::Result<PathBuf> {
        let mut pending: Vec<OsString> = Vec::new();
        push_components(&mut pending, path);
        let mut current = PathBuf::from("/");
        let mut hops = 0;

        while let Some(name) = pending.pop() {
            if name == ".." {
                current.pop();
                continue;
            }
            let candidate = current.join(&name);
            let is_last = pending.is_empty();
            match self.inode(&candidate) {
                Ok(inode) if inode.kind == FileKind::Symlink && (!is_last || follow_last) => {
                    hops += 1;
                    if hops > MAX_SYMLINK_HOPS {
                        return Err(errno(Errno::LOOP));
                    }
                    if inode.target.is_absolute() {
                        current = PathBuf::from("/");
                    }
                    push_components(&mut pending, &inode.target);
                }
                Ok(inode) => {
                    if !is_last && inode.kind != FileKind::Directory {
                        return Err(errno(Errno::NOTDIR));
                    }
                    current = candidate;
                }
                Err(err) => {
                    if !is_last {
                        return Err(err);
                    }
                    current = candidate;
                }
            }
        }
        Ok(current)
    }

    fn check_parent(&self, resolved: &Path) -> io::Result<()> {
        let parent = resolved.parent().unwrap_or(Path::new("/"));
        match self.inode(parent)?.kind {
            FileKind::Directory => Ok(()),
            _ => Err(errno(Errno::NOTDIR)),
        }
    }

    fn insert(&mut self, path: PathBuf, inode: Inode) -> u64 {
        let ino = self.next_ino;
        self.next_ino += 1;
        self.inodes.insert(ino, inode);
        self.names.insert(path, ino);
        ino
    }

    fn create_new(&mut self, path: &Path, inode: Inode) -> io::Result<u64> {
        let resolved = self.resolve(path, false)?;
        if self.names.contains_key(&resolved) {
            return Err(errno(Errno::EXIST));
        }
        self.check_parent(&resolved)?;
        Ok(self.insert(resolved, inode))
    }

    fn has_children(&self, dir: &Path) -> bool {
        self.names
            .range(dir.to_path_buf()..)
            .skip(1)
            .take_while(|(p, _)| p.starts_with(dir))
            .next()
            .is_some()
    }
}

fn push_components(pending: &mut Vec<OsString>, path: &Path) {
    let names: Vec<OsString> = path
        .components()
        .filter_map(|c| match c {
            Component::Normal(name) => Some(name.to_os_string()),
            Component::ParentDir => Some(OsString::from("..")),
            Component::RootDir | Component::CurDir | Component::Prefix(_) => None,
        })
        .collect();
    pending.extend(names.into_iter().rev());
}

impl MemoryFs {
    /// An empty tree containing only `/`.
    #[must_use]
    pub fn new() -> Self {
        let mut names = BTreeMap::new();
        let mut inodes = HashMap::new();
        names.insert(PathBuf::from("/"), ROOT_INO);
        inodes.insert(ROOT_INO, Inode::new(FileKind::Directory, 0o755));
        Self {
            state: Arc::new(Mutex::new(State {
                names,
                inodes,
                next_ino: ROOT_INO + 1,
                users: HashMap::new(),
                groups: HashMap::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Contents of a regular file.
    ///
    /// # Errors
    ///
    /// Fails if `path` does not name a regular file.
    pub fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        let mut data = Vec::new();
        self.open(path)?.read_to_end(&mut data)?;
        Ok(data)
    }

    /// Create or replace a regular file with mode 0644.
    ///
    /// # Errors
    ///
    /// Fails if the parent directory does not exist.
    pub fn write(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        let mut file = self.create_file(path, 0o644, CreateMode::Truncate)?;
        file.write_all(data)
    }

    /// Create a device node, FIFO or socket. `major` and `minor` are only
    /// meaningful for devices.
    ///
    /// # Errors
    ///
    /// Fails if `path` exists or its parent does not.
    pub fn mknod(
        &self,
        path: &Path,
        kind: FileKind,
        mode: u32,
        major: u32,
        minor: u32,
    ) -> io::Result<()> {
        if matches!(kind, FileKind::File | FileKind::Directory | FileKind::Symlink) {
            return Err(errno(Errno::INVAL));
        }
        let mut inode = Inode::new(kind, mode);
        inode.rdev = (major, minor);
        self.lock().create_new(path, inode).map(drop)
    }

    /// Name `uid` in the user table.
    pub fn add_user(&self, uid: u64, name: &str) {
        self.lock().users.insert(uid, name.to_owned());
    }

    /// Name `gid` in the group table.
    pub fn add_group(&self, gid: u64, name: &str) {
        self.lock().groups.insert(gid, name.to_owned());
    }

    /// Every path in the tree except `/`, sorted.
    #[must_use]
    pub fn paths(&self) -> Vec<PathBuf> {
        self.lock()
            .names
            .keys()
            .filter(|p| p.as_os_str() != "/")
            .cloned()
            .collect()
    }
}

struct MemoryWriter {
    state: Arc<Mutex<State>>,
    ino: u64,
    pos: usize,
}

impl MemoryWriter {
    fn with_inode<T>(&self, f: impl FnOnce(&mut Inode) -> T) -> io::Result<T> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let inode = state
            .inodes
            .get_mut(&self.ino)
            .ok_or_else(|| errno(Errno::NOENT))?;
        Ok(f(inode))
    }
}

impl Write for MemoryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let pos = self.pos;
        self.with_inode(|inode| {
            let end = pos + buf.len();
            if inode.data.len() < end {
                inode.data.resize(end, 0);
            }
            inode.data[pos..end].copy_from_slice(buf);
        })?;
        self.pos += buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl FileWriter for MemoryWriter {
    fn set_times(&mut self, atime: Timestamp, mtime: Timestamp) -> io::Result<()> {
        self.with_inode(|inode| {
            inode.atime = atime;
            inode.mtime = mtime;
        })
    }

    fn chown(&mut self, uid: u64, gid: u64) -> io::Result<()> {
        self.with_inode(|inode| {
            inode.uid = uid;
            inode.gid = gid;
        })
    }

    fn chmod(&mut self, mode: u32) -> io::Result<()> {
        self.with_inode(|inode| inode.mode = mode & 0o7777)
    }
}

impl Filesystem for MemoryFs {
    fn stat(&self, path: &Path) -> io::Result<Metadata> {
        let state = self.lock();
        let resolved = state.resolve(path, true)?;
        let ino = *state.names.get(&resolved).ok_or_else(|| errno(Errno::NOENT))?;
        Ok(metadata(ino, state.inode(&resolved)?))
    }

    fn lstat(&self, path: &Path) -> io::Result<Metadata> {
        let state = self.lock();
        let resolved = state.resolve(path, false)?;
        let ino = *state.names.get(&resolved).ok_or_else(|| errno(Errno::NOENT))?;
        Ok(metadata(ino, state.inode(&resolved)?))
    }

    fn mkdir(&self, path: &Path, mode: u32) -> io::Result<()> {
        self.lock()
            .create_new(path, Inode::new(FileKind::Directory, mode))
            .map(drop)
    }

    fn create_file(
        &self,
        path: &Path,
        mode: u32,
        how: CreateMode,
    ) -> io::Result<Box<dyn FileWriter>> {
        let mut state = self.lock();
        let resolved = state.resolve(path, true)?;
        let ino = match state.names.get(&resolved).copied() {
            Some(_) if how == CreateMode::Exclusive => return Err(errno(Errno::EXIST)),
            Some(ino) => {
                let inode = state.inode_mut(&resolved)?;
                if inode.kind == FileKind::Directory {
                    return Err(errno(Errno::ISDIR));
                }
                inode.data.clear();
                ino
            }
            None => {
                state.check_parent(&resolved)?;
                state.insert(resolved, Inode::new(FileKind::File, mode))
            }
        };
        Ok(Box::new(MemoryWriter {
            state: Arc::clone(&self.state),
            ino,
            pos: 0,
        }))
    }

    fn open(&self, path: &Path) -> io::Result<Box<dyn Read + Send>> {
        let state = self.lock();
        let resolved = state.resolve(path, true)?;
        let inode = state.inode(&resolved)?;
        match inode.kind {
            FileKind::File => Ok(Box::new(Cursor::new(inode.data.clone()))),
            FileKind::Directory => Err(errno(Errno::ISDIR)),
            _ => Err(errno(Errno::INVAL)),
        }
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<OsString>> {
        let state = self.lock();
        let resolved = state.resolve(path, true)?;
        if state.inode(&resolved)?.kind != FileKind::Directory {
            return Err(errno(Errno::NOTDIR));
        }
        Ok(state
            .names
            .range(resolved.clone()..)
            .skip(1)
            .take_while(|(p, _)| p.starts_with(&resolved))
            .filter(|(p, _)| p.parent() == Some(resolved.as_path()))
            .filter_map(|(p, _)| p.file_name().map(|n| n.to_os_string()))
            .collect())
    }

    fn read_link(&self, path: &Path) -> io::Result<PathBuf> {
        let state = self.lock();
        let resolved = state.resolve(path, false)?;
        let inode = state.inode(&resolved)?;
        if inode.kind != FileKind::Symlink {
            return Err(errno(Errno::INVAL));
        }
        Ok(inode.target.clone())
    }

    fn symlink(&self, target: &Path, path: &Path) -> io::Result<()> {
        let mut inode = Inode::new(FileKind::Symlink, 0o777);
        inode.target = target.to_path_buf();
        inode.data = target.as_os_str().as_encoded_bytes().to_vec();
        self.lock().create_new(path, inode).map(drop)
    }

    fn hard_link(&self, target: &Path, path: &Path) -> io::Result<()> {
        let mut state = self.lock();
        let source = state.resolve(target, false)?;
        let ino = *state.names.get(&source).ok_or_else(|| errno(Errno::NOENT))?;
        if state.inode(&source)?.kind == FileKind::Directory {
            return Err(errno(Errno::PERM));
        }
        let resolved = state.resolve(path, false)?;
        if state.names.contains_key(&resolved) {
            return Err(errno(Errno::EXIST));
        }
        state.check_parent(&resolved)?;
        state.names.insert(resolved, ino);
        if let Some(inode) = state.inodes.get_mut(&ino) {
            inode.nlink += 1;
        }
        Ok(())
    }

    fn unlink(&self, path: &Path) -> io::Result<()> {
        let mut state = self.lock();
        let resolved = state.resolve(path, false)?;
        if state.inode(&resolved)?.kind == FileKind::Directory {
            return Err(errno(Errno::ISDIR));
        }
        if let Some(ino) = state.names.remove(&resolved) {
            let gone = state.inodes.get_mut(&ino).is_some_and(|inode| {
                inode.nlink -= 1;
                inode.nlink == 0
            });
            if gone {
                state.inodes.remove(&ino);
            }
        }
        Ok(())
    }

    fn rmdir(&self, path: &Path) -> io::Result<()> {
        let mut state = self.lock();
        let resolved = state.resolve(path, false)?;
        if state.inode(&resolved)?.kind != FileKind::Directory {
            return Err(errno(Errno::NOTDIR));
        }
        if resolved.as_os_str() == "/" {
            return Err(errno(Errno::BUSY));
        }
        if state.has_children(&resolved) {
            return Err(errno(Errno::NOTEMPTY));
        }
        if let Some(ino) = state.names.remove(&resolved) {
            state.inodes.remove(&ino);
        }
        Ok(())
    }

    fn chmod(&self, path: &Path, mode: u32) -> io::Result<()> {
        let mut state = self.lock();
        let resolved = state.resolve(path, true)?;
        state.inode_mut(&resolved)?.mode = mode & 0o7777;
        Ok(())
    }

    fn chown(&self, path: &Path, uid: u64, gid: u64, follow: bool) -> io::Result<()> {
        let mut state = self.lock();
        let resolved = state.resolve(path, follow)?;
        let inode = state.inode_mut(&resolved)?;
        inode.uid = uid;
        inode.gid = gid;
        Ok(())
    }

    fn set_times(
        &self,
        path: &Path,
        atime: Timestamp,
        mtime: Timestamp,
        follow: bool,
    ) -> io::Result<()> {
        let mut state = self.lock();
        let resolved = state.resolve(path, follow)?;
        let inode = state.inode_mut(&resolved)?;
        inode.atime = atime;
        inode.mtime = mtime;
        Ok(())
    }

    fn user_name(&self, uid: u64) -> Option<String> {
        self.lock().users.get(&uid).cloned()
    }

    fn group_name(&self, gid: u64) -> Option<String> {
        self.lock().groups.get(&gid).cloned()
    }
}

fn metadata(ino: u64, inode: &Inode) -> Metadata {
    let size = match inode.kind {
        FileKind::File | FileKind::Symlink => inode.data.len() as u64,
        _ => 0,
    };
    Metadata {
        kind: inode.kind,
        mode: inode.mode,
        uid: inode.uid,
        gid: inode.gid,
        size,
        atime: inode.atime,
        mtime: inode.mtime,
        ctime: inode.ctime,
        dev: 1,
        ino,
        nlink: inode.nlink,
        rdev_major: inode.rdev.0,
        rdev_minor: inode.rdev.1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> &Path {
        Path::new(s)
    }

    #[test]
    fn test_intermediate_symlinks_are_followed() {
        let fs = MemoryFs::new();
        fs.mkdir(p("/real"), 0o755).unwrap();
        fs.symlink(p("/real"), p("/link")).unwrap();
        fs.write(p("/link/f"), b"data").unwrap();

        assert_eq!(fs.read(p("/real/f")).unwrap(), b"data");
        assert!(fs.lstat(p("/link")).unwrap().is_symlink());
        assert!(fs.stat(p("/link")).unwrap().is_dir());
    }

    #[test]
    fn test_relative_symlink_and_loop() {
        let fs = MemoryFs::new();
        fs.mkdir(p("/d"), 0o755).unwrap();
        fs.write(p("/d/target"), b"t").unwrap();
        fs.symlink(p("target"), p("/d/rel")).unwrap();
        assert_eq!(fs.read(p("/d/rel")).unwrap(), b"t");

        fs.symlink(p("/a"), p("/b")).unwrap();
        fs.symlink(p("/b"), p("/a")).unwrap();
        assert_eq!(
            fs.stat(p("/a")).unwrap_err().raw_os_error(),
            Some(Errno::LOOP.raw_os_error())
        );
    }

    #[test]
    fn test_hard_links_share_content() {
        let fs = MemoryFs::new();
        fs.write(p("/one"), b"1").unwrap();
        fs.hard_link(p("/one"), p("/two")).unwrap();
        assert_eq!(fs.lstat(p("/one")).unwrap().nlink, 2);
        assert_eq!(
            fs.lstat(p("/one")).unwrap().ino,
            fs.lstat(p("/two")).unwrap().ino
        );

        fs.write(p("/two"), b"2").unwrap();
        assert_eq!(fs.read(p("/one")).unwrap(), b"2");

        fs.unlink(p("/one")).unwrap();
        assert_eq!(fs.lstat(p("/two")).unwrap().nlink, 1);
    }

    #[test]
    fn test_directory_rules() {
        let fs = MemoryFs::new();
        assert_eq!(
            fs.mkdir(p("/missing/child"), 0o755).unwrap_err().kind(),
            io::ErrorKind::NotFound
        );
        fs.mkdir_all(p("/x/y/z"), 0o700).unwrap();
        assert!(fs.rmdir(p("/x")).is_err());
        fs.rmdir(p("/x/y/z")).unwrap();

        let mut names = fs.read_dir(p("/x")).unwrap();
        names.sort();
        assert_eq!(names, vec![OsString::from("y")]);
        assert_eq!(
            fs.mkdir(p("/x/y"), 0o755).unwrap_err().kind(),
            io::ErrorKind::AlreadyExists
        );
    }

    #[test]
    fn test_exclusive_create() {
        let fs = MemoryFs::new();
        fs.write(p("/f"), b"old").unwrap();
        assert!(fs.create_file(p("/f"), 0o644, CreateMode::Exclusive).is_err());
        let mut w = fs.create_file(p("/f"), 0o600, CreateMode::Truncate).unwrap();
        w.write_all(b"new").unwrap();
        drop(w);
        assert_eq!(fs.read(p("/f")).unwrap(), b"new");
    }

    #[test]
    fn test_special_nodes() {
        let fs = MemoryFs::new();
        fs.mknod(p("/null"), FileKind::CharDevice, 0o666, 1, 3).unwrap();
        let meta = fs.lstat(p("/null")).unwrap();
        assert_eq!(meta.kind, FileKind::CharDevice);
        assert_eq!((meta.rdev_major, meta.rdev_minor), (1, 3));
        assert_eq!(meta.size, 0);
        assert!(fs.open(p("/null")).is_err());

        assert!(fs.mknod(p("/null"), FileKind::Fifo, 0o644, 0, 0).is_err());
        assert!(fs.mknod(p("/f"), FileKind::File, 0o644, 0, 0).is_err());
    }

    #[test]
    fn test_owner_names() {
        let fs = MemoryFs::new();
        fs.add_user(1000, "alice");
        fs.add_group(100, "users");
        assert_eq!(fs.user_name(1000).as_deref(), Some("alice"));
        assert_eq!(fs.group_name(100).as_deref(), Some("users"));
        assert_eq!(fs.user_name(100), None);
    }
}
