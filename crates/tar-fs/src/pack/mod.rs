//! Archive creation.
//!
//! Paths are processed as a queue. Each job stats its path, applies the
//! filter, lists directories, and builds a header; jobs may be prepared
//! concurrently ([`AsyncPacker`]) but entries are always written in queue
//! order. A directory's children join the back of the queue when the
//! directory itself is written.

use std::collections::HashMap;
use std::ffi::OsString;
use std::io::{self, Read};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tar_header::stream::{Warning, WarningCode};
use tar_header::{padded_size, EntryHeader, EntryType, PaxRecord, HEADER_SIZE};

use crate::error::{Error, Result};
use crate::fs::{Filesystem, HostFs, Metadata};
use crate::options::{PackOptions, StatPredicate};
use crate::warn::WarnSink;

mod sync;
mod task;

pub use sync::Packer;
pub use task::AsyncPacker;

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Two zero blocks end every archive.
pub(crate) const END_OF_ARCHIVE: [u8; 2 * HEADER_SIZE] = [0; 2 * HEADER_SIZE];

/// A job that has been stat'ed and listed, waiting to be written.
#[derive(Debug)]
pub(crate) struct Prepared {
    pub(crate) header: EntryHeader,
    pub(crate) meta: Metadata,
    /// File to copy the body from.
    pub(crate) source: Option<PathBuf>,
    /// Children to queue once this entry is written.
    pub(crate) children: Vec<PathBuf>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared by all jobs of one packing run.
pub(crate) struct PackCore {
    fs: Arc<dyn Filesystem>,
    cwd: PathBuf,
    prefix: Option<PathBuf>,
    portable: bool,
    no_mtime: bool,
    mtime: Option<tar_header::Timestamp>,
    follow: bool,
    no_dir_recurse: bool,
    no_pax: bool,
    preserve_paths: bool,
    hardlinks: bool,
    filter: Option<StatPredicate>,
    pub(crate) jobs: usize,
    warn: WarnSink,
    stat_cache: Mutex<HashMap<PathBuf, Metadata>>,
    readdir_cache: Mutex<HashMap<PathBuf, Vec<OsString>>>,
    link_cache: Mutex<HashMap<(u64, u64), Vec<u8>>>,
    user_names: Mutex<HashMap<u64, Option<String>>>,
    group_names: Mutex<HashMap<u64, Option<String>>>,
}

/// Owner name for `id`, looked up once per run. Empty when there is none.
fn cached_name(
    cache: &Mutex<HashMap<u64, Option<String>>>,
    id: u64,
    lookup: impl FnOnce(u64) -> Option<String>,
) -> Vec<u8> {
    lock(cache)
        .entry(id)
        .or_insert_with(|| lookup(id))
        .clone()
        .map(String::into_bytes)
        .unwrap_or_default()
}

impl std::fmt::Debug for PackCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackCore")
            .field("fs", &self.fs)
            .field("cwd", &self.cwd)
            .field("prefix", &self.prefix)
            .field("portable", &self.portable)
            .field("jobs", &self.jobs)
            .finish_non_exhaustive()
    }
}

impl PackCore {
    pub(crate) fn new(options: PackOptions, fs: Option<Arc<dyn Filesystem>>) -> Result<Self> {
        options.validate()?;
        let cwd = std::path::absolute(&options.cwd).map_err(|source| Error::Cwd {
            path: options.cwd.clone(),
            source,
        })?;
        Ok(Self {
            fs: fs.unwrap_or_else(|| Arc::new(HostFs::new())),
            cwd,
            prefix: options.prefix,
            portable: options.portable,
            no_mtime: options.no_mtime,
            mtime: options.mtime,
            follow: options.follow,
            no_dir_recurse: options.no_dir_recurse,
            no_pax: options.no_pax,
            preserve_paths: options.preserve_paths,
            hardlinks: options.hardlinks,
            filter: options.filter,
            jobs: options.jobs,
            warn: WarnSink::new(options.strict, options.on_warn),
            stat_cache: Mutex::new(HashMap::new()),
            readdir_cache: Mutex::new(HashMap::new()),
            link_cache: Mutex::new(HashMap::new()),
            user_names: Mutex::new(HashMap::new()),
            group_names: Mutex::new(HashMap::new()),
        })
    }

    fn absolute(&self, path: &Path) -> PathBuf {
        self.cwd.join(path)
    }

    fn stat(&self, abs: &Path) -> Result<Metadata> {
        if let Some(meta) = lock(&self.stat_cache).get(abs) {
            return Ok(meta.clone());
        }
        let meta = if self.follow {
            self.fs.stat(abs)
        } else {
            self.fs.lstat(abs)
        }
        .map_err(|err| Error::io(abs, err))?;
        lock(&self.stat_cache).insert(abs.to_path_buf(), meta.clone());
        Ok(meta)
    }

    fn read_dir(&self, abs: &Path) -> Result<Vec<OsString>> {
        if let Some(names) = lock(&self.readdir_cache).get(abs) {
            return Ok(names.clone());
        }
        let mut names = self.fs.read_dir(abs).map_err(|err| Error::io(abs, err))?;
        names.sort();
        lock(&self.readdir_cache).insert(abs.to_path_buf(), names.clone());
        Ok(names)
    }

    /// The name an object is archived under.
    pub(crate) fn archive_path(&self, path: &[u8]) -> Result<Vec<u8>> {
        let mut path = path;
        if !self.preserve_paths && path.starts_with(b"/") {
            self.warn.warn(
                Warning::new(WarningCode::EntryInfo, "stripping / from absolute path")
                    .with_path(path),
            )?;
            while let Some(rest) = path.strip_prefix(b"/") {
                path = rest;
            }
            if path.is_empty() {
                path = b".";
            }
        }
        let Some(prefix) = &self.prefix else {
            return Ok(path.to_vec());
        };
        let mut out = prefix.as_os_str().as_bytes().to_vec();
        if !out.is_empty() && !out.ends_with(b"/") {
            out.push(b'/');
        }
        out.extend_from_slice(path);
        Ok(out)
    }

    fn mode(&self, meta: &Metadata) -> u32 {
        let mut mode = meta.mode & 0o7777;
        if self.portable {
            mode = (mode | 0o600) & !0o022;
        }
        if meta.is_dir() {
            // Readable directories must also be searchable.
            for (read, exec) in [(0o400, 0o100), (0o040, 0o010), (0o004, 0o001)] {
                if mode & read != 0 {
                    mode |= exec;
                }
            }
        }
        mode
    }

    /// Stat, filter and list one path. `None` if the path is filtered out
    /// or cannot be archived.
    pub(crate) fn prepare(&self, path: &Path) -> Result<Option<Prepared>> {
        let abs = self.absolute(path);
        let meta = self.stat(&abs)?;

        if let Some(filter) = &self.filter {
            if !filter(path, &meta) {
                log::debug!("{}: filtered out", path.display());
                return Ok(None);
            }
        }

        let Some(entry_type) = meta.kind.entry_type() else {
            self.warn.warn(
                Warning::new(
                    WarningCode::EntryUnsupported,
                    format!("cannot archive {:?}", meta.kind),
                )
                .with_path(path.as_os_str().as_bytes()),
            )?;
            return Ok(None);
        };

        let mut name = self.archive_path(path.as_os_str().as_bytes())?;
        if entry_type == EntryType::Directory && !name.ends_with(b"/") {
            name.push(b'/');
        }
        let mut header = EntryHeader::new(entry_type, name);
        header.mode = self.mode(&meta);
        if entry_type == EntryType::Regular {
            header.size = meta.size;
        }
        if !(self.no_mtime || self.portable && meta.is_dir()) {
            header.mtime = Some(self.mtime.unwrap_or(meta.mtime));
        }
        if !self.portable {
            header.uid = meta.uid;
            header.gid = meta.gid;
            header.uname = cached_name(&self.user_names, meta.uid, |id| self.fs.user_name(id));
            header.gname = cached_name(&self.group_names, meta.gid, |id| self.fs.group_name(id));
            header.atime = Some(meta.atime);
            header.ctime = Some(meta.ctime);
            header.dev = Some(meta.dev);
            header.ino = Some(meta.ino);
            header.nlink = Some(meta.nlink);
        }

        let mut source = None;
        let mut children = Vec::new();
        match entry_type {
            EntryType::Regular => source = Some(abs),
            EntryType::Symlink => {
                let target = self.fs.read_link(&abs).map_err(|err| Error::io(&abs, err))?;
                header.link_path = target.as_os_str().as_bytes().to_vec();
            }
            EntryType::Char | EntryType::Block => {
                header.dev_major = meta.rdev_major;
                header.dev_minor = meta.rdev_minor;
            }
            EntryType::Directory if !self.no_dir_recurse => {
                children = self
                    .read_dir(&abs)?
                    .into_iter()
                    .map(|name| path.join(name))
                    .collect();
            }
            _ => {}
        }

        Ok(Some(Prepared {
            header,
            meta,
            source,
            children,
        }))
    }

    /// Turn a repeated link to an already written file into a hard link
    /// entry. Must be called in output order.
    pub(crate) fn resolve_hard_link(&self, prepared: &mut Prepared) {
        let meta = &prepared.meta;
        if !self.hardlinks || !meta.is_file() || meta.nlink <= 1 {
            return;
        }
        let mut links = lock(&self.link_cache);
        match links.get(&(meta.dev, meta.ino)) {
            Some(first) => {
                log::debug!(
                    "{} is a hard link to {}",
                    prepared.header.path_lossy(),
                    String::from_utf8_lossy(first)
                );
                let header = &mut prepared.header;
                header.entry_type = EntryType::Link;
                header.link_path.clone_from(first);
                header.size = 0;
                prepared.source = None;
            }
            None => {
                links.insert((meta.dev, meta.ino), prepared.header.path.clone());
            }
        }
    }

    /// Pax record (if needed) followed by the header block.
    pub(crate) fn encode_header(&self, header: &EntryHeader) -> Vec<u8> {
        let encoded = header.encode();
        let mut out = Vec::with_capacity(3 * HEADER_SIZE);
        if encoded.need_pax {
            if self.no_pax {
                log::debug!("{}: fields truncated without pax", header.path_lossy());
            } else {
                out.extend_from_slice(&PaxRecord::from_entry(header).encode());
            }
        }
        out.extend_from_slice(encoded.block.as_bytes());
        out
    }

    /// Read exactly `size` bytes of `abs`, passing them to `sink` in
    /// chunks, and make sure the file did not change size meanwhile.
    pub(crate) fn read_body(
        &self,
        abs: &Path,
        size: u64,
        mut sink: impl FnMut(&[u8]) -> Result<()>,
    ) -> Result<()> {
        let mut file = self.fs.open(abs).map_err(|err| Error::io(abs, err))?;
        read_exact_body(&mut *file, size, abs, &mut sink)?;
        let mut extra = [0u8; 1];
        loop {
            match file.read(&mut extra) {
                Ok(0) => return Ok(()),
                Ok(_) => {
                    return Err(Error::io(
                        abs,
                        io::Error::new(
                            io::ErrorKind::InvalidData,
                            "did not encounter expected EOF",
                        ),
                    ))
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(Error::io(abs, err)),
            }
        }
    }

    pub(crate) fn warn(&self, warning: Warning) -> Result<()> {
        self.warn.warn(warning)
    }
}

/// Copy exactly `size` bytes from `body` to `sink`.
pub(crate) fn read_exact_body(
    body: &mut dyn Read,
    size: u64,
    name: &Path,
    sink: &mut dyn FnMut(&[u8]) -> Result<()>,
) -> Result<()> {
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut remaining = size;
    while remaining > 0 {
        let want = buf.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
        let n = match body.read(&mut buf[..want]) {
            Ok(0) => {
                return Err(Error::io(
                    name,
                    io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("unexpected EOF ({remaining} bytes missing)"),
                    ),
                ))
            }
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(Error::io(name, err)),
        };
        sink(&buf[..n])?;
        remaining -= n as u64;
    }
    Ok(())
}

/// Zero bytes following a body of `size` bytes.
pub(crate) fn padding(size: u64) -> &'static [u8] {
    let pad = (padded_size(size) - size) as usize;
    &END_OF_ARCHIVE[..pad]
}
