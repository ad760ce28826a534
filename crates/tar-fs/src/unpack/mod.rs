//! Extraction.
//!
//! Each entry goes through the same steps whether extraction is
//! sequential ([`Unpacker`]) or concurrent ([`AsyncUnpacker`]):
//!
//! 1. the path is checked and resolved against the root (no I/O);
//! 2. in async mode, the destination is reserved;
//! 3. parent directories are created and whatever is at the destination
//!    is kept, reused or removed;
//! 4. the object is created and its times, owner and mode applied.
//!
//! Failures confined to one entry become warnings. [`Error::Cwd`],
//! [`Error::Symlink`] and anything escalated by strict mode abort the run.

use std::io::{self, Read, Write};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;

use once_cell::sync::Lazy;
use tar_header::stream::{StreamError, Warning, WarningCode};
use tar_header::{EntryHeader, EntryType, Timestamp};

use crate::error::{Error, Result};
use crate::fs::{CreateMode, Filesystem, HostFs, Metadata};
use crate::mkdir::DirMaker;
use crate::options::{EntryPredicate, UnpackOptions};
use crate::paths::{PathPolicy, Target};
use crate::warn::WarnSink;

mod sync;
mod task;

pub use sync::Unpacker;
pub use task::AsyncUnpacker;

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Real user and group of this process.
static PROCESS_OWNER: Lazy<(u64, u64)> = Lazy::new(|| {
    (
        u64::from(rustix::process::getuid().as_raw()),
        u64::from(rustix::process::getgid().as_raw()),
    )
});

/// What an extraction run did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnpackSummary {
    /// Entries read from the archive.
    pub entries: usize,
    /// Entries written to the filesystem.
    pub created: usize,
    /// Entries filtered out, kept, or refused.
    pub skipped: usize,
    /// Warnings reported, including those from the parser.
    pub warnings: usize,
}

/// A directory whose final mode and times are applied after everything
/// inside it has been extracted.
#[derive(Debug)]
struct Deferred {
    path: PathBuf,
    mode: Option<u32>,
    times: Option<(Timestamp, Timestamp)>,
}

/// State shared by all entries of one extraction run.
pub(crate) struct Engine {
    fs: Arc<dyn Filesystem>,
    policy: PathPolicy,
    dirs: DirMaker,
    warn: WarnSink,
    filter: Option<EntryPredicate>,
    unlink: bool,
    keep: bool,
    newer: bool,
    chmod: bool,
    uid: Option<u64>,
    gid: Option<u64>,
    preserve_owner: bool,
    force_chown: bool,
    dmode: u32,
    fmode: u32,
    no_mtime: bool,
    process_uid: u64,
    process_gid: u64,
    deferred: Mutex<Vec<Deferred>>,
    entries: AtomicUsize,
    created: AtomicUsize,
    skipped: AtomicUsize,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("fs", &self.fs)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

/// Outcome of inspecting the destination.
enum Existing {
    Absent,
    Reuse,
    Directory(Metadata),
    Skip,
}

impl Engine {
    pub(crate) fn new(options: UnpackOptions, fs: Option<Arc<dyn Filesystem>>) -> Result<Self> {
        options.validate()?;
        let fs = fs.unwrap_or_else(|| Arc::new(HostFs::new()));
        let cwd = std::path::absolute(&options.cwd).map_err(|source| Error::Cwd {
            path: options.cwd.clone(),
            source,
        })?;
        let policy = PathPolicy::new(
            &cwd,
            options.strip,
            options.preserve_paths,
            options.max_depth,
        );
        let dirs = DirMaker::new(
            Arc::clone(&fs),
            policy.cwd().to_path_buf(),
            options.unlink,
            options.preserve_paths,
        );
        let (process_uid, process_gid) = *PROCESS_OWNER;
        let umask = options.umask.unwrap_or(0o022);

        Ok(Self {
            fs,
            policy,
            dirs,
            warn: WarnSink::new(options.strict, options.on_warn),
            filter: options.filter,
            unlink: options.unlink,
            keep: options.keep,
            newer: options.newer,
            chmod: options.chmod,
            uid: options.uid,
            gid: options.gid,
            preserve_owner: options.preserve_owner.unwrap_or(process_uid == 0),
            force_chown: options.force_chown,
            dmode: options.dmode.unwrap_or(0o777 & !umask),
            fmode: options.fmode.unwrap_or(0o666 & !umask),
            no_mtime: options.no_mtime,
            process_uid,
            process_gid,
            deferred: Mutex::new(Vec::new()),
            entries: AtomicUsize::new(0),
            created: AtomicUsize::new(0),
            skipped: AtomicUsize::new(0),
        })
    }

    pub(crate) fn check_cwd(&self) -> Result<()> {
        self.dirs.check_cwd()
    }

    pub(crate) fn warn(&self, warning: Warning) -> Result<()> {
        self.warn.warn(warning)
    }

    fn skip(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Decide whether and where `header` is extracted. No filesystem access.
    pub(crate) fn prepare(&self, header: EntryHeader) -> Result<Option<Target>> {
        self.entries.fetch_add(1, Ordering::Relaxed);

        if let Some(filter) = &self.filter {
            let path = Path::new(std::ffi::OsStr::from_bytes(&header.path));
            if !filter(path, &header) {
                log::debug!("{}: filtered out", header.path_lossy());
                self.skip();
                return Ok(None);
            }
        }

        match header.entry_type {
            EntryType::Regular
            | EntryType::OldRegular
            | EntryType::Continuous
            | EntryType::Directory
            | EntryType::GnuDumpDir
            | EntryType::Symlink
            | EntryType::Link => {}
            other => {
                self.skip();
                self.warn(
                    Warning::new(
                        WarningCode::EntryUnsupported,
                        format!("unsupported entry type: {other}"),
                    )
                    .with_path(header.path.clone()),
                )?;
                return Ok(None);
            }
        }

        let mut warnings = Vec::new();
        let target = self.policy.check(header, &mut warnings);
        for warning in warnings {
            self.warn(warning)?;
        }
        if target.is_none() {
            self.skip();
        }
        Ok(target)
    }

    /// Paths an entry must hold while it is extracted.
    pub(crate) fn reservation_paths(target: &Target) -> Vec<PathBuf> {
        let mut paths = vec![target.path.clone()];
        if target.header.entry_type == EntryType::Link {
            paths.extend(target.link.clone());
        }
        paths
    }

    /// Put `target` on the filesystem, reading its body from `body`.
    ///
    /// Returns an error only for failures that abort the whole run.
    pub(crate) fn extract(&self, target: &Target, body: &mut dyn Read) -> Result<()> {
        match self.extract_inner(target, body) {
            Ok(true) => {
                self.created.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Ok(false) => {
                self.skip();
                Ok(())
            }
            Err(
                err @ (Error::Cwd { .. }
                | Error::Symlink { .. }
                | Error::Strict(_)
                | Error::Stream(_)),
            ) => Err(err),
            Err(err) => {
                self.skip();
                self.warn(
                    Warning::new(WarningCode::EntryError, err.to_string())
                        .with_path(target.header.path.clone()),
                )
            }
        }
    }

    fn extract_inner(&self, target: &Target, body: &mut dyn Read) -> Result<bool> {
        let header = &target.header;
        let path = target.path.as_path();

        if path != self.policy.cwd() {
            if let Some(parent) = path.parent() {
                self.dirs.mkdir(parent, self.dmode)?;
                if header.entry_type.is_link() {
                    self.dirs.verify(parent)?;
                }
            }
        }

        let existing = match self.inspect(target)? {
            Existing::Skip => return Ok(false),
            other => other,
        };

        match header.entry_type {
            EntryType::Directory | EntryType::GnuDumpDir => {
                self.make_directory(target, existing)?;
            }
            EntryType::Symlink => self.make_symlink(target)?,
            EntryType::Link => self.make_hard_link(target)?,
            _ => self.make_file(target, matches!(existing, Existing::Reuse), body)?,
        }
        Ok(true)
    }

    /// Look at what is already at the destination and clear it out of the
    /// way if needed.
    fn inspect(&self, target: &Target) -> Result<Existing> {
        let header = &target.header;
        let path = target.path.as_path();
        let meta = match self.fs.lstat(path) {
            Ok(meta) => meta,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Existing::Absent),
            Err(err) => return Err(Error::io(path, err)),
        };

        if self.keep {
            log::debug!("{}: keeping existing", path.display());
            return Ok(Existing::Skip);
        }
        if self.newer && header.mtime.is_some_and(|mtime| meta.mtime > mtime) {
            log::debug!("{}: existing file is newer", path.display());
            return Ok(Existing::Skip);
        }

        if meta.is_dir() {
            if header.entry_type.is_dir() {
                return Ok(Existing::Directory(meta));
            }
            log::debug!("{}: removing directory", path.display());
            self.fs.rmdir(path).map_err(|err| Error::io(path, err))?;
            self.dirs.forget(path);
            return Ok(Existing::Absent);
        }

        if header.entry_type.is_file()
            && header.size > 0
            && !self.unlink
            && meta.is_file()
            && meta.nlink <= 1
        {
            log::debug!("{}: reusing existing file", path.display());
            return Ok(Existing::Reuse);
        }

        log::debug!("{}: unlinking", path.display());
        self.fs.unlink(path).map_err(|err| Error::io(path, err))?;
        self.dirs.forget(path);
        Ok(Existing::Absent)
    }

    fn mode(&self, header: &EntryHeader, default: u32) -> u32 {
        match header.mode & 0o7777 {
            0 => default,
            mode => mode,
        }
    }

    fn owner(&self, header: &EntryHeader) -> Option<(u64, u64)> {
        let pick = |fixed: Option<u64>, archived: u64, process: u64| {
            fixed.unwrap_or(if self.preserve_owner { archived } else { process })
        };
        let uid = pick(self.uid, header.uid, self.process_uid);
        let gid = pick(self.gid, header.gid, self.process_gid);
        (self.force_chown || uid != self.process_uid || gid != self.process_gid)
            .then_some((uid, gid))
    }

    fn times(&self, header: &EntryHeader) -> Option<(Timestamp, Timestamp)> {
        if self.no_mtime {
            return None;
        }
        let mtime = header.mtime?;
        let atime = header
            .atime
            .unwrap_or_else(|| Timestamp::from_system_time(SystemTime::now()));
        Some((atime, mtime))
    }

    fn make_file(&self, target: &Target, reuse: bool, body: &mut dyn Read) -> Result<()> {
        let header = &target.header;
        let path = target.path.as_path();
        let mode = self.mode(header, self.fmode);
        let how = if reuse || header.size > 0 {
            CreateMode::Truncate
        } else {
            CreateMode::Exclusive
        };
        let mut file = self
            .fs
            .create_file(path, mode, how)
            .map_err(|err| Error::io(path, err))?;

        let mut remaining = header.size;
        let clamp = |n: u64| usize::try_from(n).unwrap_or(usize::MAX);
        let mut buf = vec![0u8; COPY_BUFFER_SIZE.min(clamp(remaining)).max(1)];
        while remaining > 0 {
            let want = buf.len().min(clamp(remaining));
            let n = match body.read(&mut buf[..want]) {
                Ok(0) => break,
                Ok(n) => n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(err) => return Err(Error::Stream(StreamError::Io(err))),
            };
            file.write_all(&buf[..n]).map_err(|err| Error::io(path, err))?;
            remaining -= n as u64;
        }
        if remaining > 0 {
            return Err(Error::io(
                path,
                io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("unexpected EOF ({remaining} bytes missing)"),
                ),
            ));
        }

        let mut failures = Vec::new();
        if let Some((atime, mtime)) = self.times(header) {
            if let Err(err) = file.set_times(atime, mtime) {
                log::debug!("{}: futimens failed ({err}), retrying by path", path.display());
                if let Err(err) = self.fs.set_times(path, atime, mtime, true) {
                    failures.push(Error::io(path, err));
                }
            }
        }
        if let Some((uid, gid)) = self.owner(header) {
            if let Err(err) = file.chown(uid, gid) {
                log::debug!("{}: fchown failed ({err}), retrying by path", path.display());
                if let Err(err) = self.fs.chown(path, uid, gid, true) {
                    failures.push(Error::io(path, err));
                }
            }
        }
        if self.chmod {
            file.chmod(mode).map_err(|err| Error::io(path, err))?;
        }
        drop(file);

        match failures.into_iter().next() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn make_directory(&self, target: &Target, existing: Existing) -> Result<()> {
        let header = &target.header;
        let path = target.path.as_path();
        let mode = self.mode(header, self.dmode);

        match existing {
            Existing::Directory(meta) => {
                if self.chmod && meta.mode != mode {
                    self.fs.chmod(path, mode).map_err(|err| Error::io(path, err))?;
                }
            }
            _ => self.dirs.mkdir(path, mode)?,
        }

        if let Some((uid, gid)) = self.owner(header) {
            self.fs
                .chown(path, uid, gid, true)
                .map_err(|err| Error::io(path, err))?;
        }

        let needs_mode = (self.chmod || mode & 0o700 != 0o700).then_some(mode);
        let times = self.times(header);
        if needs_mode.is_some() || times.is_some() {
            self.deferred
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(Deferred {
                    path: path.to_path_buf(),
                    mode: needs_mode,
                    times,
                });
        }
        Ok(())
    }

    fn make_symlink(&self, target: &Target) -> Result<()> {
        let header = &target.header;
        let path = target.path.as_path();
        let Some(link) = &target.link else {
            unreachable!("symlink target resolved during path checks");
        };
        self.fs.symlink(link, path).map_err(|err| Error::io(path, err))?;
        self.dirs.clear();

        if let Some((uid, gid)) = self.owner(header) {
            self.fs
                .chown(path, uid, gid, false)
                .map_err(|err| Error::io(path, err))?;
        }
        if let Some((atime, mtime)) = self.times(header) {
            if let Err(err) = self.fs.set_times(path, atime, mtime, false) {
                log::debug!("{}: cannot set symlink times: {err}", path.display());
            }
        }
        Ok(())
    }

    fn make_hard_link(&self, target: &Target) -> Result<()> {
        let path = target.path.as_path();
        let Some(source) = &target.link else {
            unreachable!("hard link source resolved during path checks");
        };
        self.fs
            .hard_link(source, path)
            .map_err(|err| Error::io(path, err))?;
        self.dirs.forget(path);
        Ok(())
    }

    /// Apply deferred directory modes and times, innermost first.
    pub(crate) fn finish(&self) -> Result<()> {
        let deferred = std::mem::take(
            &mut *self.deferred.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for dir in deferred.iter().rev() {
            let result = (|| -> io::Result<()> {
                if let Some((atime, mtime)) = dir.times {
                    self.fs.set_times(&dir.path, atime, mtime, true)?;
                }
                if let Some(mode) = dir.mode {
                    self.fs.chmod(&dir.path, mode)?;
                }
                Ok(())
            })();
            if let Err(err) = result {
                self.warn(
                    Warning::new(WarningCode::EntryError, err.to_string())
                        .with_path(dir.path.as_os_str().as_bytes()),
                )?;
            }
        }
        Ok(())
    }

    pub(crate) fn summary(&self) -> UnpackSummary {
        UnpackSummary {
            entries: self.entries.load(Ordering::Relaxed),
            created: self.created.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            warnings: self.warn.count(),
        }
    }
}
