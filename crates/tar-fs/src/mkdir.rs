//! Creating directories below the extraction root without following
//! symbolic links.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::{Error, Result};
use crate::fs::Filesystem;

/// Creates parent directories for entries and remembers which ones are
/// known to exist.
#[derive(Debug)]
pub(crate) struct DirMaker {
    fs: Arc<dyn Filesystem>,
    cwd: PathBuf,
    unlink: bool,
    preserve_paths: bool,
    known: Mutex<HashSet<PathBuf>>,
}

impl DirMaker {
    pub(crate) fn new(
        fs: Arc<dyn Filesystem>,
        cwd: PathBuf,
        unlink: bool,
        preserve_paths: bool,
    ) -> Self {
        Self {
            fs,
            cwd,
            unlink,
            preserve_paths,
            known: Mutex::new(HashSet::new()),
        }
    }

    fn known(&self) -> MutexGuard<'_, HashSet<PathBuf>> {
        self.known.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The extraction root must exist and be a directory.
    pub(crate) fn check_cwd(&self) -> Result<()> {
        let meta = self.fs.stat(&self.cwd).map_err(|source| Error::Cwd {
            path: self.cwd.clone(),
            source,
        })?;
        if !meta.is_dir() {
            return Err(Error::Cwd {
                path: self.cwd.clone(),
                source: io::Error::from(rustix::io::Errno::NOTDIR),
            });
        }
        self.known().insert(self.cwd.clone());
        Ok(())
    }

    /// Make sure `dir` exists as a directory, creating it and any missing
    /// parents with `mode | 0o700`.
    ///
    /// Below the root each component is created in turn. An existing
    /// symbolic link in the way is a [`Error::Symlink`], unless `unlink` is
    /// set, in which case it is replaced.
    pub(crate) fn mkdir(&self, dir: &Path, mode: u32) -> Result<()> {
        if self.known().contains(dir) {
            return Ok(());
        }
        let mode = mode | 0o700;

        let rest = match dir.strip_prefix(&self.cwd) {
            Ok(rest) if !self.preserve_paths => rest,
            _ => {
                self.fs
                    .mkdir_all(dir, mode)
                    .map_err(|err| Error::io(dir, err))?;
                self.known().insert(dir.to_path_buf());
                return Ok(());
            }
        };

        let mut current = self.cwd.clone();
        for part in rest.components() {
            current.push(part);
            if self.known().contains(&current) {
                continue;
            }
            self.make_one(&current, dir, mode)?;
            self.known().insert(current.clone());
        }
        Ok(())
    }

    fn make_one(&self, part: &Path, dir: &Path, mode: u32) -> Result<()> {
        let err = match self.fs.mkdir(part, mode) {
            Ok(()) => {
                log::trace!("created {}", part.display());
                return Ok(());
            }
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => err,
            Err(err) => return Err(Error::io(part, err)),
        };
        let meta = self.fs.lstat(part).map_err(|err| Error::io(part, err))?;
        if meta.is_dir() {
            return Ok(());
        }
        if self.unlink {
            log::debug!("replacing {} with a directory", part.display());
            self.fs.unlink(part).map_err(|err| Error::io(part, err))?;
            return self.fs.mkdir(part, mode).map_err(|err| Error::io(part, err));
        }
        if meta.is_symlink() {
            return Err(Error::Symlink {
                symlink: part.to_path_buf(),
                path: dir.to_path_buf(),
            });
        }
        Err(Error::io(part, err))
    }

    /// Check, without trusting the cache, that no component between the
    /// root and `dir` is a symbolic link.
    pub(crate) fn verify(&self, dir: &Path) -> Result<()> {
        if self.preserve_paths {
            return Ok(());
        }
        let Ok(rest) = dir.strip_prefix(&self.cwd) else {
            return Ok(());
        };
        let mut current = self.cwd.clone();
        for part in rest.components() {
            current.push(part);
            match self.fs.lstat(&current) {
                Ok(meta) if meta.is_symlink() => {
                    return Err(Error::Symlink {
                        symlink: current,
                        path: dir.to_path_buf(),
                    })
                }
                Ok(_) => {}
                Err(err) => return Err(Error::io(&current, err)),
            }
        }
        Ok(())
    }

    /// `path` was removed or replaced by a non-directory.
    pub(crate) fn forget(&self, path: &Path) {
        self.known().retain(|known| !known.starts_with(path));
    }

    /// A symbolic link was created; any cached directory could now be
    /// reached through it.
    pub(crate) fn clear(&self) {
        let mut known = self.known();
        known.clear();
        known.insert(self.cwd.clone());
    }
}
