//! Extraction and packing options.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tar_header::stream::{Limits, Warning};
use tar_header::{EntryHeader, Timestamp};

use crate::error::{Error, Result};
use crate::fs::Metadata;

/// Callback receiving every warning, in addition to the log.
pub type WarnCallback = Box<dyn FnMut(&Warning) + Send>;

/// Predicate over archive entries: `(path, header) -> keep`.
pub type EntryPredicate = Arc<dyn Fn(&Path, &EntryHeader) -> bool + Send + Sync>;

/// Predicate over filesystem objects being packed: `(path, metadata) -> keep`.
pub type StatPredicate = Arc<dyn Fn(&Path, &Metadata) -> bool + Send + Sync>;

/// Default number of concurrent jobs.
pub const DEFAULT_JOBS: usize = 4;

/// Default limit on path depth during extraction.
pub const DEFAULT_MAX_DEPTH: usize = 1024;

/// Options for extracting an archive.
///
/// ```
/// use tar_fs::UnpackOptions;
///
/// let options = UnpackOptions {
///     cwd: "/tmp/out".into(),
///     strip: 1,
///     keep: true,
///     ..Default::default()
/// };
/// assert_eq!(options.max_depth, Some(1024));
/// ```
pub struct UnpackOptions {
    /// Extraction root. Must exist and be a directory.
    pub cwd: PathBuf,
    /// Leading path segments to drop from every entry.
    pub strip: usize,
    /// Allow absolute paths, `..` and extraction through symbolic links.
    pub preserve_paths: bool,
    /// Remove existing files before writing instead of reusing them.
    pub unlink: bool,
    /// Never overwrite anything that already exists. Takes precedence
    /// over `unlink`.
    pub keep: bool,
    /// Only overwrite files that are older than the entry.
    pub newer: bool,
    /// Set exact modes, ignoring the process umask.
    pub chmod: bool,
    /// Owner for every extracted object. Requires `gid`.
    pub uid: Option<u64>,
    /// Group for every extracted object. Requires `uid`.
    pub gid: Option<u64>,
    /// Restore the archived owners. `None` means "when running as root".
    pub preserve_owner: Option<bool>,
    /// Change ownership even when it already matches the process.
    pub force_chown: bool,
    /// Mode for directories whose entry has none, and for created parents.
    pub dmode: Option<u32>,
    /// Mode for files whose entry has none.
    pub fmode: Option<u32>,
    /// Bits removed from every mode. `None` means 0o022.
    pub umask: Option<u32>,
    /// Do not restore modification times.
    pub no_mtime: bool,
    /// Skip entries with more path segments than this. `None` is unlimited.
    pub max_depth: Option<usize>,
    /// Turn every warning into an error.
    pub strict: bool,
    /// Only extract entries for which this returns `true`.
    pub filter: Option<EntryPredicate>,
    /// Receives every warning.
    pub on_warn: Option<WarnCallback>,
    /// Parser limits.
    pub limits: Limits,
    /// Concurrent filesystem jobs in async extraction.
    pub jobs: usize,
}

impl Default for UnpackOptions {
    fn default() -> Self {
        Self {
            cwd: PathBuf::from("."),
            strip: 0,
            preserve_paths: false,
            unlink: false,
            keep: false,
            newer: false,
            chmod: false,
            uid: None,
            gid: None,
            preserve_owner: None,
            force_chown: false,
            dmode: None,
            fmode: None,
            umask: None,
            no_mtime: false,
            max_depth: Some(DEFAULT_MAX_DEPTH),
            strict: false,
            filter: None,
            on_warn: None,
            limits: Limits::default(),
            jobs: DEFAULT_JOBS,
        }
    }
}

impl fmt::Debug for UnpackOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnpackOptions")
            .field("cwd", &self.cwd)
            .field("strip", &self.strip)
            .field("preserve_paths", &self.preserve_paths)
            .field("unlink", &self.unlink)
            .field("keep", &self.keep)
            .field("newer", &self.newer)
            .field("chmod", &self.chmod)
            .field("uid", &self.uid)
            .field("gid", &self.gid)
            .field("preserve_owner", &self.preserve_owner)
            .field("max_depth", &self.max_depth)
            .field("strict", &self.strict)
            .field("jobs", &self.jobs)
            .finish_non_exhaustive()
    }
}

impl UnpackOptions {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.uid.is_some() != self.gid.is_some() {
            return Err(Error::InvalidOptions(
                "uid and gid must be set together".into(),
            ));
        }
        if self.uid.is_some() && self.preserve_owner == Some(true) {
            return Err(Error::InvalidOptions(
                "preserve_owner conflicts with an explicit uid/gid".into(),
            ));
        }
        if self.jobs == 0 {
            return Err(Error::InvalidOptions("jobs must be at least 1".into()));
        }
        Ok(())
    }
}

/// Options for creating an archive.
///
/// ```
/// use tar_fs::PackOptions;
///
/// let options = PackOptions {
///     portable: true,
///     ..Default::default()
/// };
/// assert_eq!(options.jobs, 4);
/// assert!(options.hardlinks);
/// ```
pub struct PackOptions {
    /// Directory that added paths are relative to.
    pub cwd: PathBuf,
    /// Prepended to every archived path and hard link target.
    pub prefix: Option<PathBuf>,
    /// Omit owner information and access/change times, and normalize modes.
    pub portable: bool,
    /// Omit modification times.
    pub no_mtime: bool,
    /// Use this modification time for every entry.
    pub mtime: Option<Timestamp>,
    /// Archive what symbolic links point to instead of the links.
    pub follow: bool,
    /// Do not descend into directories.
    pub no_dir_recurse: bool,
    /// Never write pax headers, even if fields are lost.
    pub no_pax: bool,
    /// Keep absolute paths.
    pub preserve_paths: bool,
    /// Concurrent stat/readdir/read jobs.
    pub jobs: usize,
    /// Archive additional links to an already archived file as hard links.
    pub hardlinks: bool,
    /// Turn every warning into an error.
    pub strict: bool,
    /// Only archive paths for which this returns `true`.
    pub filter: Option<StatPredicate>,
    /// Receives every warning.
    pub on_warn: Option<WarnCallback>,
}

impl Default for PackOptions {
    fn default() -> Self {
        Self {
            cwd: PathBuf::from("."),
            prefix: None,
            portable: false,
            no_mtime: false,
            mtime: None,
            follow: false,
            no_dir_recurse: false,
            no_pax: false,
            preserve_paths: false,
            jobs: DEFAULT_JOBS,
            hardlinks: true,
            strict: false,
            filter: None,
            on_warn: None,
        }
    }
}

impl fmt::Debug for PackOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PackOptions")
            .field("cwd", &self.cwd)
            .field("prefix", &self.prefix)
            .field("portable", &self.portable)
            .field("no_mtime", &self.no_mtime)
            .field("mtime", &self.mtime)
            .field("follow", &self.follow)
            .field("no_dir_recurse", &self.no_dir_recurse)
            .field("no_pax", &self.no_pax)
            .field("preserve_paths", &self.preserve_paths)
            .field("jobs", &self.jobs)
            .field("hardlinks", &self.hardlinks)
            .field("strict", &self.strict)
            .finish_non_exhaustive()
    }
}

impl PackOptions {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.jobs == 0 {
            return Err(Error::InvalidOptions("jobs must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_options() {
        let options = UnpackOptions {
            uid: Some(1),
            ..Default::default()
        };
        assert!(matches!(options.validate(), Err(Error::InvalidOptions(_))));

        let options = UnpackOptions {
            uid: Some(1),
            gid: Some(1),
            preserve_owner: Some(true),
            ..Default::default()
        };
        assert!(options.validate().is_err());

        let options = UnpackOptions {
            uid: Some(1),
            gid: Some(1),
            ..Default::default()
        };
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_zero_jobs() {
        let options = PackOptions {
            jobs: 0,
            ..Default::default()
        };
        assert!(options.validate().is_err());
    }
}
