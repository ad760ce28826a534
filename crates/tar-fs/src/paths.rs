//! Deciding where an entry lands, and whether it may land there at all.
//!
//! Everything here is lexical: no filesystem access happens until an entry
//! has a [`Target`]. Symbolic links planted on disk are dealt with later,
//! when parent directories are created.

use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::{Component, Path, PathBuf};

use tar_header::stream::{Warning, WarningCode};
use tar_header::{EntryHeader, EntryType};

/// Where an entry will be extracted.
#[derive(Debug, Clone)]
pub(crate) struct Target {
    pub(crate) header: EntryHeader,
    /// Absolute destination.
    pub(crate) path: PathBuf,
    /// Absolute source of a hard link, or the verbatim target of a
    /// symbolic link.
    pub(crate) link: Option<PathBuf>,
}

/// Path rules for one extraction run.
#[derive(Debug, Clone)]
pub(crate) struct PathPolicy {
    cwd: PathBuf,
    strip: usize,
    preserve_paths: bool,
    max_depth: Option<usize>,
}

fn segments(path: &[u8]) -> Vec<&[u8]> {
    path.split(|&b| b == b'/')
        .filter(|s| !s.is_empty() && *s != b".")
        .collect()
}

/// Join `segments` onto `base`, resolving `..` lexically. `..` never climbs
/// above `/`.
fn resolve<'a>(base: &Path, segments: impl IntoIterator<Item = &'a [u8]>) -> PathBuf {
    let mut out = base.to_path_buf();
    for segment in segments {
        if segment == b".." {
            out.pop();
        } else {
            out.push(OsStr::from_bytes(segment));
        }
    }
    out
}

/// Lexically normalize an absolute path.
pub(crate) fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::from("/");
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::ParentDir => {
                out.pop();
            }
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
        }
    }
    out
}

impl PathPolicy {
    /// `cwd` must be absolute.
    pub(crate) fn new(
        cwd: &Path,
        strip: usize,
        preserve_paths: bool,
        max_depth: Option<usize>,
    ) -> Self {
        Self {
            cwd: normalize(cwd),
            strip,
            preserve_paths,
            max_depth,
        }
    }

    pub(crate) fn cwd(&self) -> &Path {
        &self.cwd
    }

    fn contains(&self, path: &Path) -> bool {
        path.starts_with(&self.cwd)
    }

    /// Decide the destination of `header`, pushing any warnings.
    ///
    /// Returns `None` when the entry must be skipped.
    pub(crate) fn check(
        &self,
        header: EntryHeader,
        warnings: &mut Vec<Warning>,
    ) -> Option<Target> {
        let entry_path = header.path.clone();
        let error = |message: String| {
            Warning::new(WarningCode::EntryError, message).with_path(entry_path.clone())
        };

        let mut parts = segments(&header.path);
        if self.strip > 0 {
            if parts.len() <= self.strip {
                log::debug!("{}: nothing left after strip", header.path_lossy());
                return None;
            }
            parts.drain(..self.strip);
        }

        if let Some(max_depth) = self.max_depth {
            if parts.len() > max_depth {
                warnings.push(error(format!(
                    "path excessively deep ({} > {max_depth})",
                    parts.len()
                )));
                return None;
            }
        }

        let absolute = header.path.starts_with(b"/");
        let path = if self.preserve_paths {
            let base = if absolute { Path::new("/") } else { self.cwd.as_path() };
            resolve(base, parts)
        } else {
            if parts.iter().any(|p| *p == b"..") {
                warnings.push(error("path contains '..'".into()));
                return None;
            }
            if absolute {
                warnings.push(
                    Warning::new(WarningCode::EntryInfo, "stripping / from absolute path")
                        .with_path(entry_path.clone()),
                );
            }
            resolve(&self.cwd, parts)
        };

        if !self.preserve_paths && !self.contains(&path) {
            warnings.push(error("path escapes extraction directory".into()));
            return None;
        }

        if path == self.cwd && !header.entry_type.is_dir() {
            warnings.push(error("refusing to replace the extraction root".into()));
            return None;
        }

        let link = match header.entry_type {
            EntryType::Link => Some(self.hard_link_source(&header, warnings)?),
            EntryType::Symlink => Some(self.symlink_target(&header, &path, warnings)?),
            _ => None,
        };

        Some(Target { header, path, link })
    }

    /// Hard link sources are archive paths, relative to the root, and are
    /// stripped like entry paths.
    fn hard_link_source(
        &self,
        header: &EntryHeader,
        warnings: &mut Vec<Warning>,
    ) -> Option<PathBuf> {
        let mut parts = segments(&header.link_path);
        if self.strip > 0 {
            if parts.len() <= self.strip {
                log::debug!("{}: link target stripped away", header.path_lossy());
                return None;
            }
            parts.drain(..self.strip);
        }
        let absolute = header.link_path.starts_with(b"/");
        if self.preserve_paths {
            let base = if absolute { Path::new("/") } else { self.cwd.as_path() };
            return Some(resolve(base, parts));
        }
        if absolute {
            warnings.push(
                Warning::new(WarningCode::EntryInfo, "stripping / from absolute linkpath")
                    .with_path(header.path.clone()),
            );
        }
        let source = resolve(&self.cwd, parts);
        if !self.contains(&source) || source == self.cwd {
            warnings.push(
                Warning::new(WarningCode::EntryError, "linkpath escapes extraction directory")
                    .with_path(header.path.clone()),
            );
            return None;
        }
        Some(source)
    }

    /// Symbolic link targets are stored verbatim unless absolute, in which
    /// case the leading `/` is stripped like it is for entry paths. A target
    /// that climbs out of the root from the link's own directory is refused.
    fn symlink_target(
        &self,
        header: &EntryHeader,
        path: &Path,
        warnings: &mut Vec<Warning>,
    ) -> Option<PathBuf> {
        if self.preserve_paths {
            return Some(PathBuf::from(OsStr::from_bytes(&header.link_path)));
        }
        let mut target = header.link_path.as_slice();
        if target.starts_with(b"/") {
            warnings.push(
                Warning::new(WarningCode::EntryInfo, "stripping / from absolute linkpath")
                    .with_path(header.path.clone()),
            );
            while let Some(rest) = target.strip_prefix(b"/") {
                target = rest;
            }
            if target.is_empty() {
                target = b".";
            }
        }
        let parts = segments(target);
        if parts.iter().any(|p| *p == b"..") {
            let dir = path.parent().unwrap_or(Path::new("/"));
            if !self.contains(&resolve(dir, parts)) {
                warnings.push(
                    Warning::new(WarningCode::EntryError, "linkpath escapes extraction directory")
                        .with_path(header.path.clone()),
                );
                return None;
            }
        }
        Some(PathBuf::from(OsStr::from_bytes(target)))
    }
}
