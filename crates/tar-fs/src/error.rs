//! Error types for extraction and packing.

use std::io;
use std::path::PathBuf;

use tar_header::stream::{StreamError, Warning};
use thiserror::Error;

/// Errors that abort a whole extraction or packing run.
///
/// Problems confined to one entry are reported as [`Warning`]s and only
/// become errors in strict mode.
#[derive(Debug, Error)]
pub enum Error {
    /// The extraction root is missing, not a directory, or inaccessible.
    #[error("CwdError: {path}: {source}")]
    Cwd {
        /// The configured root.
        path: PathBuf,
        /// What went wrong checking it.
        #[source]
        source: io::Error,
    },

    /// Creating `path` would have followed the symbolic link `symlink`.
    #[error("SymlinkError: cannot extract through symbolic link {symlink} (for {path})")]
    Symlink {
        /// The offending symbolic link.
        symlink: PathBuf,
        /// The path that was being created.
        path: PathBuf,
    },

    /// A warning escalated by strict mode.
    #[error("{0}")]
    Strict(Warning),

    /// The archive could not be parsed.
    #[error(transparent)]
    Stream(#[from] StreamError),

    /// A filesystem operation failed.
    #[error("{path}: {source}")]
    Io {
        /// Path the operation was applied to.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: io::Error,
    },

    /// Writing the archive failed.
    #[error("writing archive: {0}")]
    Output(#[source] io::Error),

    /// A background task panicked or was cancelled.
    #[error("task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// Contradictory or out-of-range options.
    #[error("invalid options: {0}")]
    InvalidOptions(String),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type for extraction and packing.
pub type Result<T> = std::result::Result<T, Error>;
