//! Error types for tar stream parsing.

use std::io;

use thiserror::Error;

use crate::HeaderError;

/// Errors that abort parsing of a tar stream.
///
/// Problems confined to a single entry are reported as
/// [`Warning`](super::Warning)s instead.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The reader failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A header could not be decoded and no entry was in progress.
    #[error("header error: {0}")]
    Header(#[from] HeaderError),

    /// A non-null block failed its checksum (`TAR_BAD_ARCHIVE`).
    #[error("TAR_BAD_ARCHIVE: {reason} at offset {pos}")]
    BadArchive {
        /// Offset of the offending block.
        pos: u64,
        /// What was wrong with it.
        reason: String,
    },

    /// More chained metadata entries than [`Limits::max_pending_entries`](super::Limits).
    #[error("too many pending metadata entries: {count} > {limit}")]
    TooManyPendingEntries {
        /// Metadata entries seen in a row.
        count: usize,
        /// The limit in force.
        limit: usize,
    },

    /// The size field cannot be padded to a block boundary.
    #[error("invalid entry size: {0}")]
    InvalidSize(u64),

    /// The reader ended inside an entry.
    #[error("unexpected EOF at position {pos}")]
    UnexpectedEof {
        /// Bytes consumed before the reader ran dry.
        pos: u64,
    },
}

/// Result alias for the stream parser.
pub type Result<T> = std::result::Result<T, StreamError>;

impl From<StreamError> for io::Error {
    fn from(err: StreamError) -> Self {
        match err {
            StreamError::Io(err) => err,
            StreamError::UnexpectedEof { .. } => io::Error::new(io::ErrorKind::UnexpectedEof, err),
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
