//! Safe extraction and creation of tar archives.
//!
//! Extraction treats archives as untrusted input. Entry paths are
//! normalized and confined to the extraction root, symbolic links already
//! on disk are never followed while creating parents, and problems with a
//! single entry are reported as warnings instead of aborting the run
//! (unless strict mode is enabled).
//!
//! Both directions come in a sequential and a tokio flavour:
//!
//! - [`Unpacker`] and [`Packer`] work on the calling thread over
//!   [`std::io`] readers and writers.
//! - [`AsyncUnpacker`] and [`AsyncPacker`] run the filesystem work on
//!   blocking tasks. Extraction uses [`PathReservations`] so that entries
//!   touching the same path keep archive order while unrelated entries
//!   are written concurrently.
//!
//! All filesystem access goes through the [`fs::Filesystem`] trait;
//! [`fs::HostFs`] is the real thing and [`fs::MemoryFs`] an in-memory tree
//! for tests.

mod archive;
mod error;
pub mod fs;
mod mkdir;
mod options;
mod pack;
mod paths;
mod reservations;
mod unpack;
mod warn;

pub use archive::AsyncArchive;
pub use error::{Error, Result};
pub use options::{
    EntryPredicate, PackOptions, StatPredicate, UnpackOptions, WarnCallback, DEFAULT_JOBS,
    DEFAULT_MAX_DEPTH,
};
pub use pack::{AsyncPacker, Packer};
pub use reservations::{PathReservations, Release};
pub use unpack::{AsyncUnpacker, UnpackSummary, Unpacker};

pub use tar_header::stream::{Limits, Warning, WarningCode};
