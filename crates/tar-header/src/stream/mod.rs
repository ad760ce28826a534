//! Streaming tar parsing.
//!
//! The core is [`Decoder`], a sans-IO state machine that accepts input in
//! fragments of any size and emits [`Event`]s. [`TarStreamParser`] drives it
//! from a blocking [`Read`](std::io::Read); async drivers can be layered on
//! the same decoder.
//!
//! Metadata entries are folded into the entry that follows them:
//!
//! - **GNU long name (type 'L')** and **long link (type 'K')** set the path
//!   and link target.
//! - **PAX extended headers (type 'x')** override fields of the next entry.
//! - **PAX global headers (type 'g')** apply to every later entry, below any
//!   per-entry record, and never change a path or link target.
//!
//! A header whose checksum does not match is fatal
//! ([`StreamError::BadArchive`]). Problems confined to one entry, such as a
//! missing path or an unsupported type, are [`Warning`]s and the entry is
//! skipped.
//!
//! # Security
//!
//! [`Limits`] bound path lengths, buffered metadata and metadata chains.
//!
//! # Example
//!
//! ```no_run
//! use std::fs::File;
//! use std::io::BufReader;
//! use tar_header::stream::{TarStreamParser, Limits};
//!
//! let file = File::open("archive.tar").unwrap();
//! let mut parser = TarStreamParser::new(BufReader::new(file), Limits::default());
//!
//! while let Some(entry) = parser.next_entry().unwrap() {
//!     println!("{} ({} bytes)", entry.path_lossy(), entry.size());
//! }
//! for warning in parser.warnings() {
//!     eprintln!("{warning}");
//! }
//! ```

mod decoder;
mod entry;
mod error;
mod limits;
mod parser;
mod warning;

pub use decoder::{Decoder, EntryFilter, Event};
pub use entry::Entry;
pub use error::{Result, StreamError};
pub use limits::Limits;
pub use parser::{list, Listing, TarStreamParser};
pub use warning::{Warning, WarningCode};
