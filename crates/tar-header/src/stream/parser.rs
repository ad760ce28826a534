//! Blocking pull driver over [`Decoder`].

use std::io::{self, Read};

use crate::EntryHeader;

use super::decoder::{Decoder, EntryFilter, Event};
use super::entry::Entry;
use super::error::Result;
use super::limits::Limits;
use super::warning::Warning;

const READ_BUFFER_SIZE: usize = 64 * 1024;
const DRAIN_BUFFER_SIZE: usize = 8 * 1024;

/// Outcome of one [`TarStreamParser::pump`] round.
#[derive(Debug)]
pub(super) enum Pumped {
    Entry(EntryHeader),
    Data(usize),
    EntryEnd,
    End,
}

/// Streaming tar parser over any [`Read`].
///
/// Metadata entries (pax, global pax, GNU long name/link) are folded into
/// the entry they describe; only real entries are yielded. Input is read
/// in large chunks and may be arbitrarily fragmented.
///
/// # Example
///
/// ```
/// use std::io::{Cursor, Read};
/// use tar_header::stream::TarStreamParser;
///
/// # let archive = vec![0u8; 1024];
/// let mut parser = TarStreamParser::with_defaults(Cursor::new(archive));
/// while let Some(mut entry) = parser.next_entry().unwrap() {
///     let mut body = Vec::new();
///     entry.read_to_end(&mut body).unwrap();
///     println!("{} ({} bytes)", entry.path_lossy(), body.len());
/// }
/// assert!(parser.warnings().is_empty());
/// ```
///
/// An entry's body does not have to be read; it is skipped when the next
/// entry is requested.
#[derive(Debug)]
pub struct TarStreamParser<R> {
    reader: R,
    decoder: Decoder,
    buf: Box<[u8]>,
    pos: usize,
    len: usize,
    eof: bool,
    done: bool,
    in_entry: bool,
    warnings: Vec<Warning>,
}

impl<R: Read> TarStreamParser<R> {
    /// Create a parser with the given limits.
    pub fn new(reader: R, limits: Limits) -> Self {
        Self {
            reader,
            decoder: Decoder::new(limits),
            buf: vec![0; READ_BUFFER_SIZE].into_boxed_slice(),
            pos: 0,
            len: 0,
            eof: false,
            done: false,
            in_entry: false,
            warnings: Vec::new(),
        }
    }

    /// Create a parser with [`Limits::default`].
    pub fn with_defaults(reader: R) -> Self {
        Self::new(reader, Limits::default())
    }

    /// Only yield entries for which `filter` returns `true`.
    #[must_use]
    pub fn with_filter(
        mut self,
        filter: impl FnMut(&[u8], &EntryHeader) -> bool + Send + 'static,
    ) -> Self {
        self.decoder.set_filter(Box::new(filter) as EntryFilter);
        self
    }

    /// Advance to the next entry, skipping whatever is left of the
    /// current entry's body.
    ///
    /// Returns `Ok(None)` at the end of the archive, including an archive
    /// that ends without the two zero blocks or in the middle of an entry
    /// (the latter is recorded as a warning).
    ///
    /// # Errors
    ///
    /// Fatal archive errors such as a header checksum mismatch, and I/O
    /// errors from the reader.
    pub fn next_entry(&mut self) -> Result<Option<Entry<'_, R>>> {
        let mut scratch = [0u8; DRAIN_BUFFER_SIZE];
        loop {
            match self.pump(&mut scratch)? {
                Pumped::Entry(header) => return Ok(Some(Entry::new(self, header))),
                Pumped::End => return Ok(None),
                Pumped::Data(_) | Pumped::EntryEnd => {}
            }
        }
    }

    /// Warnings collected so far.
    #[must_use]
    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    /// Take the warnings collected so far.
    pub fn take_warnings(&mut self) -> Vec<Warning> {
        std::mem::take(&mut self.warnings)
    }

    /// Bytes consumed from the archive so far.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.decoder.position()
    }

    /// Consume the parser, returning the reader.
    ///
    /// Data that was read ahead but not yet decoded is lost.
    pub fn into_inner(self) -> R {
        self.reader
    }

    /// Drive the decoder until something the caller cares about happens.
    ///
    /// Body bytes are copied into `out`, which must not be empty.
    pub(super) fn pump(&mut self, out: &mut [u8]) -> Result<Pumped> {
        debug_assert!(!out.is_empty());
        loop {
            if self.done {
                return Ok(Pumped::End);
            }
            if self.pos == self.len && self.decoder.needs_input() {
                if self.eof {
                    if let Some(warning) = self.decoder.finish() {
                        self.record(warning);
                    }
                    self.done = true;
                    self.in_entry = false;
                    return Ok(Pumped::End);
                }
                self.fill()?;
                continue;
            }

            let mut end = self.len;
            if self.decoder.in_body() {
                end = end.min(self.pos + out.len());
            }
            let (used, event) = match self.decoder.decode(&self.buf[self.pos..end]) {
                Ok(step) => step,
                Err(err) => {
                    self.done = true;
                    return Err(err);
                }
            };
            self.pos += used;
            match event {
                None => {}
                Some(Event::Data(data)) => {
                    out[..data.len()].copy_from_slice(data);
                    return Ok(Pumped::Data(data.len()));
                }
                Some(Event::Entry(header)) => {
                    self.in_entry = true;
                    return Ok(Pumped::Entry(header));
                }
                Some(Event::EntryEnd) => {
                    self.in_entry = false;
                    return Ok(Pumped::EntryEnd);
                }
                Some(Event::Ignored(header)) => {
                    log::debug!("ignoring {} {}", header.entry_type, header.path_lossy());
                }
                Some(Event::Warning(warning)) => self.record(warning),
                Some(Event::End) => {
                    self.done = true;
                    return Ok(Pumped::End);
                }
            }
        }
    }

    pub(super) fn in_entry(&self) -> bool {
        self.in_entry
    }

    fn record(&mut self, warning: Warning) {
        log::warn!("{warning}");
        self.warnings.push(warning);
    }

    fn fill(&mut self) -> Result<()> {
        if self.pos == self.len {
            self.pos = 0;
            self.len = 0;
        }
        loop {
            match self.reader.read(&mut self.buf[self.len..]) {
                Ok(0) => {
                    self.eof = true;
                    return Ok(());
                }
                Ok(n) => {
                    self.len += n;
                    return Ok(());
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }
    }
}

/// Headers and warnings collected by [`list`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Listing {
    /// Entries in archive order.
    pub entries: Vec<EntryHeader>,
    /// Recoverable problems encountered while parsing.
    pub warnings: Vec<Warning>,
}

/// Parse a whole archive, keeping only the headers.
///
/// # Errors
///
/// See [`TarStreamParser::next_entry`].
pub fn list<R: Read>(reader: R, limits: Limits) -> Result<Listing> {
    let mut parser = TarStreamParser::new(reader, limits);
    let mut entries = Vec::new();
    while let Some(entry) = parser.next_entry()? {
        entries.push(entry.into_header());
    }
    Ok(Listing {
        entries,
        warnings: parser.take_warnings(),
    })
}
