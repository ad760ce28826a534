//! A parsed entry and its body.

use std::borrow::Cow;
use std::io::{self, Read};

use crate::{EntryHeader, EntryType};

use super::parser::{Pumped, TarStreamParser};

/// One archive entry: the resolved header plus a reader over exactly
/// `size` body bytes.
///
/// The body is not restartable. It borrows the parser and is valid until
/// the next call to [`TarStreamParser::next_entry`], which skips whatever
/// was left unread.
#[derive(Debug)]
pub struct Entry<'a, R> {
    parser: &'a mut TarStreamParser<R>,
    header: EntryHeader,
    remaining: u64,
}

impl<'a, R: Read> Entry<'a, R> {
    pub(super) fn new(parser: &'a mut TarStreamParser<R>, header: EntryHeader) -> Self {
        let remaining = header.size;
        Self {
            parser,
            header,
            remaining,
        }
    }

    /// The resolved header.
    #[must_use]
    pub fn header(&self) -> &EntryHeader {
        &self.header
    }

    /// Give up the body and keep the header.
    #[must_use]
    pub fn into_header(self) -> EntryHeader {
        self.header
    }

    /// Entry path as raw bytes.
    #[must_use]
    pub fn path(&self) -> &[u8] {
        &self.header.path
    }

    /// Entry path, lossily converted to UTF-8.
    #[must_use]
    pub fn path_lossy(&self) -> Cow<'_, str> {
        self.header.path_lossy()
    }

    /// Entry type.
    #[must_use]
    pub fn entry_type(&self) -> EntryType {
        self.header.entry_type
    }

    /// Declared body size.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.header.size
    }

    /// Body bytes not yet read.
    #[must_use]
    pub fn remaining(&self) -> u64 {
        self.remaining
    }
}

impl<R: Read> Read for Entry<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() || !self.parser.in_entry() {
            return Ok(0);
        }
        if self.remaining == 0 {
            // Collect the trailing EntryEnd so the parser is positioned at
            // the next header.
            let mut scratch = [0u8; 1];
            self.parser.pump(&mut scratch)?;
            return Ok(0);
        }
        let want = usize::try_from(self.remaining).map_or(buf.len(), |r| r.min(buf.len()));
        match self.parser.pump(&mut buf[..want])? {
            Pumped::Data(n) => {
                self.remaining -= n as u64;
                Ok(n)
            }
            Pumped::EntryEnd | Pumped::End => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "unexpected EOF in {} ({} bytes missing)",
                    self.header.path_lossy(),
                    self.remaining
                ),
            )),
            Pumped::Entry(_) => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "entry boundary crossed while reading body",
            )),
        }
    }
}
