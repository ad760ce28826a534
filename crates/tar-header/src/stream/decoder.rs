//! Sans-IO tar decoding state machine.

use std::collections::VecDeque;
use std::fmt;

use crate::{truncate_null, EntryHeader, EntryType, Header, PaxRecord, HEADER_SIZE};

use super::error::{Result, StreamError};
use super::limits::Limits;
use super::warning::{Warning, WarningCode};

/// Something the [`Decoder`] observed in the byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event<'a> {
    /// A real entry header with all pax and GNU overrides applied. Its
    /// body follows as [`Event::Data`] and is closed by [`Event::EntryEnd`].
    Entry(EntryHeader),
    /// A chunk of the current entry's body, borrowed from the input.
    Data(&'a [u8]),
    /// The current entry's body and padding have been consumed.
    EntryEnd,
    /// An entry that was skipped (filtered out, unsupported, or an
    /// oversized metadata entry). Its body is consumed silently.
    Ignored(EntryHeader),
    /// A recoverable problem.
    Warning(Warning),
    /// Two consecutive zero blocks ended the archive.
    End,
}

/// Parser-level predicate deciding which entries are surfaced.
///
/// Receives the resolved path and header; returning `false` turns the entry
/// into [`Event::Ignored`].
pub type EntryFilter = Box<dyn FnMut(&[u8], &EntryHeader) -> bool + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Header,
    Meta {
        entry_type: EntryType,
        remain: u64,
        padding: u64,
    },
    /// `remain` is never zero here.
    Body {
        remain: u64,
        padding: u64,
    },
    Padding {
        remain: u64,
    },
    Skip {
        remain: u64,
    },
    End,
}

/// Incremental tar decoder.
///
/// Bytes are pushed in with [`decode`](Self::decode) in chunks of any size;
/// headers may be split across calls at arbitrary offsets. Each call
/// consumes a prefix of the input and yields at most one [`Event`].
///
/// ```
/// use tar_header::stream::{Decoder, Event};
///
/// let mut decoder = Decoder::default();
/// let zeros = [0u8; 1024];
/// let mut input = &zeros[..];
/// let mut ended = false;
/// while !input.is_empty() || !decoder.needs_input() {
///     let (used, event) = decoder.decode(input).unwrap();
///     input = &input[used..];
///     ended |= event == Some(Event::End);
/// }
/// assert!(ended);
/// ```
pub struct Decoder {
    limits: Limits,
    filter: Option<EntryFilter>,
    state: State,
    block: [u8; HEADER_SIZE],
    filled: usize,
    block_start: u64,
    meta: Vec<u8>,
    ex: Option<PaxRecord>,
    gex: Option<PaxRecord>,
    pending: usize,
    saw_null_block: bool,
    position: u64,
    queue: VecDeque<Event<'static>>,
}

impl fmt::Debug for Decoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Decoder")
            .field("limits", &self.limits)
            .field("state", &self.state)
            .field("position", &self.position)
            .field("filter", &self.filter.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new(Limits::default())
    }
}

impl Decoder {
    /// Create a decoder with the given limits.
    #[must_use]
    pub fn new(limits: Limits) -> Self {
        Self {
            limits,
            filter: None,
            state: State::Header,
            block: [0; HEADER_SIZE],
            filled: 0,
            block_start: 0,
            meta: Vec::new(),
            ex: None,
            gex: None,
            pending: 0,
            saw_null_block: false,
            position: 0,
            queue: VecDeque::new(),
        }
    }

    /// Install a filter; rejected entries become [`Event::Ignored`].
    pub fn set_filter(&mut self, filter: EntryFilter) {
        self.filter = Some(filter);
    }

    /// The configured limits.
    #[must_use]
    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    /// Total bytes consumed so far.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Whether the end-of-archive marker (or a fatal error) was seen.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.state == State::End && self.queue.is_empty()
    }

    /// Whether the decoder is inside an entry body.
    #[must_use]
    pub fn in_body(&self) -> bool {
        matches!(self.state, State::Body { .. })
    }

    /// Unread body bytes of the current entry.
    #[must_use]
    pub fn body_remaining(&self) -> u64 {
        match self.state {
            State::Body { remain, .. } => remain,
            _ => 0,
        }
    }

    /// Whether [`decode`](Self::decode) can make progress only with more
    /// input. When this is `false` the caller should call `decode` again,
    /// even with an empty slice, to collect pending events.
    #[must_use]
    pub fn needs_input(&self) -> bool {
        self.queue.is_empty() && self.state != State::Padding { remain: 0 }
    }

    /// Consume a prefix of `input`.
    ///
    /// Returns the number of bytes consumed and the event produced, if any.
    /// [`Event::Data`] borrows from `input`.
    ///
    /// # Errors
    ///
    /// A non-null block with a bad checksum is fatal
    /// ([`StreamError::BadArchive`]), as are oversized lengths and runaway
    /// metadata chains. After an error the decoder ignores further input.
    pub fn decode<'a>(&mut self, input: &'a [u8]) -> Result<(usize, Option<Event<'a>>)> {
        if let Some(event) = self.queue.pop_front() {
            return Ok((0, Some(event)));
        }
        let result = self.step(input);
        match &result {
            Ok((used, _)) => self.position += *used as u64,
            Err(_) => self.state = State::End,
        }
        result
    }

    /// Signal that no more input will arrive.
    ///
    /// Returns a [`WarningCode::BadArchive`] warning when the input stopped
    /// in the middle of a header, metadata entry or body.
    pub fn finish(&mut self) -> Option<Warning> {
        let needed = match self.state {
            State::End => return None,
            State::Header if self.filled > 0 => (HEADER_SIZE - self.filled) as u64,
            State::Header => 0,
            State::Meta { remain, padding, .. } | State::Body { remain, padding } => {
                remain + padding
            }
            State::Padding { remain } | State::Skip { remain } => remain,
        };
        self.state = State::End;
        if needed > 0 {
            return Some(Warning::new(
                WarningCode::BadArchive,
                format!("truncated input (needed {needed} more bytes)"),
            ));
        }
        if self.ex.is_some() || self.pending > 0 {
            return Some(Warning::new(
                WarningCode::BadArchive,
                "metadata entry without a following entry",
            ));
        }
        None
    }

    fn step<'a>(&mut self, input: &'a [u8]) -> Result<(usize, Option<Event<'a>>)> {
        match self.state {
            State::End => Ok((input.len(), None)),
            State::Header => {
                if self.filled == 0 {
                    self.block_start = self.position;
                }
                let n = input.len().min(HEADER_SIZE - self.filled);
                self.block[self.filled..self.filled + n].copy_from_slice(&input[..n]);
                self.filled += n;
                if self.filled < HEADER_SIZE {
                    return Ok((n, None));
                }
                self.filled = 0;
                self.consume_header()?;
                Ok((n, self.queue.pop_front()))
            }
            State::Meta {
                entry_type,
                remain,
                padding,
            } => {
                let n = clamp(remain, input.len());
                self.meta.extend_from_slice(&input[..n]);
                let remain = remain - n as u64;
                if remain > 0 {
                    self.state = State::Meta {
                        entry_type,
                        remain,
                        padding,
                    };
                } else {
                    self.finish_meta(entry_type);
                    self.state = skip_or_header(padding);
                }
                Ok((n, None))
            }
            State::Body { remain, padding } => {
                if input.is_empty() {
                    return Ok((0, None));
                }
                let n = clamp(remain, input.len());
                let remain = remain - n as u64;
                self.state = if remain > 0 {
                    State::Body { remain, padding }
                } else {
                    State::Padding { remain: padding }
                };
                Ok((n, Some(Event::Data(&input[..n]))))
            }
            State::Padding { remain } => {
                let n = clamp(remain, input.len());
                let remain = remain - n as u64;
                if remain > 0 {
                    self.state = State::Padding { remain };
                    return Ok((n, None));
                }
                self.state = State::Header;
                Ok((n, Some(Event::EntryEnd)))
            }
            State::Skip { remain } => {
                let n = clamp(remain, input.len());
                let remain = remain - n as u64;
                self.state = skip_or_header(remain);
                Ok((n, None))
            }
        }
    }

    fn consume_header(&mut self) -> Result<()> {
        let header = Header::from_bytes_exact(&self.block);
        if header.is_empty() {
            if self.saw_null_block {
                log::trace!("end of archive at offset {}", self.block_start);
                self.state = State::End;
                self.queue.push_back(Event::End);
            } else {
                self.saw_null_block = true;
            }
            return Ok(());
        }
        self.saw_null_block = false;

        if header.verify_checksum().is_err() {
            return Err(StreamError::BadArchive {
                pos: self.block_start,
                reason: "invalid header checksum".to_string(),
            });
        }

        let entry = match EntryHeader::decode(&self.block) {
            Ok(entry) => entry,
            Err(err) => {
                // The size field may still be usable to stay in sync.
                let size = header.entry_size().map_err(|_| StreamError::BadArchive {
                    pos: self.block_start,
                    reason: format!("unreadable header: {err}"),
                })?;
                let path = header.full_path();
                self.push_warning(
                    Warning::new(WarningCode::EntryInvalid, format!("invalid header: {err}"))
                        .with_path(path),
                );
                self.state = skip_or_header(padded(size)?);
                return Ok(());
            }
        };

        if entry.entry_type.is_meta() {
            self.begin_meta(entry)
        } else {
            self.begin_entry(entry)
        }
    }

    fn begin_meta(&mut self, entry: EntryHeader) -> Result<()> {
        self.pending += 1;
        if self.pending > self.limits.max_pending_entries {
            return Err(StreamError::TooManyPendingEntries {
                count: self.pending,
                limit: self.limits.max_pending_entries,
            });
        }
        let size = entry.size;
        let padded = padded(size)?;
        if size == 0 {
            return Ok(());
        }
        if size > self.limits.max_meta_entry_size {
            self.push_warning(Warning::new(
                WarningCode::EntryInvalid,
                format!(
                    "{} entry of {size} bytes exceeds limit of {}",
                    entry.entry_type, self.limits.max_meta_entry_size
                ),
            ));
            self.queue.push_back(Event::Ignored(entry));
            self.state = skip_or_header(padded);
            return Ok(());
        }
        log::trace!("{} entry of {size} bytes", entry.entry_type);
        self.meta.clear();
        self.state = State::Meta {
            entry_type: entry.entry_type,
            remain: size,
            padding: padded - size,
        };
        Ok(())
    }

    fn finish_meta(&mut self, entry_type: EntryType) {
        let data = std::mem::take(&mut self.meta);
        match entry_type {
            EntryType::XHeader => {
                let record = PaxRecord::parse(&data, false);
                match &mut self.ex {
                    Some(ex) => ex.merge(record),
                    None => self.ex = Some(record),
                }
            }
            EntryType::XGlobalHeader => {
                let record = PaxRecord::parse(&data, true);
                match &mut self.gex {
                    Some(gex) => gex.merge(record),
                    None => self.gex = Some(record),
                }
            }
            EntryType::GnuLongName => {
                let ex = self.ex.get_or_insert_with(|| PaxRecord::new(false));
                ex.path = Some(truncate_null(&data).to_vec());
            }
            EntryType::GnuLongLink => {
                let ex = self.ex.get_or_insert_with(|| PaxRecord::new(false));
                ex.linkpath = Some(truncate_null(&data).to_vec());
            }
            _ => {}
        }
        self.meta = data;
        self.meta.clear();
    }

    fn begin_entry(&mut self, mut entry: EntryHeader) -> Result<()> {
        self.pending = 0;
        if let Some(gex) = &self.gex {
            entry.apply_pax(gex);
        }
        if let Some(ex) = self.ex.take() {
            entry.apply_pax(&ex);
        }
        let size = entry.size;
        let padded = padded(size)?;

        if let Some(reason) = self.validate(&entry) {
            self.push_warning(
                Warning::new(WarningCode::EntryInvalid, reason).with_path(entry.path),
            );
            self.state = skip_or_header(padded);
            return Ok(());
        }

        if entry.entry_type.is_unsupported() {
            self.push_warning(
                Warning::new(
                    WarningCode::EntryUnsupported,
                    format!("unsupported entry type: {}", entry.entry_type),
                )
                .with_path(entry.path.clone()),
            );
            self.queue.push_back(Event::Ignored(entry));
            self.state = skip_or_header(padded);
            return Ok(());
        }

        if let Some(filter) = self.filter.as_mut() {
            if !filter(&entry.path, &entry) {
                log::debug!("filtered out {}", entry.path_lossy());
                self.queue.push_back(Event::Ignored(entry));
                self.state = skip_or_header(padded);
                return Ok(());
            }
        }

        log::trace!(
            "{} {} ({size} bytes) at offset {}",
            entry.entry_type,
            entry.path_lossy(),
            self.block_start
        );
        self.state = if size > 0 {
            State::Body {
                remain: size,
                padding: padded - size,
            }
        } else {
            State::Padding { remain: 0 }
        };
        self.queue.push_back(Event::Entry(entry));
        Ok(())
    }

    fn validate(&self, entry: &EntryHeader) -> Option<String> {
        let is_link = entry.entry_type.is_link();
        if entry.path.is_empty() {
            Some("path is required".to_string())
        } else if !is_link && !entry.link_path.is_empty() {
            Some("linkpath forbidden".to_string())
        } else if is_link && entry.link_path.is_empty() {
            Some("linkpath required".to_string())
        } else if entry.path.len() > self.limits.max_path_len
            || entry.link_path.len() > self.limits.max_path_len
        {
            Some(format!(
                "path exceeds limit of {} bytes",
                self.limits.max_path_len
            ))
        } else {
            None
        }
    }

    fn push_warning(&mut self, warning: Warning) {
        self.queue.push_back(Event::Warning(warning));
    }
}

fn clamp(remain: u64, available: usize) -> usize {
    usize::try_from(remain).map_or(available, |remain| remain.min(available))
}

fn skip_or_header(remain: u64) -> State {
    if remain > 0 {
        State::Skip { remain }
    } else {
        State::Header
    }
}

fn padded(size: u64) -> Result<u64> {
    size.checked_next_multiple_of(HEADER_SIZE as u64)
        .ok_or(StreamError::InvalidSize(size))
}
