//! Async pull driver over the tar decoder.

use bytes::Bytes;
use tar_header::stream::{Decoder, Event, Limits, Result, StreamError, Warning};
use tar_header::EntryHeader;
use tokio::io::{AsyncRead, AsyncReadExt};

const READ_BUFFER_SIZE: usize = 64 * 1024;

enum Pumped {
    Entry(EntryHeader),
    Data(Bytes),
    EntryEnd,
    End,
}

/// Streaming tar parser over a tokio [`AsyncRead`].
///
/// Entries are yielded in archive order; their bodies come out in chunks
/// from [`read_chunk`](Self::read_chunk). A body that is not read is
/// skipped by the next [`next_entry`](Self::next_entry).
///
/// ```
/// # tokio_test::block_on(async {
/// use tar_fs::AsyncArchive;
/// use tar_header::stream::Limits;
///
/// let empty = vec![0u8; 1024];
/// let mut archive = AsyncArchive::new(&empty[..], Limits::default());
/// assert!(archive.next_entry().await.unwrap().is_none());
/// # });
/// ```
#[derive(Debug)]
pub struct AsyncArchive<R> {
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

impl<R: AsyncRead + Unpin> AsyncArchive<R> {
    /// Parse `reader` with the given limits.
    pub fn new(reader: R, limits: Limits) -> Self {
        Self {
            reader,
            decoder: Decoder::new(limits),
            buf: vec![0u8; READ_BUFFER_SIZE].into_boxed_slice(),
            pos: 0,
            len: 0,
            eof: false,
            done: false,
            in_entry: false,
            warnings: Vec::new(),
        }
    }

    /// The next entry's header, skipping whatever is left of the current
    /// entry's body.
    ///
    /// # Errors
    ///
    /// Fatal archive errors and I/O errors from the reader.
    pub async fn next_entry(&mut self) -> Result<Option<EntryHeader>> {
        loop {
            match self.pump(usize::MAX).await? {
                Pumped::Entry(header) => return Ok(Some(header)),
                Pumped::End => return Ok(None),
                Pumped::Data(_) | Pumped::EntryEnd => {}
            }
        }
    }

    /// The next chunk of the current entry's body, or `None` once the body
    /// is exhausted. A truncated archive ends the body early.
    ///
    /// # Errors
    ///
    /// Fatal archive errors and I/O errors from the reader.
    pub async fn read_chunk(&mut self) -> Result<Option<Bytes>> {
        if !self.in_entry {
            return Ok(None);
        }
        match self.pump(READ_BUFFER_SIZE).await? {
            Pumped::Data(chunk) => Ok(Some(chunk)),
            Pumped::EntryEnd | Pumped::End => Ok(None),
            Pumped::Entry(header) => Err(StreamError::BadArchive {
                pos: self.decoder.position(),
                reason: format!("entry {} began inside a body", header.path_lossy()),
            }),
        }
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

    fn record(&mut self, warning: Warning) {
        log::warn!("{warning}");
        self.warnings.push(warning);
    }

    async fn fill(&mut self) -> Result<()> {
        let n = self.reader.read(&mut self.buf).await?;
        self.pos = 0;
        self.len = n;
        self.eof = n == 0;
        Ok(())
    }

    async fn pump(&mut self, max_data: usize) -> Result<Pumped> {
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
                self.fill().await?;
                continue;
            }

            let end = if self.decoder.in_body() {
                self.len.min(self.pos.saturating_add(max_data))
            } else {
                self.len
            };
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
                Some(Event::Data(data)) => return Ok(Pumped::Data(Bytes::copy_from_slice(data))),
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
                    self.in_entry = false;
                    return Ok(Pumped::End);
                }
            }
        }
    }
}
