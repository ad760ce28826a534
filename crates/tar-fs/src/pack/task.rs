//! Archive creation on tokio.
//!
//! Up to `jobs` paths are stat'ed and listed on blocking threads ahead of
//! the writer. Entries are written strictly from the head of the queue, so
//! the archive is byte-identical to what [`Packer`](super::Packer) writes.

use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use tar_header::EntryHeader;

use crate::error::{Error, Result};
use crate::fs::Filesystem;
use crate::options::PackOptions;

use super::{padding, PackCore, Prepared, COPY_BUFFER_SIZE, END_OF_ARCHIVE};

/// File chunks buffered between a reading task and the writer.
const CHANNEL_DEPTH: usize = 4;

/// Writes a tar archive to an [`AsyncWrite`], preparing entries
/// concurrently.
///
/// ```no_run
/// use tar_fs::{AsyncPacker, PackOptions};
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let out = tokio::fs::File::create("out.tar").await?;
/// let mut packer = AsyncPacker::new(out, PackOptions {
///     cwd: "/srv/site".into(),
///     jobs: 8,
///     ..Default::default()
/// })?;
/// packer.add("public").await?;
/// packer.finish().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct AsyncPacker<W> {
    core: Arc<PackCore>,
    out: W,
}

impl<W: AsyncWrite + Unpin> AsyncPacker<W> {
    /// Archive objects from the host filesystem.
    ///
    /// # Errors
    ///
    /// Fails if the options are inconsistent.
    pub fn new(out: W, options: PackOptions) -> Result<Self> {
        Ok(Self {
            core: Arc::new(PackCore::new(options, None)?),
            out,
        })
    }

    /// Archive objects from `fs`.
    ///
    /// # Errors
    ///
    /// Fails if the options are inconsistent.
    pub fn with_filesystem(
        out: W,
        options: PackOptions,
        fs: Arc<dyn Filesystem>,
    ) -> Result<Self> {
        Ok(Self {
            core: Arc::new(PackCore::new(options, Some(fs))?),
            out,
        })
    }

    /// Archive `path` and, for a directory, everything below it.
    ///
    /// # Errors
    ///
    /// See [`Packer::add`](super::Packer::add).
    pub async fn add(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let mut pending = VecDeque::from([path.as_ref().to_path_buf()]);
        let mut in_flight: VecDeque<JoinHandle<Result<Option<Prepared>>>> = VecDeque::new();
        loop {
            while in_flight.len() < self.core.jobs {
                let Some(path) = pending.pop_front() else {
                    break;
                };
                let core = Arc::clone(&self.core);
                in_flight.push_back(tokio::task::spawn_blocking(move || core.prepare(&path)));
            }
            let Some(head) = in_flight.pop_front() else {
                return Ok(());
            };
            let Some(mut prepared) = head.await?? else {
                continue;
            };
            self.core.resolve_hard_link(&mut prepared);
            // Everything in flight is ahead of the pending queue, so this
            // keeps the same order as sequential packing.
            pending.extend(std::mem::take(&mut prepared.children));
            self.write_prepared(prepared).await?;
        }
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        self.out.write_all(data).await.map_err(Error::Output)
    }

    async fn write_prepared(&mut self, prepared: Prepared) -> Result<()> {
        let Prepared { header, source, .. } = prepared;
        log::debug!("adding {}", header.path_lossy());
        self.write(&self.core.encode_header(&header)).await?;
        let Some(source) = source else {
            return Ok(());
        };

        let (tx, mut rx) = mpsc::channel::<Bytes>(CHANNEL_DEPTH);
        let core = Arc::clone(&self.core);
        let size = header.size;
        let reader = tokio::task::spawn_blocking(move || {
            core.read_body(&source, size, |chunk| {
                tx.blocking_send(Bytes::copy_from_slice(chunk)).map_err(|_| {
                    Error::Output(io::Error::new(
                        io::ErrorKind::BrokenPipe,
                        "archive writer went away",
                    ))
                })
            })
        });
        while let Some(chunk) = rx.recv().await {
            self.write(&chunk).await?;
        }
        reader.await??;
        self.write(padding(size)).await
    }

    /// Append an entry read from elsewhere. `body` must supply exactly
    /// `header.size` bytes when the entry type carries data.
    ///
    /// # Errors
    ///
    /// Fails if `body` is short or the output cannot be written.
    pub async fn add_entry<R: AsyncRead + Unpin>(
        &mut self,
        header: &EntryHeader,
        mut body: R,
    ) -> Result<()> {
        let mut header = header.clone();
        header.path = self.core.archive_path(&header.path)?;
        if !header.entry_type.is_file() {
            header.size = 0;
        }
        log::debug!("copying {}", header.path_lossy());
        self.write(&self.core.encode_header(&header)).await?;

        let name = PathBuf::from(header.path_lossy().into_owned());
        let mut buf = vec![0u8; COPY_BUFFER_SIZE];
        let mut remaining = header.size;
        while remaining > 0 {
            let want = buf.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
            let n = body
                .read(&mut buf[..want])
                .await
                .map_err(|err| Error::io(&name, err))?;
            if n == 0 {
                return Err(Error::io(
                    &name,
                    io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("unexpected EOF ({remaining} bytes missing)"),
                    ),
                ));
            }
            self.write(&buf[..n]).await?;
            remaining -= n as u64;
        }
        self.write(padding(header.size)).await
    }

    /// Write the end-of-archive marker, flush, and return the output.
    ///
    /// # Errors
    ///
    /// Fails if the output cannot be written or flushed.
    pub async fn finish(mut self) -> Result<W> {
        self.write(&END_OF_ARCHIVE).await?;
        self.out.flush().await.map_err(Error::Output)?;
        Ok(self.out)
    }
}
