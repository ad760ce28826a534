//! Concurrent extraction on tokio.
//!
//! The archive is read on the async side. Each entry reserves its paths,
//! takes a job permit and is handed to a blocking task, which receives the
//! body through a bounded channel. Entries that touch unrelated paths are
//! written concurrently; the reservations keep conflicting ones in
//! archive order.

use std::io::{self, Read};
use std::sync::{Arc, Mutex, PoisonError};

use bytes::{Buf, Bytes};
use tokio::io::AsyncRead;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;

use tar_header::stream::Limits;

use crate::archive::AsyncArchive;
use crate::error::{Error, Result};
use crate::fs::Filesystem;
use crate::options::UnpackOptions;
use crate::reservations::PathReservations;

use super::{Engine, UnpackSummary};

/// Chunks buffered between the reader and one extraction task.
const CHANNEL_DEPTH: usize = 4;

/// Blocking [`Read`] over body chunks sent from the async side.
struct ChannelReader {
    rx: mpsc::Receiver<Bytes>,
    current: Bytes,
}

impl ChannelReader {
    fn new(rx: mpsc::Receiver<Bytes>) -> Self {
        Self {
            rx,
            current: Bytes::new(),
        }
    }
}

impl Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.current.is_empty() {
            match self.rx.blocking_recv() {
                Some(chunk) => self.current = chunk,
                None => return Ok(0),
            }
        }
        let n = buf.len().min(self.current.len());
        buf[..n].copy_from_slice(&self.current[..n]);
        self.current.advance(n);
        Ok(n)
    }
}

/// First fatal error seen by any task.
#[derive(Debug, Default, Clone)]
struct Fatal(Arc<Mutex<Option<Error>>>);

impl Fatal {
    fn set(&self, err: Error) {
        let mut slot = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(err);
        } else {
            log::debug!("suppressing later fatal error: {err}");
        }
    }

    fn is_set(&self) -> bool {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    fn take(&self) -> Option<Error> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

/// Extracts an archive with up to `jobs` entries in flight.
///
/// Final filesystem state matches [`Unpacker`](super::Unpacker) for the
/// same archive and options.
///
/// ```no_run
/// use tar_fs::{AsyncUnpacker, UnpackOptions};
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let file = tokio::fs::File::open("archive.tar").await?;
/// let unpacker = AsyncUnpacker::new(UnpackOptions {
///     cwd: "/tmp/out".into(),
///     jobs: 8,
///     ..Default::default()
/// })?;
/// unpacker.unpack(file).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct AsyncUnpacker {
    engine: Arc<Engine>,
    reservations: PathReservations,
    limits: Limits,
    jobs: usize,
}

impl AsyncUnpacker {
    /// Extract onto the host filesystem.
    ///
    /// # Errors
    ///
    /// Fails if the options are inconsistent.
    pub fn new(options: UnpackOptions) -> Result<Self> {
        Self::build(options, None)
    }

    /// Extract onto `fs`.
    ///
    /// # Errors
    ///
    /// Fails if the options are inconsistent.
    pub fn with_filesystem(options: UnpackOptions, fs: Arc<dyn Filesystem>) -> Result<Self> {
        Self::build(options, Some(fs))
    }

    fn build(options: UnpackOptions, fs: Option<Arc<dyn Filesystem>>) -> Result<Self> {
        let limits = options.limits.clone();
        let jobs = options.jobs;
        Ok(Self {
            engine: Arc::new(Engine::new(options, fs)?),
            reservations: PathReservations::new(),
            limits,
            jobs,
        })
    }

    /// Extract every entry of `reader`.
    ///
    /// On a fatal error no new entries are started; entries already in
    /// flight are allowed to finish before the error is returned.
    ///
    /// # Errors
    ///
    /// See [`Unpacker::unpack`](super::Unpacker::unpack).
    pub async fn unpack<R: AsyncRead + Unpin>(self, reader: R) -> Result<UnpackSummary> {
        let engine = Arc::clone(&self.engine);
        tokio::task::spawn_blocking(move || engine.check_cwd()).await??;

        let fatal = Fatal::default();
        let semaphore = Arc::new(Semaphore::new(self.jobs));
        let mut tasks = JoinSet::new();
        let mut archive = AsyncArchive::new(reader, self.limits.clone());

        if let Err(err) = self.feed(&mut archive, &semaphore, &mut tasks, &fatal).await {
            fatal.set(err);
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(err)) => fatal.set(err),
                Err(err) => fatal.set(Error::Task(err)),
            }
        }
        debug_assert!(self.reservations.is_idle());

        if let Some(err) = fatal.take() {
            return Err(err);
        }
        let engine = Arc::clone(&self.engine);
        tokio::task::spawn_blocking(move || engine.finish()).await??;
        Ok(self.engine.summary())
    }

    async fn feed<R: AsyncRead + Unpin>(
        &self,
        archive: &mut AsyncArchive<R>,
        semaphore: &Arc<Semaphore>,
        tasks: &mut JoinSet<Result<()>>,
        fatal: &Fatal,
    ) -> Result<()> {
        while let Some(header) = archive.next_entry().await? {
            for warning in archive.take_warnings() {
                self.engine.warn(warning)?;
            }
            while let Some(joined) = tasks.try_join_next() {
                joined??;
            }
            if fatal.is_set() {
                return Ok(());
            }

            let Some(target) = self.engine.prepare(header)? else {
                continue;
            };
            let release = self
                .reservations
                .acquire(Engine::reservation_paths(&target))
                .await;
            let Ok(permit) = Arc::clone(semaphore).acquire_owned().await else {
                unreachable!("job semaphore is never closed");
            };

            let (tx, rx) = mpsc::channel::<Bytes>(CHANNEL_DEPTH);
            let engine = Arc::clone(&self.engine);
            tasks.spawn_blocking(move || {
                let _permit = permit;
                let _release = release;
                log::debug!("extracting {}", target.path.display());
                engine.extract(&target, &mut ChannelReader::new(rx))
            });

            while let Some(chunk) = archive.read_chunk().await? {
                // A task that gave up on the entry drops its receiver; the
                // rest of the body is still consumed.
                if tx.send(chunk).await.is_err() {
                    log::trace!("body receiver closed early");
                }
            }
        }
        for warning in archive.take_warnings() {
            self.engine.warn(warning)?;
        }
        Ok(())
    }
}
