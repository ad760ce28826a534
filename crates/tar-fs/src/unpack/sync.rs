//! Sequential extraction.

use std::io::Read;
use std::sync::Arc;

use tar_header::stream::{Limits, TarStreamParser};

use crate::error::Result;
use crate::fs::Filesystem;
use crate::options::UnpackOptions;

use super::{Engine, UnpackSummary};

/// Extracts an archive one entry at a time on the calling thread.
///
/// ```no_run
/// use std::fs::File;
/// use tar_fs::{UnpackOptions, Unpacker};
///
/// let unpacker = Unpacker::new(UnpackOptions {
///     cwd: "/tmp/out".into(),
///     ..Default::default()
/// })?;
/// let summary = unpacker.unpack(File::open("archive.tar")?)?;
/// println!("{} entries extracted", summary.created);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug)]
pub struct Unpacker {
    engine: Engine,
    limits: Limits,
}

impl Unpacker {
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
        let engine = Engine::new(options, fs)?;
        Ok(Self { engine, limits })
    }

    /// Extract every entry of `reader`.
    ///
    /// # Errors
    ///
    /// Fails on a damaged archive, an unusable root, an attempt to extract
    /// through a symbolic link, or any warning in strict mode.
    pub fn unpack<R: Read>(self, reader: R) -> Result<UnpackSummary> {
        let engine = self.engine;
        engine.check_cwd()?;

        let mut parser = TarStreamParser::new(reader, self.limits);
        loop {
            let Some(mut entry) = parser.next_entry()? else {
                break;
            };
            let header = entry.header().clone();
            if let Some(target) = engine.prepare(header)? {
                log::debug!("extracting {}", target.path.display());
                engine.extract(&target, &mut entry)?;
            }
            for warning in parser.take_warnings() {
                engine.warn(warning)?;
            }
        }
        for warning in parser.take_warnings() {
            engine.warn(warning)?;
        }

        engine.finish()?;
        Ok(engine.summary())
    }
}
