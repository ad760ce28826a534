//! The warning channel shared by the extractor and packer.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use tar_header::stream::Warning;

use crate::error::{Error, Result};
use crate::options::WarnCallback;

/// Routes warnings to the log and the user callback, escalating them in
/// strict mode.
pub(crate) struct WarnSink {
    strict: bool,
    callback: Mutex<Option<WarnCallback>>,
    count: AtomicUsize,
}

impl WarnSink {
    pub(crate) fn new(strict: bool, callback: Option<WarnCallback>) -> Self {
        Self {
            strict,
            callback: Mutex::new(callback),
            count: AtomicUsize::new(0),
        }
    }

    /// Report a warning. Returns an error only in strict mode.
    pub(crate) fn warn(&self, warning: Warning) -> Result<()> {
        log::warn!("{warning}");
        self.count.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut callback) = self.callback.lock() {
            if let Some(callback) = callback.as_mut() {
                callback(&warning);
            }
        }
        if self.strict {
            return Err(Error::Strict(warning));
        }
        Ok(())
    }

    pub(crate) fn count(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }
}
