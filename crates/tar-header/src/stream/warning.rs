//! Recoverable, per-entry problems.

use std::borrow::Cow;
use std::fmt;

/// Category of a [`Warning`], mirroring the conventional tar codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WarningCode {
    /// The entry is malformed or unsafe and was skipped.
    EntryInvalid,
    /// Informational, e.g. an absolute path was made relative.
    EntryInfo,
    /// A filesystem operation for the entry failed.
    EntryError,
    /// The entry type cannot be handled.
    EntryUnsupported,
    /// The archive itself is damaged, e.g. truncated.
    BadArchive,
}

impl WarningCode {
    /// The conventional `TAR_*` spelling.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            WarningCode::EntryInvalid => "TAR_ENTRY_INVALID",
            WarningCode::EntryInfo => "TAR_ENTRY_INFO",
            WarningCode::EntryError => "TAR_ENTRY_ERROR",
            WarningCode::EntryUnsupported => "TAR_ENTRY_UNSUPPORTED",
            WarningCode::BadArchive => "TAR_BAD_ARCHIVE",
        }
    }
}

impl fmt::Display for WarningCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recoverable problem tied to (usually) one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    /// What kind of problem this is.
    pub code: WarningCode,
    /// Human-readable description.
    pub message: String,
    /// Path of the affected entry, when there is one.
    pub path: Option<Vec<u8>>,
}

impl Warning {
    /// A warning without an associated path.
    pub fn new(code: WarningCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            path: None,
        }
    }

    /// Attach the affected entry's path.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<Vec<u8>>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// The path, lossily converted to UTF-8.
    #[must_use]
    pub fn path_lossy(&self) -> Option<Cow<'_, str>> {
        self.path.as_deref().map(String::from_utf8_lossy)
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)?;
        if let Some(path) = self.path_lossy() {
            write!(f, " ({path})")?;
        }
        Ok(())
    }
}

impl std::error::Error for Warning {}
