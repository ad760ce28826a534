//! Bounds on what the decoder will buffer.

/// Bounds on what the decoder buffers for a single entry.
///
/// Hostile archives can declare huge metadata entries or endless chains of
/// them; these limits keep memory use proportional to real entries.
///
/// ```
/// use tar_header::stream::Limits;
///
/// let limits = Limits {
///     max_meta_entry_size: 64 * 1024,
///     ..Limits::default()
/// };
/// assert_eq!(limits.max_path_len, 4096);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    /// Longest accepted path or link target, in bytes. Longer entries are
    /// skipped with an `EntryInvalid` warning. Default 4096.
    pub max_path_len: usize,

    /// Largest pax, global pax or GNU long name/link body that is
    /// buffered. Bigger ones are skipped and ignored. Default 1 MiB.
    pub max_meta_entry_size: u64,

    /// How many metadata entries may precede a real entry before the
    /// stream fails with
    /// [`TooManyPendingEntries`](super::StreamError::TooManyPendingEntries).
    /// Default 16.
    pub max_pending_entries: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_path_len: 4096,
            max_meta_entry_size: 1 << 20,
            max_pending_entries: 16,
        }
    }
}

impl Limits {
    /// Same as [`Limits::default`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// No limits, for archives from a trusted source.
    #[must_use]
    pub fn permissive() -> Self {
        Self {
            max_path_len: usize::MAX,
            max_meta_entry_size: u64::MAX,
            max_pending_entries: usize::MAX,
        }
    }

    /// Tighter limits for archives from the network.
    #[must_use]
    pub fn strict() -> Self {
        Self {
            max_path_len: 1024,
            max_meta_entry_size: 64 << 10,
            max_pending_entries: 8,
        }
    }
}
