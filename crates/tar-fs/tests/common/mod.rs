//! Archive construction helpers shared by the integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use tar_fs::{Warning, WarnCallback};
use tar_header::{padded_size, EntryHeader, EntryType, PaxRecord};

/// Builds archives entry by entry, including ones no sane tool would
/// write.
#[derive(Default)]
pub struct ArchiveBuilder {
    data: Vec<u8>,
}

impl ArchiveBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `header` (preceded by a pax record if the header needs one)
    /// and `body`.
    pub fn entry(mut self, header: EntryHeader, body: &[u8]) -> Self {
        let encoded = header.encode();
        if encoded.need_pax {
            self.data.extend(PaxRecord::from_entry(&header).encode());
        }
        self.raw(encoded.block.as_bytes(), body)
    }

    /// Append a header block exactly as given.
    pub fn raw(mut self, block: &[u8], body: &[u8]) -> Self {
        self.data.extend_from_slice(block);
        self.data.extend_from_slice(body);
        let padded = padded_size(body.len() as u64) as usize;
        self.data.resize(self.data.len() + padded - body.len(), 0);
        self
    }

    pub fn file(self, path: &str, body: &[u8]) -> Self {
        let mut header = EntryHeader::new(EntryType::Regular, path);
        header.mode = 0o644;
        header.size = body.len() as u64;
        self.entry(header, body)
    }

    pub fn dir(self, path: &str, mode: u32) -> Self {
        let mut header = EntryHeader::new(EntryType::Directory, path);
        header.mode = mode;
        self.entry(header, b"")
    }

    pub fn symlink(self, path: &str, target: &str) -> Self {
        let mut header = EntryHeader::new(EntryType::Symlink, path);
        header.mode = 0o777;
        header.link_path = target.as_bytes().to_vec();
        self.entry(header, b"")
    }

    pub fn hard_link(self, path: &str, target: &str) -> Self {
        let mut header = EntryHeader::new(EntryType::Link, path);
        header.mode = 0o644;
        header.link_path = target.as_bytes().to_vec();
        self.entry(header, b"")
    }

    pub fn finish(mut self) -> Vec<u8> {
        self.data.resize(self.data.len() + 1024, 0);
        self.data
    }
}

/// A warning callback and the list it appends to.
pub fn collect_warnings() -> (WarnCallback, Arc<Mutex<Vec<Warning>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let callback: WarnCallback = Box::new(move |warning: &Warning| {
        sink.lock().unwrap().push(warning.clone());
    });
    (callback, seen)
}
