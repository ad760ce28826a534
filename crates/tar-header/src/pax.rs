//! Pax extended header records.
//!
//! A pax body is a sequence of `<length> <key>=<value>\n` lines where
//! `<length>` counts the whole line, its own digits included. Records of
//! type `x` apply to the next entry only; records of type `g` apply to all
//! following entries, except that a global `path` or `linkpath` is never
//! applied.

use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use thiserror::Error;

use crate::{padded_size, EntryHeader, EntryType, Header, HEADER_SIZE, NAME_SIZE, XSTAR_PREFIX_SIZE};

/// Error parsing a single pax line.
#[derive(Debug, Error)]
pub enum PaxError {
    /// The line's declared length does not match its contents.
    #[error("malformed pax record at byte {offset}")]
    Malformed {
        /// Offset of the line within the pax body.
        offset: usize,
    },
    /// The key is not valid UTF-8.
    #[error("pax key is not valid UTF-8: {0}")]
    InvalidKey(#[from] std::str::Utf8Error),
}

/// A second-resolution timestamp with an optional fractional part.
///
/// `nanos` is always in `0..1_000_000_000` and counts forward from `secs`,
/// so `-0.5` is stored as `secs = -1, nanos = 500_000_000`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    /// Whole seconds since the Unix epoch.
    pub secs: i64,
    /// Nanoseconds after `secs`.
    pub nanos: u32,
}

const NANOS_PER_SEC: u32 = 1_000_000_000;

impl Timestamp {
    /// Create a timestamp, normalizing `nanos` into range.
    #[must_use]
    pub const fn new(secs: i64, nanos: u32) -> Self {
        Self {
            secs: secs.saturating_add((nanos / NANOS_PER_SEC) as i64),
            nanos: nanos % NANOS_PER_SEC,
        }
    }

    /// A timestamp with no fractional part.
    #[must_use]
    pub const fn from_secs(secs: i64) -> Self {
        Self { secs, nanos: 0 }
    }

    /// Parse a decimal timestamp such as `1700000000`, `1.5` or `-0.25`.
    ///
    /// Digits beyond nanosecond precision are dropped.
    #[must_use]
    pub fn parse(text: &[u8]) -> Option<Self> {
        let text = std::str::from_utf8(text).ok()?.trim();
        let (negative, digits) = match text.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, text),
        };
        let (whole, frac) = digits.split_once('.').unwrap_or((digits, ""));
        if whole.is_empty() && frac.is_empty() {
            return None;
        }
        if !whole.bytes().chain(frac.bytes()).all(|b| b.is_ascii_digit()) {
            return None;
        }
        let whole: i64 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
        let frac = &frac[..frac.len().min(9)];
        let nanos: u32 = format!("{frac:0<9}").parse().ok()?;

        if !negative {
            return Some(Self::new(whole, nanos));
        }
        let secs = whole.checked_neg()?;
        if nanos == 0 {
            Some(Self::new(secs, 0))
        } else {
            Some(Self::new(secs.checked_sub(1)?, NANOS_PER_SEC - nanos))
        }
    }

    /// Convert to a [`SystemTime`].
    #[must_use]
    pub fn to_system_time(self) -> SystemTime {
        let whole = if self.secs >= 0 {
            UNIX_EPOCH + Duration::from_secs(self.secs.unsigned_abs())
        } else {
            UNIX_EPOCH - Duration::from_secs(self.secs.unsigned_abs())
        };
        whole + Duration::from_nanos(u64::from(self.nanos))
    }

    /// Convert from a [`SystemTime`].
    #[must_use]
    pub fn from_system_time(time: SystemTime) -> Self {
        match time.duration_since(UNIX_EPOCH) {
            Ok(after) => Self::new(
                i64::try_from(after.as_secs()).unwrap_or(i64::MAX),
                after.subsec_nanos(),
            ),
            Err(err) => {
                let before = err.duration();
                let secs = i64::try_from(before.as_secs()).map_or(i64::MIN, |s| -s);
                match before.subsec_nanos() {
                    0 => Self::new(secs, 0),
                    nanos => Self::new(secs.saturating_sub(1), NANOS_PER_SEC - nanos),
                }
            }
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.nanos == 0 {
            return write!(f, "{}", self.secs);
        }
        let (sign, whole, nanos) = if self.secs >= 0 {
            ("", self.secs.unsigned_abs(), self.nanos)
        } else {
            ("-", (self.secs + 1).unsigned_abs(), NANOS_PER_SEC - self.nanos)
        };
        let frac = format!("{nanos:09}");
        write!(f, "{sign}{whole}.{}", frac.trim_end_matches('0'))
    }
}

impl From<SystemTime> for Timestamp {
    fn from(time: SystemTime) -> Self {
        Self::from_system_time(time)
    }
}

/// Value of a pax key this crate has no typed field for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaxValue {
    /// Raw bytes, kept verbatim.
    Text(Vec<u8>),
    /// A purely numeric value.
    Number(u64),
    /// A value of a `*time` key.
    Time(Timestamp),
}

impl PaxValue {
    fn classify(key: &str, value: &[u8]) -> Self {
        if is_time_key(key) {
            if let Some(time) = Timestamp::parse(value) {
                return PaxValue::Time(time);
            }
        }
        let canonical = !value.is_empty()
            && value.iter().all(u8::is_ascii_digit)
            && (value[0] != b'0' || value.len() == 1);
        if canonical {
            if let Some(number) = std::str::from_utf8(value).ok().and_then(|v| v.parse().ok()) {
                return PaxValue::Number(number);
            }
        }
        PaxValue::Text(value.to_vec())
    }

    /// The value as it appears on the wire.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            PaxValue::Text(text) => text.clone(),
            PaxValue::Number(number) => number.to_string().into_bytes(),
            PaxValue::Time(time) => time.to_string().into_bytes(),
        }
    }
}

/// Keys such as `mtime`, `LIBARCHIVE.creationtime` or `SCHILY.birthtime`.
fn is_time_key(key: &str) -> bool {
    let name = match key.rsplit_once('.') {
        Some((vendor, name))
            if !vendor.is_empty() && vendor.bytes().all(|b| b.is_ascii_uppercase()) =>
        {
            name
        }
        Some(_) => return false,
        None => key,
    };
    matches!(name, "mtime" | "atime" | "ctime" | "birthtime" | "creationtime")
}

/// A single `key=value` line from a pax body.
#[derive(Debug, Clone, Copy)]
pub struct PaxLine<'a> {
    /// The key.
    pub key: &'a str,
    /// The raw value bytes.
    pub value: &'a [u8],
}

/// Iterator over the lines of a pax body.
///
/// A line whose declared length does not land on a newline yields
/// [`PaxError::Malformed`] and the iterator resumes after the next newline.
/// Trailing NUL padding ends iteration.
///
/// ```
/// use tar_header::pax::PaxLines;
///
/// let mut lines = PaxLines::new(b"16 path=foo/bar\n");
/// let line = lines.next().unwrap().unwrap();
/// assert_eq!(line.key, "path");
/// assert_eq!(line.value, b"foo/bar");
/// ```
#[derive(Debug)]
pub struct PaxLines<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> PaxLines<'a> {
    /// Iterate over the lines of `data`.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn advance(&mut self, n: usize) {
        self.data = &self.data[n..];
        self.offset += n;
    }
}

fn split_line(data: &[u8]) -> Option<(usize, &[u8], &[u8])> {
    let space = data.iter().position(|&b| b == b' ')?;
    let len: usize = std::str::from_utf8(&data[..space]).ok()?.parse().ok()?;
    if len < space + 3 || len > data.len() || data[len - 1] != b'\n' {
        return None;
    }
    let kv = &data[space + 1..len - 1];
    let eq = kv.iter().position(|&b| b == b'=')?;
    Some((len, &kv[..eq], &kv[eq + 1..]))
}

impl<'a> Iterator for PaxLines<'a> {
    type Item = std::result::Result<PaxLine<'a>, PaxError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.first().map_or(true, |&b| b == 0) {
            return None;
        }
        let offset = self.offset;
        let data = self.data;
        match split_line(data) {
            Some((len, key, value)) => {
                self.advance(len);
                Some(
                    std::str::from_utf8(key)
                        .map(|key| PaxLine { key, value })
                        .map_err(PaxError::from),
                )
            }
            None => {
                match data.iter().position(|&b| b == b'\n') {
                    Some(newline) => self.advance(newline + 1),
                    None => self.advance(data.len()),
                }
                Some(Err(PaxError::Malformed { offset }))
            }
        }
    }
}

/// A decoded pax extended header.
///
/// Known keys have typed fields. `SCHILY.dev`, `SCHILY.ino` and
/// `SCHILY.nlink` are stored without their vendor prefix. Everything else
/// lands in [`extra`](Self::extra).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaxRecord {
    /// Whether this came from (or will be written as) a global header.
    pub global: bool,
    /// Entry path.
    pub path: Option<Vec<u8>>,
    /// Link target.
    pub linkpath: Option<Vec<u8>>,
    /// Body size.
    pub size: Option<u64>,
    /// Owner user ID.
    pub uid: Option<u64>,
    /// Owner group ID.
    pub gid: Option<u64>,
    /// Owner user name.
    pub uname: Option<Vec<u8>>,
    /// Owner group name.
    pub gname: Option<Vec<u8>>,
    /// Modification time.
    pub mtime: Option<Timestamp>,
    /// Access time.
    pub atime: Option<Timestamp>,
    /// Change time.
    pub ctime: Option<Timestamp>,
    /// Device the source file lived on.
    pub dev: Option<u64>,
    /// Source inode number.
    pub ino: Option<u64>,
    /// Source link count.
    pub nlink: Option<u64>,
    /// Declared character set.
    pub charset: Option<String>,
    /// Free-form comment.
    pub comment: Option<String>,
    /// Keys without a typed field, in key order.
    pub extra: BTreeMap<String, PaxValue>,
}

impl PaxRecord {
    /// An empty record.
    #[must_use]
    pub fn new(global: bool) -> Self {
        Self {
            global,
            ..Self::default()
        }
    }

    /// Collect the fields of an entry that a pax record can carry.
    #[must_use]
    pub fn from_entry(entry: &EntryHeader) -> Self {
        let non_empty = |v: &[u8]| (!v.is_empty()).then(|| v.to_vec());
        Self {
            global: false,
            path: non_empty(&entry.path),
            linkpath: non_empty(&entry.link_path),
            size: Some(entry.size),
            uid: Some(entry.uid),
            gid: Some(entry.gid),
            uname: non_empty(&entry.uname),
            gname: non_empty(&entry.gname),
            mtime: entry.mtime,
            atime: entry.atime,
            ctime: entry.ctime,
            dev: entry.dev,
            ino: entry.ino,
            nlink: entry.nlink,
            charset: None,
            comment: None,
            extra: entry.extensions.clone(),
        }
    }

    /// Parse a pax body.
    ///
    /// Malformed lines are skipped. Keys with an empty value are ignored.
    #[must_use]
    pub fn parse(data: &[u8], global: bool) -> Self {
        let mut record = Self::new(global);
        for line in PaxLines::new(data) {
            match line {
                Ok(line) => record.set(line.key, line.value),
                Err(err) => log::debug!("skipping pax line: {err}"),
            }
        }
        record
    }

    /// Set a single key, coercing the value to the field's type.
    pub fn set(&mut self, key: &str, value: &[u8]) {
        if key.is_empty() || value.is_empty() {
            return;
        }
        let key = match key.strip_prefix("SCHILY.") {
            Some(short @ ("dev" | "ino" | "nlink")) => short,
            _ => key,
        };
        match key {
            "path" => self.path = Some(value.to_vec()),
            "linkpath" => self.linkpath = Some(value.to_vec()),
            "uname" => self.uname = Some(value.to_vec()),
            "gname" => self.gname = Some(value.to_vec()),
            "charset" => self.charset = Some(String::from_utf8_lossy(value).into_owned()),
            "comment" => self.comment = Some(String::from_utf8_lossy(value).into_owned()),
            "mtime" | "atime" | "ctime" => {
                let Some(time) = Timestamp::parse(value) else {
                    log::debug!("ignoring unparseable pax {key}");
                    return;
                };
                match key {
                    "mtime" => self.mtime = Some(time),
                    "atime" => self.atime = Some(time),
                    _ => self.ctime = Some(time),
                }
            }
            "size" | "uid" | "gid" | "dev" | "ino" | "nlink" => {
                let Some(number) = std::str::from_utf8(value)
                    .ok()
                    .and_then(|v| v.trim().parse::<u64>().ok())
                else {
                    log::debug!("ignoring non-numeric pax {key}");
                    return;
                };
                let slot = match key {
                    "size" => &mut self.size,
                    "uid" => &mut self.uid,
                    "gid" => &mut self.gid,
                    "dev" => &mut self.dev,
                    "ino" => &mut self.ino,
                    _ => &mut self.nlink,
                };
                *slot = Some(number);
            }
            other => {
                self.extra
                    .insert(other.to_owned(), PaxValue::classify(other, value));
            }
        }
    }

    /// Overlay `newer` on top of this record. Fields present in `newer`
    /// win.
    pub fn merge(&mut self, newer: PaxRecord) {
        fn take<T>(slot: &mut Option<T>, value: Option<T>) {
            if value.is_some() {
                *slot = value;
            }
        }
        take(&mut self.path, newer.path);
        take(&mut self.linkpath, newer.linkpath);
        take(&mut self.size, newer.size);
        take(&mut self.uid, newer.uid);
        take(&mut self.gid, newer.gid);
        take(&mut self.uname, newer.uname);
        take(&mut self.gname, newer.gname);
        take(&mut self.mtime, newer.mtime);
        take(&mut self.atime, newer.atime);
        take(&mut self.ctime, newer.ctime);
        take(&mut self.dev, newer.dev);
        take(&mut self.ino, newer.ino);
        take(&mut self.nlink, newer.nlink);
        take(&mut self.charset, newer.charset);
        take(&mut self.comment, newer.comment);
        self.extra.extend(newer.extra);
    }

    /// Whether the record carries no keys at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.encode_body().is_empty()
    }

    /// Render the body lines in canonical key order.
    #[must_use]
    pub fn encode_body(&self) -> Vec<u8> {
        let mut body = Vec::new();
        let mut push = |key: &str, value: Option<Vec<u8>>| {
            if let Some(value) = value {
                body.extend_from_slice(&record_line(key, &value));
            }
        };
        let number = |v: Option<u64>| v.map(|n| n.to_string().into_bytes());
        let time = |v: Option<Timestamp>| v.map(|t| t.to_string().into_bytes());
        let text = |v: &Option<String>| v.as_ref().map(|s| s.as_bytes().to_vec());

        push("path", self.path.clone());
        push("ctime", time(self.ctime));
        push("atime", time(self.atime));
        push("SCHILY.dev", number(self.dev));
        push("SCHILY.ino", number(self.ino));
        push("SCHILY.nlink", number(self.nlink));
        push("charset", text(&self.charset));
        push("comment", text(&self.comment));
        push("gid", number(self.gid));
        push("gname", self.gname.clone());
        push("linkpath", self.linkpath.clone());
        push("mtime", time(self.mtime));
        push("size", number(self.size));
        push("uid", number(self.uid));
        push("uname", self.uname.clone());
        for (key, value) in &self.extra {
            push(key, Some(value.to_bytes()));
        }
        body
    }

    /// Encode as a complete `x` or `g` entry: header block, body and
    /// padding. Returns an empty vector when there is nothing to write.
    ///
    /// The header is named `PaxHeader/<basename of path>`, truncated to 99
    /// bytes, with mode 0644.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let body = self.encode_body();
        if body.is_empty() {
            return Vec::new();
        }

        let mut name = b"PaxHeader/".to_vec();
        name.extend_from_slice(basename(self.path.as_deref().unwrap_or_default()));
        name.truncate(NAME_SIZE - 1);

        let mut header = Header::new_ustar();
        header.set_name(&name);
        header.set_mode(0o644);
        header.set_uid(self.uid.unwrap_or(0));
        header.set_gid(self.gid.unwrap_or(0));
        header.set_size(body.len() as u64);
        if let Some(mtime) = self.mtime {
            header.set_mtime(mtime.secs);
        }
        header.set_entry_type(if self.global {
            EntryType::XGlobalHeader
        } else {
            EntryType::XHeader
        });
        header.set_username(self.uname.as_deref().unwrap_or_default());
        header.set_groupname(self.gname.as_deref().unwrap_or_default());
        if self.atime.is_some() || self.ctime.is_some() {
            header.set_prefix(&[], XSTAR_PREFIX_SIZE);
            header.set_xstar_times(self.atime.map(|t| t.secs), self.ctime.map(|t| t.secs));
        }
        header.set_checksum();

        let total = HEADER_SIZE + padded_size(body.len() as u64) as usize;
        let mut out = Vec::with_capacity(total);
        out.extend_from_slice(header.as_bytes());
        out.extend_from_slice(&body);
        out.resize(total, 0);
        out
    }
}

/// Format one `<length> key=value\n` line.
///
/// The length counts its own digits, so it is found by iterating until the
/// digit count stops changing.
#[must_use]
pub fn record_line(key: &str, value: &[u8]) -> Vec<u8> {
    let rest = 1 + key.len() + 1 + value.len() + 1;
    let digits = |n: usize| n.to_string().len();
    let mut len = rest + digits(rest);
    loop {
        let next = rest + digits(len);
        if next == len {
            break;
        }
        len = next;
    }
    let mut line = Vec::with_capacity(len);
    line.extend_from_slice(len.to_string().as_bytes());
    line.push(b' ');
    line.extend_from_slice(key.as_bytes());
    line.push(b'=');
    line.extend_from_slice(value);
    line.push(b'\n');
    line
}

fn basename(path: &[u8]) -> &[u8] {
    let trimmed = path.strip_suffix(b"/").unwrap_or(path);
    match trimmed.iter().rposition(|&b| b == b'/') {
        Some(slash) => &trimmed[slash + 1..],
        None => trimmed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_line_lengths() {
        assert_eq!(record_line("path", b"a"), b"9 path=a\n");
        let value = vec![b'v'; 91];
        let line = record_line("path", &value);
        assert_eq!(line.len(), 101);
        assert!(line.starts_with(b"101 path="));
    }

    #[test]
    fn test_record_line_len_is_self_consistent() {
        for n in 0..2000 {
            let value = vec![b'x'; n];
            let line = record_line("comment", &value);
            let (len, _) = std::str::from_utf8(&line)
                .unwrap()
                .split_once(' ')
                .unwrap();
            assert_eq!(len.parse::<usize>().unwrap(), line.len());
        }
    }

    #[test]
    fn test_parse_typed_fields() {
        let mut body = Vec::new();
        body.extend(record_line("path", b"long/name.txt"));
        body.extend(record_line("size", b"5000000000"));
        body.extend(record_line("mtime", b"1700000000.5"));
        body.extend(record_line("SCHILY.dev", b"2049"));
        body.extend(record_line("SCHILY.xattr.user.k", b"v"));
        body.extend(record_line("LIBARCHIVE.creationtime", b"12"));
        let record = PaxRecord::parse(&body, false);

        assert_eq!(record.path.as_deref(), Some(&b"long/name.txt"[..]));
        assert_eq!(record.size, Some(5_000_000_000));
        assert_eq!(record.mtime, Some(Timestamp::new(1_700_000_000, 500_000_000)));
        assert_eq!(record.dev, Some(2049));
        assert_eq!(
            record.extra.get("SCHILY.xattr.user.k"),
            Some(&PaxValue::Text(b"v".to_vec()))
        );
        assert_eq!(
            record.extra.get("LIBARCHIVE.creationtime"),
            Some(&PaxValue::Time(Timestamp::from_secs(12)))
        );
    }

    #[test]
    fn test_parse_skips_bad_length() {
        let record = PaxRecord::parse(b"5 bad\n12 path=foo\n", false);
        assert_eq!(record.path.as_deref(), Some(&b"foo"[..]));
    }

    #[test]
    fn test_parse_ignores_trailing_nuls() {
        let mut body = record_line("uid", b"1000");
        body.resize(512, 0);
        let record = PaxRecord::parse(&body, false);
        assert_eq!(record.uid, Some(1000));
        assert!(record.extra.is_empty());
    }

    #[test]
    fn test_value_may_contain_newline_and_equals() {
        let body = record_line("comment", b"a=b\nc");
        let record = PaxRecord::parse(&body, false);
        assert_eq!(record.comment.as_deref(), Some("a=b\nc"));
    }

    #[test]
    fn test_merge_newer_wins() {
        let mut older = PaxRecord::parse(&record_line("uid", b"1"), true);
        older.merge(PaxRecord::parse(
            &[record_line("uid", b"2"), record_line("gid", b"3")].concat(),
            false,
        ));
        assert_eq!(older.uid, Some(2));
        assert_eq!(older.gid, Some(3));
    }

    #[test]
    fn test_encode_body_order() {
        let record = PaxRecord {
            path: Some(b"p".to_vec()),
            uid: Some(1),
            atime: Some(Timestamp::from_secs(3)),
            dev: Some(4),
            ..PaxRecord::default()
        };
        let body = record.encode_body();
        let keys: Vec<&str> = PaxLines::new(&body).map(|l| l.unwrap().key).collect();
        assert_eq!(keys, vec!["path", "atime", "SCHILY.dev", "uid"]);
    }

    #[test]
    fn test_encode_header_block() {
        let record = PaxRecord {
            path: Some(b"some/deep/file.txt".to_vec()),
            size: Some(1),
            ..PaxRecord::default()
        };
        let out = record.encode();
        assert_eq!(out.len() % 512, 0);
        let header = Header::from_bytes(&out).unwrap();
        header.verify_checksum().unwrap();
        assert_eq!(header.path_bytes(), b"PaxHeader/file.txt");
        assert_eq!(header.entry_type(), EntryType::XHeader);
        assert_eq!(header.mode().unwrap(), 0o644);
        let size = header.entry_size().unwrap() as usize;
        let reparsed = PaxRecord::parse(&out[512..512 + size], false);
        assert_eq!(reparsed, record);
    }

    #[test]
    fn test_encode_global_type() {
        let record = PaxRecord {
            comment: Some("hello".into()),
            ..PaxRecord::new(true)
        };
        let out = record.encode();
        assert_eq!(
            Header::from_bytes(&out).unwrap().entry_type(),
            EntryType::XGlobalHeader
        );
    }

    #[test]
    fn test_empty_record_encodes_nothing() {
        assert!(PaxRecord::default().encode().is_empty());
        assert!(PaxRecord::default().is_empty());
    }

    #[test]
    fn test_timestamp_parse_and_display() {
        let cases: &[(&str, Timestamp, &str)] = &[
            ("0", Timestamp::from_secs(0), "0"),
            ("1.5", Timestamp::new(1, 500_000_000), "1.5"),
            ("-0.25", Timestamp::new(-1, 750_000_000), "-0.25"),
            ("-3", Timestamp::from_secs(-3), "-3"),
            ("7.0000000019", Timestamp::new(7, 1), "7.000000001"),
        ];
        for (text, expected, shown) in cases {
            let parsed = Timestamp::parse(text.as_bytes()).unwrap();
            assert_eq!(parsed, *expected);
            assert_eq!(parsed.to_string(), *shown);
        }
        assert_eq!(Timestamp::parse(b"abc"), None);
        assert_eq!(Timestamp::parse(b""), None);
    }

    #[test]
    fn test_timestamp_system_time() {
        let ts = Timestamp::new(-2, 250_000_000);
        assert_eq!(Timestamp::from_system_time(ts.to_system_time()), ts);
        let ts = Timestamp::new(1_700_000_000, 123);
        assert_eq!(Timestamp::from(ts.to_system_time()), ts);
    }

    #[test]
    fn test_is_time_key() {
        assert!(is_time_key("mtime"));
        assert!(is_time_key("LIBARCHIVE.creationtime"));
        assert!(!is_time_key("SCHILY.xattr.user.mtime"));
        assert!(!is_time_key("runtime"));
    }
}
