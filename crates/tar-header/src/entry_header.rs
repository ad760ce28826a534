//! Decoded form of a header block.

use std::borrow::Cow;
use std::collections::BTreeMap;

use crate::pax::{PaxRecord, PaxValue, Timestamp};
use crate::{parse_octal, split_path, EntryType, Header, Result, PREFIX_SIZE, XSTAR_PREFIX_SIZE};

/// All metadata describing one archive entry.
///
/// This is what a header block decodes to once the prefix has been joined
/// and any pax overrides applied. Paths and names are raw bytes; tar does
/// not mandate an encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryHeader {
    /// Entry path.
    pub path: Vec<u8>,
    /// Entry type.
    pub entry_type: EntryType,
    /// Permission bits including setuid/setgid/sticky.
    pub mode: u32,
    /// Owner user ID.
    pub uid: u64,
    /// Owner group ID.
    pub gid: u64,
    /// Body size in bytes. Always zero for directories.
    pub size: u64,
    /// Modification time.
    pub mtime: Option<Timestamp>,
    /// Access time.
    pub atime: Option<Timestamp>,
    /// Change time.
    pub ctime: Option<Timestamp>,
    /// Link target for hard and symbolic links. Empty when absent.
    pub link_path: Vec<u8>,
    /// Owner user name.
    pub uname: Vec<u8>,
    /// Owner group name.
    pub gname: Vec<u8>,
    /// Device major number.
    pub dev_major: u32,
    /// Device minor number.
    pub dev_minor: u32,
    /// Source device, from `SCHILY.dev`.
    pub dev: Option<u64>,
    /// Source inode, from `SCHILY.ino`.
    pub ino: Option<u64>,
    /// Source link count, from `SCHILY.nlink`.
    pub nlink: Option<u64>,
    /// Checksum stored in the block.
    pub checksum: u64,
    /// Whether the stored checksum matches the block contents.
    pub checksum_valid: bool,
    /// Pax keys without a typed field, such as `SCHILY.xattr.*`.
    pub extensions: BTreeMap<String, PaxValue>,
}

/// Result of [`EntryHeader::encode`].
#[derive(Debug, Clone, Copy)]
pub struct Encoded {
    /// The header block, checksum included.
    pub block: Header,
    /// Some field was truncated, base-256 encoded or non-ASCII. A pax
    /// record must precede the block for a lossless archive.
    pub need_pax: bool,
}

impl EntryHeader {
    /// A header with the given type and path and every other field empty.
    pub fn new(entry_type: EntryType, path: impl Into<Vec<u8>>) -> Self {
        let mut entry = Self {
            path: path.into(),
            entry_type,
            mode: 0,
            uid: 0,
            gid: 0,
            size: 0,
            mtime: None,
            atime: None,
            ctime: None,
            link_path: Vec::new(),
            uname: Vec::new(),
            gname: Vec::new(),
            dev_major: 0,
            dev_minor: 0,
            dev: None,
            ino: None,
            nlink: None,
            checksum: 0,
            checksum_valid: false,
            extensions: BTreeMap::new(),
        };
        entry.normalize();
        entry
    }

    /// Decode the first 512 bytes of `bytes`.
    ///
    /// A checksum mismatch is not an error; it is reported through
    /// [`checksum_valid`](Self::checksum_valid) so the caller can decide.
    ///
    /// # Errors
    ///
    /// Fails if the slice is short or a numeric field is malformed.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let header = Header::from_bytes(bytes)?;
        let mut entry = Self {
            path: header.full_path(),
            entry_type: header.entry_type(),
            mode: header.mode()?,
            uid: header.uid()?,
            gid: header.gid()?,
            size: header.entry_size()?,
            mtime: header.mtime()?.map(Timestamp::from_secs),
            atime: header.atime()?.map(Timestamp::from_secs),
            ctime: header.ctime()?.map(Timestamp::from_secs),
            link_path: header.link_name_bytes().to_vec(),
            uname: header.username().unwrap_or_default().to_vec(),
            gname: header.groupname().unwrap_or_default().to_vec(),
            // Some writers leave garbage in the device fields of ordinary files.
            dev_major: header.device_major().ok().flatten().unwrap_or(0),
            dev_minor: header.device_minor().ok().flatten().unwrap_or(0),
            dev: None,
            ino: None,
            nlink: None,
            checksum: parse_octal(&header.as_old().checksum).unwrap_or(0),
            checksum_valid: header.verify_checksum().is_ok(),
            extensions: BTreeMap::new(),
        };
        entry.normalize();
        Ok(entry)
    }

    /// Decode a block and overlay the global then the per-entry pax
    /// records.
    ///
    /// # Errors
    ///
    /// See [`decode`](Self::decode).
    pub fn decode_with(
        bytes: &[u8],
        ex: Option<&PaxRecord>,
        gex: Option<&PaxRecord>,
    ) -> Result<Self> {
        let mut entry = Self::decode(bytes)?;
        if let Some(gex) = gex {
            entry.apply_pax(gex);
        }
        if let Some(ex) = ex {
            entry.apply_pax(ex);
        }
        Ok(entry)
    }

    /// Overlay the fields present in a pax record.
    ///
    /// Global records never change the path or link target.
    pub fn apply_pax(&mut self, record: &PaxRecord) {
        if !record.global {
            if let Some(path) = &record.path {
                self.path.clone_from(path);
            }
            if let Some(linkpath) = &record.linkpath {
                self.link_path.clone_from(linkpath);
            }
        }
        if let Some(size) = record.size {
            self.size = size;
        }
        if let Some(uid) = record.uid {
            self.uid = uid;
        }
        if let Some(gid) = record.gid {
            self.gid = gid;
        }
        if let Some(uname) = &record.uname {
            self.uname.clone_from(uname);
        }
        if let Some(gname) = &record.gname {
            self.gname.clone_from(gname);
        }
        self.mtime = record.mtime.or(self.mtime);
        self.atime = record.atime.or(self.atime);
        self.ctime = record.ctime.or(self.ctime);
        self.dev = record.dev.or(self.dev);
        self.ino = record.ino.or(self.ino);
        self.nlink = record.nlink.or(self.nlink);
        self.extensions
            .extend(record.extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.normalize();
    }

    /// Encode into a ustar block.
    ///
    /// When atime or ctime is set the prefix is limited to 130 bytes and
    /// the times are stored after it.
    #[must_use]
    pub fn encode(&self) -> Encoded {
        let mut block = Header::new_ustar();
        let prefix_size = if self.atime.is_some() || self.ctime.is_some() {
            XSTAR_PREFIX_SIZE
        } else {
            PREFIX_SIZE
        };

        let (name, prefix, mut need_pax) = split_path(&self.path, prefix_size);
        need_pax |= block.set_name(name);
        need_pax |= block.set_prefix(prefix, prefix_size);
        need_pax |= block.set_mode(self.mode);
        need_pax |= block.set_uid(self.uid);
        need_pax |= block.set_gid(self.gid);
        need_pax |= block.set_size(self.size);
        if let Some(mtime) = self.mtime {
            need_pax |= block.set_mtime(mtime.secs);
        }
        block.set_entry_type(self.entry_type);
        need_pax |= block.set_link_name(&self.link_path);
        need_pax |= block.set_username(&self.uname);
        need_pax |= block.set_groupname(&self.gname);
        need_pax |= block.set_device(self.dev_major, self.dev_minor);
        if prefix_size == XSTAR_PREFIX_SIZE {
            need_pax |= block.set_xstar_times(
                self.atime.map(|t| t.secs),
                self.ctime.map(|t| t.secs),
            );
        }
        block.set_checksum();

        Encoded { block, need_pax }
    }

    /// The path, lossily converted to UTF-8.
    #[must_use]
    pub fn path_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.path)
    }

    /// The link target, lossily converted to UTF-8.
    #[must_use]
    pub fn link_path_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.link_path)
    }

    /// Old archivers mark directories as regular files with a trailing
    /// slash. Directories never carry a body.
    fn normalize(&mut self) {
        if matches!(self.entry_type, EntryType::Regular | EntryType::OldRegular)
            && self.path.ends_with(b"/")
        {
            self.entry_type = EntryType::Directory;
        }
        if self.entry_type == EntryType::Directory {
            self.size = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{encode_numeric, HEADER_SIZE};

    fn sample() -> EntryHeader {
        let mut entry = EntryHeader::new(EntryType::Regular, "dir/file.txt");
        entry.mode = 0o644;
        entry.uid = 1000;
        entry.gid = 100;
        entry.size = 1234;
        entry.mtime = Some(Timestamp::from_secs(1_700_000_000));
        entry.uname = b"user".to_vec();
        entry.gname = b"users".to_vec();
        entry
    }

    /// Fields that survive a header round trip; checksum bookkeeping is
    /// filled in by decode.
    fn comparable(mut entry: EntryHeader) -> EntryHeader {
        entry.checksum = 0;
        entry.checksum_valid = false;
        entry
    }

    #[test]
    fn test_roundtrip_plain() {
        let entry = sample();
        let encoded = entry.encode();
        assert!(!encoded.need_pax);
        let decoded = EntryHeader::decode(encoded.block.as_bytes()).unwrap();
        assert!(decoded.checksum_valid);
        assert_eq!(comparable(decoded), entry);
    }

    #[test]
    fn test_roundtrip_long_path_uses_prefix() {
        let path = format!("{}/{}", "a".repeat(140), "b".repeat(90));
        let mut entry = sample();
        entry.path = path.clone().into_bytes();
        let encoded = entry.encode();
        assert!(!encoded.need_pax);
        assert_eq!(encoded.block.path_bytes(), "b".repeat(90).as_bytes());
        let decoded = EntryHeader::decode(encoded.block.as_bytes()).unwrap();
        assert_eq!(decoded.path, path.as_bytes());
    }

    #[test]
    fn test_unsplittable_path_needs_pax() {
        let mut entry = sample();
        entry.path = "z".repeat(300).into_bytes();
        assert!(entry.encode().need_pax);
    }

    #[test]
    fn test_times_shrink_prefix() {
        let mut entry = sample();
        entry.path = format!("{}/{}", "p".repeat(140), "n".repeat(10)).into_bytes();
        assert!(!entry.encode().need_pax);
        entry.atime = Some(Timestamp::from_secs(5));
        assert!(entry.encode().need_pax);
    }

    #[test]
    fn test_roundtrip_xstar_times() {
        let mut entry = sample();
        entry.atime = Some(Timestamp::from_secs(1_600_000_000));
        entry.ctime = Some(Timestamp::from_secs(1_600_000_001));
        let encoded = entry.encode();
        let decoded = EntryHeader::decode(encoded.block.as_bytes()).unwrap();
        assert_eq!(comparable(decoded), entry);
    }

    #[test]
    fn test_large_size_base256() {
        let mut entry = sample();
        entry.size = 1 << 33;
        let encoded = entry.encode();
        assert!(encoded.need_pax);
        assert_eq!(encoded.block.as_bytes()[124], 0x80);
        let decoded = EntryHeader::decode(encoded.block.as_bytes()).unwrap();
        assert_eq!(decoded.size, 1 << 33);
    }

    #[test]
    fn test_five_gigabyte_size_roundtrips() {
        let mut entry = sample();
        entry.size = 5_000_000_000;
        let encoded = entry.encode();
        let decoded = EntryHeader::decode(encoded.block.as_bytes()).unwrap();
        assert_eq!(decoded.size, 5_000_000_000);
    }

    #[test]
    fn test_negative_mtime_needs_pax() {
        let mut entry = sample();
        entry.mtime = Some(Timestamp::from_secs(-86400));
        let encoded = entry.encode();
        assert!(encoded.need_pax);
        let decoded = EntryHeader::decode(encoded.block.as_bytes()).unwrap();
        assert_eq!(decoded.mtime, Some(Timestamp::from_secs(-86400)));
    }

    #[test]
    fn test_non_ascii_uname_needs_pax() {
        let mut entry = sample();
        entry.uname = "j\u{f6}rg".as_bytes().to_vec();
        assert!(entry.encode().need_pax);
    }

    #[test]
    fn test_trailing_slash_file_is_directory() {
        let mut entry = sample();
        entry.path = b"olddir/".to_vec();
        let mut block = *entry.encode().block.as_bytes();
        // pretend an old archiver wrote a '\0' type with a size
        block[156] = 0;
        encode_numeric(&mut block[124..136], 99);
        let decoded = EntryHeader::decode(&block).unwrap();
        assert_eq!(decoded.entry_type, EntryType::Directory);
        assert_eq!(decoded.size, 0);
        assert!(!decoded.checksum_valid);
    }

    #[test]
    fn test_directory_size_forced_to_zero() {
        let mut block = [0u8; HEADER_SIZE];
        block[..3].copy_from_slice(b"dir");
        let mut header = *Header::from_bytes_exact(&block);
        header.set_entry_type(EntryType::Directory);
        header.set_size(4096);
        header.set_checksum();
        let decoded = EntryHeader::decode(header.as_bytes()).unwrap();
        assert_eq!(decoded.size, 0);
        assert!(decoded.checksum_valid);
    }

    #[test]
    fn test_unknown_type_is_unsupported() {
        let mut header = Header::new_ustar();
        header.set_name(b"weird");
        header.set_entry_type(EntryType::from_byte(b'S'));
        header.set_checksum();
        let decoded = EntryHeader::decode(header.as_bytes()).unwrap();
        assert!(decoded.entry_type.is_unsupported());
    }

    #[test]
    fn test_pax_precedence() {
        let block = sample().encode().block;
        let gex = PaxRecord {
            global: true,
            path: Some(b"global/path".to_vec()),
            uid: Some(1),
            gid: Some(2),
            ..PaxRecord::default()
        };
        let ex = PaxRecord {
            path: Some(b"local/path".to_vec()),
            uid: Some(3),
            ..PaxRecord::default()
        };

        let decoded = EntryHeader::decode_with(block.as_bytes(), Some(&ex), Some(&gex)).unwrap();
        assert_eq!(decoded.path, b"local/path");
        assert_eq!(decoded.uid, 3);
        assert_eq!(decoded.gid, 2);

        let decoded = EntryHeader::decode_with(block.as_bytes(), None, Some(&gex)).unwrap();
        assert_eq!(decoded.path, b"dir/file.txt");
        assert_eq!(decoded.uid, 1);
    }

    #[test]
    fn test_bad_octal_is_error() {
        let mut block = *sample().encode().block.as_bytes();
        block[100..108].copy_from_slice(b"zzzzzzz\0");
        assert!(EntryHeader::decode(&block).is_err());
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        fn path_strategy() -> impl Strategy<Value = String> {
            proptest::string::string_regex("[a-zA-Z0-9_][a-zA-Z0-9_.+-]{0,40}(/[a-zA-Z0-9_][a-zA-Z0-9_.+-]{0,40}){0,5}")
                .expect("valid regex")
        }

        fn size_strategy() -> impl Strategy<Value = u64> {
            prop_oneof![
                Just(0u64),
                Just(512u64),
                Just(1u64 << 33),
                Just(5_000_000_000u64),
                any::<u64>(),
            ]
        }

        fn entry_strategy() -> impl Strategy<Value = EntryHeader> {
            (
                path_strategy(),
                prop_oneof![
                    Just(EntryType::Regular),
                    Just(EntryType::Symlink),
                    Just(EntryType::Link),
                    Just(EntryType::Fifo),
                ],
                0u32..0o7777,
                0u64..(1 << 40),
                0u64..(1 << 40),
                size_strategy(),
                -(1i64 << 40)..(1i64 << 40),
                "[a-z]{0,31}",
            )
                .prop_map(|(path, entry_type, mode, uid, gid, size, mtime, uname)| {
                    let mut entry = EntryHeader::new(entry_type, path);
                    entry.mode = mode;
                    entry.uid = uid;
                    entry.gid = gid;
                    entry.size = size;
                    entry.mtime = Some(Timestamp::from_secs(mtime));
                    entry.uname = uname.into_bytes();
                    if entry_type.is_link() {
                        entry.link_path = b"target".to_vec();
                    }
                    entry
                })
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(256))]

            #[test]
            fn test_decode_encode_roundtrip(entry in entry_strategy()) {
                let encoded = entry.encode();
                let decoded = EntryHeader::decode(encoded.block.as_bytes()).unwrap();
                prop_assert!(decoded.checksum_valid);
                if encoded.need_pax {
                    // A pax record would restore whatever the block could not hold.
                    let record = PaxRecord::from_entry(&entry);
                    let mut restored = decoded;
                    restored.apply_pax(&record);
                    prop_assert_eq!(comparable(restored), entry);
                } else {
                    prop_assert_eq!(comparable(decoded), entry);
                }
            }

            #[test]
            fn test_encoding_agrees_with_tar_crate(mut entry in entry_strategy()) {
                entry.uid %= 0o7777777;
                entry.gid %= 0o7777777;
                entry.size %= 0o77777777777;
                entry.mtime = entry.mtime.map(|t| Timestamp::from_secs(t.secs.rem_euclid(0o77777777777)));
                prop_assume!(!entry.encode().need_pax);
                let block = entry.encode().block;
                let theirs = tar::Header::from_byte_slice(block.as_bytes());
                let theirs_path = theirs.path_bytes();
                prop_assert_eq!(theirs_path.as_ref(), entry.path.as_slice());
                prop_assert_eq!(theirs.size().unwrap(), entry.size);
                prop_assert_eq!(theirs.mode().unwrap(), entry.mode);
                prop_assert_eq!(theirs.uid().unwrap(), entry.uid);
                prop_assert_eq!(theirs.cksum().unwrap() as u64, block.compute_checksum());
            }
        }
    }
}
