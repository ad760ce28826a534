//! Zerocopy-based tar header codec with pax support and a streaming decoder.
//!
//! This crate handles the byte-level side of tar archives: decoding and
//! encoding 512-byte header blocks (POSIX.1-1988, UStar, GNU and the xstar
//! atime/ctime variant), pax extended header records, and a sans-IO stream
//! decoder that turns arbitrarily fragmented input into entry events.
//!
//! # Block layout
//!
//! Every layout shares the first 257 bytes: `name` (100), `mode` (8),
//! `uid` (8), `gid` (8), `size` (12), `mtime` (12), `checksum` (8),
//! `typeflag` (1) and `linkname` (100). Ustar and GNU blocks continue with
//! `magic`/`version` at 257, `uname` and `gname` (32 each), and
//! `devmajor`/`devminor` (8 each), ending at offset 345.
//!
//! From 345 on the layouts differ:
//!
//! | Layout | 345..500                                      |
//! |--------|-----------------------------------------------|
//! | ustar  | `prefix` (155)                                |
//! | xstar  | `prefix` (130), NUL, `atime` (12), `ctime` (12) |
//! | GNU    | `atime`, `ctime`, multivolume and sparse data |
//!
//! Numeric fields are octal text. Values too large for the field are
//! written base-256: a `0x80` lead byte then big-endian bytes, or `0xff`
//! for a negative two's complement value.
//!
//! # Example
//!
//! ```
//! use tar_header::{EntryHeader, EntryType};
//!
//! let mut entry = EntryHeader::new(EntryType::Regular, "a.txt");
//! entry.size = 2;
//! entry.mode = 0o644;
//! let encoded = entry.encode();
//! assert!(!encoded.need_pax);
//!
//! let decoded = EntryHeader::decode(encoded.block.as_bytes()).unwrap();
//! assert!(decoded.checksum_valid);
//! assert_eq!(decoded.path, b"a.txt");
//! ```

mod entry_header;
pub mod pax;
pub mod stream;

use std::fmt;

use thiserror::Error;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

pub use entry_header::{Encoded, EntryHeader};
pub use pax::{PaxError, PaxRecord, PaxValue, Timestamp};

/// Size of a tar header block in bytes.
pub const HEADER_SIZE: usize = 512;

/// Magic string for UStar format headers ("ustar\0").
pub const USTAR_MAGIC: &[u8; 6] = b"ustar\0";

/// Version field for UStar format headers ("00").
pub const USTAR_VERSION: &[u8; 2] = b"00";

/// Magic string for GNU tar format headers ("ustar ").
pub const GNU_MAGIC: &[u8; 6] = b"ustar ";

/// Version field for GNU tar format headers (" \0").
pub const GNU_VERSION: &[u8; 2] = b" \0";

/// Width of the name field.
pub const NAME_SIZE: usize = 100;

/// Width of the ustar prefix field.
pub const PREFIX_SIZE: usize = 155;

/// Width of the prefix field when atime/ctime are stored in the block.
pub const XSTAR_PREFIX_SIZE: usize = 130;

/// A header block that cannot be decoded.
#[derive(Debug, Error)]
pub enum HeaderError {
    /// Fewer than [`HEADER_SIZE`] bytes were supplied.
    #[error("short header block: {0} of {HEADER_SIZE} bytes")]
    InsufficientData(usize),

    /// A numeric field holds something other than octal digits.
    #[error("invalid octal field: {0:?}")]
    InvalidOctal(Vec<u8>),

    /// A base-256 field has a lead byte other than `0x80` or `0xff`,
    /// or does not fit the target integer.
    #[error("invalid base-256 field: {0:?}")]
    InvalidBase256(Vec<u8>),

    /// The stored checksum disagrees with the block contents.
    #[error("checksum mismatch: stored {expected}, computed {computed}")]
    ChecksumMismatch {
        /// Stored in the block.
        expected: u64,
        /// Sum of the block with the checksum field read as spaces.
        computed: u64,
    },
}

/// Result type for header decoding.
pub type Result<T> = std::result::Result<T, HeaderError>;

// ============================================================================
// Block layouts
// ============================================================================

/// NUL-terminated header text, lossily decoded for `Debug` output.
fn lossy(field: &[u8]) -> std::borrow::Cow<'_, str> {
    String::from_utf8_lossy(truncate_null(field))
}

/// An uninterpreted header block.
#[derive(Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct RawHeader {
    /// Block contents.
    pub bytes: [u8; HEADER_SIZE],
}

impl Default for RawHeader {
    fn default() -> Self {
        Self {
            bytes: [0; HEADER_SIZE],
        }
    }
}

impl fmt::Debug for RawHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RawHeader")
            .field(&lossy(&self.bytes[..NAME_SIZE]))
            .finish()
    }
}

/// Pre-POSIX (v7) layout. Nothing after `linkname` is defined.
#[derive(Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct OldHeader {
    pub name: [u8; 100],
    pub mode: [u8; 8],
    pub uid: [u8; 8],
    pub gid: [u8; 8],
    pub size: [u8; 12],
    pub mtime: [u8; 12],
    pub checksum: [u8; 8],
    pub typeflag: u8,
    pub linkname: [u8; 100],
    /// Undefined; old writers leave garbage here.
    pub pad: [u8; 255],
}

impl fmt::Debug for OldHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OldHeader")
            .field("name", &lossy(&self.name))
            .field("typeflag", &char::from(self.typeflag))
            .finish_non_exhaustive()
    }
}

/// POSIX ustar layout (`magic` is `"ustar\0"`, `version` is `"00"`).
///
/// Numeric fields are octal text or base-256; text fields are NUL padded.
#[derive(Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct UstarHeader {
    pub name: [u8; 100],
    pub mode: [u8; 8],
    pub uid: [u8; 8],
    pub gid: [u8; 8],
    pub size: [u8; 12],
    pub mtime: [u8; 12],
    pub checksum: [u8; 8],
    pub typeflag: u8,
    pub linkname: [u8; 100],
    pub magic: [u8; 6],
    pub version: [u8; 2],
    pub uname: [u8; 32],
    pub gname: [u8; 32],
    pub devmajor: [u8; 8],
    pub devminor: [u8; 8],
    /// Leading directories of a path too long for `name`.
    pub prefix: [u8; 155],
    pub pad: [u8; 12],
}

impl fmt::Debug for UstarHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UstarHeader")
            .field("prefix", &lossy(&self.prefix))
            .field("name", &lossy(&self.name))
            .field("typeflag", &char::from(self.typeflag))
            .field("uname", &lossy(&self.uname))
            .finish_non_exhaustive()
    }
}

/// Ustar variant with a 130-byte prefix followed by access and change
/// times. Byte 475 (`pad_byte`) is zero in this layout, which a full
/// 155-byte prefix would only have if the prefix were shorter.
#[derive(Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct XstarHeader {
    /// Everything up to and including `devminor`.
    pub common: [u8; 345],
    pub prefix: [u8; 130],
    pub pad_byte: u8,
    pub atime: [u8; 12],
    pub ctime: [u8; 12],
    pub pad: [u8; 12],
}

impl fmt::Debug for XstarHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XstarHeader")
            .field("prefix", &lossy(&self.prefix))
            .field("atime", &parse_signed_numeric(&self.atime).ok())
            .field("ctime", &parse_signed_numeric(&self.ctime).ok())
            .finish_non_exhaustive()
    }
}

/// GNU layout (`magic` is `"ustar "`, `version` is `" \0"`).
///
/// There is no prefix; its space holds times and multivolume/sparse
/// bookkeeping. Sparse maps are kept as opaque bytes.
#[derive(Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct GnuHeader {
    pub name: [u8; 100],
    pub mode: [u8; 8],
    pub uid: [u8; 8],
    pub gid: [u8; 8],
    pub size: [u8; 12],
    pub mtime: [u8; 12],
    pub checksum: [u8; 8],
    pub typeflag: u8,
    pub linkname: [u8; 100],
    pub magic: [u8; 6],
    pub version: [u8; 2],
    pub uname: [u8; 32],
    pub gname: [u8; 32],
    pub devmajor: [u8; 8],
    pub devminor: [u8; 8],
    pub atime: [u8; 12],
    pub ctime: [u8; 12],
    /// Multivolume continuation offset.
    pub offset: [u8; 12],
    pub longnames: [u8; 4],
    pub unused: u8,
    pub sparse: [u8; 96],
    pub isextended: u8,
    /// Expanded size of a sparse file.
    pub realsize: [u8; 12],
    pub pad: [u8; 17],
}

impl fmt::Debug for GnuHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GnuHeader")
            .field("name", &lossy(&self.name))
            .field("typeflag", &char::from(self.typeflag))
            .field("atime", &parse_signed_numeric(&self.atime).ok())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Entry Type
// ============================================================================

/// Tar entry type indicating the kind of file system object.
///
/// The type is stored as a single ASCII byte in the header. Codes this
/// crate does not know about decode to [`EntryType::Other`] and are treated
/// as unsupported by consumers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntryType {
    /// Regular file (type '0').
    Regular,
    /// Regular file written by pre-POSIX archivers (type '\0').
    OldRegular,
    /// Hard link to a previously archived file (type '1').
    Link,
    /// Symbolic link (type '2').
    Symlink,
    /// Character device (type '3').
    Char,
    /// Block device (type '4').
    Block,
    /// Directory (type '5').
    Directory,
    /// FIFO / named pipe (type '6').
    Fifo,
    /// Contiguous file (type '7'), extracted as a regular file.
    Continuous,
    /// GNU dump directory listing (type 'D').
    GnuDumpDir,
    /// GNU long link target for the next entry (type 'K').
    GnuLongLink,
    /// GNU long path for the next entry (type 'L').
    GnuLongName,
    /// PAX extended header for the next entry (type 'x').
    XHeader,
    /// PAX global extended header (type 'g').
    XGlobalHeader,
    /// Unknown entry type.
    Other(u8),
}

impl EntryType {
    /// Decode an entry type from its header byte.
    #[must_use]
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            b'0' => EntryType::Regular,
            b'\0' => EntryType::OldRegular,
            b'1' => EntryType::Link,
            b'2' => EntryType::Symlink,
            b'3' => EntryType::Char,
            b'4' => EntryType::Block,
            b'5' => EntryType::Directory,
            b'6' => EntryType::Fifo,
            b'7' => EntryType::Continuous,
            b'D' => EntryType::GnuDumpDir,
            b'K' => EntryType::GnuLongLink,
            b'L' => EntryType::GnuLongName,
            b'x' => EntryType::XHeader,
            b'g' => EntryType::XGlobalHeader,
            other => EntryType::Other(other),
        }
    }

    /// The header byte for this entry type.
    #[must_use]
    pub fn to_byte(self) -> u8 {
        match self {
            EntryType::Regular => b'0',
            EntryType::OldRegular => b'\0',
            EntryType::Link => b'1',
            EntryType::Symlink => b'2',
            EntryType::Char => b'3',
            EntryType::Block => b'4',
            EntryType::Directory => b'5',
            EntryType::Fifo => b'6',
            EntryType::Continuous => b'7',
            EntryType::GnuDumpDir => b'D',
            EntryType::GnuLongLink => b'K',
            EntryType::GnuLongName => b'L',
            EntryType::XHeader => b'x',
            EntryType::XGlobalHeader => b'g',
            EntryType::Other(byte) => byte,
        }
    }

    /// Human-readable name used in diagnostics.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            EntryType::Regular | EntryType::OldRegular => "File",
            EntryType::Link => "Link",
            EntryType::Symlink => "SymbolicLink",
            EntryType::Char => "CharacterDevice",
            EntryType::Block => "BlockDevice",
            EntryType::Directory => "Directory",
            EntryType::Fifo => "FIFO",
            EntryType::Continuous => "ContiguousFile",
            EntryType::GnuDumpDir => "GNUDumpDir",
            EntryType::GnuLongLink => "NextFileHasLongLinkpath",
            EntryType::GnuLongName => "NextFileHasLongPath",
            EntryType::XHeader => "ExtendedHeader",
            EntryType::XGlobalHeader => "GlobalExtendedHeader",
            EntryType::Other(_) => "Unsupported",
        }
    }

    /// Returns true for entries whose body is regular file content.
    #[must_use]
    pub fn is_file(self) -> bool {
        matches!(
            self,
            EntryType::Regular | EntryType::OldRegular | EntryType::Continuous
        )
    }

    /// Returns true for directory entries, including GNU dump directories.
    #[must_use]
    pub fn is_dir(self) -> bool {
        matches!(self, EntryType::Directory | EntryType::GnuDumpDir)
    }

    /// Returns true for symbolic links.
    #[must_use]
    pub fn is_symlink(self) -> bool {
        matches!(self, EntryType::Symlink)
    }

    /// Returns true for hard links.
    #[must_use]
    pub fn is_hard_link(self) -> bool {
        matches!(self, EntryType::Link)
    }

    /// Returns true for types that require a link target.
    #[must_use]
    pub fn is_link(self) -> bool {
        self.is_symlink() || self.is_hard_link()
    }

    /// Returns true for character/block devices and FIFOs.
    #[must_use]
    pub fn is_special(self) -> bool {
        matches!(self, EntryType::Char | EntryType::Block | EntryType::Fifo)
    }

    /// Returns true for entries that modify the entry that follows them
    /// rather than describing a file system object.
    #[must_use]
    pub fn is_meta(self) -> bool {
        matches!(
            self,
            EntryType::GnuLongLink
                | EntryType::GnuLongName
                | EntryType::XHeader
                | EntryType::XGlobalHeader
        )
    }

    /// Returns true for type codes this crate does not understand.
    #[must_use]
    pub fn is_unsupported(self) -> bool {
        matches!(self, EntryType::Other(_))
    }
}

impl From<u8> for EntryType {
    fn from(byte: u8) -> Self {
        Self::from_byte(byte)
    }
}

impl From<EntryType> for u8 {
    fn from(entry_type: EntryType) -> Self {
        entry_type.to_byte()
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Header
// ============================================================================

/// A 512-byte tar header with typed accessors.
///
/// Getters read whichever layout the magic bytes indicate. Setters always
/// write the ustar layout and report whether the value had to be truncated
/// or base-256 encoded, in which case a pax record should carry it.
///
/// ```
/// use tar_header::Header;
///
/// let mut header = Header::new_ustar();
/// assert!(!header.set_size(5_000_000_000));
/// assert!(header.set_size(1 << 40));
/// assert_eq!(header.entry_size().unwrap(), 1 << 40);
/// ```
#[derive(Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(transparent)]
pub struct Header {
    raw: RawHeader,
}

impl Header {
    fn with_magic(magic: &[u8; 6], version: &[u8; 2]) -> Self {
        let mut header = Self {
            raw: RawHeader::default(),
        };
        header.raw.bytes[257..263].copy_from_slice(magic);
        header.raw.bytes[263..265].copy_from_slice(version);
        header
    }

    /// An empty ustar block.
    #[must_use]
    pub fn new_ustar() -> Self {
        Self::with_magic(USTAR_MAGIC, USTAR_VERSION)
    }

    /// An empty GNU block.
    #[must_use]
    pub fn new_gnu() -> Self {
        Self::with_magic(GNU_MAGIC, GNU_VERSION)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; HEADER_SIZE] {
        &self.raw.bytes
    }

    pub fn as_mut_bytes(&mut self) -> &mut [u8; HEADER_SIZE] {
        &mut self.raw.bytes
    }

    /// View the first block of `bytes`.
    ///
    /// # Errors
    ///
    /// [`HeaderError::InsufficientData`] if `bytes` is shorter than a block.
    pub fn from_bytes(bytes: &[u8]) -> Result<&Header> {
        match bytes.first_chunk::<HEADER_SIZE>() {
            Some(block) => Ok(Self::from_bytes_exact(block)),
            None => Err(HeaderError::InsufficientData(bytes.len())),
        }
    }

    #[must_use]
    pub fn from_bytes_exact(bytes: &[u8; HEADER_SIZE]) -> &Header {
        zerocopy::transmute_ref!(bytes)
    }

    #[must_use]
    pub fn as_old(&self) -> &OldHeader {
        zerocopy::transmute_ref!(&self.raw)
    }

    #[must_use]
    pub fn as_ustar(&self) -> &UstarHeader {
        zerocopy::transmute_ref!(&self.raw)
    }

    #[must_use]
    pub fn as_xstar(&self) -> &XstarHeader {
        zerocopy::transmute_ref!(&self.raw)
    }

    #[must_use]
    pub fn as_gnu(&self) -> &GnuHeader {
        zerocopy::transmute_ref!(&self.raw)
    }

    fn ustar_mut(&mut self) -> &mut UstarHeader {
        zerocopy::transmute_mut!(&mut self.raw)
    }

    fn xstar_mut(&mut self) -> &mut XstarHeader {
        zerocopy::transmute_mut!(&mut self.raw)
    }

    fn magic(&self) -> (&[u8], &[u8]) {
        (&self.raw.bytes[257..263], &self.raw.bytes[263..265])
    }

    #[must_use]
    pub fn is_ustar(&self) -> bool {
        self.magic() == (&USTAR_MAGIC[..], &USTAR_VERSION[..])
    }

    #[must_use]
    pub fn is_gnu(&self) -> bool {
        self.magic() == (&GNU_MAGIC[..], &GNU_VERSION[..])
    }

    /// Ustar with the shortened prefix and atime/ctime.
    #[must_use]
    pub fn is_xstar(&self) -> bool {
        self.is_ustar() && self.raw.bytes[475] == 0
    }

    /// Ustar and GNU blocks carry owner names and device numbers.
    fn is_extended(&self) -> bool {
        self.is_ustar() || self.is_gnu()
    }

    #[must_use]
    pub fn entry_type(&self) -> EntryType {
        EntryType::from_byte(self.as_old().typeflag)
    }

    /// Body size. Always 0 for directories once decoded into an
    /// [`EntryHeader`], but reported as stored here.
    ///
    /// # Errors
    ///
    /// Fails on a malformed field; likewise for the other numeric getters.
    pub fn entry_size(&self) -> Result<u64> {
        parse_numeric(&self.as_old().size)
    }

    pub fn mode(&self) -> Result<u32> {
        let field = &self.as_old().mode;
        u32::try_from(parse_numeric(field)?)
            .map_err(|_| HeaderError::InvalidBase256(field.to_vec()))
    }

    pub fn uid(&self) -> Result<u64> {
        parse_numeric(&self.as_old().uid)
    }

    pub fn gid(&self) -> Result<u64> {
        parse_numeric(&self.as_old().gid)
    }

    /// Seconds since the epoch, `None` when blank.
    pub fn mtime(&self) -> Result<Option<i64>> {
        parse_optional_time(&self.as_old().mtime)
    }

    fn extra_time(&self, gnu: &[u8; 12], xstar: &[u8; 12]) -> Result<Option<i64>> {
        if self.is_gnu() {
            parse_optional_time(gnu)
        } else if self.is_xstar() {
            parse_optional_time(xstar)
        } else {
            Ok(None)
        }
    }

    /// Access time from GNU or xstar blocks.
    pub fn atime(&self) -> Result<Option<i64>> {
        self.extra_time(&self.as_gnu().atime, &self.as_xstar().atime)
    }

    /// Change time from GNU or xstar blocks.
    pub fn ctime(&self) -> Result<Option<i64>> {
        self.extra_time(&self.as_gnu().ctime, &self.as_xstar().ctime)
    }

    /// The `name` field alone; see [`full_path`](Self::full_path).
    #[must_use]
    pub fn path_bytes(&self) -> &[u8] {
        truncate_null(&self.as_old().name)
    }

    #[must_use]
    pub fn link_name_bytes(&self) -> &[u8] {
        truncate_null(&self.as_old().linkname)
    }

    /// `None` for old-style blocks.
    pub fn device_major(&self) -> Result<Option<u32>> {
        self.is_extended()
            .then(|| parse_device(&self.as_ustar().devmajor))
            .transpose()
    }

    /// `None` for old-style blocks.
    pub fn device_minor(&self) -> Result<Option<u32>> {
        self.is_extended()
            .then(|| parse_device(&self.as_ustar().devminor))
            .transpose()
    }

    #[must_use]
    pub fn username(&self) -> Option<&[u8]> {
        self.is_extended()
            .then(|| truncate_null(&self.as_ustar().uname))
    }

    #[must_use]
    pub fn groupname(&self) -> Option<&[u8]> {
        self.is_extended()
            .then(|| truncate_null(&self.as_ustar().gname))
    }

    /// The ustar prefix. In the xstar layout byte 475 is zero, so the same
    /// truncation yields the shortened prefix.
    #[must_use]
    pub fn prefix(&self) -> Option<&[u8]> {
        self.is_ustar()
            .then(|| truncate_null(&self.as_ustar().prefix))
    }

    /// The full path: prefix, a slash, then name.
    #[must_use]
    pub fn full_path(&self) -> Vec<u8> {
        match self.prefix() {
            Some(prefix) if !prefix.is_empty() => {
                let name = self.path_bytes();
                let mut path = Vec::with_capacity(prefix.len() + 1 + name.len());
                path.extend_from_slice(prefix);
                path.push(b'/');
                path.extend_from_slice(name);
                path
            }
            _ => self.path_bytes().to_vec(),
        }
    }

    /// Set the entry type.
    pub fn set_entry_type(&mut self, entry_type: EntryType) {
        self.raw.bytes[156] = entry_type.to_byte();
    }

    /// Write the name field, returning true if it was truncated or is not
    /// plain ASCII.
    pub fn set_name(&mut self, name: &[u8]) -> bool {
        encode_string(&mut self.ustar_mut().name, name)
    }

    /// Write the link name field, returning true if it was truncated or is
    /// not plain ASCII.
    pub fn set_link_name(&mut self, link: &[u8]) -> bool {
        encode_string(&mut self.ustar_mut().linkname, link)
    }

    /// Write the prefix field using either the full or the xstar width.
    pub fn set_prefix(&mut self, prefix: &[u8], width: usize) -> bool {
        if width <= XSTAR_PREFIX_SIZE {
            encode_string(&mut self.xstar_mut().prefix, prefix)
        } else {
            encode_string(&mut self.ustar_mut().prefix, prefix)
        }
    }

    /// Set the mode field.
    pub fn set_mode(&mut self, mode: u32) -> bool {
        encode_numeric(&mut self.ustar_mut().mode, u64::from(mode))
    }

    /// Set the uid field.
    pub fn set_uid(&mut self, uid: u64) -> bool {
        encode_numeric(&mut self.ustar_mut().uid, uid)
    }

    /// Set the gid field.
    pub fn set_gid(&mut self, gid: u64) -> bool {
        encode_numeric(&mut self.ustar_mut().gid, gid)
    }

    /// Set the size field.
    pub fn set_size(&mut self, size: u64) -> bool {
        encode_numeric(&mut self.ustar_mut().size, size)
    }

    /// Set the mtime field.
    pub fn set_mtime(&mut self, secs: i64) -> bool {
        encode_signed_numeric(&mut self.ustar_mut().mtime, secs)
    }

    /// Store access and change times in the xstar slots.
    ///
    /// Only meaningful when the prefix was written with
    /// [`XSTAR_PREFIX_SIZE`].
    pub fn set_xstar_times(&mut self, atime: Option<i64>, ctime: Option<i64>) -> bool {
        let xstar = self.xstar_mut();
        xstar.pad_byte = 0;
        let mut need_pax = false;
        if let Some(atime) = atime {
            need_pax |= encode_signed_numeric(&mut xstar.atime, atime);
        }
        if let Some(ctime) = ctime {
            need_pax |= encode_signed_numeric(&mut xstar.ctime, ctime);
        }
        need_pax
    }

    /// Set the user name field.
    pub fn set_username(&mut self, name: &[u8]) -> bool {
        encode_string(&mut self.ustar_mut().uname, name)
    }

    /// Set the group name field.
    pub fn set_groupname(&mut self, name: &[u8]) -> bool {
        encode_string(&mut self.ustar_mut().gname, name)
    }

    /// Set the device major and minor numbers.
    pub fn set_device(&mut self, major: u32, minor: u32) -> bool {
        let ustar = self.ustar_mut();
        encode_numeric(&mut ustar.devmajor, u64::from(major))
            | encode_numeric(&mut ustar.devminor, u64::from(minor))
    }

    /// Compute and store the checksum.
    ///
    /// The stored form is six octal digits, a NUL and a space.
    pub fn set_checksum(&mut self) {
        let checksum = self.compute_checksum();
        let field = &mut self.ustar_mut().checksum;
        let digits = format!("{checksum:06o}");
        field[..6].copy_from_slice(&digits.as_bytes()[digits.len() - 6..]);
        field[6] = 0;
        field[7] = b' ';
    }

    /// Verify the header checksum.
    ///
    /// The checksum is computed as the unsigned sum of all header bytes,
    /// treating the checksum field (bytes 148..156) as spaces.
    ///
    /// # Errors
    ///
    /// Returns [`HeaderError::ChecksumMismatch`] if the checksum is invalid,
    /// or [`HeaderError::InvalidOctal`] if the stored checksum cannot be parsed.
    pub fn verify_checksum(&self) -> Result<()> {
        let expected = parse_octal(&self.raw.bytes[148..156])?;
        let computed = self.compute_checksum();
        if expected == computed {
            Ok(())
        } else {
            Err(HeaderError::ChecksumMismatch { expected, computed })
        }
    }

    /// Compute the header checksum.
    #[must_use]
    pub fn compute_checksum(&self) -> u64 {
        self.raw
            .bytes
            .iter()
            .enumerate()
            .map(|(i, &byte)| {
                if (148..156).contains(&i) {
                    u64::from(b' ')
                } else {
                    u64::from(byte)
                }
            })
            .sum()
    }

    /// Check if this header represents an empty block (all zeros).
    ///
    /// Two consecutive empty blocks mark the end of a tar archive.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.raw.bytes.iter().all(|&b| b == 0)
    }
}

impl Default for Header {
    fn default() -> Self {
        Self::new_ustar()
    }
}

impl fmt::Debug for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let format = if self.is_gnu() {
            "gnu"
        } else if self.is_xstar() {
            "xstar"
        } else if self.is_ustar() {
            "ustar"
        } else {
            "old"
        };
        f.debug_struct("Header")
            .field("format", &format)
            .field("entry_type", &self.entry_type())
            .field("path", &String::from_utf8_lossy(&self.full_path()))
            .field("mode", &self.mode().ok().map(|m| format!("{m:o}")))
            .field("size", &self.entry_size().ok())
            .finish()
    }
}

// ============================================================================
// Numeric fields
// ============================================================================

/// Read an octal text field such as `"0000644\0"` or `"  123 "`.
///
/// Leading spaces are skipped and the digits end at the first space or
/// NUL. A field with no digits reads as zero.
///
/// # Errors
///
/// [`HeaderError::InvalidOctal`] on any other byte, or on overflow.
pub fn parse_octal(bytes: &[u8]) -> Result<u64> {
    let invalid = || HeaderError::InvalidOctal(bytes.to_vec());
    bytes
        .iter()
        .skip_while(|&&b| b == b' ')
        .take_while(|&&b| b != b' ' && b != 0)
        .try_fold(0u64, |value, &digit| match digit {
            b'0'..=b'7' => value
                .checked_mul(8)
                .and_then(|v| v.checked_add(u64::from(digit - b'0'))),
            _ => None,
        })
        .ok_or_else(invalid)
}

/// Parse a numeric field that may be octal ASCII or base-256 encoded.
///
/// When the first byte is `0x80` the remaining bytes are a big-endian
/// unsigned value. A `0xff` lead byte marks a negative number, which is
/// rejected here; use [`parse_signed_numeric`] for time fields.
///
/// # Errors
///
/// Returns an error if the field is malformed or the value is negative.
pub fn parse_numeric(bytes: &[u8]) -> Result<u64> {
    let value = parse_signed_wide(bytes)?;
    u64::try_from(value).map_err(|_| HeaderError::InvalidBase256(bytes.to_vec()))
}

/// Parse a numeric field that may hold a negative base-256 value.
///
/// # Errors
///
/// Returns an error if the field is malformed or out of range for `i64`.
pub fn parse_signed_numeric(bytes: &[u8]) -> Result<i64> {
    let value = parse_signed_wide(bytes)?;
    i64::try_from(value).map_err(|_| HeaderError::InvalidBase256(bytes.to_vec()))
}

fn parse_signed_wide(bytes: &[u8]) -> Result<i128> {
    match bytes.first() {
        None => Ok(0),
        Some(&lead) if lead & 0x80 == 0 => parse_octal(bytes).map(i128::from),
        // Fields are at most 12 bytes, so the accumulator cannot overflow.
        Some(&lead) if bytes.len() <= 12 && (lead == 0x80 || lead == 0xff) => {
            let mut value: i128 = if lead == 0xff { -1 } else { 0 };
            for &byte in &bytes[1..] {
                value = (value << 8) | i128::from(byte);
            }
            Ok(value)
        }
        Some(_) => Err(HeaderError::InvalidBase256(bytes.to_vec())),
    }
}

/// Whether a numeric field holds no digits at all.
fn is_blank(bytes: &[u8]) -> bool {
    bytes.iter().all(|&b| b == 0 || b == b' ')
}

fn parse_optional_time(bytes: &[u8]) -> Result<Option<i64>> {
    if is_blank(bytes) {
        return Ok(None);
    }
    parse_signed_numeric(bytes).map(Some)
}

fn parse_device(bytes: &[u8]) -> Result<u32> {
    let value = parse_numeric(bytes)?;
    u32::try_from(value).map_err(|_| HeaderError::InvalidBase256(bytes.to_vec()))
}

/// Write `value` into a numeric field.
///
/// Values up to `8^(width-1) - 1` are written as zero-padded octal followed
/// by a NUL. Larger values use base-256. Returns true when base-256 was
/// needed or the value does not fit at all (the field is then zeroed), so
/// the caller should carry the value in a pax record.
pub fn encode_numeric(field: &mut [u8], value: u64) -> bool {
    let width = field.len();
    if width == 0 {
        return true;
    }
    let digits = width - 1;
    let max_octal = if digits >= 22 {
        u64::MAX
    } else {
        (1u64 << (3 * digits)) - 1
    };
    if value <= max_octal {
        let text = format!("{value:0digits$o}");
        field[..digits].copy_from_slice(text.as_bytes());
        field[digits] = 0;
        return false;
    }
    encode_base256(field, i128::from(value));
    true
}

/// Write a possibly negative `value` into a numeric field.
///
/// Negative values are always base-256 encoded, so the return value is
/// true for them.
pub fn encode_signed_numeric(field: &mut [u8], value: i64) -> bool {
    match u64::try_from(value) {
        Ok(value) => encode_numeric(field, value),
        Err(_) => {
            encode_base256(field, i128::from(value));
            true
        }
    }
}

fn encode_base256(field: &mut [u8], value: i128) {
    let width = field.len();
    let payload_bits = (width - 1) * 8;
    let fits = if value >= 0 {
        payload_bits >= 127 || value < (1i128 << payload_bits)
    } else {
        payload_bits >= 127 || value >= -(1i128 << payload_bits)
    };
    if !fits {
        field.fill(0);
        return;
    }
    let bytes = value.to_be_bytes();
    field.copy_from_slice(&bytes[bytes.len() - width..]);
    field[0] = if value < 0 { 0xff } else { 0x80 };
}

/// Copy `value` into a fixed string field, NUL padding the rest.
///
/// Returns true if the value had to be truncated or contains non-ASCII
/// bytes.
fn encode_string(field: &mut [u8], value: &[u8]) -> bool {
    let len = value.len().min(field.len());
    field[..len].copy_from_slice(&value[..len]);
    field[len..].fill(0);
    value.len() > field.len() || !value.is_ascii()
}

/// Split a path into ustar `(name, prefix)` parts.
///
/// Paths shorter than 100 bytes go entirely into the name field. Longer
/// paths are split at a slash, choosing the longest prefix that fits in
/// `prefix_size` bytes. If the remaining name is still too long it is
/// truncated to 99 bytes; if no slash gives a fitting prefix the whole path
/// is truncated. The boolean is true whenever information was lost.
///
/// ```
/// use tar_header::split_path;
///
/// let long = format!("{}/{}", "d".repeat(120), "file.txt");
/// let (name, prefix, lossy) = split_path(long.as_bytes(), 155);
/// assert_eq!(name, b"file.txt");
/// assert_eq!(prefix.len(), 120);
/// assert!(!lossy);
/// ```
#[must_use]
pub fn split_path(path: &[u8], prefix_size: usize) -> (&[u8], &[u8], bool) {
    if path.len() < NAME_SIZE {
        return (path, &[], false);
    }

    // A trailing slash stays with the name rather than acting as a split point.
    let search = path.strip_suffix(b"/").unwrap_or(path);
    for (idx, _) in search.iter().enumerate().rev().filter(|&(_, &b)| b == b'/') {
        let prefix = &path[..idx];
        let name = &path[idx + 1..];
        if prefix.len() > prefix_size {
            continue;
        }
        if prefix.is_empty() {
            break;
        }
        if name.len() <= NAME_SIZE {
            return (name, prefix, false);
        }
        return (&name[..NAME_SIZE - 1], prefix, true);
    }

    (&path[..NAME_SIZE - 1], &[], true)
}

/// Round `size` up to a whole number of 512-byte blocks.
///
/// ```
/// assert_eq!(tar_header::padded_size(0), 0);
/// assert_eq!(tar_header::padded_size(1), 512);
/// assert_eq!(tar_header::padded_size(1024), 1024);
/// ```
#[must_use]
pub const fn padded_size(size: u64) -> u64 {
    size.div_ceil(HEADER_SIZE as u64) * HEADER_SIZE as u64
}

/// Truncate a byte slice at the first null byte.
///
/// This is used to extract null-terminated strings from fixed-size fields.
/// If no null byte is found, returns the entire slice.
///
/// ```
/// use tar_header::truncate_null;
///
/// assert_eq!(truncate_null(b"hello\0world"), b"hello");
/// assert_eq!(truncate_null(b"no null here"), b"no null here");
/// assert_eq!(truncate_null(b"\0empty"), b"");
/// ```
#[must_use]
pub fn truncate_null(bytes: &[u8]) -> &[u8] {
    match bytes.iter().position(|&b| b == 0) {
        Some(pos) => &bytes[..pos],
        None => bytes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_size() {
        assert_eq!(size_of::<RawHeader>(), HEADER_SIZE);
        assert_eq!(size_of::<OldHeader>(), HEADER_SIZE);
        assert_eq!(size_of::<UstarHeader>(), HEADER_SIZE);
        assert_eq!(size_of::<XstarHeader>(), HEADER_SIZE);
        assert_eq!(size_of::<GnuHeader>(), HEADER_SIZE);
        assert_eq!(size_of::<Header>(), HEADER_SIZE);
    }

    #[test]
    fn test_new_ustar() {
        let header = Header::new_ustar();
        assert!(header.is_ustar());
        assert!(!header.is_gnu());
    }

    #[test]
    fn test_from_bytes_insufficient() {
        let short = [0u8; 100];
        let result = Header::from_bytes(&short);
        assert!(matches!(result, Err(HeaderError::InsufficientData(100))));
    }

    #[test]
    fn test_entry_type_roundtrip() {
        for byte in [
            b'0', b'\0', b'1', b'2', b'3', b'4', b'5', b'6', b'7', b'D', b'K', b'L', b'x', b'g',
            b'S', b'V',
        ] {
            assert_eq!(EntryType::from_byte(byte).to_byte(), byte);
        }
        assert!(EntryType::from_byte(b'S').is_unsupported());
        assert!(EntryType::from_byte(b'\0').is_file());
        assert!(EntryType::from_byte(b'D').is_dir());
        assert!(EntryType::XGlobalHeader.is_meta());
        assert_eq!(EntryType::Symlink.name(), "SymbolicLink");
    }

    #[test]
    fn test_parse_octal_edge_cases() {
        assert_eq!(parse_octal(b"        ").unwrap(), 0);
        assert_eq!(parse_octal(b"\0\0\0\0\0\0").unwrap(), 0);
        assert_eq!(parse_octal(b"      7\0").unwrap(), 7);
        assert_eq!(parse_octal(b"0000755").unwrap(), 0o755);
        assert_eq!(parse_octal(b"77777777777\0").unwrap(), 0o77777777777);
        assert!(parse_octal(b"0000789\0").is_err());
    }

    #[test]
    fn test_encode_numeric_octal() {
        let mut field = [0u8; 8];
        assert!(!encode_numeric(&mut field, 0o644));
        assert_eq!(&field, b"0000644\0");

        let mut field = [0u8; 12];
        assert!(!encode_numeric(&mut field, 0o77777777777));
        assert_eq!(&field, b"77777777777\0");
    }

    #[test]
    fn test_encode_numeric_base256() {
        let mut field = [0u8; 12];
        assert!(encode_numeric(&mut field, 0o100000000000));
        assert_eq!(field[0], 0x80);
        assert_eq!(parse_numeric(&field).unwrap(), 0o100000000000);

        let mut field = [0u8; 8];
        assert!(encode_numeric(&mut field, 0o10000000));
        assert_eq!(parse_numeric(&field).unwrap(), 0o10000000);
    }

    #[test]
    fn test_size_field_octal_limit() {
        let limit: u64 = 1 << 33;
        let mut field = [0u8; 12];
        assert!(!encode_numeric(&mut field, limit - 1));
        assert_eq!(&field, b"77777777777\0");

        assert!(encode_numeric(&mut field, limit));
        assert_eq!(field, [0x80, 0, 0, 0, 0, 0, 0, 0x02, 0, 0, 0, 0]);
        assert_eq!(parse_numeric(&field).unwrap(), limit);

        let mut header = EntryHeader::new(EntryType::Regular, "big");
        header.size = limit;
        let block = header.encode().block;
        assert_eq!(block.as_bytes()[124..136], field);
        assert_eq!(EntryHeader::decode(block.as_bytes()).unwrap().size, limit);
    }

    #[test]
    fn test_encode_numeric_overflow_zeroes_field() {
        let mut field = [b'7'; 8];
        assert!(encode_numeric(&mut field, u64::MAX));
        assert_eq!(field, [0u8; 8]);
    }

    #[test]
    fn test_negative_base256() {
        let mut field = [0u8; 12];
        assert!(encode_signed_numeric(&mut field, -1));
        assert_eq!(field, [0xff; 12]);
        assert_eq!(parse_signed_numeric(&field).unwrap(), -1);

        assert!(encode_signed_numeric(&mut field, -1_000_000_000_000));
        assert_eq!(field[0], 0xff);
        assert_eq!(parse_signed_numeric(&field).unwrap(), -1_000_000_000_000);
        assert!(parse_numeric(&field).is_err());
    }

    #[test]
    fn test_parse_numeric_base256_uid_gid() {
        let mut header = Header::new_ustar();

        let uid_field = &mut header.as_mut_bytes()[108..116];
        uid_field.fill(0);
        uid_field[0] = 0x80;
        uid_field[7] = 0x42;
        assert_eq!(header.uid().unwrap(), 66);

        let gid_field = &mut header.as_mut_bytes()[116..124];
        gid_field.fill(0);
        gid_field[0] = 0x80;
        gid_field[6] = 0x01;
        assert_eq!(header.gid().unwrap(), 256);
    }

    #[test]
    fn test_invalid_base256_lead_byte() {
        let field = [0x81, 0, 0, 0, 0, 0, 0, 1];
        assert!(matches!(
            parse_numeric(&field),
            Err(HeaderError::InvalidBase256(_))
        ));
    }

    #[test]
    fn test_checksum_roundtrip() {
        let mut header = Header::new_ustar();
        header.set_name(b"hello.txt");
        header.set_mode(0o644);
        header.set_size(5);
        header.set_entry_type(EntryType::Regular);
        header.set_checksum();
        header.verify_checksum().unwrap();
        assert_eq!(header.as_bytes()[154], 0);
        assert_eq!(header.as_bytes()[155], b' ');

        header.as_mut_bytes()[0] = b'j';
        assert!(matches!(
            header.verify_checksum(),
            Err(HeaderError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_checksum_of_zeroed_field_is_spaces() {
        let header = Header::new_ustar();
        let expected: u64 = header.as_bytes().iter().map(|&b| u64::from(b)).sum::<u64>()
            + 8 * u64::from(b' ');
        assert_eq!(header.compute_checksum(), expected);
    }

    #[test]
    fn test_set_name_reports_lossy() {
        let mut header = Header::new_ustar();
        assert!(!header.set_name(b"plain"));
        assert!(header.set_name("caf\u{e9}".as_bytes()));
        assert!(header.set_name(&[b'a'; 101]));
        assert_eq!(header.path_bytes().len(), 100);
    }

    #[test]
    fn test_split_path_short() {
        let (name, prefix, lossy) = split_path(b"a/b/c.txt", PREFIX_SIZE);
        assert_eq!(name, b"a/b/c.txt");
        assert!(prefix.is_empty());
        assert!(!lossy);
    }

    #[test]
    fn test_split_path_exactly_hundred_is_split() {
        let path = format!("{}/{}", "p".repeat(49), "n".repeat(50));
        assert_eq!(path.len(), 100);
        let (name, prefix, lossy) = split_path(path.as_bytes(), PREFIX_SIZE);
        assert_eq!(name.len(), 50);
        assert_eq!(prefix.len(), 49);
        assert!(!lossy);
    }

    #[test]
    fn test_split_path_prefers_longest_prefix() {
        let path = format!("{}/{}/{}", "a".repeat(60), "b".repeat(60), "c".repeat(20));
        let (name, prefix, lossy) = split_path(path.as_bytes(), PREFIX_SIZE);
        assert_eq!(name, "c".repeat(20).as_bytes());
        assert_eq!(prefix.len(), 121);
        assert!(!lossy);

        let (name, prefix, lossy) = split_path(path.as_bytes(), 100);
        assert_eq!(name.len(), 81);
        assert_eq!(prefix, "a".repeat(60).as_bytes());
        assert!(!lossy);
    }

    #[test]
    fn test_split_path_long_basename_truncates() {
        let path = format!("dir/{}", "x".repeat(150));
        let (name, prefix, lossy) = split_path(path.as_bytes(), PREFIX_SIZE);
        assert_eq!(name.len(), 99);
        assert_eq!(prefix, b"dir");
        assert!(lossy);
    }

    #[test]
    fn test_split_path_no_fit() {
        let path = "y".repeat(300);
        let (name, prefix, lossy) = split_path(path.as_bytes(), PREFIX_SIZE);
        assert_eq!(name.len(), 99);
        assert!(prefix.is_empty());
        assert!(lossy);
    }

    #[test]
    fn test_split_path_directory_keeps_slash() {
        let path = format!("{}/{}/", "d".repeat(110), "e".repeat(10));
        let (name, prefix, lossy) = split_path(path.as_bytes(), PREFIX_SIZE);
        assert_eq!(name, format!("{}/", "e".repeat(10)).as_bytes());
        assert_eq!(prefix.len(), 110);
        assert!(!lossy);
    }

    #[test]
    fn test_full_path_joins_prefix() {
        let mut header = Header::new_ustar();
        header.set_name(b"file");
        header.set_prefix(b"some/dir", PREFIX_SIZE);
        assert_eq!(header.full_path(), b"some/dir/file");
    }

    #[test]
    fn test_xstar_times() {
        let mut header = Header::new_ustar();
        header.set_prefix(b"pre", XSTAR_PREFIX_SIZE);
        header.set_xstar_times(Some(1_700_000_000), Some(1_700_000_001));
        assert!(header.is_xstar());
        assert_eq!(header.atime().unwrap(), Some(1_700_000_000));
        assert_eq!(header.ctime().unwrap(), Some(1_700_000_001));
        assert_eq!(header.prefix().unwrap(), b"pre");
    }

    #[test]
    fn test_full_prefix_hides_times() {
        let mut header = Header::new_ustar();
        header.set_prefix(&[b'p'; PREFIX_SIZE], PREFIX_SIZE);
        assert!(!header.is_xstar());
        assert_eq!(header.atime().unwrap(), None);
        assert_eq!(header.prefix().unwrap().len(), PREFIX_SIZE);
    }

    #[test]
    fn test_gnu_times() {
        let mut header = Header::new_gnu();
        encode_numeric(&mut header.as_mut_bytes()[345..357], 42);
        assert_eq!(header.atime().unwrap(), Some(42));
        assert_eq!(header.ctime().unwrap(), None);
        assert_eq!(header.prefix(), None);
    }

    #[test]
    fn test_old_header_has_no_names() {
        let mut header = Header::new_ustar();
        header.as_mut_bytes()[257..265].fill(0);
        assert_eq!(header.username(), None);
        assert_eq!(header.device_major().unwrap(), None);
    }

    #[test]
    fn test_blank_mtime_is_none() {
        let header = Header::new_ustar();
        assert_eq!(header.mtime().unwrap(), None);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        fn field_width_strategy() -> impl Strategy<Value = usize> {
            prop_oneof![Just(8usize), Just(12usize)]
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(256))]

            #[test]
            fn test_numeric_roundtrip(width in field_width_strategy(), value in any::<u64>()) {
                let mut field = vec![0u8; width];
                encode_numeric(&mut field, value);
                let fits = width == 12 || value < (1u64 << 56);
                if fits {
                    prop_assert_eq!(parse_numeric(&field).unwrap(), value);
                } else {
                    prop_assert!(field.iter().all(|&b| b == 0));
                }
            }

            #[test]
            fn test_signed_numeric_roundtrip(value in any::<i64>()) {
                let mut field = [0u8; 12];
                let need_pax = encode_signed_numeric(&mut field, value);
                prop_assert_eq!(need_pax, !(0..=0o77777777777).contains(&value));
                prop_assert_eq!(parse_signed_numeric(&field).unwrap(), value);
            }

            #[test]
            fn test_checksum_matches_after_set(bytes in proptest::collection::vec(any::<u8>(), 512)) {
                let block: [u8; 512] = bytes.try_into().unwrap();
                let mut header = *Header::from_bytes_exact(&block);
                header.set_checksum();
                prop_assert!(header.verify_checksum().is_ok());
            }

            #[test]
            fn test_split_path_reassembles(
                parts in proptest::collection::vec("[a-z]{1,40}", 1..8),
            ) {
                let path = parts.join("/");
                let (name, prefix, lossy) = split_path(path.as_bytes(), PREFIX_SIZE);
                prop_assert!(name.len() <= NAME_SIZE);
                prop_assert!(prefix.len() <= PREFIX_SIZE);
                if !lossy {
                    let mut joined = prefix.to_vec();
                    if !joined.is_empty() {
                        joined.push(b'/');
                    }
                    joined.extend_from_slice(name);
                    prop_assert_eq!(joined, path.as_bytes().to_vec());
                }
            }
        }
    }
}
