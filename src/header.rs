//! Header record, format classification, and the 512-byte header block
//! codec.
//!
//! # Formats
//! Three wire variants share the same 512-byte block frame:
//!   - **USTAR** — POSIX fixed-width fields, octal numerics only.
//!   - **PAX**   — USTAR layout plus an auxiliary key/value block that
//!     overrides any field with an unbounded string value.
//!   - **GNU**   — its own magic, base-256 numeric fallback, fixed
//!     atime/ctime fields, and long-name pseudo entries.
//!
//! # Classification
//! [`Header::classify`] walks every field against compile-time width
//! tables and returns the set of formats that can encode the record
//! exactly, together with the PAX overrides required when the fixed
//! fields alone cannot.  The admissible set only ever shrinks; an empty
//! set means the record is unrepresentable.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::error::{Result, TarError};
use crate::field::{
    decode_numeric, decode_octal, decode_string, encode_numeric, encode_octal, encode_string,
    encode_string_lossy, fits_in_base256, fits_in_octal, format_pax_time, timestamp_from_parts,
};
use crate::pax;

/// Every header and data region is aligned to this block size.
pub const BLOCK_SIZE: usize = 512;

pub(crate) type Block = [u8; BLOCK_SIZE];

// ── Block layout ─────────────────────────────────────────────────────────────
//
// (offset, length) spans into the 512-byte frame.  The layout up to the
// magic is shared by every variant; USTAR and GNU disagree on the magic
// bytes and on what lives at offset 345 (prefix vs atime/ctime).

type Span = (usize, usize);

const NAME: Span = (0, 100);
const MODE: Span = (100, 8);
const UID: Span = (108, 8);
const GID: Span = (116, 8);
const SIZE: Span = (124, 12);
const MTIME: Span = (136, 12);
const CHKSUM: Span = (148, 8);
const TYPEFLAG: usize = 156;
const LINKNAME: Span = (157, 100);
const MAGIC: Span = (257, 6);
const VERSION: Span = (263, 2);
const UNAME: Span = (265, 32);
const GNAME: Span = (297, 32);
const DEVMAJOR: Span = (329, 8);
const DEVMINOR: Span = (337, 8);
const PREFIX: Span = (345, 155);
const GNU_MAGIC: Span = (257, 8);
const GNU_ATIME: Span = (345, 12);
const GNU_CTIME: Span = (357, 12);

/// Width of the fixed name/linkname fields; longer values need a PAX
/// override or a GNU long-name entry.
pub(crate) const NAME_WIDTH: usize = NAME.1;

const MAGIC_USTAR: &[u8; 6] = b"ustar\0";
const VERSION_USTAR: &[u8; 2] = b"00";
const MAGIC_GNU: &[u8; 8] = b"ustar  \0";

fn fld(b: &Block, s: Span) -> &[u8] {
    &b[s.0..s.0 + s.1]
}

fn fld_mut(b: &mut Block, s: Span) -> &mut [u8] {
    &mut b[s.0..s.0 + s.1]
}

// ── Entry types ──────────────────────────────────────────────────────────────

/// The kind of filesystem object an entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EntryType {
    #[default]
    Regular,
    HardLink,
    Symlink,
    Char,
    Block,
    Directory,
    Fifo,
}

impl EntryType {
    pub fn as_byte(self) -> u8 {
        match self {
            EntryType::Regular => b'0',
            EntryType::HardLink => b'1',
            EntryType::Symlink => b'2',
            EntryType::Char => b'3',
            EntryType::Block => b'4',
            EntryType::Directory => b'5',
            EntryType::Fifo => b'6',
        }
    }

    /// Unknown typeflags decode as regular files, per POSIX.
    pub fn from_byte(b: u8) -> Self {
        match b {
            b'1' => EntryType::HardLink,
            b'2' => EntryType::Symlink,
            b'3' => EntryType::Char,
            b'4' => EntryType::Block,
            b'5' => EntryType::Directory,
            b'6' => EntryType::Fifo,
            _ => EntryType::Regular,
        }
    }

    /// True for entry kinds that never carry a data region.
    pub fn is_header_only(self) -> bool {
        self != EntryType::Regular
    }
}

// Wire-only typeflags, consumed and produced by the reader/writer but
// never surfaced as an [`EntryType`].
pub(crate) const TYPE_XHEADER: u8 = b'x';
pub(crate) const TYPE_XGLOBAL: u8 = b'g';
pub(crate) const TYPE_GNU_LONGNAME: u8 = b'L';
pub(crate) const TYPE_GNU_LONGLINK: u8 = b'K';

// ── Formats ──────────────────────────────────────────────────────────────────

/// One of the three header wire variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Ustar,
    Pax,
    Gnu,
}

impl Format {
    fn bit(self) -> u8 {
        match self {
            Format::Ustar => 0b001,
            Format::Pax => 0b010,
            Format::Gnu => 0b100,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Format::Ustar => "ustar",
            Format::Pax => "pax",
            Format::Gnu => "gnu",
        }
    }
}

/// Set of admissible formats, produced by [`Header::classify`].
/// Plain bitmap, no heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatSet(u8);

impl FormatSet {
    pub const EMPTY: FormatSet = FormatSet(0);
    pub const ALL: FormatSet = FormatSet(0b111);

    pub fn only(f: Format) -> FormatSet {
        FormatSet(f.bit())
    }

    pub fn of(formats: &[Format]) -> FormatSet {
        FormatSet(formats.iter().fold(0, |acc, f| acc | f.bit()))
    }

    pub fn has(self, f: Format) -> bool {
        self.0 & f.bit() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub(crate) fn remove(&mut self, f: Format) {
        self.0 &= !f.bit();
    }

    pub(crate) fn retain(&mut self, f: Format) {
        self.0 &= f.bit();
    }
}

// ── Header record ────────────────────────────────────────────────────────────

/// One archive entry's metadata.
///
/// The zero value (via `Default`) classifies as encodable by all three
/// formats.  `access_time`/`change_time` are `Option` so that "field not
/// present" is distinct from the epoch.
#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    pub name: String,
    pub linkname: String,
    /// Permission bits plus setuid/setgid/sticky.
    pub mode: i64,
    pub uid: i64,
    pub gid: i64,
    pub uname: String,
    pub gname: String,
    /// Byte length of the entry's data region.  Must be non-negative.
    pub size: i64,
    pub mod_time: DateTime<Utc>,
    pub access_time: Option<DateTime<Utc>>,
    pub change_time: Option<DateTime<Utc>>,
    pub entry_type: EntryType,
    /// Device numbers, meaningful only for Char/Block entries.
    pub devmajor: i64,
    pub devminor: i64,
    /// Extended attributes, carried via `SCHILY.xattr.*` PAX records.
    pub xattrs: BTreeMap<String, String>,
    /// Variant this record targets; `None` means detect automatically.
    pub format: Option<Format>,
}

impl Default for Header {
    fn default() -> Self {
        Header {
            name: String::new(),
            linkname: String::new(),
            mode: 0,
            uid: 0,
            gid: 0,
            uname: String::new(),
            gname: String::new(),
            size: 0,
            mod_time: DateTime::UNIX_EPOCH,
            access_time: None,
            change_time: None,
            entry_type: EntryType::Regular,
            devmajor: 0,
            devminor: 0,
            xattrs: BTreeMap::new(),
            format: None,
        }
    }
}

// ── Classifier ───────────────────────────────────────────────────────────────

struct Verdict {
    formats: FormatSet,
    overrides: BTreeMap<String, String>,
}

impl Verdict {
    fn check_string(&mut self, s: &str, width: usize, pax_key: Option<&'static str>) {
        if s.as_bytes().contains(&0) {
            // NUL is the field terminator in every fixed-width layout and
            // is forbidden in the corresponding PAX record values.
            self.formats = FormatSet::EMPTY;
            return;
        }
        if s.len() > width {
            self.formats.remove(Format::Ustar);
            match pax_key {
                Some(k) => {
                    self.overrides.insert(k.to_owned(), s.to_owned());
                }
                None => self.formats.remove(Format::Pax),
            }
        }
    }

    fn check_numeric(&mut self, v: i64, width: usize, pax_key: Option<&'static str>) {
        if !fits_in_base256(width, v) {
            self.formats.remove(Format::Gnu);
        }
        if !fits_in_octal(width, v) {
            self.formats.remove(Format::Ustar);
            match pax_key {
                Some(k) => {
                    self.overrides.insert(k.to_owned(), v.to_string());
                }
                None => self.formats.remove(Format::Pax),
            }
        }
    }

    fn check_time(&mut self, ts: DateTime<Utc>, pax_key: &'static str, is_mtime: bool) {
        let secs = ts.timestamp();
        let sub_second = ts.timestamp_subsec_nanos() != 0;
        if !fits_in_base256(MTIME.1, secs) || sub_second {
            // No GNU fixed field carries sub-second precision.
            self.formats.remove(Format::Gnu);
        }
        if is_mtime && fits_in_octal(MTIME.1, secs) && !sub_second {
            return;
        }
        // atime/ctime have no USTAR field at all; an out-of-octal or
        // fractional mtime cannot use one either.
        self.formats.remove(Format::Ustar);
        self.overrides.insert(pax_key.to_owned(), format_pax_time(ts));
    }
}

impl Header {
    /// Compute the set of formats that can encode this record exactly,
    /// plus the PAX overrides needed where the fixed-width fields fall
    /// short.  An empty set means no format is admissible; the override
    /// map is meaningful only while PAX remains in the set.
    pub fn classify(&self) -> (FormatSet, BTreeMap<String, String>) {
        let unknown = (FormatSet::EMPTY, BTreeMap::new());
        let mut v = Verdict {
            formats: FormatSet::ALL,
            overrides: BTreeMap::new(),
        };

        v.check_string(&self.name, NAME.1, Some(pax::PAX_PATH));
        v.check_string(&self.linkname, LINKNAME.1, Some(pax::PAX_LINKPATH));
        v.check_string(&self.uname, UNAME.1, Some(pax::PAX_UNAME));
        v.check_string(&self.gname, GNAME.1, Some(pax::PAX_GNAME));
        if v.formats.is_empty() {
            return unknown;
        }

        v.check_numeric(self.mode, MODE.1, None);
        v.check_numeric(self.uid, UID.1, Some(pax::PAX_UID));
        v.check_numeric(self.gid, GID.1, Some(pax::PAX_GID));
        v.check_numeric(self.devmajor, DEVMAJOR.1, None);
        v.check_numeric(self.devminor, DEVMINOR.1, None);
        if v.formats.is_empty() {
            return unknown;
        }

        // A negative size is not semantically valid for any variant.
        if self.size < 0 {
            return unknown;
        }
        v.check_numeric(self.size, SIZE.1, Some(pax::PAX_SIZE));
        if v.formats.is_empty() {
            return unknown;
        }

        v.check_time(self.mod_time, pax::PAX_MTIME, true);
        if let Some(atime) = self.access_time {
            v.check_time(atime, pax::PAX_ATIME, false);
        }
        if let Some(ctime) = self.change_time {
            v.check_time(ctime, pax::PAX_CTIME, false);
        }
        if v.formats.is_empty() {
            return unknown;
        }

        for (k, val) in &self.xattrs {
            // Key/value structural violations are caller errors, not a
            // format limitation.
            if k.is_empty() || k.contains('=') || val.is_empty() {
                return unknown;
            }
        }
        if !self.xattrs.is_empty() {
            v.formats.retain(Format::Pax);
            if v.formats.is_empty() {
                return unknown;
            }
            for (k, val) in &self.xattrs {
                v.overrides
                    .insert(format!("{}{}", pax::PAX_XATTR_PREFIX, k), val.clone());
            }
        }

        (v.formats, v.overrides)
    }
}

// ── Block encoding ───────────────────────────────────────────────────────────

fn octal_or_zero(dst: &mut [u8], v: i64) {
    let v = if fits_in_octal(dst.len(), v) { v } else { 0 };
    // Zero always fits, so this cannot fail.
    let _ = encode_octal(dst, v);
}

/// Encode the physical header block for an already-classified record.
///
/// For PAX, fields the override map carries exactly are written as
/// truncated or zeroed fallbacks, mirroring what other implementations
/// emit for readers that ignore the extended header.
pub(crate) fn encode_header_block(h: &Header, format: Format) -> Result<Block> {
    let mut b: Block = [0u8; BLOCK_SIZE];

    match format {
        Format::Ustar => {
            encode_string(fld_mut(&mut b, NAME), &h.name)?;
            encode_string(fld_mut(&mut b, LINKNAME), &h.linkname)?;
            encode_string(fld_mut(&mut b, UNAME), &h.uname)?;
            encode_string(fld_mut(&mut b, GNAME), &h.gname)?;
            encode_octal(fld_mut(&mut b, MODE), h.mode)?;
            encode_octal(fld_mut(&mut b, UID), h.uid)?;
            encode_octal(fld_mut(&mut b, GID), h.gid)?;
            encode_octal(fld_mut(&mut b, SIZE), h.size)?;
            encode_octal(fld_mut(&mut b, MTIME), h.mod_time.timestamp())?;
            encode_octal(fld_mut(&mut b, DEVMAJOR), h.devmajor)?;
            encode_octal(fld_mut(&mut b, DEVMINOR), h.devminor)?;
            fld_mut(&mut b, MAGIC).copy_from_slice(MAGIC_USTAR);
            fld_mut(&mut b, VERSION).copy_from_slice(VERSION_USTAR);
        }
        Format::Pax => {
            encode_string_lossy(fld_mut(&mut b, NAME), &h.name);
            encode_string_lossy(fld_mut(&mut b, LINKNAME), &h.linkname);
            encode_string_lossy(fld_mut(&mut b, UNAME), &h.uname);
            encode_string_lossy(fld_mut(&mut b, GNAME), &h.gname);
            octal_or_zero(fld_mut(&mut b, MODE), h.mode);
            octal_or_zero(fld_mut(&mut b, UID), h.uid);
            octal_or_zero(fld_mut(&mut b, GID), h.gid);
            octal_or_zero(fld_mut(&mut b, SIZE), h.size);
            octal_or_zero(fld_mut(&mut b, MTIME), h.mod_time.timestamp());
            octal_or_zero(fld_mut(&mut b, DEVMAJOR), h.devmajor);
            octal_or_zero(fld_mut(&mut b, DEVMINOR), h.devminor);
            fld_mut(&mut b, MAGIC).copy_from_slice(MAGIC_USTAR);
            fld_mut(&mut b, VERSION).copy_from_slice(VERSION_USTAR);
        }
        Format::Gnu => {
            // Overlong names travel in L/K pseudo entries; the fixed
            // field holds a truncated courtesy copy.
            encode_string_lossy(fld_mut(&mut b, NAME), &h.name);
            encode_string_lossy(fld_mut(&mut b, LINKNAME), &h.linkname);
            encode_string_lossy(fld_mut(&mut b, UNAME), &h.uname);
            encode_string_lossy(fld_mut(&mut b, GNAME), &h.gname);
            encode_numeric(fld_mut(&mut b, MODE), h.mode)?;
            encode_numeric(fld_mut(&mut b, UID), h.uid)?;
            encode_numeric(fld_mut(&mut b, GID), h.gid)?;
            encode_numeric(fld_mut(&mut b, SIZE), h.size)?;
            encode_numeric(fld_mut(&mut b, MTIME), h.mod_time.timestamp())?;
            encode_numeric(fld_mut(&mut b, DEVMAJOR), h.devmajor)?;
            encode_numeric(fld_mut(&mut b, DEVMINOR), h.devminor)?;
            if let Some(atime) = h.access_time {
                encode_numeric(fld_mut(&mut b, GNU_ATIME), atime.timestamp())?;
            }
            if let Some(ctime) = h.change_time {
                encode_numeric(fld_mut(&mut b, GNU_CTIME), ctime.timestamp())?;
            }
            fld_mut(&mut b, GNU_MAGIC).copy_from_slice(MAGIC_GNU);
        }
    }

    b[TYPEFLAG] = h.entry_type.as_byte();
    write_checksum(&mut b);
    Ok(b)
}

/// Encode the header block for a pseudo entry (extended header, GNU long
/// name) whose payload follows as entry data.
pub(crate) fn encode_pseudo_block(
    name: &str,
    payload_len: usize,
    typeflag: u8,
    format: Format,
) -> Result<Block> {
    let mut b: Block = [0u8; BLOCK_SIZE];
    encode_string_lossy(fld_mut(&mut b, NAME), name);
    encode_octal(fld_mut(&mut b, MODE), 0)?;
    encode_octal(fld_mut(&mut b, UID), 0)?;
    encode_octal(fld_mut(&mut b, GID), 0)?;
    encode_octal(fld_mut(&mut b, SIZE), payload_len as i64)?;
    encode_octal(fld_mut(&mut b, MTIME), 0)?;
    match format {
        Format::Gnu => fld_mut(&mut b, GNU_MAGIC).copy_from_slice(MAGIC_GNU),
        _ => {
            fld_mut(&mut b, MAGIC).copy_from_slice(MAGIC_USTAR);
            fld_mut(&mut b, VERSION).copy_from_slice(VERSION_USTAR);
        }
    }
    b[TYPEFLAG] = typeflag;
    write_checksum(&mut b);
    Ok(b)
}

// ── Block decoding ───────────────────────────────────────────────────────────

/// Decode one physical header block, verifying the checksum first.
/// Returns the record plus the raw typeflag byte so the reader can
/// recognize pseudo entries.
pub(crate) fn decode_header_block(b: &Block) -> Result<(Header, u8)> {
    verify_checksum(b)?;

    let is_ustar = fld(b, MAGIC) == MAGIC_USTAR;
    let is_gnu = fld(b, GNU_MAGIC) == MAGIC_GNU;

    let mut h = Header {
        name: decode_string(fld(b, NAME)),
        linkname: decode_string(fld(b, LINKNAME)),
        mode: decode_numeric(fld(b, MODE))?,
        uid: decode_numeric(fld(b, UID))?,
        gid: decode_numeric(fld(b, GID))?,
        size: decode_numeric(fld(b, SIZE))?,
        mod_time: timestamp_from_parts(decode_numeric(fld(b, MTIME))?, 0)?,
        entry_type: EntryType::from_byte(b[TYPEFLAG]),
        format: match (is_ustar, is_gnu) {
            (true, _) => Some(Format::Ustar),
            (_, true) => Some(Format::Gnu),
            _ => None,
        },
        ..Header::default()
    };
    if h.size < 0 {
        return Err(TarError::MalformedField("negative entry size"));
    }

    if is_ustar || is_gnu {
        h.uname = decode_string(fld(b, UNAME));
        h.gname = decode_string(fld(b, GNAME));
        h.devmajor = decode_numeric(fld(b, DEVMAJOR))?;
        h.devminor = decode_numeric(fld(b, DEVMINOR))?;
    }

    if is_ustar {
        let prefix = decode_string(fld(b, PREFIX));
        if !prefix.is_empty() {
            h.name = format!("{}/{}", prefix, h.name);
        }
    }

    if is_gnu {
        // Blank atime/ctime fields mean "not recorded".
        if fld(b, GNU_ATIME)[0] != 0 {
            h.access_time = Some(timestamp_from_parts(
                decode_numeric(fld(b, GNU_ATIME))?,
                0,
            )?);
        }
        if fld(b, GNU_CTIME)[0] != 0 {
            h.change_time = Some(timestamp_from_parts(
                decode_numeric(fld(b, GNU_CTIME))?,
                0,
            )?);
        }
    }

    Ok((h, b[TYPEFLAG]))
}

// ── Checksum ─────────────────────────────────────────────────────────────────

fn sums(b: &Block) -> (i64, i64) {
    let mut unsigned = 0i64;
    let mut signed = 0i64;
    for (i, &byte) in b.iter().enumerate() {
        let byte = if (CHKSUM.0..CHKSUM.0 + CHKSUM.1).contains(&i) {
            b' '
        } else {
            byte
        };
        unsigned += i64::from(byte);
        signed += i64::from(byte as i8);
    }
    (unsigned, signed)
}

fn write_checksum(b: &mut Block) {
    let (unsigned, _) = sums(b);
    let digits = format!("{:06o}\0", unsigned);
    b[CHKSUM.0..CHKSUM.0 + 7].copy_from_slice(digits.as_bytes());
    b[CHKSUM.0 + 7] = b' ';
}

/// Verify the stored checksum against both the unsigned and signed byte
/// sums; pre-POSIX implementations wrote the latter.
pub(crate) fn verify_checksum(b: &Block) -> Result<()> {
    let (unsigned, signed) = sums(b);
    let stored = decode_octal(fld(b, CHKSUM)).map_err(|_| TarError::ChecksumMismatch {
        stored: -1,
        computed: unsigned,
    })?;
    if stored != unsigned && stored != signed {
        return Err(TarError::ChecksumMismatch {
            stored,
            computed: unsigned,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_header_roundtrips_through_block() {
        let h = Header::default();
        let blk = encode_header_block(&h, Format::Ustar).unwrap();
        let (back, flag) = decode_header_block(&blk).unwrap();
        assert_eq!(flag, b'0');
        assert_eq!(back.format, Some(Format::Ustar));
        assert_eq!(back.name, "");
        assert_eq!(back.size, 0);
        assert_eq!(back.mod_time, DateTime::UNIX_EPOCH);
    }

    #[test]
    fn checksum_detects_any_flip() {
        let h = Header {
            name: "a/b/c.txt".into(),
            size: 3,
            mode: 0o644,
            ..Header::default()
        };
        let blk = encode_header_block(&h, Format::Ustar).unwrap();
        verify_checksum(&blk).unwrap();
        for i in 0..BLOCK_SIZE {
            let mut bad = blk;
            bad[i] ^= 0x40;
            assert!(
                decode_header_block(&bad).is_err(),
                "flip at byte {} went undetected",
                i
            );
        }
    }

    #[test]
    fn ustar_prefix_rejoined_on_decode() {
        let mut blk = encode_header_block(&Header::default(), Format::Ustar).unwrap();
        encode_string(fld_mut(&mut blk, NAME), "file").unwrap();
        encode_string(fld_mut(&mut blk, PREFIX), "some/deep/dir").unwrap();
        write_checksum(&mut blk);
        let (h, _) = decode_header_block(&blk).unwrap();
        assert_eq!(h.name, "some/deep/dir/file");
    }

    #[test]
    fn gnu_block_carries_access_and_change_time() {
        let h = Header {
            access_time: Some(timestamp_from_parts(123, 0).unwrap()),
            change_time: Some(timestamp_from_parts(-456, 0).unwrap()),
            ..Header::default()
        };
        let blk = encode_header_block(&h, Format::Gnu).unwrap();
        let (back, _) = decode_header_block(&blk).unwrap();
        assert_eq!(back.format, Some(Format::Gnu));
        assert_eq!(back.access_time, Some(timestamp_from_parts(123, 0).unwrap()));
        assert_eq!(back.change_time, Some(timestamp_from_parts(-456, 0).unwrap()));
    }

    #[test]
    fn signed_checksum_accepted() {
        // Base-256 bytes make the signed and unsigned sums diverge.
        let h = Header {
            devmajor: -123,
            ..Header::default()
        };
        let mut blk = encode_header_block(&h, Format::Gnu).unwrap();
        let (unsigned, signed) = sums(&blk);
        assert_ne!(unsigned, signed);
        // Re-store the signed sum; a conforming reader still accepts it.
        let digits = format!("{:06o}\0", signed);
        blk[CHKSUM.0..CHKSUM.0 + 7].copy_from_slice(digits.as_bytes());
        blk[CHKSUM.0 + 7] = b' ';
        verify_checksum(&blk).unwrap();
    }
}
