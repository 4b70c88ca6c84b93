//! PAX extended header codec.
//!
//! An extended header's payload is a run of records, each shaped
//! `"<length> <key>=<value>\n"` where `<length>` is the total byte count
//! of the record *including the length field itself*.  Emission therefore
//! needs a small fixed-point loop: widening the length field can change
//! the length it describes.
//!
//! The key strings below are part of the wire contract; they must match
//! other tar implementations byte for byte.

use std::collections::BTreeMap;

use crate::error::{Result, TarError};
use crate::field::parse_pax_time;
use crate::header::Header;

// ── Override keys ────────────────────────────────────────────────────────────

pub const PAX_PATH: &str = "path";
pub const PAX_LINKPATH: &str = "linkpath";
pub const PAX_SIZE: &str = "size";
pub const PAX_UID: &str = "uid";
pub const PAX_GID: &str = "gid";
pub const PAX_UNAME: &str = "uname";
pub const PAX_GNAME: &str = "gname";
pub const PAX_MTIME: &str = "mtime";
pub const PAX_ATIME: &str = "atime";
pub const PAX_CTIME: &str = "ctime";
pub const PAX_XATTR_PREFIX: &str = "SCHILY.xattr.";

// ── Record encoding ──────────────────────────────────────────────────────────

/// Serialize one `key=value` pair as a length-prefixed record.
pub fn format_record(key: &str, value: &str) -> String {
    // ' ', '=', '\n'
    let payload = key.len() + value.len() + 3;
    let mut total = payload + decimal_width(payload);
    // The length field's own digits count toward the length; recompute
    // until the digit count stabilizes (at most one extra pass).
    while decimal_width(total) + payload != total {
        total = decimal_width(total) + payload;
    }
    format!("{} {}={}\n", total, key, value)
}

fn decimal_width(n: usize) -> usize {
    n.to_string().len()
}

/// Serialize a full override map, sorted by key, into one extended-header
/// payload.
pub fn format_records(overrides: &BTreeMap<String, String>) -> String {
    let mut out = String::new();
    for (k, v) in overrides {
        out.push_str(&format_record(k, v));
    }
    out
}

// ── Record decoding ──────────────────────────────────────────────────────────

/// Parse one record off the front of `buf`, returning the key, value and
/// the unconsumed remainder.
pub fn parse_record(buf: &[u8]) -> Result<(String, String, &[u8])> {
    let digits = buf.iter().take_while(|b| b.is_ascii_digit()).count();
    if digits == 0 || buf.get(digits) != Some(&b' ') {
        return Err(TarError::MalformedExtendedHeader(
            "record does not start with a decimal length",
        ));
    }
    let len: usize = std::str::from_utf8(&buf[..digits])
        .map_err(|_| TarError::MalformedExtendedHeader("length field is not ASCII"))?
        .parse()
        .map_err(|_| TarError::MalformedExtendedHeader("length field out of range"))?;
    if len <= digits + 1 || len > buf.len() {
        return Err(TarError::MalformedExtendedHeader(
            "length field inconsistent with record boundaries",
        ));
    }
    let record = &buf[digits + 1..len];
    if record.last() != Some(&b'\n') {
        return Err(TarError::MalformedExtendedHeader(
            "record does not end with a newline",
        ));
    }
    let body = &record[..record.len() - 1];
    let eq = body
        .iter()
        .position(|&b| b == b'=')
        .ok_or(TarError::MalformedExtendedHeader("record has no '='"))?;
    let key = String::from_utf8_lossy(&body[..eq]).into_owned();
    let value = String::from_utf8_lossy(&body[eq + 1..]).into_owned();
    if key.is_empty() {
        return Err(TarError::MalformedExtendedHeader("record has an empty key"));
    }
    Ok((key, value, &buf[len..]))
}

/// Parse a whole extended-header payload.  Later records win on
/// duplicate keys.
pub fn parse_records(mut buf: &[u8]) -> Result<BTreeMap<String, String>> {
    let mut out = BTreeMap::new();
    while !buf.is_empty() {
        let (key, value, rest) = parse_record(buf)?;
        out.insert(key, value);
        buf = rest;
    }
    Ok(out)
}

// ── Override merging ─────────────────────────────────────────────────────────

/// Apply parsed overrides onto a decoded physical header.  An override
/// always wins over the fixed-width field's value.  Unknown keys are
/// preserved semantics-free for interoperability: they are ignored.
pub(crate) fn merge_overrides(h: &mut Header, overrides: &BTreeMap<String, String>) -> Result<()> {
    for (key, value) in overrides {
        match key.as_str() {
            PAX_PATH => h.name = value.clone(),
            PAX_LINKPATH => h.linkname = value.clone(),
            PAX_UNAME => h.uname = value.clone(),
            PAX_GNAME => h.gname = value.clone(),
            PAX_UID => h.uid = parse_decimal(value)?,
            PAX_GID => h.gid = parse_decimal(value)?,
            PAX_SIZE => {
                h.size = parse_decimal(value)?;
                if h.size < 0 {
                    return Err(TarError::MalformedExtendedHeader("negative size override"));
                }
            }
            PAX_MTIME => h.mod_time = parse_pax_time(value)?,
            PAX_ATIME => h.access_time = Some(parse_pax_time(value)?),
            PAX_CTIME => h.change_time = Some(parse_pax_time(value)?),
            _ => {
                if let Some(name) = key.strip_prefix(PAX_XATTR_PREFIX) {
                    h.xattrs.insert(name.to_owned(), value.clone());
                }
            }
        }
    }
    Ok(())
}

fn parse_decimal(s: &str) -> Result<i64> {
    s.parse()
        .map_err(|_| TarError::MalformedExtendedHeader("invalid decimal override"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_length_is_self_inclusive() {
        let rec = format_record("path", "some/file");
        assert_eq!(rec, "18 path=some/file\n");
        assert_eq!(rec.len(), 18);
    }

    #[test]
    fn record_length_crosses_digit_boundary() {
        // Payload of 98 bytes: a 2-digit length field gives 100 total,
        // but writing "100" widens the record to 101.  The fixed-point
        // loop must settle on 101.
        let value = "v".repeat(94);
        let rec = format_record("k", &value);
        assert_eq!(rec.len(), 101);
        assert!(rec.starts_with("101 k="));
        let (k, v, _) = parse_record(rec.as_bytes()).unwrap();
        assert_eq!(k, "k");
        assert_eq!(v, value);
    }

    #[test]
    fn parse_rejects_inconsistent_length() {
        assert!(parse_record(b"99 path=x\n").is_err());
        assert!(parse_record(b"3 path=x\n").is_err());
    }

    #[test]
    fn parse_rejects_structural_damage() {
        assert!(parse_record(b"q7 path=x\n").is_err());
        assert!(parse_record(b"10 pathx=\0x").is_err());
        assert!(parse_record(b"9 pathxx\n\n").is_err());
        assert!(parse_record(b"9 =value\n").is_err());
    }

    #[test]
    fn parse_roundtrip_with_binary_value() {
        let mut m = BTreeMap::new();
        m.insert("SCHILY.xattr.user.k".to_owned(), "\u{0}hello".to_owned());
        m.insert("mtime".to_owned(), "-0.9999995".to_owned());
        let payload = format_records(&m);
        assert_eq!(parse_records(payload.as_bytes()).unwrap(), m);
    }

    proptest::proptest! {
        #[test]
        fn record_roundtrip(
            key in "[a-zA-Z._][a-zA-Z0-9._]{0,40}",
            value in "[^=\\x00]{0,200}",
        ) {
            let rec = format_record(&key, &value);
            let (k, v, rest) = parse_record(rec.as_bytes()).unwrap();
            proptest::prop_assert_eq!(k, key);
            proptest::prop_assert_eq!(v, value);
            proptest::prop_assert!(rest.is_empty());
        }
    }
}
