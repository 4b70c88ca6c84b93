//! Fixed-width field codecs — the byte-level primitives every header
//! block is built from.
//!
//! # Numeric encodings
//! Tar numeric fields are ASCII octal: zero-padded digits followed by a
//! NUL terminator.  An N-byte field therefore holds at most `8^(N-1) - 1`.
//! The GNU format escapes that ceiling with base-256: the first byte's
//! high bit marks the variant, the remaining bits carry a big-endian
//! two's-complement magnitude.  [`decode_numeric`] sniffs the variant from
//! the leading byte.
//!
//! # Strings
//! String fields are NUL-padded raw bytes.  Decoding stops at the first
//! NUL; encoding fails on overflow unless the caller explicitly asks for
//! the lossy truncating variant used for PAX fallback fields.
//!
//! # PAX timestamps
//! PAX carries timestamps as decimal seconds with an optional fractional
//! part (`-0.9999995` is half a microsecond before one second before the
//! epoch).  Trailing zeros are trimmed on output; input fractions are
//! truncated to nanosecond precision.

use chrono::{DateTime, Utc};

use crate::error::{Result, TarError};

/// True when `v` is representable as zero-padded octal in a `width`-byte
/// field (one byte reserved for the terminator).
pub fn fits_in_octal(width: usize, v: i64) -> bool {
    v >= 0 && (width >= 22 || v < (1i64 << (3 * (width as u32 - 1))))
}

/// True when `v` is representable as base-256 in a `width`-byte field.
/// The first byte spends one bit on the variant marker, so an 8-byte
/// field covers `[-2^56, 2^56 - 1]`.
pub fn fits_in_base256(width: usize, v: i64) -> bool {
    if width >= 9 {
        return true;
    }
    let bits = 8 * (width as u32 - 1);
    v >= -(1i64 << bits) && v < (1i64 << bits)
}

/// Encode `v` as zero-padded octal with a trailing NUL.
pub fn encode_octal(dst: &mut [u8], v: i64) -> Result<()> {
    if !fits_in_octal(dst.len(), v) {
        return Err(TarError::FieldOverflow {
            value: v,
            width: dst.len(),
        });
    }
    let digits = format!("{:0width$o}", v, width = dst.len() - 1);
    dst[..digits.len()].copy_from_slice(digits.as_bytes());
    dst[digits.len()] = 0;
    Ok(())
}

/// Encode `v` as big-endian base-256 with the variant marker set.
pub fn encode_base256(dst: &mut [u8], v: i64) -> Result<()> {
    if !fits_in_base256(dst.len(), v) {
        return Err(TarError::FieldOverflow {
            value: v,
            width: dst.len(),
        });
    }
    let mut x = v;
    for b in dst.iter_mut().rev() {
        *b = x as u8;
        x >>= 8;
    }
    dst[0] |= 0x80;
    Ok(())
}

/// Encode `v` as octal when it fits, falling back to base-256.
/// This is the GNU-format numeric field writer.
pub fn encode_numeric(dst: &mut [u8], v: i64) -> Result<()> {
    if fits_in_octal(dst.len(), v) {
        encode_octal(dst, v)
    } else {
        encode_base256(dst, v)
    }
}

/// Decode a numeric field, sniffing base-256 vs octal from the leading
/// byte's high bit.
pub fn decode_numeric(src: &[u8]) -> Result<i64> {
    if !src.is_empty() && src[0] & 0x80 != 0 {
        // Negative values arrive inverted: -a-1 == !a, so XOR with the
        // sign-derived mask turns the payload into an unsigned magnitude.
        let inv: u8 = if src[0] & 0x40 != 0 { 0xff } else { 0x00 };
        let mut x: u64 = 0;
        for (i, &b) in src.iter().enumerate() {
            let mut c = b ^ inv;
            if i == 0 {
                c &= 0x7f; // variant marker bit
            }
            if x >> 56 > 0 {
                return Err(TarError::MalformedField("base-256 value overflows i64"));
            }
            x = x << 8 | u64::from(c);
        }
        if x >> 63 > 0 {
            return Err(TarError::MalformedField("base-256 value overflows i64"));
        }
        if inv == 0xff {
            return Ok(!(x as i64));
        }
        return Ok(x as i64);
    }
    decode_octal(src)
}

/// Decode an octal field.  Unused fields are NUL or space padded on
/// either side; a fully blank field decodes as zero.
pub fn decode_octal(src: &[u8]) -> Result<i64> {
    let trimmed = trim_padding(src);
    if trimmed.is_empty() {
        return Ok(0);
    }
    let s = std::str::from_utf8(trimmed)
        .map_err(|_| TarError::MalformedField("non-ASCII byte in octal field"))?;
    let v = u64::from_str_radix(s, 8)
        .map_err(|_| TarError::MalformedField("invalid octal digit"))?;
    if v > i64::MAX as u64 {
        return Err(TarError::MalformedField("octal value overflows i64"));
    }
    Ok(v as i64)
}

fn trim_padding(src: &[u8]) -> &[u8] {
    let start = src
        .iter()
        .position(|&b| b != b' ' && b != 0)
        .unwrap_or(src.len());
    let end = src
        .iter()
        .rposition(|&b| b != b' ' && b != 0)
        .map_or(start, |i| i + 1);
    &src[start..end]
}

/// Copy `s` into a NUL-padded field, failing on overflow.
pub fn encode_string(dst: &mut [u8], s: &str) -> Result<()> {
    let bytes = s.as_bytes();
    if bytes.len() > dst.len() {
        return Err(TarError::FieldTooLong {
            len: bytes.len(),
            width: dst.len(),
        });
    }
    dst[..bytes.len()].copy_from_slice(bytes);
    dst[bytes.len()..].fill(0);
    Ok(())
}

/// Copy as much of `s` as fits.  Used for the best-effort fixed-width
/// fields behind a PAX override, where the override carries the truth.
pub fn encode_string_lossy(dst: &mut [u8], s: &str) {
    let bytes = s.as_bytes();
    let n = bytes.len().min(dst.len());
    dst[..n].copy_from_slice(&bytes[..n]);
    dst[n..].fill(0);
}

/// Decode a NUL-terminated field.  Bytes are taken verbatim; invalid
/// UTF-8 sequences are replaced.
pub fn decode_string(src: &[u8]) -> String {
    let end = src.iter().position(|&b| b == 0).unwrap_or(src.len());
    String::from_utf8_lossy(&src[..end]).into_owned()
}

// ── PAX timestamp formatting ─────────────────────────────────────────────────

/// Build a timestamp from whole seconds plus a nanosecond adjustment that
/// may be negative or exceed one second.
pub fn timestamp_from_parts(secs: i64, nanos: i64) -> Result<DateTime<Utc>> {
    let mut secs = secs;
    let mut nanos = nanos;
    if nanos < 0 {
        let borrow = (-nanos + 999_999_999) / 1_000_000_000;
        secs -= borrow;
        nanos += borrow * 1_000_000_000;
    } else if nanos >= 1_000_000_000 {
        secs += nanos / 1_000_000_000;
        nanos %= 1_000_000_000;
    }
    DateTime::from_timestamp(secs, nanos as u32)
        .ok_or(TarError::MalformedField("timestamp out of range"))
}

/// Format a timestamp as PAX decimal seconds, exact magnitude, no
/// trailing zeros in the fraction.
pub fn format_pax_time(ts: DateTime<Utc>) -> String {
    let secs = ts.timestamp();
    let nanos = i64::from(ts.timestamp_subsec_nanos());
    if nanos == 0 {
        return secs.to_string();
    }
    // chrono normalizes to a non-negative sub-second offset, so an
    // instant just before a negative whole second needs its magnitude
    // re-derived: -1s + 500ns prints as -0.9999995.
    let (sign, whole, frac) = if secs < 0 {
        ("-", -(secs + 1), 1_000_000_000 - nanos)
    } else {
        ("", secs, nanos)
    };
    let frac = format!("{:09}", frac);
    format!("{}{}.{}", sign, whole, frac.trim_end_matches('0'))
}

/// Parse a PAX decimal timestamp.  The fraction is truncated to
/// nanosecond precision.
pub fn parse_pax_time(s: &str) -> Result<DateTime<Utc>> {
    let bad = TarError::MalformedExtendedHeader("invalid timestamp");
    let (ss, sn) = match s.find('.') {
        Some(pos) => (&s[..pos], &s[pos + 1..]),
        None => (s, ""),
    };
    let secs: i64 = ss.parse().map_err(|_| bad)?;
    if sn.is_empty() {
        return timestamp_from_parts(secs, 0);
    }
    if !sn.bytes().all(|b| b.is_ascii_digit()) {
        return Err(TarError::MalformedExtendedHeader("invalid timestamp"));
    }
    let mut frac = String::from(sn);
    while frac.len() < 9 {
        frac.push('0');
    }
    frac.truncate(9);
    let nanos: i64 = frac
        .parse()
        .map_err(|_| TarError::MalformedExtendedHeader("invalid timestamp"))?;
    if ss.starts_with('-') {
        timestamp_from_parts(secs, -nanos)
    } else {
        timestamp_from_parts(secs, nanos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn octal_bounds() {
        assert!(fits_in_octal(8, 0o7777777));
        assert!(!fits_in_octal(8, 0o7777777 + 1));
        assert!(fits_in_octal(12, 8_589_934_591));
        assert!(!fits_in_octal(12, 8_589_934_592));
        assert!(!fits_in_octal(12, -1));
    }

    #[test]
    fn base256_bounds() {
        assert!(fits_in_base256(8, (1 << 56) - 1));
        assert!(!fits_in_base256(8, 1 << 56));
        assert!(fits_in_base256(8, -(1 << 56)));
        assert!(!fits_in_base256(8, -(1 << 56) - 1));
        assert!(fits_in_base256(12, i64::MAX));
        assert!(fits_in_base256(12, i64::MIN));
    }

    #[test]
    fn octal_roundtrip() {
        let mut buf = [0u8; 8];
        encode_octal(&mut buf, 0o644).unwrap();
        assert_eq!(&buf, b"0000644\0");
        assert_eq!(decode_numeric(&buf).unwrap(), 0o644);
    }

    #[test]
    fn octal_overflow_errors() {
        let mut buf = [0u8; 8];
        let err = encode_octal(&mut buf, 0o7777777 + 1).unwrap_err();
        assert!(matches!(err, TarError::FieldOverflow { .. }));
    }

    #[test]
    fn base256_roundtrip_negative() {
        let mut buf = [0u8; 8];
        encode_base256(&mut buf, -123).unwrap();
        assert_eq!(buf[0] & 0x80, 0x80);
        assert_eq!(decode_numeric(&buf).unwrap(), -123);
    }

    #[test]
    fn blank_octal_field_is_zero() {
        assert_eq!(decode_numeric(&[0u8; 8]).unwrap(), 0);
        assert_eq!(decode_numeric(b"        ").unwrap(), 0);
    }

    #[test]
    fn invalid_octal_digit_errors() {
        assert!(matches!(
            decode_numeric(b"00009\x00  ").unwrap_err(),
            TarError::MalformedField(_)
        ));
    }

    #[test]
    fn string_roundtrip_and_overflow() {
        let mut buf = [0xffu8; 10];
        encode_string(&mut buf, "abc").unwrap();
        assert_eq!(decode_string(&buf), "abc");
        assert!(matches!(
            encode_string(&mut buf, "0123456789a").unwrap_err(),
            TarError::FieldTooLong { len: 11, width: 10 }
        ));
    }

    #[test]
    fn pax_time_negative_subsecond() {
        let ts = timestamp_from_parts(-1, 500).unwrap();
        assert_eq!(format_pax_time(ts), "-0.9999995");
        assert_eq!(parse_pax_time("-0.9999995").unwrap(), ts);
    }

    #[test]
    fn pax_time_whole_seconds() {
        let ts = timestamp_from_parts(8_589_934_592, 0).unwrap();
        assert_eq!(format_pax_time(ts), "8589934592");
        assert_eq!(parse_pax_time("8589934592").unwrap(), ts);
        assert_eq!(format_pax_time(timestamp_from_parts(-123, 0).unwrap()), "-123");
    }

    #[test]
    fn pax_time_positive_subsecond() {
        let ts = timestamp_from_parts(123, 456).unwrap();
        assert_eq!(format_pax_time(ts), "123.000000456");
        assert_eq!(parse_pax_time("123.000000456").unwrap(), ts);
    }

    #[test]
    fn pax_time_fraction_truncated_to_nanos() {
        let ts = parse_pax_time("1.0000000014").unwrap();
        assert_eq!(ts, timestamp_from_parts(1, 1).unwrap());
    }

    proptest::proptest! {
        #[test]
        fn numeric_roundtrip_octal(v in 0i64..8_589_934_592) {
            let mut buf = [0u8; 12];
            encode_octal(&mut buf, v).unwrap();
            proptest::prop_assert_eq!(decode_numeric(&buf).unwrap(), v);
        }

        #[test]
        fn numeric_roundtrip_base256(v in -(1i64 << 56)..(1i64 << 56)) {
            let mut buf = [0u8; 8];
            encode_base256(&mut buf, v).unwrap();
            proptest::prop_assert_eq!(decode_numeric(&buf).unwrap(), v);
        }

        #[test]
        fn pax_time_roundtrip(secs in -8_589_934_592i64..8_589_934_592, nanos in 0i64..1_000_000_000) {
            let ts = timestamp_from_parts(secs, nanos).unwrap();
            let parsed = parse_pax_time(&format_pax_time(ts)).unwrap();
            proptest::prop_assert_eq!(parsed, ts);
        }
    }
}
