//! Sequential archive reader.
//!
//! `next()` walks physical header blocks, folding auxiliary entries
//! (PAX extended headers, GNU long-name entries) into the following real
//! header, and reports end of archive as `Ok(None)` when it sees the
//! canonical two consecutive zero blocks.  Each returned [`Header`] is
//! freshly owned; nothing aliases the reader's internal buffer.

use std::collections::BTreeMap;
use std::io::Read;

use crate::error::{Result, TarError};
use crate::header::{
    decode_header_block, Block, Format, Header, BLOCK_SIZE, TYPE_GNU_LONGLINK, TYPE_GNU_LONGNAME,
    TYPE_XGLOBAL, TYPE_XHEADER,
};
use crate::pax;

/// Upper bound on auxiliary-entry payloads (extended headers, long
/// names).  A larger declaration is treated as stream corruption rather
/// than an allocation request.
const MAX_SPECIAL_FILE_SIZE: i64 = 1 << 20;

pub struct Reader<R: Read> {
    r: R,
    /// Unread data bytes of the current entry.
    remaining: u64,
    /// Padding after the current entry's data.
    pad: u64,
    /// Sticky once end-of-archive has been observed.
    done: bool,
    /// Overrides from a `g` global extended header, applied to every
    /// subsequent entry (a per-entry `x` header still wins).
    global: BTreeMap<String, String>,
}

impl<R: Read> Reader<R> {
    pub fn new(r: R) -> Self {
        Reader {
            r,
            remaining: 0,
            pad: 0,
            done: false,
            global: BTreeMap::new(),
        }
    }

    /// Advance to the next entry and return its reconstructed header,
    /// or `None` once the end-of-archive marker has been consumed.
    pub fn next(&mut self) -> Result<Option<Header>> {
        if self.done {
            return Ok(None);
        }
        self.skip_entry_remainder()?;

        let mut pending: BTreeMap<String, String> = BTreeMap::new();
        let mut long_name: Option<String> = None;
        let mut long_link: Option<String> = None;

        loop {
            let block = self.read_block()?;
            if is_zero(&block) {
                let second = self.read_block()?;
                if is_zero(&second) {
                    self.done = true;
                    return Ok(None);
                }
                return Err(TarError::MalformedField(
                    "lone zero block is not a valid end-of-archive marker",
                ));
            }

            let (mut h, flag) = decode_header_block(&block)?;
            match flag {
                TYPE_XHEADER => {
                    let payload = self.read_special(h.size)?;
                    pending.extend(pax::parse_records(&payload)?);
                }
                TYPE_XGLOBAL => {
                    let payload = self.read_special(h.size)?;
                    self.global.extend(pax::parse_records(&payload)?);
                }
                TYPE_GNU_LONGNAME => {
                    let payload = self.read_special(h.size)?;
                    long_name = Some(nul_terminated(&payload));
                }
                TYPE_GNU_LONGLINK => {
                    let payload = self.read_special(h.size)?;
                    long_link = Some(nul_terminated(&payload));
                }
                _ => {
                    if let Some(name) = long_name {
                        h.name = name;
                        h.format = Some(Format::Gnu);
                    }
                    if let Some(link) = long_link {
                        h.linkname = link;
                        h.format = Some(Format::Gnu);
                    }
                    if !self.global.is_empty() {
                        pax::merge_overrides(&mut h, &self.global)?;
                        h.format = Some(Format::Pax);
                    }
                    if !pending.is_empty() {
                        pax::merge_overrides(&mut h, &pending)?;
                        h.format = Some(Format::Pax);
                    }
                    // Only regular entries carry a data region; a stray
                    // size on any other kind is noise, not data.
                    if h.entry_type.is_header_only() {
                        h.size = 0;
                    }
                    let data_len = h.size as u64;
                    self.remaining = data_len;
                    self.pad = padding_for(data_len);
                    return Ok(Some(h));
                }
            }
        }
    }

    /// Read entry data, bounded by the entry's declared size.
    /// Returns 0 once the entry is exhausted.
    pub fn read_data(&mut self, buf: &mut [u8]) -> Result<usize> {
        let want = (buf.len() as u64).min(self.remaining) as usize;
        if want == 0 {
            return Ok(0);
        }
        let got = self.r.read(&mut buf[..want])?;
        if got == 0 {
            return Err(TarError::UnexpectedEof("stream truncated inside entry data"));
        }
        self.remaining -= got as u64;
        Ok(got)
    }

    /// Read the rest of the current entry's data into a vector.
    pub fn read_all(&mut self) -> Result<Vec<u8>> {
        // The declared size is untrusted input; cap the up-front
        // allocation and let the vector grow with actual data.
        let mut out = Vec::with_capacity(self.remaining.min(64 * 1024) as usize);
        let mut chunk = [0u8; 8192];
        loop {
            let n = self.read_data(&mut chunk)?;
            if n == 0 {
                return Ok(out);
            }
            out.extend_from_slice(&chunk[..n]);
        }
    }

    /// Unread data bytes left in the current entry.
    pub fn data_remaining(&self) -> u64 {
        self.remaining
    }

    // ── Internal helpers ─────────────────────────────────────────────────

    fn read_block(&mut self) -> Result<Block> {
        let mut block: Block = [0u8; BLOCK_SIZE];
        self.r.read_exact(&mut block).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                TarError::UnexpectedEof("stream ended before the end-of-archive marker")
            } else {
                TarError::Io(e)
            }
        })?;
        Ok(block)
    }

    /// Read an auxiliary entry's payload plus its padding.
    fn read_special(&mut self, size: i64) -> Result<Vec<u8>> {
        if !(0..=MAX_SPECIAL_FILE_SIZE).contains(&size) {
            return Err(TarError::MalformedField(
                "auxiliary entry declares an implausible size",
            ));
        }
        let mut payload = vec![0u8; size as usize];
        self.r.read_exact(&mut payload).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                TarError::UnexpectedEof("stream truncated inside auxiliary entry")
            } else {
                TarError::Io(e)
            }
        })?;
        self.skip(padding_for(size as u64))?;
        Ok(payload)
    }

    fn skip_entry_remainder(&mut self) -> Result<()> {
        let n = self.remaining + self.pad;
        self.remaining = 0;
        self.pad = 0;
        self.skip(n)
    }

    fn skip(&mut self, mut n: u64) -> Result<()> {
        let mut scratch = [0u8; BLOCK_SIZE];
        while n > 0 {
            let want = n.min(BLOCK_SIZE as u64) as usize;
            let got = self.r.read(&mut scratch[..want])?;
            if got == 0 {
                return Err(TarError::UnexpectedEof("stream truncated inside entry data"));
            }
            n -= got as u64;
        }
        Ok(())
    }
}

fn padding_for(len: u64) -> u64 {
    (BLOCK_SIZE as u64 - len % BLOCK_SIZE as u64) % BLOCK_SIZE as u64
}

fn is_zero(block: &Block) -> bool {
    block.iter().all(|&b| b == 0)
}

fn nul_terminated(payload: &[u8]) -> String {
    let end = payload.iter().position(|&b| b == 0).unwrap_or(payload.len());
    String::from_utf8_lossy(&payload[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::encode_pseudo_block;

    fn push_pseudo(out: &mut Vec<u8>, name: &str, typeflag: u8, payload: &str) {
        let block = encode_pseudo_block(name, payload.len(), typeflag, Format::Pax).unwrap();
        out.extend_from_slice(&block);
        out.extend_from_slice(payload.as_bytes());
        out.resize(out.len() + padding_for(payload.len() as u64) as usize, 0);
    }

    fn push_header(out: &mut Vec<u8>, name: &str) {
        let h = Header {
            name: name.to_owned(),
            ..Header::default()
        };
        let block = crate::header::encode_header_block(&h, Format::Ustar).unwrap();
        out.extend_from_slice(&block);
    }

    #[test]
    fn global_header_applies_to_all_following_entries() {
        let mut bytes = Vec::new();
        push_pseudo(
            &mut bytes,
            "pax_global_header",
            TYPE_XGLOBAL,
            "15 uname=build\n",
        );
        push_header(&mut bytes, "first");
        push_header(&mut bytes, "second");
        bytes.resize(bytes.len() + 2 * BLOCK_SIZE, 0);

        let mut r = Reader::new(bytes.as_slice());
        let e1 = r.next().unwrap().unwrap();
        assert_eq!(e1.name, "first");
        assert_eq!(e1.uname, "build");
        let e2 = r.next().unwrap().unwrap();
        assert_eq!(e2.name, "second");
        assert_eq!(e2.uname, "build");
        assert!(r.next().unwrap().is_none());
    }

    #[test]
    fn entry_header_wins_over_global() {
        let mut bytes = Vec::new();
        push_pseudo(
            &mut bytes,
            "pax_global_header",
            TYPE_XGLOBAL,
            "15 uname=build\n",
        );
        push_pseudo(
            &mut bytes,
            "PaxHeaders.0/first",
            TYPE_XHEADER,
            "16 uname=ragnar\n",
        );
        push_header(&mut bytes, "first");
        push_header(&mut bytes, "second");
        bytes.resize(bytes.len() + 2 * BLOCK_SIZE, 0);

        let mut r = Reader::new(bytes.as_slice());
        assert_eq!(r.next().unwrap().unwrap().uname, "ragnar");
        // The per-entry override does not leak past its entry.
        assert_eq!(r.next().unwrap().unwrap().uname, "build");
    }

    #[test]
    fn absurd_declared_size_fails_instead_of_allocating() {
        // A header may declare any size; only delivered bytes count.
        let h = Header {
            name: "huge".to_owned(),
            size: 1 << 45,
            ..Header::default()
        };
        let block = crate::header::encode_header_block(&h, Format::Gnu).unwrap();

        let mut r = Reader::new(&block[..]);
        let got = r.next().unwrap().unwrap();
        assert_eq!(got.size, 1 << 45);
        assert!(matches!(r.read_all(), Err(TarError::UnexpectedEof(_))));
    }

    #[test]
    fn oversized_auxiliary_entry_is_rejected() {
        let mut bytes = Vec::new();
        let block = encode_pseudo_block(
            "PaxHeaders.0/huge",
            (MAX_SPECIAL_FILE_SIZE + 1) as usize,
            TYPE_XHEADER,
            Format::Pax,
        )
        .unwrap();
        bytes.extend_from_slice(&block);

        let mut r = Reader::new(bytes.as_slice());
        assert!(matches!(r.next(), Err(TarError::MalformedField(_))));
    }
}
