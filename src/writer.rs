//! Sequential archive writer.
//!
//! # State machine
//! `write_header` opens an entry and arms a data-byte counter with the
//! declared size; `write_data` pays it down; the next `write_header` (or
//! `finish`) requires the counter to be at zero.  Calls out of that
//! order are contract violations and fail without touching the stream
//! position.
//!
//! # Format selection
//! Each header is classified, intersected with any caller-requested
//! format, and encoded in the narrowest survivor: USTAR when possible,
//! then PAX (prefixing an extended-header pseudo entry when overrides
//! are needed), then GNU (prefixing `L`/`K` long-name pseudo entries for
//! overlong paths).

use std::io::Write;

use crate::error::{Result, TarError};
use crate::header::{
    encode_header_block, encode_pseudo_block, Format, Header, BLOCK_SIZE, NAME_WIDTH,
    TYPE_GNU_LONGLINK, TYPE_GNU_LONGNAME, TYPE_XHEADER,
};
use crate::pax;

/// Name carried by GNU long-name pseudo entries.
const GNU_LONG_NAME_SENTINEL: &str = "././@LongLink";

const ZERO_BLOCK: [u8; BLOCK_SIZE] = [0u8; BLOCK_SIZE];

pub struct Writer<W: Write> {
    w: W,
    /// Data bytes still owed for the current entry.
    remaining: u64,
    /// Zero padding owed after the current entry's data.
    pad: u64,
    /// Set by the first successful `write_header`.
    entry_open: bool,
    finished: bool,
}

impl<W: Write> Writer<W> {
    pub fn new(w: W) -> Self {
        Writer {
            w,
            remaining: 0,
            pad: 0,
            entry_open: false,
            finished: false,
        }
    }

    /// Begin a new entry.  Emits any required auxiliary blocks followed
    /// by the physical header, and arms the data counter with
    /// `h.size` bytes.
    pub fn write_header(&mut self, h: &Header) -> Result<()> {
        if self.finished {
            return Err(TarError::UnexpectedEof("archive already finished"));
        }
        if self.remaining > 0 {
            return Err(TarError::UnexpectedEof(
                "previous entry's data region is incomplete",
            ));
        }
        self.flush_padding()?;

        let (mut formats, overrides) = h.classify();
        if formats.is_empty() {
            return Err(TarError::UnsupportedHeader(
                "no tar format can encode this header".to_owned(),
            ));
        }
        if let Some(requested) = h.format {
            formats.retain(requested);
            if formats.is_empty() {
                return Err(TarError::UnsupportedHeader(format!(
                    "requested {} format cannot encode this header",
                    requested.name()
                )));
            }
        }
        let chosen = if formats.has(Format::Ustar) {
            Format::Ustar
        } else if formats.has(Format::Pax) {
            Format::Pax
        } else {
            Format::Gnu
        };

        match chosen {
            Format::Pax if !overrides.is_empty() => {
                let payload = pax::format_records(&overrides);
                let name = pax_header_name(&h.name);
                self.write_pseudo_entry(&name, payload.as_bytes(), TYPE_XHEADER, Format::Pax)?;
            }
            Format::Gnu => {
                if h.name.len() > NAME_WIDTH {
                    let mut payload = h.name.clone().into_bytes();
                    payload.push(0);
                    self.write_pseudo_entry(
                        GNU_LONG_NAME_SENTINEL,
                        &payload,
                        TYPE_GNU_LONGNAME,
                        Format::Gnu,
                    )?;
                }
                if h.linkname.len() > NAME_WIDTH {
                    let mut payload = h.linkname.clone().into_bytes();
                    payload.push(0);
                    self.write_pseudo_entry(
                        GNU_LONG_NAME_SENTINEL,
                        &payload,
                        TYPE_GNU_LONGLINK,
                        Format::Gnu,
                    )?;
                }
            }
            _ => {}
        }

        let block = encode_header_block(h, chosen)?;
        self.w.write_all(&block)?;
        // Non-regular entries never carry a data region, whatever their
        // size field claims; the reader skips none for them either.
        self.remaining = if h.entry_type.is_header_only() {
            0
        } else {
            h.size as u64
        };
        self.pad = block_padding(self.remaining);
        self.entry_open = true;
        Ok(())
    }

    /// Append data to the current entry's region.
    pub fn write_data(&mut self, buf: &[u8]) -> Result<()> {
        if self.finished {
            return Err(TarError::UnexpectedEof("archive already finished"));
        }
        if !self.entry_open {
            return Err(TarError::UnexpectedEof("no entry is open"));
        }
        if buf.len() as u64 > self.remaining {
            return Err(TarError::WriteTooLong {
                attempted: buf.len() as u64,
                remaining: self.remaining,
            });
        }
        self.w.write_all(buf)?;
        self.remaining -= buf.len() as u64;
        Ok(())
    }

    /// Pad the final data region and append the two-zero-block
    /// end-of-archive marker.  Idempotent once it succeeds.
    pub fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        if self.remaining > 0 {
            return Err(TarError::UnexpectedEof(
                "entry data region incomplete at finish",
            ));
        }
        self.flush_padding()?;
        self.w.write_all(&ZERO_BLOCK)?;
        self.w.write_all(&ZERO_BLOCK)?;
        self.w.flush()?;
        self.finished = true;
        Ok(())
    }

    /// Consume the writer, returning the underlying sink.
    pub fn into_inner(self) -> W {
        self.w
    }

    fn flush_padding(&mut self) -> Result<()> {
        if self.pad > 0 {
            self.w.write_all(&ZERO_BLOCK[..self.pad as usize])?;
            self.pad = 0;
        }
        Ok(())
    }

    /// One auxiliary entry: a pseudo header followed by its block-padded
    /// payload.
    fn write_pseudo_entry(
        &mut self,
        name: &str,
        payload: &[u8],
        typeflag: u8,
        format: Format,
    ) -> Result<()> {
        let block = encode_pseudo_block(name, payload.len(), typeflag, format)?;
        self.w.write_all(&block)?;
        self.w.write_all(payload)?;
        let pad = block_padding(payload.len() as u64);
        self.w.write_all(&ZERO_BLOCK[..pad as usize])?;
        Ok(())
    }
}

fn block_padding(len: u64) -> u64 {
    (BLOCK_SIZE as u64 - len % BLOCK_SIZE as u64) % BLOCK_SIZE as u64
}

/// `dir/file` becomes `dir/PaxHeaders.0/file`, the conventional name for
/// the extended-header pseudo entry.
fn pax_header_name(name: &str) -> String {
    match name.rfind('/') {
        Some(i) => format!("{}/PaxHeaders.0/{}", &name[..i], &name[i + 1..]),
        None => format!("PaxHeaders.0/{}", name),
    }
}
