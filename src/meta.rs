//! Bridge between platform file metadata and [`Header`] records.
//!
//! `Header::from_metadata` maps a `std::fs::Metadata` into a record;
//! `Header::file_info` is the inverse direction, a read-only synthetic
//! view whose permission bits round-trip exactly and which exposes the
//! originating record for introspection.

use std::fs::Metadata;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::header::{EntryType, Header};

impl Header {
    /// Build a record from platform file metadata.  `name` is the path
    /// the entry will carry inside the archive; directories gain a
    /// trailing slash.  `link_target` supplies the linkname for symlink
    /// and hard-link entries.
    pub fn from_metadata(name: &str, meta: &Metadata, link_target: Option<&str>) -> Result<Header> {
        let mut h = Header::default();
        fill_platform(&mut h, meta)?;
        h.name = name.to_owned();
        if h.entry_type == EntryType::Directory && !h.name.ends_with('/') {
            h.name.push('/');
        }
        h.size = if h.entry_type == EntryType::Regular {
            meta.len() as i64
        } else {
            0
        };
        if let Some(target) = link_target {
            h.linkname = target.to_owned();
        }
        Ok(h)
    }

    /// A read-only file-status view of this record.
    pub fn file_info(&self) -> FileInfo<'_> {
        FileInfo { h: self }
    }
}

#[cfg(unix)]
fn fill_platform(h: &mut Header, meta: &Metadata) -> Result<()> {
    use std::os::unix::fs::{FileTypeExt, MetadataExt};

    use crate::field::timestamp_from_parts;

    h.mode = i64::from(meta.mode()) & 0o7777;
    h.uid = i64::from(meta.uid());
    h.gid = i64::from(meta.gid());
    h.mod_time = timestamp_from_parts(meta.mtime(), meta.mtime_nsec())?;

    let ft = meta.file_type();
    h.entry_type = if ft.is_dir() {
        EntryType::Directory
    } else if ft.is_symlink() {
        EntryType::Symlink
    } else if ft.is_char_device() {
        EntryType::Char
    } else if ft.is_block_device() {
        EntryType::Block
    } else if ft.is_fifo() {
        EntryType::Fifo
    } else {
        EntryType::Regular
    };

    if matches!(h.entry_type, EntryType::Char | EntryType::Block) {
        let (major, minor) = split_rdev(meta.rdev());
        h.devmajor = major;
        h.devminor = minor;
    }
    Ok(())
}

#[cfg(not(unix))]
fn fill_platform(h: &mut Header, meta: &Metadata) -> Result<()> {
    let ft = meta.file_type();
    h.entry_type = if ft.is_dir() {
        EntryType::Directory
    } else if ft.is_symlink() {
        EntryType::Symlink
    } else {
        EntryType::Regular
    };
    h.mode = match (meta.is_dir(), meta.permissions().readonly()) {
        (true, false) => 0o755,
        (true, true) => 0o555,
        (false, false) => 0o644,
        (false, true) => 0o444,
    };
    if let Ok(modified) = meta.modified() {
        h.mod_time = DateTime::<Utc>::from(modified);
    }
    Ok(())
}

/// Linux dev_t layout; other platforms report zero device numbers.
#[cfg(target_os = "linux")]
fn split_rdev(rdev: u64) -> (i64, i64) {
    let major = ((rdev >> 32) & 0xffff_f000) | ((rdev >> 8) & 0xfff);
    let minor = ((rdev >> 12) & 0xffff_ff00) | (rdev & 0xff);
    (major as i64, minor as i64)
}

#[cfg(all(unix, not(target_os = "linux")))]
fn split_rdev(_rdev: u64) -> (i64, i64) {
    (0, 0)
}

/// Read-only file-status view over a [`Header`].
#[derive(Debug, Clone, Copy)]
pub struct FileInfo<'a> {
    h: &'a Header,
}

impl<'a> FileInfo<'a> {
    /// Base name of the entry (trailing directory slash stripped).
    pub fn name(&self) -> &'a str {
        let trimmed = self.h.name.trim_end_matches('/');
        trimmed.rsplit('/').next().unwrap_or(trimmed)
    }

    pub fn len(&self) -> u64 {
        self.h.size.max(0) as u64
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_dir(&self) -> bool {
        self.h.entry_type == EntryType::Directory
    }

    pub fn entry_type(&self) -> EntryType {
        self.h.entry_type
    }

    /// Permission plus setuid/setgid/sticky bits, exactly as recorded.
    pub fn mode(&self) -> u32 {
        (self.h.mode & 0o7777) as u32
    }

    pub fn modified(&self) -> DateTime<Utc> {
        self.h.mod_time
    }

    /// Backward link to the record this view was derived from.
    pub fn header(&self) -> &'a Header {
        self.h
    }
}
