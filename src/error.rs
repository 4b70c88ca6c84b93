use std::io;
use thiserror::Error;

/// Crate-wide error type.
///
/// End of archive is deliberately NOT an error: [`crate::Reader::next`]
/// reports it as `Ok(None)`.
#[derive(Error, Debug)]
pub enum TarError {
    /// A numeric value does not fit any encoding admissible for its field.
    #[error("numeric value {value} does not fit in a {width}-byte field")]
    FieldOverflow { value: i64, width: usize },
    /// A string is longer than its fixed-width field.
    #[error("string of {len} bytes does not fit in a {width}-byte field")]
    FieldTooLong { len: usize, width: usize },
    /// The classifier found no format able to encode the header.
    #[error("header cannot be represented by any tar format: {0}")]
    UnsupportedHeader(String),
    /// A fixed-width field failed to decode.
    #[error("malformed header field: {0}")]
    MalformedField(&'static str),
    /// A PAX extended-header record failed to decode.
    #[error("malformed extended header: {0}")]
    MalformedExtendedHeader(&'static str),
    /// The stored header checksum does not match the block contents.
    #[error("header checksum mismatch (stored {stored}, computed {computed})")]
    ChecksumMismatch { stored: i64, computed: i64 },
    /// More data bytes were supplied than the entry header declared.
    #[error("write of {attempted} bytes exceeds the {remaining} bytes left in the entry")]
    WriteTooLong { attempted: u64, remaining: u64 },
    /// The stream ended, or an operation was issued, before the current
    /// entry's declared data region was complete.
    #[error("unexpected end of archive: {0}")]
    UnexpectedEof(&'static str),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, TarError>;
