//! Wire-level codec for the tar archive interchange format.
//!
//! Converts between a per-entry metadata record ([`Header`]) and a
//! byte-exact 512-byte-block stream compatible with the USTAR, PAX and
//! GNU tar variants.  The core is [`Header::classify`]: given a record,
//! decide which legacy formats can represent it losslessly and, when
//! none can, synthesize the minimal set of PAX key/value overrides.
//!
//! # Writing
//! ```no_run
//! use tarwire::{Header, Writer};
//!
//! let mut w = Writer::new(Vec::new());
//! let hdr = Header { name: "hello.txt".into(), size: 5, ..Header::default() };
//! w.write_header(&hdr)?;
//! w.write_data(b"hello")?;
//! w.finish()?;
//! # Ok::<(), tarwire::TarError>(())
//! ```
//!
//! # Reading
//! ```no_run
//! use tarwire::Reader;
//!
//! let mut r = Reader::new(std::io::stdin().lock());
//! while let Some(hdr) = r.next()? {
//!     let data = r.read_all()?;
//!     println!("{}  {} bytes", hdr.name, data.len());
//! }
//! # Ok::<(), tarwire::TarError>(())
//! ```
//!
//! Out of scope: compression wrapping, multi-volume archives, sparse
//! files, and extraction tooling built on top of the codec.

pub mod error;
pub mod field;
pub mod header;
pub mod meta;
pub mod pax;
pub mod reader;
pub mod writer;

pub use error::{Result, TarError};
pub use header::{EntryType, Format, FormatSet, Header, BLOCK_SIZE};
pub use meta::FileInfo;
pub use reader::Reader;
pub use writer::Writer;
