//! Reader for Microsoft's Compound File Binary format — the OLE/COM
//! container behind legacy Office documents (`.doc`, `.xls`, `.ppt`,
//! `.msg`).
//!
//! A compound file embeds a directory tree of named streams inside one
//! random-access file, allocated in FAT-style sector chains. [`OleFile`]
//! walks that tree depth-first and serves each stream's bytes
//! sequentially:
//!
//! ```no_run
//! use std::fs::File;
//! use olefs::OleFile;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let file = File::open("report.doc")?;
//! let mut doc = OleFile::from_reader(file)?;
//! while let Some(entry) = doc.next_entry()? {
//!     println!("{} ({} bytes)", entry.full_path(), entry.size);
//!     if entry.is_stream() {
//!         let mut buf = [0u8; 512];
//!         loop {
//!             let n = doc.read(&mut buf)?;
//!             if n == 0 {
//!                 break;
//!             }
//!             // first n bytes of buf hold stream data
//!         }
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Reading is strictly sequential and single-threaded: one pass over the
//! directory, one pass over each stream. The reader owns no cache and
//! never writes.

mod directory;
mod error;
mod header;
mod reader;
mod source;
mod stream;

pub use directory::{Entry, EntryType};
pub use error::OleError;
pub use reader::OleFile;
pub use source::{ByteSource, StreamSource};
