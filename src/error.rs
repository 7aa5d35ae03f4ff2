use std::io;

use thiserror::Error;

/// Errors raised while opening or reading a compound file.
///
/// End-of-stream and end-of-iteration are ordinary return values
/// (`Ok(0)` from `read`, `Ok(None)` from `next_entry`), never errors.
#[derive(Error, Debug)]
pub enum OleError {
    /// A structural field holds a value the format does not allow.
    #[error("not a valid compound file: {field} is {value:#x}")]
    Format { field: &'static str, value: u64 },

    /// The underlying byte source failed.
    #[error("error reading compound file: {0}")]
    Io(#[from] io::Error),

    /// A read fell outside the file, or a sector chain ran past the
    /// length its stream declares.
    #[error("error reading compound file: {0}")]
    Read(String),

    /// A sector or stream id points outside the structure that indexes
    /// it, or the directory tree contains a cycle.
    #[error("error traversing directory structure: {0}")]
    BadDirectory(String),

    /// `read` was called while positioned on the root or a storage.
    #[error("storage object does not have a stream")]
    NoStream,
}

impl From<OleError> for io::Error {
    fn from(err: OleError) -> io::Error {
        match err {
            OleError::Io(inner) => inner,
            other @ OleError::NoStream => io::Error::new(io::ErrorKind::InvalidInput, other),
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
