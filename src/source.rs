use std::io::{self, Read, Seek, SeekFrom};

/// Random-access byte supplier backing a compound file.
///
/// `read_at` must fill the whole buffer; a span that falls outside
/// `[0, len)` is an error, never a short read. `slice_at` is an optional
/// zero-copy capability: sources holding their bytes in memory can hand
/// out borrowed views, and the reader probes for it once at open time.
pub trait ByteSource {
    /// Total length of the underlying file in bytes.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read exactly `buf.len()` bytes starting at `offset`.
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> io::Result<()>;

    /// Borrow `len` bytes at `offset` without copying, if supported.
    fn slice_at(&mut self, offset: u64, len: usize) -> Option<&[u8]> {
        let _ = (offset, len);
        None
    }
}

fn out_of_range(offset: u64, len: usize, total: u64) -> io::Error {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!("read of {len} bytes at offset {offset} past end of file ({total} bytes)"),
    )
}

/// Adapter exposing any seekable reader as a [`ByteSource`].
///
/// The total length is established once at construction; every read is
/// checked against it before the inner reader is touched.
pub struct StreamSource<R> {
    inner: R,
    len: u64,
}

impl<R: Read + Seek> StreamSource<R> {
    pub fn new(mut inner: R) -> io::Result<Self> {
        let len = inner.seek(SeekFrom::End(0))?;
        Ok(StreamSource { inner, len })
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read + Seek> ByteSource for StreamSource<R> {
    fn len(&self) -> u64 {
        self.len
    }

    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> io::Result<()> {
        match offset.checked_add(buf.len() as u64) {
            Some(end) if end <= self.len => {}
            _ => return Err(out_of_range(offset, buf.len(), self.len)),
        }
        self.inner.seek(SeekFrom::Start(offset))?;
        self.inner.read_exact(buf)
    }
}

impl ByteSource for &[u8] {
    fn len(&self) -> u64 {
        (**self).len() as u64
    }

    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> io::Result<()> {
        let total = (**self).len() as u64;
        match offset.checked_add(buf.len() as u64) {
            Some(end) if end <= total => {
                buf.copy_from_slice(&self[offset as usize..end as usize]);
                Ok(())
            }
            _ => Err(out_of_range(offset, buf.len(), total)),
        }
    }

    fn slice_at(&mut self, offset: u64, len: usize) -> Option<&[u8]> {
        let end = offset.checked_add(len as u64)?;
        if end > (**self).len() as u64 {
            return None;
        }
        Some(&self[offset as usize..end as usize])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn stream_source_reads_in_place() {
        let data: Vec<u8> = (0..64).collect();
        let mut src = StreamSource::new(Cursor::new(data)).unwrap();
        assert_eq!(ByteSource::len(&src), 64);

        let mut buf = [0u8; 4];
        src.read_at(&mut buf, 10).unwrap();
        assert_eq!(buf, [10, 11, 12, 13]);

        // no zero-copy capability
        assert!(src.slice_at(0, 4).is_none());
    }

    #[test]
    fn stream_source_rejects_out_of_range() {
        let mut src = StreamSource::new(Cursor::new(vec![0u8; 16])).unwrap();
        let mut buf = [0u8; 8];
        assert!(src.read_at(&mut buf, 12).is_err());
        assert!(src.read_at(&mut buf, u64::MAX - 2).is_err());
    }

    #[test]
    fn slice_source_is_zero_copy() {
        let data: Vec<u8> = (0..32).collect();
        let mut src = &data[..];
        assert_eq!(src.slice_at(4, 4), Some(&[4u8, 5, 6, 7][..]));
        assert!(src.slice_at(30, 4).is_none());

        let mut buf = [0u8; 2];
        src.read_at(&mut buf, 30).unwrap();
        assert_eq!(buf, [30, 31]);
        assert!(src.read_at(&mut buf, 31).is_err());
    }
}
