//! Bounded views over a byte range of an underlying stream.

use std::io::{self, Read, Seek, SeekFrom};

/// A byte range inside an archive stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub offset: u64,
    pub len: u64,
}

impl ByteRange {
    pub fn new(offset: u64, len: u64) -> Self {
        Self { offset, len }
    }

    /// The offset one past the last byte of the range, or `None` if it overflows.
    pub fn end(&self) -> Option<u64> {
        self.offset.checked_add(self.len)
    }
}

/// A read-only, seekable window onto `range` of the borrowed stream. Reads never go past the end
/// of the range, and seeking is relative to the start of the range.
#[derive(Debug)]
pub struct SubStream<'a, R> {
    inner: &'a mut R,
    range: ByteRange,
    pos: u64,
}

impl<'a, R: Read + Seek> SubStream<'a, R> {
    pub fn new(inner: &'a mut R, range: ByteRange) -> io::Result<Self> {
        inner.seek(SeekFrom::Start(range.offset))?;
        Ok(Self {
            inner,
            range,
            pos: 0,
        })
    }

    pub fn range(&self) -> ByteRange {
        self.range
    }

    pub fn len(&self) -> u64 {
        self.range.len
    }

    pub fn is_empty(&self) -> bool {
        self.range.len == 0
    }

    /// Read the rest of the view into memory.
    pub fn into_vec(mut self) -> io::Result<Vec<u8>> {
        let mut data = Vec::with_capacity((self.range.len - self.pos) as usize);
        self.read_to_end(&mut data)?;
        Ok(data)
    }
}

impl<R: Read + Seek> Read for SubStream<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.range.len - self.pos;
        if remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let want = buf.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
        let read = self.inner.read(&mut buf[..want])?;
        self.pos += read as u64;
        Ok(read)
    }
}

impl<R: Read + Seek> Seek for SubStream<'_, R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => self.range.len.checked_add_signed(delta),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
        };
        let target = target.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek before start of sub-stream")
        })?;
        let target = target.min(self.range.len);
        self.inner.seek(SeekFrom::Start(self.range.offset + target))?;
        self.pos = target;
        Ok(target)
    }
}

#[cfg(test)]
mod test_substream {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn reads_stop_at_range_end() {
        let mut data = Cursor::new(b"0123456789".to_vec());
        let view = SubStream::new(&mut data, ByteRange::new(2, 5)).unwrap();
        assert_eq!(view.into_vec().unwrap(), b"23456");
    }

    #[test]
    fn seeks_are_relative_to_range() {
        let mut data = Cursor::new(b"0123456789".to_vec());
        let mut view = SubStream::new(&mut data, ByteRange::new(3, 4)).unwrap();
        view.seek(SeekFrom::End(-1)).unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(view.read(&mut buf).unwrap(), 1);
        assert_eq!(buf[0], b'6');
        assert!(view.seek(SeekFrom::Current(-10)).is_err());
    }
}
