//! Bounded output sink over a caller-provided slice.

use std::io::{self, Write};

/// A [`Write`] implementation that fills a fixed slice and never writes past
/// its end.
///
/// A write that does not fit copies as many bytes as there is room for and
/// sets the overflow flag; the short count makes `write_all` fail, which the
/// encoder latches as a write failure.
#[derive(Debug)]
pub struct SliceSink<'a> {
    buf: &'a mut [u8],
    written: usize,
    overflow: bool,
}

impl<'a> SliceSink<'a> {
    /// Create a sink over `buf`.
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self {
            buf,
            written: 0,
            overflow: false,
        }
    }

    /// Number of bytes written so far.
    pub fn written(&self) -> usize {
        self.written
    }

    /// Remaining capacity.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.written
    }

    /// Whether any write was truncated.
    pub fn overflowed(&self) -> bool {
        self.overflow
    }
}

impl Write for SliceSink<'_> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let count = data.len().min(self.remaining());
        if count < data.len() {
            self.overflow = true;
        }
        self.buf[self.written..self.written + count].copy_from_slice(&data[..count]);
        self.written += count;
        Ok(count)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fits() {
        let mut buf = [0u8; 8];
        let mut sink = SliceSink::new(&mut buf);
        sink.write_all(b"abcd").unwrap();
        assert_eq!(sink.written(), 4);
        assert_eq!(sink.remaining(), 4);
        assert!(!sink.overflowed());
        assert_eq!(&buf[..4], b"abcd");
    }

    #[test]
    fn test_overflow_is_partial() {
        let mut buf = [0u8; 3];
        let mut sink = SliceSink::new(&mut buf);
        assert!(sink.write_all(b"hello").is_err());
        assert!(sink.overflowed());
        assert_eq!(sink.written(), 3);
        assert_eq!(&buf, b"hel");
    }
}
