//! Zero-copy framing buffers shared by the broker's TCP connection handlers.
//!
//! The actual socket plumbing lives in the protocol crate, which owns the
//! async TCP accept loop and the Kafka wire codec; this buffer is the piece
//! that crate reuses so produce/fetch payloads move through one copy from
//! socket to log instead of several.

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Paired read/write buffer for one connection.
pub struct ZeroCopyBuffer {
    read_buf: BytesMut,
    write_buf: BytesMut,
}

impl ZeroCopyBuffer {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            read_buf: BytesMut::with_capacity(capacity),
            write_buf: BytesMut::with_capacity(capacity),
        }
    }

    #[must_use]
    pub fn readable(&self) -> &[u8] {
        &self.read_buf[..]
    }

    pub fn advance_read(&mut self, n: usize) {
        self.read_buf.advance(n);
    }

    #[must_use]
    pub fn pending_write(&self) -> &[u8] {
        &self.write_buf[..]
    }

    pub fn clear_written(&mut self, n: usize) {
        self.write_buf.advance(n);
    }

    pub fn put_bytes(&mut self, data: &[u8]) {
        self.write_buf.put_slice(data);
    }

    pub fn read_into(&mut self, data: &[u8]) {
        self.read_buf.put_slice(data);
    }

    /// Split off everything currently buffered for reading, without copying.
    pub fn take_readable(&mut self) -> Bytes {
        self.read_buf.split().freeze()
    }

    #[must_use]
    pub fn has_readable(&self) -> bool {
        !self.read_buf.is_empty()
    }

    #[must_use]
    pub fn has_writable(&self) -> bool {
        !self.write_buf.is_empty()
    }

    pub fn clear(&mut self) {
        self.read_buf.clear();
        self.write_buf.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_write_roundtrip() {
        let mut buf = ZeroCopyBuffer::new(64);
        buf.read_into(b"hello");
        assert!(buf.has_readable());
        assert_eq!(buf.readable(), b"hello");
        let taken = buf.take_readable();
        assert_eq!(&taken[..], b"hello");
        assert!(!buf.has_readable());

        buf.put_bytes(b"world");
        assert!(buf.has_writable());
        assert_eq!(buf.pending_write(), b"world");
        buf.clear_written(5);
        assert!(!buf.has_writable());
    }
}
