// Bounded receive buffer shared by the packet matcher and request queue.

use bytes::{Bytes, BytesMut};

/// An ordered byte sequence bounded at a fixed maximum length.
///
/// Appending past `maximum_length` truncates from the head, keeping the
/// trailing `maximum_length` bytes. This favors suffix-based framing, where
/// the most recently arrived bytes are the ones worth keeping.
#[derive(Debug)]
pub struct Buffer {
    data: BytesMut,
    maximum_length: usize,
}

impl Buffer {
    pub fn new(maximum_length: usize) -> Self {
        Self {
            data: BytesMut::with_capacity(maximum_length.min(64 * 1024)),
            maximum_length,
        }
    }

    /// Appends `bytes`, discarding the oldest bytes if the result would
    /// exceed `maximum_length`.
    pub fn append(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
        if self.data.len() > self.maximum_length {
            let excess = self.data.len() - self.maximum_length;
            let _ = self.data.split_to(excess);
        }
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Drops `count` bytes from the head of the buffer. Used once a packet
    /// or response has been fully consumed, or to discard garbage bytes
    /// preceding a match attempt.
    pub fn consume(&mut self, count: usize) {
        let count = count.min(self.data.len());
        let _ = self.data.split_to(count);
    }

    pub fn snapshot(&self) -> Bytes {
        Bytes::copy_from_slice(&self.data)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn maximum_length(&self) -> usize {
        self.maximum_length
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_within_bound_keeps_everything() {
        let mut buf = Buffer::new(8);
        buf.append(b"abcd");
        assert_eq!(buf.as_slice(), b"abcd");
    }

    #[test]
    fn append_beyond_bound_truncates_head() {
        // Scenario E from spec.md: max=4, append "ABCDE" -> "BCDE".
        let mut buf = Buffer::new(4);
        buf.append(b"ABCDE");
        assert_eq!(buf.as_slice(), b"BCDE");
        assert!(buf.len() <= buf.maximum_length());
    }

    #[test]
    fn repeated_appends_never_exceed_maximum() {
        let mut buf = Buffer::new(4);
        for chunk in [&b"A"[..], b"BB", b"CCC", b"D"] {
            buf.append(chunk);
            assert!(buf.len() <= 4);
        }
    }

    #[test]
    fn consume_drops_from_head() {
        let mut buf = Buffer::new(16);
        buf.append(b"garbage|payload");
        buf.consume(8);
        assert_eq!(buf.as_slice(), b"payload");
    }

    #[test]
    fn consume_more_than_len_clears() {
        let mut buf = Buffer::new(16);
        buf.append(b"short");
        buf.consume(100);
        assert!(buf.is_empty());
    }

    #[test]
    fn clear_empties_buffer() {
        let mut buf = Buffer::new(16);
        buf.append(b"data");
        buf.clear();
        assert!(buf.is_empty());
    }
}
