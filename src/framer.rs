//! Record framing for one client session.
//!
//! Converts the raw chunks delivered by the socket into complete,
//! newline-terminated records. Bytes after the last newline of a chunk are
//! retained as the partial prefix of the next record; a record that has been
//! returned is never returned again.

use bytes::{Bytes, BytesMut};

/// Initial capacity of the session buffer. The buffer grows geometrically
/// (via `BytesMut`) for records longer than one chunk.
const INITIAL_CAPACITY: usize = 1024;

/// Splits a byte stream into newline-terminated records.
///
/// The framer owns all bytes received on a connection that have not yet been
/// resolved into a complete record. It imposes no record size limit; a
/// record is bounded only by available memory.
pub struct RecordFramer {
    buf: BytesMut,
}

impl RecordFramer {
    /// Create a framer for a new session.
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(INITIAL_CAPACITY),
        }
    }

    /// Buffer one received chunk.
    pub fn feed(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Take the next complete record, including its trailing newline.
    ///
    /// Returns `None` when the buffer holds only a partial record (or
    /// nothing). An empty line is a valid one-byte record.
    pub fn next_record(&mut self) -> Option<Bytes> {
        let pos = self.buf.iter().position(|&b| b == b'\n')?;
        Some(self.buf.split_to(pos + 1).freeze())
    }

    /// Number of buffered bytes not yet part of a complete record.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

impl Default for RecordFramer {
    fn default() -> Self {
        Self::new()
    }
}
