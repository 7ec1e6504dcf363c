//! Newline framing over an inbound byte stream.
//!
//! The wire protocol is plain `\n`-terminated lines; a bare `\r\n` is also
//! accepted by trimming a trailing `\r`. `LineReader` buffers partial reads
//! until a full line is available and rejects a peer that never sends one,
//! so a single slow or hostile connection can't grow memory without bound.

use bytes::BytesMut;

/// Largest a single buffered, unterminated line is allowed to grow before the
/// connection is dropped.
pub const MAX_INPUT_BUFFER: usize = 64 * 1024;

#[derive(Debug, PartialEq, Eq)]
pub enum ReadError {
    /// The peer sent more bytes than `MAX_INPUT_BUFFER` without a newline.
    LineTooLong,
}

/// Accumulates bytes read off the socket and yields complete lines.
#[derive(Debug, Default)]
pub struct LineReader {
    buf: BytesMut,
}

impl LineReader {
    pub fn new() -> LineReader {
        LineReader { buf: BytesMut::new() }
    }

    /// Append freshly-read bytes. Returns an error if the buffer would exceed
    /// `MAX_INPUT_BUFFER` without having produced a line yet.
    pub fn push(&mut self, bytes: &[u8]) -> Result<(), ReadError> {
        if self.buf.len() + bytes.len() > MAX_INPUT_BUFFER {
            return Err(ReadError::LineTooLong);
        }
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    /// Pop the next complete line out of the buffer, stripping the
    /// terminating `\n` and any immediately preceding `\r`.
    ///
    /// Returns `None` if no full line is currently buffered.
    pub fn next_line(&mut self) -> Option<Vec<u8>> {
        let newline_at = self.buf.iter().position(|&b| b == b'\n')?;

        let mut line = self.buf.split_to(newline_at + 1);
        line.truncate(line.len() - 1);
        if line.last() == Some(&b'\r') {
            line.truncate(line.len() - 1);
        }
        Some(line.to_vec())
    }

    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yields_nothing_until_newline_arrives() {
        let mut reader = LineReader::new();
        reader.push(b"ping").unwrap();
        assert_eq!(reader.next_line(), None);

        reader.push(b"\n").unwrap();
        assert_eq!(reader.next_line(), Some(b"ping".to_vec()));
        assert_eq!(reader.next_line(), None);
    }

    #[test]
    fn strips_trailing_cr() {
        let mut reader = LineReader::new();
        reader.push(b"ping\r\n").unwrap();
        assert_eq!(reader.next_line(), Some(b"ping".to_vec()));
    }

    #[test]
    fn yields_multiple_buffered_lines_in_order() {
        let mut reader = LineReader::new();
        reader.push(b"ping\ninfo\n").unwrap();
        assert_eq!(reader.next_line(), Some(b"ping".to_vec()));
        assert_eq!(reader.next_line(), Some(b"info".to_vec()));
        assert_eq!(reader.next_line(), None);
    }

    #[test]
    fn rejects_unterminated_line_past_the_cap() {
        let mut reader = LineReader::new();
        let chunk = vec![b'a'; MAX_INPUT_BUFFER];
        assert!(reader.push(&chunk).is_ok());
        assert_eq!(reader.push(b"a"), Err(ReadError::LineTooLong));
    }

    #[test]
    fn empty_line_is_still_a_line() {
        let mut reader = LineReader::new();
        reader.push(b"\n").unwrap();
        assert_eq!(reader.next_line(), Some(Vec::new()));
    }
}
