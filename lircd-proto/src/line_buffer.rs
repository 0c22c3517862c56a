//! Per-connection input line buffering.

use lircd_common::ids::PACKET_SIZE;

/// Append-only byte accumulator yielding complete newline-terminated lines.
///
/// Reads from a non-blocking socket land here in arbitrary chunks; the owning handler pops
/// complete lines until none remain and leaves any partial tail buffered for the next read.
/// A buffered run longer than [`PACKET_SIZE`] with no newline in sight is an overflow; the
/// connection owning the buffer must be dropped.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buffer: Vec<u8>,
}

impl LineBuffer {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one chunk of raw socket input.
    pub fn append(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Pops the next complete line, trailing `\n` and `\r` stripped.
    ///
    /// Returns `None` while no newline is buffered. Input is decoded lossily; the wire protocol
    /// is ASCII and stray bytes only ever show up in diagnostics.
    pub fn next_line(&mut self) -> Option<String> {
        let newline = self.buffer.iter().position(|byte| *byte == b'\n')?;
        let mut line: Vec<u8> = self.buffer.drain(..=newline).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    /// Reports whether the buffered residue exceeds the packet bound without a newline.
    #[must_use]
    pub fn is_overflowed(&self) -> bool {
        match self.buffer.iter().position(|byte| *byte == b'\n') {
            Some(newline) => newline >= PACKET_SIZE,
            None => self.buffer.len() > PACKET_SIZE,
        }
    }

    /// Returns the number of buffered bytes not yet consumed as lines.
    #[must_use]
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::LineBuffer;
    use googletest::prelude::*;
    use lircd_common::ids::PACKET_SIZE;
    use rstest::rstest;

    #[rstest]
    fn splits_chunks_into_lines() {
        let mut buffer = LineBuffer::new();
        buffer.append(b"LIST\nVERS");
        assert_that!(buffer.next_line(), eq(&Some("LIST".to_owned())));
        assert_that!(buffer.next_line(), eq(&None));
        buffer.append(b"ION\n");
        assert_that!(buffer.next_line(), eq(&Some("VERSION".to_owned())));
        assert_that!(buffer.pending_bytes(), eq(0_usize));
    }

    #[rstest]
    fn strips_carriage_returns() {
        let mut buffer = LineBuffer::new();
        buffer.append(b"SEND_ONCE tv KEY_OK\r\n");
        assert_that!(buffer.next_line(), eq(&Some("SEND_ONCE tv KEY_OK".to_owned())));
    }

    #[rstest]
    fn yields_empty_lines() {
        let mut buffer = LineBuffer::new();
        buffer.append(b"\n\n");
        assert_that!(buffer.next_line(), eq(&Some(String::new())));
        assert_that!(buffer.next_line(), eq(&Some(String::new())));
        assert_that!(buffer.next_line(), eq(&None));
    }

    #[rstest]
    fn flags_overflow_past_the_packet_bound() {
        let mut buffer = LineBuffer::new();
        buffer.append(&vec![b'x'; PACKET_SIZE]);
        assert_that!(buffer.is_overflowed(), eq(false));
        buffer.append(b"x");
        assert_that!(buffer.is_overflowed(), eq(true));
    }

    #[rstest]
    fn short_lines_behind_a_newline_never_overflow() {
        let mut buffer = LineBuffer::new();
        buffer.append(b"LIST\n");
        buffer.append(&vec![b'x'; PACKET_SIZE - 8]);
        assert_that!(buffer.is_overflowed(), eq(false));
        assert_that!(buffer.next_line(), eq(&Some("LIST".to_owned())));
    }
}
