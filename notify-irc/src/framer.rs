//! Incremental newline framing over a byte stream.
//!
//! Reads from a socket or a pipe can stop anywhere, including in the middle
//! of a line. [`LineFramer`] keeps whatever has not been terminated yet and
//! hands out complete lines one at a time.

use thiserror::Error;

/// Buffer size used for both the server stream and local input.
pub const DEFAULT_CAPACITY: usize = 2048;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("line exceeds buffer capacity of {capacity} bytes without a terminator")]
    Overflow { capacity: usize },
}

/// Accumulates bytes for one stream and splits them on `\n`.
///
/// The buffer never holds more than `capacity - 1` bytes. Feeding past that
/// point is rejected with [`FrameError::Overflow`] instead of truncating.
#[derive(Debug)]
pub struct LineFramer {
    buffer: Vec<u8>,
    capacity: usize,
}

impl LineFramer {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes that can still be fed before the buffer is full.
    pub fn remaining(&self) -> usize {
        (self.capacity - 1).saturating_sub(self.buffer.len())
    }

    /// Unterminated bytes currently held.
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    pub fn feed(&mut self, bytes: &[u8]) -> Result<(), FrameError> {
        if bytes.len() > self.remaining() {
            return Err(FrameError::Overflow {
                capacity: self.capacity,
            });
        }
        self.buffer.extend_from_slice(bytes);
        Ok(())
    }

    /// Pops the first complete line, with `\n` or `\r\n` stripped.
    pub fn next_line(&mut self) -> Option<String> {
        let newline = self.buffer.iter().position(|&byte| byte == b'\n')?;
        let mut line = &self.buffer[..newline];
        if let Some(stripped) = line.strip_suffix(b"\r") {
            line = stripped;
        }
        let text = String::from_utf8_lossy(line).into_owned();
        self.buffer.drain(..=newline);
        Some(text)
    }

    /// Fails when the buffer is full and no line can be extracted from it.
    pub fn ensure_room(&self) -> Result<(), FrameError> {
        if self.remaining() == 0 && !self.buffer.contains(&b'\n') {
            return Err(FrameError::Overflow {
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    /// Drains the unterminated tail, used once the stream has ended.
    pub fn take_remainder(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let mut tail = std::mem::take(&mut self.buffer);
        if tail.last() == Some(&b'\r') {
            tail.pop();
        }
        Some(String::from_utf8_lossy(&tail).into_owned())
    }
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
