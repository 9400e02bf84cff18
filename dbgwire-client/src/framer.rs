// Message framing for the NUL-delimited byte stream
//
// Raw TCP chunks may hold zero, one or many complete frames plus a trailing
// partial frame. The framer splits on the delimiter and carries the partial
// tail over to the next chunk.

use crate::protocol::{DebugWireError, WireResult, DELIMITER, MAX_FRAME_SIZE};
use bytes::{Bytes, BytesMut};
use tracing::{trace, warn};

#[derive(Debug)]
pub struct MessageFramer {
    // Bytes of the incomplete trailing frame, never containing a delimiter
    buffer: BytesMut,
    max_frame_size: usize,
    // Set while skipping the rest of an oversized frame
    discarding: bool,
}

impl Default for MessageFramer {
    fn default() -> Self {
        Self::new(MAX_FRAME_SIZE)
    }
}

impl MessageFramer {
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            max_frame_size,
            discarding: false,
        }
    }

    /// Feed one inbound chunk.
    ///
    /// Returns the complete frames found in this chunk, in stream order,
    /// without their delimiters. An oversized frame shows up as
    /// `Err(FrameTooLarge)` at its position and does not disturb its neighbours.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<WireResult<Bytes>> {
        let mut frames = Vec::new();
        let mut rest = chunk;

        while let Some(index) = rest.iter().position(|&b| b == DELIMITER) {
            frames.push(self.complete(&rest[..index]));
            rest = &rest[index + 1..];
        }

        self.accumulate(rest);
        frames
    }

    /// Number of bytes waiting for a delimiter
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    // Only the first frame of a chunk can have a buffered prefix; once it is
    // taken the buffer is empty and later frames come straight from the chunk.
    fn complete(&mut self, head: &[u8]) -> WireResult<Bytes> {
        if self.discarding {
            self.discarding = false;
            return Err(DebugWireError::FrameTooLarge {
                max: self.max_frame_size,
            });
        }

        if self.buffer.len() + head.len() > self.max_frame_size {
            self.buffer.clear();
            return Err(DebugWireError::FrameTooLarge {
                max: self.max_frame_size,
            });
        }

        if self.buffer.is_empty() {
            trace!("Frame of {} bytes", head.len());
            return Ok(Bytes::copy_from_slice(head));
        }

        self.buffer.extend_from_slice(head);
        let frame = self.buffer.split().freeze();
        trace!("Frame of {} bytes (reassembled)", frame.len());
        Ok(frame)
    }

    fn accumulate(&mut self, tail: &[u8]) {
        if self.discarding || tail.is_empty() {
            return;
        }

        if self.buffer.len() + tail.len() > self.max_frame_size {
            warn!(
                "Partial frame exceeds {} bytes, discarding until next delimiter",
                self.max_frame_size
            );
            self.buffer.clear();
            self.discarding = true;
            return;
        }

        self.buffer.extend_from_slice(tail);
    }
}
