//! Message framing for the control protocol.
//!
//! Messages are self-delimiting: the common header carries the total length
//! at offset 2. The decoder peeks that field and splits whole messages off
//! the receive buffer without interpreting their bodies.

use bytes::{Bytes, BytesMut};

use crate::header::{MAX_MESSAGE_SIZE, OFP_HEADER_SIZE};
use crate::WireError;

/// Frame decoder for splitting an inbound byte stream into messages
#[derive(Debug)]
pub struct FrameDecoder {
    max_message_size: usize,
}

impl FrameDecoder {
    /// Create a new frame decoder
    pub fn new() -> Self {
        Self {
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }

    /// Create a decoder that rejects messages longer than `max`
    pub fn with_max_message_size(max: usize) -> Self {
        Self {
            max_message_size: max.clamp(OFP_HEADER_SIZE, MAX_MESSAGE_SIZE),
        }
    }

    /// Split one whole message off the front of `buf`.
    ///
    /// Returns `Ok(None)` until enough bytes have arrived. A declared length
    /// shorter than the header or above the limit is unrecoverable: the stream
    /// can no longer be resynchronised.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Bytes>, WireError> {
        // Need the version, type and length fields
        if buf.len() < 4 {
            return Ok(None);
        }

        let length = u16::from_be_bytes([buf[2], buf[3]]) as usize;
        if length < OFP_HEADER_SIZE || length > self.max_message_size {
            return Err(WireError::Size(length));
        }

        if buf.len() < length {
            return Ok(None);
        }

        Ok(Some(buf.split_to(length).freeze()))
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}
