//! Encoding and decoding of whole control messages.
//!
//! Sessions only handle typed [`Message`]s; the [`MessageCodec`] trait is the
//! seam between them and the byte stream. [`OpenFlowCodec`] implements the
//! OpenFlow 1.0 layout and is what the server uses unless told otherwise.

use bytes::{Bytes, BytesMut};

use crate::header::{OfpHeader, MAX_MESSAGE_SIZE, OFP_HEADER_SIZE};
use crate::message::{Message, MessageBody};
use crate::WireError;

/// Turns typed messages into bytes and back
pub trait MessageCodec: Send + Sync + std::fmt::Debug {
    /// Encode one whole message, header included
    fn encode(&self, msg: &Message) -> Result<Bytes, WireError>;

    /// Decode one whole message as delimited by the framing layer
    fn decode(&self, bytes: Bytes) -> Result<Message, WireError>;
}

/// OpenFlow 1.0 codec
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenFlowCodec;

impl OpenFlowCodec {
    /// Create a new codec
    pub fn new() -> Self {
        Self
    }
}

impl MessageCodec for OpenFlowCodec {
    fn encode(&self, msg: &Message) -> Result<Bytes, WireError> {
        let total = OFP_HEADER_SIZE + msg.body.encoded_len();
        if total > MAX_MESSAGE_SIZE {
            return Err(WireError::Size(total));
        }

        let mut buf = BytesMut::with_capacity(total);
        OfpHeader::new(msg.message_type(), total as u16, msg.xid).encode(&mut buf);
        msg.body.encode(&mut buf)?;

        debug_assert_eq!(buf.len(), total);
        Ok(buf.freeze())
    }

    fn decode(&self, mut bytes: Bytes) -> Result<Message, WireError> {
        let actual = bytes.len();
        let header = OfpHeader::decode(&mut bytes)?;
        if header.length as usize != actual {
            return Err(WireError::Length {
                declared: header.length as usize,
                actual,
            });
        }

        let body = MessageBody::decode(header.typ, bytes)?;
        Ok(Message::with_xid(header.xid, body))
    }
}
