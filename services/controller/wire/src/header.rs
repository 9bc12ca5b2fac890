//! OpenFlow 1.0 common header.
//!
//! Every message starts with the same 8-byte header carrying the protocol
//! version, the message type, the total message length and the transaction id.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::WireError;

/// Protocol version spoken by this controller (OpenFlow 1.0)
pub const OFP_VERSION: u8 = 0x01;

/// Common header size in bytes
pub const OFP_HEADER_SIZE: usize = 8;

/// Largest message the 16-bit length field can describe
pub const MAX_MESSAGE_SIZE: usize = u16::MAX as usize;

/// Message types as defined by the control protocol
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    /// Greeting, sent by both sides on connect
    Hello = 0,
    /// Error notification
    Error = 1,
    /// Keepalive probe
    EchoRequest = 2,
    /// Keepalive reply
    EchoReply = 3,
    /// Vendor extension
    Vendor = 4,
    /// Feature negotiation request
    FeaturesRequest = 5,
    /// Feature negotiation reply
    FeaturesReply = 6,
    /// Switch configuration query
    GetConfigRequest = 7,
    /// Switch configuration reply
    GetConfigReply = 8,
    /// Switch configuration update
    SetConfig = 9,
    /// Packet forwarded to the controller
    PacketIn = 10,
    /// Flow entry expired or deleted
    FlowRemoved = 11,
    /// Port added, removed or modified
    PortStatus = 12,
    /// Packet injected by the controller
    PacketOut = 13,
    /// Flow table modification
    FlowMod = 14,
    /// Port behaviour modification
    PortMod = 15,
    /// Statistics query
    StatsRequest = 16,
    /// Statistics reply
    StatsReply = 17,
    /// Barrier request
    BarrierRequest = 18,
    /// Barrier reply
    BarrierReply = 19,
}

impl TryFrom<u8> for MessageType {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, WireError> {
        match value {
            0 => Ok(MessageType::Hello),
            1 => Ok(MessageType::Error),
            2 => Ok(MessageType::EchoRequest),
            3 => Ok(MessageType::EchoReply),
            4 => Ok(MessageType::Vendor),
            5 => Ok(MessageType::FeaturesRequest),
            6 => Ok(MessageType::FeaturesReply),
            7 => Ok(MessageType::GetConfigRequest),
            8 => Ok(MessageType::GetConfigReply),
            9 => Ok(MessageType::SetConfig),
            10 => Ok(MessageType::PacketIn),
            11 => Ok(MessageType::FlowRemoved),
            12 => Ok(MessageType::PortStatus),
            13 => Ok(MessageType::PacketOut),
            14 => Ok(MessageType::FlowMod),
            15 => Ok(MessageType::PortMod),
            16 => Ok(MessageType::StatsRequest),
            17 => Ok(MessageType::StatsReply),
            18 => Ok(MessageType::BarrierRequest),
            19 => Ok(MessageType::BarrierReply),
            _ => Err(WireError::Type(value)),
        }
    }
}

impl MessageType {
    /// Whether this type expects a correlated reply from the peer.
    pub fn is_request(self) -> bool {
        self.reply_type().is_some()
    }

    /// Whether this type answers one of the request types.
    pub fn is_reply(self) -> bool {
        matches!(
            self,
            MessageType::EchoReply
                | MessageType::FeaturesReply
                | MessageType::GetConfigReply
                | MessageType::StatsReply
                | MessageType::BarrierReply
        )
    }

    /// The reply type a request of this type is answered with.
    pub fn reply_type(self) -> Option<MessageType> {
        match self {
            MessageType::EchoRequest => Some(MessageType::EchoReply),
            MessageType::FeaturesRequest => Some(MessageType::FeaturesReply),
            MessageType::GetConfigRequest => Some(MessageType::GetConfigReply),
            MessageType::StatsRequest => Some(MessageType::StatsReply),
            MessageType::BarrierRequest => Some(MessageType::BarrierReply),
            _ => None,
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MessageType::Hello => "HELLO",
            MessageType::Error => "ERROR",
            MessageType::EchoRequest => "ECHO_REQUEST",
            MessageType::EchoReply => "ECHO_REPLY",
            MessageType::Vendor => "VENDOR",
            MessageType::FeaturesRequest => "FEATURES_REQUEST",
            MessageType::FeaturesReply => "FEATURES_REPLY",
            MessageType::GetConfigRequest => "GET_CONFIG_REQUEST",
            MessageType::GetConfigReply => "GET_CONFIG_REPLY",
            MessageType::SetConfig => "SET_CONFIG",
            MessageType::PacketIn => "PACKET_IN",
            MessageType::FlowRemoved => "FLOW_REMOVED",
            MessageType::PortStatus => "PORT_STATUS",
            MessageType::PacketOut => "PACKET_OUT",
            MessageType::FlowMod => "FLOW_MOD",
            MessageType::PortMod => "PORT_MOD",
            MessageType::StatsRequest => "STATS_REQUEST",
            MessageType::StatsReply => "STATS_REPLY",
            MessageType::BarrierRequest => "BARRIER_REQUEST",
            MessageType::BarrierReply => "BARRIER_REPLY",
        };
        f.write_str(name)
    }
}

/// Common message header (8 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OfpHeader {
    /// Protocol version
    pub version: u8,
    /// Message type
    pub typ: MessageType,
    /// Total message length including this header
    pub length: u16,
    /// Transaction id
    pub xid: u32,
}

impl OfpHeader {
    /// Create a header for a message of `length` total bytes
    pub fn new(typ: MessageType, length: u16, xid: u32) -> Self {
        Self {
            version: OFP_VERSION,
            typ,
            length,
            xid,
        }
    }

    /// Encode the header to bytes (big-endian)
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.version);
        buf.put_u8(self.typ as u8);
        buf.put_u16(self.length);
        buf.put_u32(self.xid);
    }

    /// Decode the header from bytes (big-endian)
    pub fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        if buf.len() < OFP_HEADER_SIZE {
            return Err(WireError::Incomplete);
        }

        let version = buf.get_u8();
        if version != OFP_VERSION {
            return Err(WireError::Version(version));
        }

        let typ = MessageType::try_from(buf.get_u8())?;
        let length = buf.get_u16();
        if (length as usize) < OFP_HEADER_SIZE {
            return Err(WireError::Size(length as usize));
        }
        let xid = buf.get_u32();

        Ok(Self {
            version,
            typ,
            length,
            xid,
        })
    }
}
