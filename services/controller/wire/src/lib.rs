//! Control protocol messages, codec and framing for the controller.
//!
//! This crate provides the wire-level half of the controller: the typed
//! message model exchanged with switches, the OpenFlow 1.0 codec that turns
//! it into bytes and back, stream framing, and the layered packet header
//! codec used to look inside PACKET_IN payloads.
//!
//! ## Features
//!
//! - **Typed Messages**: one [`MessageBody`] variant per message type
//! - **Pluggable Codec**: sessions depend on the [`MessageCodec`] trait only
//! - **Zero-Copy I/O**: uses `Bytes`/`BytesMut` for minimal allocations
//! - **Header Chains**: link-layer header, optional VLAN tag, opaque payload
//!
//! ## Wire Format
//!
//! ```text
//! +----------------------+----------------------------+
//! | u8 version           | 0x01                       |
//! +----------------------+----------------------------+
//! | u8 type              | message type               |
//! +----------------------+----------------------------+
//! | u16 length           | total length incl. header  |
//! +----------------------+----------------------------+
//! | u32 xid              | transaction id             |
//! +----------------------+----------------------------+
//! | body                 | type specific (0..65527)   |
//! +----------------------+----------------------------+
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod error;
pub mod frame;
pub mod header;
pub mod message;
pub mod packet;

// Re-export main types
pub use codec::{MessageCodec, OpenFlowCodec};
pub use error::WireError;
pub use frame::FrameDecoder;
pub use header::{MessageType, OfpHeader, MAX_MESSAGE_SIZE, OFP_HEADER_SIZE, OFP_VERSION};
pub use message::{
    Actions, Capabilities, ErrorMsg, FeaturesReply, FlowRemoved, Message, MessageBody, PacketIn,
    PacketInReason, PacketOut, PhyPort, PortConfig, PortFeatures, PortReason, PortState,
    PortStatus, StpState, SwitchConfig, VendorMsg, NO_BUFFER, PHY_PORT_SIZE,
};
pub use packet::{EtherType, Ethernet, HeaderChain, Layer, MacAddress, PacketError, VlanTag};
