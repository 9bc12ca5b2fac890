//! Layered packet header codec.
//!
//! Packets carried inside PACKET_IN messages are interpreted as a chain of
//! headers, outermost first. The chain is stored as an arena: each layer is
//! addressed by its index, the parent of layer `i` is `i - 1` and its child is
//! `i + 1`. A payload layer is always the innermost one.
//!
//! ```text
//! +----------------------+----------------------------+
//! | source (6B)          | hardware address           |
//! +----------------------+----------------------------+
//! | destination (6B)     | hardware address           |
//! +----------------------+----------------------------+
//! | tpid + tci (opt, 4B) | present when tpid = 0x8100 |
//! +----------------------+----------------------------+
//! | ether_type (2B)      | encapsulated protocol      |
//! +----------------------+----------------------------+
//! | payload              | opaque, may be empty       |
//! +----------------------+----------------------------+
//! ```

mod ethernet;
mod mac;

pub use ethernet::{EtherType, Ethernet, VlanTag, ETHERNET_HEADER_LENGTH, VLAN_TAG_LENGTH};
pub use mac::{MacAddress, MAC_ADDRESS_LENGTH};

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Packet decoding errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PacketError {
    /// Fewer bytes than the fixed part of a header
    #[error("not enough data: need {needed} bytes, have {available}")]
    NotEnoughData {
        /// Minimum bytes required
        needed: usize,
        /// Bytes actually available
        available: usize,
    },

    /// Unparseable hardware address
    #[error("invalid hardware address: {0}")]
    InvalidAddress(String),

    /// Attempt to stack a layer below a payload
    #[error("payload layer cannot carry a child")]
    PayloadHasChild,
}

/// A single layer of a packet
pub trait Header {
    /// Bytes occupied by this layer alone
    fn header_length(&self) -> usize;

    /// Protocol identifier of the next layer, if this layer carries one
    fn encapsulated_protocol(&self) -> Option<EtherType>;

    /// Write this layer's own fields
    fn encode_header(&self, buf: &mut BytesMut);
}

/// Opaque bytes terminating a chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload(pub Bytes);

impl Header for Payload {
    fn header_length(&self) -> usize {
        self.0.len()
    }

    fn encapsulated_protocol(&self) -> Option<EtherType> {
        None
    }

    fn encode_header(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.0);
    }
}

/// One entry in a [`HeaderChain`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Layer {
    /// Link-layer header
    Ethernet(Ethernet),
    /// Opaque payload
    Payload(Payload),
}

impl Layer {
    fn as_header(&self) -> &dyn Header {
        match self {
            Layer::Ethernet(eth) => eth as &dyn Header,
            Layer::Payload(payload) => payload as &dyn Header,
        }
    }
}

impl Header for Layer {
    fn header_length(&self) -> usize {
        self.as_header().header_length()
    }

    fn encapsulated_protocol(&self) -> Option<EtherType> {
        self.as_header().encapsulated_protocol()
    }

    fn encode_header(&self, buf: &mut BytesMut) {
        self.as_header().encode_header(buf)
    }
}

/// Ordered, acyclic sequence of headers (outer to inner)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderChain {
    layers: Vec<Layer>,
}

impl HeaderChain {
    /// Empty chain
    pub fn new() -> Self {
        Self::default()
    }

    /// Chain consisting of a link-layer header and an optional payload
    pub fn ethernet(eth: Ethernet, payload: Bytes) -> Self {
        let mut layers = vec![Layer::Ethernet(eth)];
        if !payload.is_empty() {
            layers.push(Layer::Payload(Payload(payload)));
        }
        Self { layers }
    }

    /// Decode a frame starting at the link layer.
    ///
    /// Anything after the link-layer header becomes an opaque payload child;
    /// an exact-length frame has no child.
    pub fn decode(mut data: Bytes) -> Result<Self, PacketError> {
        let eth = Ethernet::decode(&mut data)?;
        Ok(Self::ethernet(eth, data))
    }

    /// Append an inner layer
    pub fn push(&mut self, layer: Layer) -> Result<usize, PacketError> {
        if matches!(self.layers.last(), Some(Layer::Payload(_))) {
            return Err(PacketError::PayloadHasChild);
        }
        self.layers.push(layer);
        Ok(self.layers.len() - 1)
    }

    /// Number of layers
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Whether the chain has no layers
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Layer at `index`
    pub fn get(&self, index: usize) -> Option<&Layer> {
        self.layers.get(index)
    }

    /// Outer neighbour of the layer at `index`
    pub fn parent(&self, index: usize) -> Option<&Layer> {
        index.checked_sub(1).and_then(|i| self.layers.get(i))
    }

    /// Inner neighbour of the layer at `index`
    pub fn child(&self, index: usize) -> Option<&Layer> {
        if index >= self.layers.len() {
            return None;
        }
        self.layers.get(index + 1)
    }

    /// Layers, outermost first
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// The link-layer header, if the chain starts with one
    pub fn link_layer(&self) -> Option<&Ethernet> {
        match self.layers.first() {
            Some(Layer::Ethernet(eth)) => Some(eth),
            _ => None,
        }
    }

    /// The innermost opaque payload, if any
    pub fn payload(&self) -> Option<&Bytes> {
        match self.layers.last() {
            Some(Layer::Payload(Payload(bytes))) => Some(bytes),
            _ => None,
        }
    }

    /// Header length of the layer at `index` plus the total length of its child
    pub fn total_length_at(&self, index: usize) -> usize {
        match self.layers.get(index) {
            Some(layer) => layer.header_length() + self.total_length_at(index + 1),
            None => 0,
        }
    }

    /// Encoded length of the whole chain
    pub fn total_length(&self) -> usize {
        self.total_length_at(0)
    }

    /// Concatenate every layer, outermost first
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.total_length());
        for layer in &self.layers {
            layer.encode_header(&mut buf);
        }
        buf.freeze()
    }
}
