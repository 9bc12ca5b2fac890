//! Typed control protocol messages.
//!
//! A [`Message`] pairs a transaction id with a [`MessageBody`], a tagged union
//! with one variant per message type. Bodies the control connection acts on
//! are fully typed; data-plane bodies (flow and port modification, statistics)
//! are carried as opaque bytes.

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::header::MessageType;
use crate::packet::{HeaderChain, MacAddress, PacketError, MAC_ADDRESS_LENGTH};
use crate::WireError;

/// Encoded size of a physical port description
pub const PHY_PORT_SIZE: usize = 48;

/// Maximum port name length, including the terminating NUL
pub const MAX_PORT_NAME_LEN: usize = 16;

/// Size of the flow match structure carried by FLOW_REMOVED
pub const MATCH_SIZE: usize = 40;

/// Buffer id meaning "packet not buffered on the switch"
pub const NO_BUFFER: u32 = 0xffff_ffff;

pub(crate) fn ensure(buf: &Bytes, needed: usize, what: &'static str) -> Result<(), WireError> {
    if buf.len() < needed {
        return Err(WireError::Malformed(what));
    }
    Ok(())
}

bitflags! {
    /// Switch capabilities advertised in FEATURES_REPLY
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct Capabilities: u32 {
        /// Flow statistics
        const FLOW_STATS = 1 << 0;
        /// Table statistics
        const TABLE_STATS = 1 << 1;
        /// Port statistics
        const PORT_STATS = 1 << 2;
        /// 802.1d spanning tree
        const STP = 1 << 3;
        /// Reserved, must be zero
        const RESERVED = 1 << 4;
        /// Can reassemble IP fragments
        const IP_REASM = 1 << 5;
        /// Queue statistics
        const QUEUE_STATS = 1 << 6;
        /// Match IP addresses in ARP packets
        const ARP_MATCH_IP = 1 << 7;
    }
}

bitflags! {
    /// Actions a switch supports, one bit per action type
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct Actions: u32 {
        /// Output to switch port
        const OUTPUT = 1 << 0;
        /// Set the 802.1q VLAN id
        const SET_VLAN_VID = 1 << 1;
        /// Set the 802.1q priority
        const SET_VLAN_PCP = 1 << 2;
        /// Strip the 802.1q header
        const STRIP_VLAN = 1 << 3;
        /// Ethernet source address
        const SET_DL_SRC = 1 << 4;
        /// Ethernet destination address
        const SET_DL_DST = 1 << 5;
        /// IP source address
        const SET_NW_SRC = 1 << 6;
        /// IP destination address
        const SET_NW_DST = 1 << 7;
        /// IP ToS
        const SET_NW_TOS = 1 << 8;
        /// TCP/UDP source port
        const SET_TP_SRC = 1 << 9;
        /// TCP/UDP destination port
        const SET_TP_DST = 1 << 10;
        /// Output to queue
        const ENQUEUE = 1 << 11;
    }
}

bitflags! {
    /// Administrative port settings
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct PortConfig: u32 {
        /// Port is administratively down
        const PORT_DOWN = 1 << 0;
        /// Disable 802.1D spanning tree on port
        const NO_STP = 1 << 1;
        /// Drop all packets except 802.1D spanning tree
        const NO_RECV = 1 << 2;
        /// Drop received 802.1D STP packets
        const NO_RECV_STP = 1 << 3;
        /// Do not include this port when flooding
        const NO_FLOOD = 1 << 4;
        /// Drop packets forwarded to port
        const NO_FWD = 1 << 5;
        /// Do not send packet-in messages for port
        const NO_PACKET_IN = 1 << 6;
    }
}

bitflags! {
    /// Current port state
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct PortState: u32 {
        /// No physical link present
        const LINK_DOWN = 1 << 0;
        /// Bits holding the spanning tree state
        const STP_MASK = 3 << 8;
    }
}

/// Spanning tree state encoded in [`PortState::STP_MASK`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StpState {
    /// Not learning or relaying frames
    Listen,
    /// Learning but not relaying frames
    Learn,
    /// Learning and relaying frames
    Forward,
    /// Not part of spanning tree
    Block,
}

impl PortState {
    /// Spanning tree state of the port
    pub fn stp(&self) -> StpState {
        match (self.bits() & Self::STP_MASK.bits()) >> 8 {
            0 => StpState::Listen,
            1 => StpState::Learn,
            2 => StpState::Forward,
            _ => StpState::Block,
        }
    }
}

bitflags! {
    /// Port speed, duplexity and medium features
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct PortFeatures: u32 {
        /// 10 Mb half-duplex
        const RATE_10MB_HD = 1 << 0;
        /// 10 Mb full-duplex
        const RATE_10MB_FD = 1 << 1;
        /// 100 Mb half-duplex
        const RATE_100MB_HD = 1 << 2;
        /// 100 Mb full-duplex
        const RATE_100MB_FD = 1 << 3;
        /// 1 Gb half-duplex
        const RATE_1GB_HD = 1 << 4;
        /// 1 Gb full-duplex
        const RATE_1GB_FD = 1 << 5;
        /// 10 Gb full-duplex
        const RATE_10GB_FD = 1 << 6;
        /// Copper medium
        const COPPER = 1 << 7;
        /// Fiber medium
        const FIBER = 1 << 8;
        /// Auto-negotiation
        const AUTONEG = 1 << 9;
        /// Pause
        const PAUSE = 1 << 10;
        /// Asymmetric pause
        const PAUSE_ASYM = 1 << 11;
    }
}

/// Description of a physical switch port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhyPort {
    /// Port number
    pub port_no: u16,
    /// Hardware address
    pub hw_addr: MacAddress,
    /// Human readable name
    pub name: String,
    /// Administrative settings
    pub config: PortConfig,
    /// Link and spanning tree state
    pub state: PortState,
    /// Current features
    pub curr: PortFeatures,
    /// Features being advertised
    pub advertised: PortFeatures,
    /// Features supported
    pub supported: PortFeatures,
    /// Features advertised by the peer
    pub peer: PortFeatures,
}

impl PhyPort {
    /// A port with no flags set
    pub fn new(port_no: u16, hw_addr: MacAddress, name: impl Into<String>) -> Self {
        Self {
            port_no,
            hw_addr,
            name: name.into(),
            config: PortConfig::empty(),
            state: PortState::empty(),
            curr: PortFeatures::empty(),
            advertised: PortFeatures::empty(),
            supported: PortFeatures::empty(),
            peer: PortFeatures::empty(),
        }
    }

    /// Usable for forwarding: administratively up, link up and not STP-blocked
    pub fn is_enabled(&self) -> bool {
        !self.config.contains(PortConfig::PORT_DOWN)
            && !self.state.contains(PortState::LINK_DOWN)
            && self.state.stp() != StpState::Block
    }

    /// Encode the 48-byte port description
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16(self.port_no);
        buf.put_slice(self.hw_addr.as_bytes());

        let name = self.name.as_bytes();
        let len = name.len().min(MAX_PORT_NAME_LEN);
        buf.put_slice(&name[..len]);
        buf.put_bytes(0, MAX_PORT_NAME_LEN - len);

        buf.put_u32(self.config.bits());
        buf.put_u32(self.state.bits());
        buf.put_u32(self.curr.bits());
        buf.put_u32(self.advertised.bits());
        buf.put_u32(self.supported.bits());
        buf.put_u32(self.peer.bits());
    }

    /// Decode a 48-byte port description
    pub fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        ensure(buf, PHY_PORT_SIZE, "phy_port")?;

        let port_no = buf.get_u16();
        let hw_addr = MacAddress::from_slice(&buf[..MAC_ADDRESS_LENGTH])
            .map_err(|_| WireError::Malformed("phy_port"))?;
        buf.advance(MAC_ADDRESS_LENGTH);

        let raw_name = buf.split_to(MAX_PORT_NAME_LEN);
        let end = raw_name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(MAX_PORT_NAME_LEN);
        let name = String::from_utf8_lossy(&raw_name[..end]).into_owned();

        Ok(Self {
            port_no,
            hw_addr,
            name,
            config: PortConfig::from_bits_retain(buf.get_u32()),
            state: PortState::from_bits_retain(buf.get_u32()),
            curr: PortFeatures::from_bits_retain(buf.get_u32()),
            advertised: PortFeatures::from_bits_retain(buf.get_u32()),
            supported: PortFeatures::from_bits_retain(buf.get_u32()),
            peer: PortFeatures::from_bits_retain(buf.get_u32()),
        })
    }
}

/// Body of FEATURES_REPLY
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeaturesReply {
    /// Switch identity
    pub datapath_id: u64,
    /// Packets the switch can buffer at once
    pub n_buffers: u32,
    /// Number of flow tables
    pub n_tables: u8,
    /// Capability bitset
    pub capabilities: Capabilities,
    /// Supported action bitset
    pub actions: Actions,
    /// Physical ports
    pub ports: Vec<PhyPort>,
}

impl FeaturesReply {
    const FIXED_SIZE: usize = 24;

    /// Encoded body size
    pub fn encoded_len(&self) -> usize {
        Self::FIXED_SIZE + self.ports.len() * PHY_PORT_SIZE
    }

    /// Encode the body
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u64(self.datapath_id);
        buf.put_u32(self.n_buffers);
        buf.put_u8(self.n_tables);
        buf.put_bytes(0, 3);
        buf.put_u32(self.capabilities.bits());
        buf.put_u32(self.actions.bits());
        for port in &self.ports {
            port.encode(buf);
        }
    }

    /// Decode the body
    pub fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        ensure(buf, Self::FIXED_SIZE, "features_reply")?;

        let datapath_id = buf.get_u64();
        let n_buffers = buf.get_u32();
        let n_tables = buf.get_u8();
        buf.advance(3);
        let capabilities = Capabilities::from_bits_retain(buf.get_u32());
        let actions = Actions::from_bits_retain(buf.get_u32());

        if buf.len() % PHY_PORT_SIZE != 0 {
            return Err(WireError::Malformed("features_reply"));
        }
        let mut ports = Vec::with_capacity(buf.len() / PHY_PORT_SIZE);
        while !buf.is_empty() {
            ports.push(PhyPort::decode(buf)?);
        }

        Ok(Self {
            datapath_id,
            n_buffers,
            n_tables,
            capabilities,
            actions,
            ports,
        })
    }
}

/// Body of GET_CONFIG_REPLY and SET_CONFIG
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SwitchConfig {
    /// Fragment handling flags
    pub flags: u16,
    /// Bytes of a new flow sent to the controller
    pub miss_send_len: u16,
}

impl SwitchConfig {
    const SIZE: usize = 4;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16(self.flags);
        buf.put_u16(self.miss_send_len);
    }

    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        ensure(buf, Self::SIZE, "switch_config")?;
        Ok(Self {
            flags: buf.get_u16(),
            miss_send_len: buf.get_u16(),
        })
    }
}

/// Body of ERROR
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorMsg {
    /// Error category
    pub err_type: u16,
    /// Category specific code
    pub code: u16,
    /// At least the first 64 bytes of the failed request
    pub data: Bytes,
}

impl ErrorMsg {
    /// Error type for a malformed request
    pub const BAD_REQUEST: u16 = 1;
    /// Request code for an unknown vendor
    pub const BAD_VENDOR: u16 = 3;

    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        ensure(buf, 4, "error")?;
        let err_type = buf.get_u16();
        let code = buf.get_u16();
        Ok(Self {
            err_type,
            code,
            data: buf.split_off(0),
        })
    }
}

/// Body of VENDOR
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorMsg {
    /// Vendor id
    pub vendor: u32,
    /// Vendor-defined payload
    pub data: Bytes,
}

/// Why a packet was sent to the controller
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PacketInReason {
    /// No matching flow
    NoMatch = 0,
    /// Explicit output to controller
    Action = 1,
}

impl TryFrom<u8> for PacketInReason {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PacketInReason::NoMatch),
            1 => Ok(PacketInReason::Action),
            _ => Err(WireError::Value {
                field: "packet_in.reason",
                value: value as u64,
            }),
        }
    }
}

/// Body of PACKET_IN
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketIn {
    /// Buffer id on the switch, or [`NO_BUFFER`]
    pub buffer_id: u32,
    /// Full length of the frame
    pub total_len: u16,
    /// Port the frame arrived on
    pub in_port: u16,
    /// Why the frame was sent
    pub reason: PacketInReason,
    /// Frame bytes (possibly truncated to miss_send_len)
    pub data: Bytes,
}

impl PacketIn {
    const FIXED_SIZE: usize = 10;

    /// Interpret the carried frame as a header chain
    pub fn frame(&self) -> Result<HeaderChain, PacketError> {
        HeaderChain::decode(self.data.clone())
    }

    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        ensure(buf, Self::FIXED_SIZE, "packet_in")?;
        let buffer_id = buf.get_u32();
        let total_len = buf.get_u16();
        let in_port = buf.get_u16();
        let reason = PacketInReason::try_from(buf.get_u8())?;
        buf.advance(1);
        Ok(Self {
            buffer_id,
            total_len,
            in_port,
            reason,
            data: buf.split_off(0),
        })
    }
}

/// Body of FLOW_REMOVED
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowRemoved {
    /// Match fields of the removed flow, uninterpreted
    pub match_fields: Bytes,
    /// Opaque controller-issued identifier
    pub cookie: u64,
    /// Flow priority
    pub priority: u16,
    /// Removal reason (idle timeout, hard timeout, delete)
    pub reason: u8,
    /// Seconds the flow was alive
    pub duration_sec: u32,
    /// Nanoseconds alive beyond `duration_sec`
    pub duration_nsec: u32,
    /// Idle timeout the flow was installed with
    pub idle_timeout: u16,
    /// Packets matched
    pub packet_count: u64,
    /// Bytes matched
    pub byte_count: u64,
}

impl FlowRemoved {
    const SIZE: usize = MATCH_SIZE + 40;

    fn encode(&self, buf: &mut BytesMut) {
        let len = self.match_fields.len().min(MATCH_SIZE);
        buf.put_slice(&self.match_fields[..len]);
        buf.put_bytes(0, MATCH_SIZE - len);
        buf.put_u64(self.cookie);
        buf.put_u16(self.priority);
        buf.put_u8(self.reason);
        buf.put_u8(0);
        buf.put_u32(self.duration_sec);
        buf.put_u32(self.duration_nsec);
        buf.put_u16(self.idle_timeout);
        buf.put_bytes(0, 2);
        buf.put_u64(self.packet_count);
        buf.put_u64(self.byte_count);
    }

    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        ensure(buf, Self::SIZE, "flow_removed")?;
        let match_fields = buf.split_to(MATCH_SIZE);
        let cookie = buf.get_u64();
        let priority = buf.get_u16();
        let reason = buf.get_u8();
        buf.advance(1);
        let duration_sec = buf.get_u32();
        let duration_nsec = buf.get_u32();
        let idle_timeout = buf.get_u16();
        buf.advance(2);
        Ok(Self {
            match_fields,
            cookie,
            priority,
            reason,
            duration_sec,
            duration_nsec,
            idle_timeout,
            packet_count: buf.get_u64(),
            byte_count: buf.get_u64(),
        })
    }
}

/// What changed about a port
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortReason {
    /// The port was added
    Add = 0,
    /// The port was removed
    Delete = 1,
    /// Some attribute of the port has changed
    Modify = 2,
}

impl TryFrom<u8> for PortReason {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PortReason::Add),
            1 => Ok(PortReason::Delete),
            2 => Ok(PortReason::Modify),
            _ => Err(WireError::Value {
                field: "port_status.reason",
                value: value as u64,
            }),
        }
    }
}

/// Body of PORT_STATUS
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortStatus {
    /// Kind of change
    pub reason: PortReason,
    /// Port description after the change
    pub desc: PhyPort,
}

impl PortStatus {
    const SIZE: usize = 8 + PHY_PORT_SIZE;

    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        ensure(buf, Self::SIZE, "port_status")?;
        let reason = PortReason::try_from(buf.get_u8())?;
        buf.advance(7);
        let desc = PhyPort::decode(buf)?;
        Ok(Self { reason, desc })
    }
}

/// Body of PACKET_OUT
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketOut {
    /// Buffer id on the switch, or [`NO_BUFFER`]
    pub buffer_id: u32,
    /// Ingress port the packet is treated as arriving on
    pub in_port: u16,
    /// Encoded action list, uninterpreted
    pub actions: Bytes,
    /// Frame bytes when not buffered
    pub data: Bytes,
}

impl PacketOut {
    const FIXED_SIZE: usize = 8;

    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        ensure(buf, Self::FIXED_SIZE, "packet_out")?;
        let buffer_id = buf.get_u32();
        let in_port = buf.get_u16();
        let actions_len = buf.get_u16() as usize;
        ensure(buf, actions_len, "packet_out")?;
        let actions = buf.split_to(actions_len);
        Ok(Self {
            buffer_id,
            in_port,
            actions,
            data: buf.split_off(0),
        })
    }
}

/// Message body, one variant per message type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    /// HELLO
    Hello,
    /// ERROR
    Error(ErrorMsg),
    /// ECHO_REQUEST with arbitrary payload
    EchoRequest(Bytes),
    /// ECHO_REPLY echoing the request payload
    EchoReply(Bytes),
    /// VENDOR
    Vendor(VendorMsg),
    /// FEATURES_REQUEST
    FeaturesRequest,
    /// FEATURES_REPLY
    FeaturesReply(FeaturesReply),
    /// GET_CONFIG_REQUEST
    GetConfigRequest,
    /// GET_CONFIG_REPLY
    GetConfigReply(SwitchConfig),
    /// SET_CONFIG
    SetConfig(SwitchConfig),
    /// PACKET_IN
    PacketIn(PacketIn),
    /// FLOW_REMOVED
    FlowRemoved(FlowRemoved),
    /// PORT_STATUS
    PortStatus(PortStatus),
    /// PACKET_OUT
    PacketOut(PacketOut),
    /// FLOW_MOD, uninterpreted
    FlowMod(Bytes),
    /// PORT_MOD, uninterpreted
    PortMod(Bytes),
    /// STATS_REQUEST, uninterpreted
    StatsRequest(Bytes),
    /// STATS_REPLY, uninterpreted
    StatsReply(Bytes),
    /// BARRIER_REQUEST
    BarrierRequest,
    /// BARRIER_REPLY
    BarrierReply,
}

impl MessageBody {
    /// Wire type of this body
    pub fn message_type(&self) -> MessageType {
        match self {
            MessageBody::Hello => MessageType::Hello,
            MessageBody::Error(_) => MessageType::Error,
            MessageBody::EchoRequest(_) => MessageType::EchoRequest,
            MessageBody::EchoReply(_) => MessageType::EchoReply,
            MessageBody::Vendor(_) => MessageType::Vendor,
            MessageBody::FeaturesRequest => MessageType::FeaturesRequest,
            MessageBody::FeaturesReply(_) => MessageType::FeaturesReply,
            MessageBody::GetConfigRequest => MessageType::GetConfigRequest,
            MessageBody::GetConfigReply(_) => MessageType::GetConfigReply,
            MessageBody::SetConfig(_) => MessageType::SetConfig,
            MessageBody::PacketIn(_) => MessageType::PacketIn,
            MessageBody::FlowRemoved(_) => MessageType::FlowRemoved,
            MessageBody::PortStatus(_) => MessageType::PortStatus,
            MessageBody::PacketOut(_) => MessageType::PacketOut,
            MessageBody::FlowMod(_) => MessageType::FlowMod,
            MessageBody::PortMod(_) => MessageType::PortMod,
            MessageBody::StatsRequest(_) => MessageType::StatsRequest,
            MessageBody::StatsReply(_) => MessageType::StatsReply,
            MessageBody::BarrierRequest => MessageType::BarrierRequest,
            MessageBody::BarrierReply => MessageType::BarrierReply,
        }
    }

    /// Encoded body size, excluding the common header
    pub fn encoded_len(&self) -> usize {
        match self {
            MessageBody::Hello
            | MessageBody::FeaturesRequest
            | MessageBody::GetConfigRequest
            | MessageBody::BarrierRequest
            | MessageBody::BarrierReply => 0,
            MessageBody::Error(err) => 4 + err.data.len(),
            MessageBody::EchoRequest(data)
            | MessageBody::EchoReply(data)
            | MessageBody::FlowMod(data)
            | MessageBody::PortMod(data)
            | MessageBody::StatsRequest(data)
            | MessageBody::StatsReply(data) => data.len(),
            MessageBody::Vendor(vendor) => 4 + vendor.data.len(),
            MessageBody::FeaturesReply(features) => features.encoded_len(),
            MessageBody::GetConfigReply(_) | MessageBody::SetConfig(_) => SwitchConfig::SIZE,
            MessageBody::PacketIn(pkt) => PacketIn::FIXED_SIZE + pkt.data.len(),
            MessageBody::FlowRemoved(_) => FlowRemoved::SIZE,
            MessageBody::PortStatus(_) => PortStatus::SIZE,
            MessageBody::PacketOut(pkt) => {
                PacketOut::FIXED_SIZE + pkt.actions.len() + pkt.data.len()
            }
        }
    }

    /// Encode the body (big-endian)
    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        match self {
            MessageBody::Hello
            | MessageBody::FeaturesRequest
            | MessageBody::GetConfigRequest
            | MessageBody::BarrierRequest
            | MessageBody::BarrierReply => {}
            MessageBody::Error(err) => {
                buf.put_u16(err.err_type);
                buf.put_u16(err.code);
                buf.put_slice(&err.data);
            }
            MessageBody::EchoRequest(data)
            | MessageBody::EchoReply(data)
            | MessageBody::FlowMod(data)
            | MessageBody::PortMod(data)
            | MessageBody::StatsRequest(data)
            | MessageBody::StatsReply(data) => buf.put_slice(data),
            MessageBody::Vendor(vendor) => {
                buf.put_u32(vendor.vendor);
                buf.put_slice(&vendor.data);
            }
            MessageBody::FeaturesReply(features) => features.encode(buf),
            MessageBody::GetConfigReply(config) | MessageBody::SetConfig(config) => {
                config.encode(buf)
            }
            MessageBody::PacketIn(pkt) => {
                buf.put_u32(pkt.buffer_id);
                buf.put_u16(pkt.total_len);
                buf.put_u16(pkt.in_port);
                buf.put_u8(pkt.reason as u8);
                buf.put_u8(0);
                buf.put_slice(&pkt.data);
            }
            MessageBody::FlowRemoved(flow) => flow.encode(buf),
            MessageBody::PortStatus(status) => {
                buf.put_u8(status.reason as u8);
                buf.put_bytes(0, 7);
                status.desc.encode(buf);
            }
            MessageBody::PacketOut(pkt) => {
                let actions_len =
                    u16::try_from(pkt.actions.len()).map_err(|_| WireError::Value {
                        field: "packet_out.actions_len",
                        value: pkt.actions.len() as u64,
                    })?;
                buf.put_u32(pkt.buffer_id);
                buf.put_u16(pkt.in_port);
                buf.put_u16(actions_len);
                buf.put_slice(&pkt.actions);
                buf.put_slice(&pkt.data);
            }
        }
        Ok(())
    }

    /// Decode a body of the given type
    pub fn decode(typ: MessageType, mut buf: Bytes) -> Result<Self, WireError> {
        let body = match typ {
            MessageType::Hello => MessageBody::Hello,
            MessageType::Error => MessageBody::Error(ErrorMsg::decode(&mut buf)?),
            MessageType::EchoRequest => MessageBody::EchoRequest(buf),
            MessageType::EchoReply => MessageBody::EchoReply(buf),
            MessageType::Vendor => {
                ensure(&buf, 4, "vendor")?;
                let vendor = buf.get_u32();
                MessageBody::Vendor(VendorMsg { vendor, data: buf })
            }
            MessageType::FeaturesRequest => MessageBody::FeaturesRequest,
            MessageType::FeaturesReply => {
                MessageBody::FeaturesReply(FeaturesReply::decode(&mut buf)?)
            }
            MessageType::GetConfigRequest => MessageBody::GetConfigRequest,
            MessageType::GetConfigReply => {
                MessageBody::GetConfigReply(SwitchConfig::decode(&mut buf)?)
            }
            MessageType::SetConfig => MessageBody::SetConfig(SwitchConfig::decode(&mut buf)?),
            MessageType::PacketIn => MessageBody::PacketIn(PacketIn::decode(&mut buf)?),
            MessageType::FlowRemoved => MessageBody::FlowRemoved(FlowRemoved::decode(&mut buf)?),
            MessageType::PortStatus => MessageBody::PortStatus(PortStatus::decode(&mut buf)?),
            MessageType::PacketOut => MessageBody::PacketOut(PacketOut::decode(&mut buf)?),
            MessageType::FlowMod => MessageBody::FlowMod(buf),
            MessageType::PortMod => MessageBody::PortMod(buf),
            MessageType::StatsRequest => MessageBody::StatsRequest(buf),
            MessageType::StatsReply => MessageBody::StatsReply(buf),
            MessageType::BarrierRequest => MessageBody::BarrierRequest,
            MessageType::BarrierReply => MessageBody::BarrierReply,
        };
        Ok(body)
    }
}

/// A complete control message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Transaction id
    pub xid: u32,
    /// Typed body
    pub body: MessageBody,
}

impl Message {
    /// Message with an unassigned (zero) transaction id
    pub fn new(body: MessageBody) -> Self {
        Self { xid: 0, body }
    }

    /// Message with an explicit transaction id
    pub fn with_xid(xid: u32, body: MessageBody) -> Self {
        Self { xid, body }
    }

    /// Wire type of the body
    pub fn message_type(&self) -> MessageType {
        self.body.message_type()
    }
}
