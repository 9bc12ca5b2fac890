//! Link-layer (Ethernet II) header with optional 802.1Q tag.

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use super::{Header, MacAddress, PacketError, MAC_ADDRESS_LENGTH};

/// Untagged header length
pub const ETHERNET_HEADER_LENGTH: usize = 14;

/// Length of the optional tag (TPID + TCI)
pub const VLAN_TAG_LENGTH: usize = 4;

/// Two-byte protocol identifier following the addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EtherType(pub u16);

impl EtherType {
    /// Internet Protocol version 4
    pub const IPV4: EtherType = EtherType(0x0800);
    /// Address Resolution Protocol
    pub const ARP: EtherType = EtherType(0x0806);
    /// Reverse ARP
    pub const RARP: EtherType = EtherType(0x8035);
    /// 802.1Q tag protocol identifier
    pub const TAG_VLAN: EtherType = EtherType(0x8100);
    /// Internet Protocol version 6
    pub const IPV6: EtherType = EtherType(0x86DD);
    /// 802.1ad provider bridging
    pub const MAC_IN_MAC: EtherType = EtherType(0x88A8);
    /// Link Layer Discovery Protocol
    pub const LLDP: EtherType = EtherType(0x88CC);
    /// Legacy double tagging
    pub const Q_IN_Q: EtherType = EtherType(0x9100);

    /// Human readable name for well-known values
    pub fn name(self) -> Option<&'static str> {
        match self {
            EtherType::IPV4 => Some("IPv4"),
            EtherType::ARP => Some("ARP"),
            EtherType::RARP => Some("RARP"),
            EtherType::TAG_VLAN => Some("VLAN"),
            EtherType::IPV6 => Some("IPv6"),
            EtherType::MAC_IN_MAC => Some("MAC-in-MAC"),
            EtherType::LLDP => Some("LLDP"),
            EtherType::Q_IN_Q => Some("Q-in-Q"),
            _ => None,
        }
    }
}

impl fmt::Display for EtherType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X}", self.0)
    }
}

impl From<u16> for EtherType {
    fn from(value: u16) -> Self {
        EtherType(value)
    }
}

/// 802.1Q tag control information
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VlanTag {
    /// Tag protocol identifier as seen on the wire
    pub tpid: u16,
    /// Tag control information (priority, DEI, VLAN id)
    pub tci: u16,
}

impl VlanTag {
    /// 802.1Q tag for `vlan_id` with the given priority
    pub fn new(priority: u8, vlan_id: u16) -> Self {
        Self {
            tpid: EtherType::TAG_VLAN.0,
            tci: ((priority as u16 & 0x07) << 13) | (vlan_id & 0x0FFF),
        }
    }

    /// Priority code point (0..7)
    pub fn priority(&self) -> u8 {
        ((self.tci >> 13) & 0x07) as u8
    }

    /// VLAN identifier (0..4095)
    pub fn vlan_id(&self) -> u16 {
        self.tci & 0x0FFF
    }
}

/// Link-layer header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ethernet {
    /// Source address
    pub source: MacAddress,
    /// Destination address
    pub destination: MacAddress,
    /// Optional 802.1Q tag
    pub vlan: Option<VlanTag>,
    /// Protocol of the encapsulated data
    pub ether_type: EtherType,
}

impl Ethernet {
    /// Untagged header
    pub fn new(source: MacAddress, destination: MacAddress, ether_type: EtherType) -> Self {
        Self {
            source,
            destination,
            vlan: None,
            ether_type,
        }
    }

    /// Add an 802.1Q tag
    pub fn with_vlan(mut self, tag: VlanTag) -> Self {
        self.vlan = Some(tag);
        self
    }

    /// Decode the fixed fields, consuming them from `buf`
    pub fn decode(buf: &mut Bytes) -> Result<Self, PacketError> {
        if buf.len() < ETHERNET_HEADER_LENGTH {
            return Err(PacketError::NotEnoughData {
                needed: ETHERNET_HEADER_LENGTH,
                available: buf.len(),
            });
        }

        let source = MacAddress::from_slice(&buf[..MAC_ADDRESS_LENGTH])?;
        let destination =
            MacAddress::from_slice(&buf[MAC_ADDRESS_LENGTH..2 * MAC_ADDRESS_LENGTH])?;
        let probe = u16::from_be_bytes([buf[12], buf[13]]);

        let tagged = probe == EtherType::TAG_VLAN.0;
        if tagged && buf.len() < ETHERNET_HEADER_LENGTH + VLAN_TAG_LENGTH {
            return Err(PacketError::NotEnoughData {
                needed: ETHERNET_HEADER_LENGTH + VLAN_TAG_LENGTH,
                available: buf.len(),
            });
        }

        buf.advance(2 * MAC_ADDRESS_LENGTH);
        let vlan = if tagged {
            let tpid = buf.get_u16();
            let tci = buf.get_u16();
            Some(VlanTag { tpid, tci })
        } else {
            None
        };
        let ether_type = EtherType(buf.get_u16());

        Ok(Self {
            source,
            destination,
            vlan,
            ether_type,
        })
    }
}

impl Header for Ethernet {
    fn header_length(&self) -> usize {
        match self.vlan {
            Some(_) => ETHERNET_HEADER_LENGTH + VLAN_TAG_LENGTH,
            None => ETHERNET_HEADER_LENGTH,
        }
    }

    fn encapsulated_protocol(&self) -> Option<EtherType> {
        Some(self.ether_type)
    }

    fn encode_header(&self, buf: &mut BytesMut) {
        buf.put_slice(self.source.as_bytes());
        buf.put_slice(self.destination.as_bytes());
        if let Some(tag) = self.vlan {
            buf.put_u16(tag.tpid);
            buf.put_u16(tag.tci);
        }
        buf.put_u16(self.ether_type.0);
    }
}
