//! 48-bit hardware addresses.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::PacketError;

/// Width of a hardware address in bytes
pub const MAC_ADDRESS_LENGTH: usize = 6;

/// A link-layer address, compared and hashed by its raw bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MacAddress([u8; MAC_ADDRESS_LENGTH]);

impl MacAddress {
    /// ff:ff:ff:ff:ff:ff
    pub const BROADCAST: MacAddress = MacAddress([0xff; MAC_ADDRESS_LENGTH]);

    /// Wrap six raw bytes
    pub const fn new(bytes: [u8; MAC_ADDRESS_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Build from a slice that must be exactly six bytes long
    pub fn from_slice(bytes: &[u8]) -> Result<Self, PacketError> {
        let raw: [u8; MAC_ADDRESS_LENGTH] = bytes.try_into().map_err(|_| {
            PacketError::InvalidAddress(format!(
                "expected {MAC_ADDRESS_LENGTH} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(raw))
    }

    /// Raw address bytes
    pub fn as_bytes(&self) -> &[u8; MAC_ADDRESS_LENGTH] {
        &self.0
    }

    /// Group bit set (multicast or broadcast)
    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }

    /// All ones
    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }
}

impl From<[u8; MAC_ADDRESS_LENGTH]> for MacAddress {
    fn from(bytes: [u8; MAC_ADDRESS_LENGTH]) -> Self {
        Self(bytes)
    }
}

impl FromStr for MacAddress {
    type Err = PacketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split(':').collect();
        if fields.len() != MAC_ADDRESS_LENGTH {
            return Err(PacketError::InvalidAddress(format!(
                "{s}: expected {MAC_ADDRESS_LENGTH} fields, got {}",
                fields.len()
            )));
        }

        let mut raw = [0u8; MAC_ADDRESS_LENGTH];
        for (slot, field) in raw.iter_mut().zip(fields) {
            if field.is_empty()
                || field.len() > 2
                || !field.bytes().all(|b| b.is_ascii_hexdigit())
            {
                return Err(PacketError::InvalidAddress(format!(
                    "{s}: bad field {field:?}"
                )));
            }
            *slot = u8::from_str_radix(field, 16)
                .map_err(|e| PacketError::InvalidAddress(format!("{s}: {e}")))?;
        }
        Ok(Self(raw))
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let mac: MacAddress = "00:11:22:33:44:55".parse().unwrap();
        assert_eq!(mac.as_bytes(), &[0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
        assert_eq!(mac.to_string(), "00:11:22:33:44:55");

        let mac: MacAddress = "1a:c1:51:ff:ef:8a".parse().unwrap();
        assert_eq!(mac.to_string(), "1A:C1:51:FF:EF:8A");
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!("00:11:22:33:44:5G".parse::<MacAddress>().is_err());
        assert!("00:11:22:33:44".parse::<MacAddress>().is_err());
        assert!("00:11:22:33:44:55:66".parse::<MacAddress>().is_err());
        assert!("00:11:22:33:44:555".parse::<MacAddress>().is_err());
        assert!("".parse::<MacAddress>().is_err());
    }

    #[test]
    fn test_from_slice() {
        let mac = MacAddress::from_slice(&[1, 2, 3, 4, 5, 6]).unwrap();
        assert_eq!(mac, MacAddress::new([1, 2, 3, 4, 5, 6]));
        assert!(MacAddress::from_slice(&[1, 2, 3, 4, 5]).is_err());
        assert!(MacAddress::from_slice(&[1, 2, 3, 4, 5, 6, 7]).is_err());
    }

    #[test]
    fn test_equality_by_bytes() {
        use std::collections::HashSet;

        let a: MacAddress = "aa:bb:cc:dd:ee:ff".parse().unwrap();
        let b = MacAddress::new([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        assert_eq!(a, b);

        let set: HashSet<_> = [a, b].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_broadcast_and_multicast() {
        assert!(MacAddress::BROADCAST.is_broadcast());
        assert!(MacAddress::BROADCAST.is_multicast());
        assert!("01:80:c2:00:00:0e".parse::<MacAddress>().unwrap().is_multicast());
        assert!(!"00:80:c2:00:00:0e".parse::<MacAddress>().unwrap().is_multicast());
    }
}
