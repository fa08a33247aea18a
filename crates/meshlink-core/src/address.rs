//! Device addressing types.
//!
//! Every radio module carries a factory-set, globally unique 64-bit address
//! and a network-assigned (and reassignable) 16-bit address. The 64-bit
//! address is the stable identity of a device: discovery deduplication and
//! node lookup key on it. The 16-bit address is a routing convenience that
//! can change when the module rejoins a network.

use std::fmt;

/// A 64-bit globally unique device address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Addr64(pub u64);

impl Addr64 {
    /// The broadcast address: payloads sent here reach every node in range.
    pub const BROADCAST: Addr64 = Addr64(0x0000_0000_0000_FFFF);

    /// The all-zero address, used by coordinators before joining.
    pub const UNKNOWN: Addr64 = Addr64(0);

    /// Build an address from its 8-byte big-endian wire representation.
    pub fn from_be_bytes(bytes: [u8; 8]) -> Self {
        Addr64(u64::from_be_bytes(bytes))
    }

    /// The 8-byte big-endian wire representation.
    pub fn to_be_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for Addr64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016X}", self.0)
    }
}

/// A 16-bit network-local device address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Addr16(pub u16);

impl Addr16 {
    /// Sentinel meaning "16-bit address unknown; route by 64-bit address".
    pub const UNKNOWN: Addr16 = Addr16(0xFFFE);

    /// The 16-bit broadcast address.
    pub const BROADCAST: Addr16 = Addr16(0xFFFF);

    pub fn from_be_bytes(bytes: [u8; 2]) -> Self {
        Addr16(u16::from_be_bytes(bytes))
    }

    pub fn to_be_bytes(self) -> [u8; 2] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for Addr16 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04X}", self.0)
    }
}

/// The role a device plays in the mesh network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceType {
    Coordinator,
    Router,
    EndDevice,
    Other(u8),
}

impl DeviceType {
    pub fn from_u8(b: u8) -> Self {
        match b {
            0x00 => DeviceType::Coordinator,
            0x01 => DeviceType::Router,
            0x02 => DeviceType::EndDevice,
            other => DeviceType::Other(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            DeviceType::Coordinator => 0x00,
            DeviceType::Router => 0x01,
            DeviceType::EndDevice => 0x02,
            DeviceType::Other(b) => b,
        }
    }
}

/// Identity of a remote device as announced on the network.
///
/// Produced by network discovery. Two records refer to the same physical
/// device exactly when their 64-bit addresses are equal; the 16-bit address
/// and node identifier may differ between sightings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteNode {
    /// Globally unique 64-bit address.
    pub addr64: Addr64,
    /// Current network-assigned 16-bit address.
    pub addr16: Addr16,
    /// Human-readable node identifier configured on the device.
    pub node_id: String,
    /// Network role of the device.
    pub device_type: DeviceType,
}

impl fmt::Display for RemoteNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.node_id.is_empty() {
            write!(f, "{}", self.addr64)
        } else {
            write!(f, "{} ({})", self.node_id, self.addr64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addr64_wire_round_trip() {
        let addr = Addr64(0x0013_A200_4052_C507);
        assert_eq!(Addr64::from_be_bytes(addr.to_be_bytes()), addr);
        assert_eq!(
            addr.to_be_bytes(),
            [0x00, 0x13, 0xA2, 0x00, 0x40, 0x52, 0xC5, 0x07]
        );
    }

    #[test]
    fn addr64_display() {
        assert_eq!(Addr64(0x0013_A200_4052_C507).to_string(), "0013A2004052C507");
        assert_eq!(Addr64::BROADCAST.to_string(), "000000000000FFFF");
    }

    #[test]
    fn addr16_wire_round_trip() {
        let addr = Addr16(0x1A2B);
        assert_eq!(Addr16::from_be_bytes(addr.to_be_bytes()), addr);
        assert_eq!(addr.to_be_bytes(), [0x1A, 0x2B]);
    }

    #[test]
    fn addr16_sentinels() {
        assert_eq!(Addr16::UNKNOWN.0, 0xFFFE);
        assert_eq!(Addr16::BROADCAST.0, 0xFFFF);
    }

    #[test]
    fn device_type_round_trip() {
        for b in 0u8..=255 {
            assert_eq!(DeviceType::from_u8(b).as_u8(), b);
        }
        assert_eq!(DeviceType::from_u8(0x01), DeviceType::Router);
    }

    #[test]
    fn remote_node_display() {
        let node = RemoteNode {
            addr64: Addr64(0x0013_A200_0000_0001),
            addr16: Addr16(0x0001),
            node_id: "PUMP-HOUSE".into(),
            device_type: DeviceType::Router,
        };
        assert_eq!(node.to_string(), "PUMP-HOUSE (0013A20000000001)");

        let anon = RemoteNode {
            node_id: String::new(),
            ..node
        };
        assert_eq!(anon.to_string(), "0013A20000000001");
    }
}
