//! Node addressing and the hardware/network address registry.

use std::{
    collections::HashMap,
    fmt,
    net::{IpAddr, Ipv6Addr},
    str::FromStr,
    sync::Arc,
};

use parking_lot::RwLock;

/// A fixed-width link-layer identifier, as exchanged in topology reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HardwareAddr([u8; Self::BYTES]);

impl HardwareAddr {
    /// The size of a hardware address in bytes.
    pub const BYTES: usize = 8;

    /// Creates a hardware address from its raw bytes.
    pub fn new(bytes: [u8; Self::BYTES]) -> Self {
        Self(bytes)
    }

    /// Returns the bytes backing the address.
    pub fn bytes(&self) -> [u8; Self::BYTES] {
        self.0
    }

    /// Decodes an address from a wire slice, `None` if it is too short.
    pub fn from_slice(slice: &[u8]) -> Option<Self> {
        let bytes: [u8; Self::BYTES] = slice.get(..Self::BYTES)?.try_into().ok()?;
        Some(Self(bytes))
    }
}

impl fmt::Display for HardwareAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if i != 0 {
                write!(f, ":")?;
            }
            write!(f, "{byte:02x}")?;
        }

        Ok(())
    }
}

/// A mote's network address.
///
/// Equality is exact: the link-local and global forms of one mote compare
/// unequal even though they name the same node. Converting between the two is
/// an explicit operation, see [`NodeAddr::link_local_to_global`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeAddr(IpAddr);

impl NodeAddr {
    /// Creates a node address from an IP address.
    pub fn new(ip: IpAddr) -> Self {
        Self(ip)
    }

    /// Returns the underlying IP address.
    pub fn ip(&self) -> IpAddr {
        self.0
    }

    /// Decodes a node address from 16 raw big-endian bytes.
    ///
    /// IPv4-mapped forms collapse to their IPv4 address, so a report that
    /// carries a mapped address compares equal to the reporter's source
    /// address.
    pub fn from_bytes16(bytes: [u8; 16]) -> Self {
        let v6 = Ipv6Addr::from(bytes);

        match v6.to_ipv4_mapped() {
            Some(v4) => Self(IpAddr::V4(v4)),
            None => Self(IpAddr::V6(v6)),
        }
    }

    /// Returns the address as 16 raw bytes, the inverse of
    /// [`NodeAddr::from_bytes16`]. IPv4 addresses use their mapped form.
    pub fn octets16(&self) -> [u8; 16] {
        match self.0 {
            IpAddr::V6(v6) => v6.octets(),
            IpAddr::V4(v4) => v4.to_ipv6_mapped().octets(),
        }
    }

    /// Derives the simulation-global address of a mote from its identifier.
    ///
    /// The simulated network assigns `fd00::{200+id}:{id}:{id}:{id}` to mote
    /// `id`, with the border router carrying the first identifier.
    pub fn for_mote_id(id: u16) -> Self {
        Self(IpAddr::V6(Ipv6Addr::new(
            0xfd00,
            0,
            0,
            0,
            0x200 + id,
            id,
            id,
            id,
        )))
    }

    /// Rewrites a link-local address to its global form.
    ///
    /// Replaces the `fe80` prefix segment with `fd00`; any other address is
    /// returned unchanged. This mapping only holds in simulation, where both
    /// forms are derived from the mote identifier; it is not a general
    /// network operation.
    pub fn link_local_to_global(&self) -> Self {
        match self.0 {
            IpAddr::V6(v6) => {
                let mut segments = v6.segments();
                if segments[0] == 0xfe80 {
                    segments[0] = 0xfd00;
                }
                let [a, b, c, d, e, f, g, h] = segments;
                Self(IpAddr::V6(Ipv6Addr::new(a, b, c, d, e, f, g, h)))
            }
            IpAddr::V4(_) => *self,
        }
    }
}

impl fmt::Display for NodeAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<IpAddr> for NodeAddr {
    fn from(ip: IpAddr) -> Self {
        Self(ip)
    }
}

impl FromStr for NodeAddr {
    type Err = std::net::AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

#[derive(Debug, Default)]
struct RegistryInner {
    by_hardware: HashMap<HardwareAddr, NodeAddr>,
    by_address: HashMap<NodeAddr, HardwareAddr>,
}

/// A bidirectional hardware/network address mapping.
///
/// One entry is recorded per mote when its first topology report arrives and
/// is immutable afterwards: inserts for an already-known hardware address are
/// no-ops (first write wins).
#[derive(Debug, Default, Clone)]
pub struct AddressRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

impl AddressRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a hardware/network address pair, returning `true` if it was
    /// inserted and `false` if the hardware address was already registered.
    pub fn insert(&self, hardware: HardwareAddr, address: NodeAddr) -> bool {
        let mut inner = self.inner.write();
        if inner.by_hardware.contains_key(&hardware) {
            return false;
        }

        inner.by_hardware.insert(hardware, address);
        inner.by_address.insert(address, hardware);

        true
    }

    /// Returns the network address registered for a hardware address.
    pub fn address_of(&self, hardware: &HardwareAddr) -> Option<NodeAddr> {
        self.inner.read().by_hardware.get(hardware).copied()
    }

    /// Returns the hardware address registered for a network address.
    pub fn hardware_of(&self, address: &NodeAddr) -> Option<HardwareAddr> {
        self.inner.read().by_address.get(address).copied()
    }

    /// Returns the number of registered motes.
    pub fn len(&self) -> usize {
        self.inner.read().by_hardware.len()
    }

    /// Returns `true` if no mote has registered yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
