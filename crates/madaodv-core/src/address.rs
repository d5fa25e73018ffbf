//! Addressing for the mesh
//!
//! Mesh nodes live in `0100::/80`. A node's interface address embeds its
//! 48-bit link-layer address in the low six bytes, so neighbors can resolve
//! each other without a discovery exchange:
//!
//! ```text
//! 0100:0000:0000:0000:0000:MMMM:MMMM:MMMM
//! ```
//!
//! Anything outside the prefix is reached through a gateway, searched for
//! under [`GATEWAY_SEARCH_ADDR`].

use std::fmt;
use std::net::Ipv6Addr;
use std::str::FromStr;

use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::error::AddressError;

/// UDP port control messages are exchanged on
pub const MADAODV_PORT: u16 = 654;

/// All-nodes link-local multicast address used for floods
pub const ALL_NODES: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 1);

/// Key under which gateway discoveries are tracked
pub const GATEWAY_SEARCH_ADDR: Ipv6Addr = Ipv6Addr::new(0x0100, 0, 0, 0, 0, 0, 0, 0);

/// Length in bits of the mesh prefix
pub const MESH_PREFIX_LEN: u8 = 80;

/// Index of a network interface on a node
#[derive(
    Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[display("if{_0}")]
pub struct InterfaceIndex(pub u32);

impl InterfaceIndex {
    /// The loopback interface
    pub const LOOPBACK: InterfaceIndex = InterfaceIndex(0);
}

/// A 48-bit link-layer address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    /// Construct from raw octets
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    /// Derive a locally unique address from a node number
    pub fn from_node_index(index: u32) -> Self {
        let b = index.to_be_bytes();
        Self([0x02, 0x00, b[0], b[1], b[2], b[3]])
    }

    /// The raw octets
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// Whether this is the unset all-zero address
    pub fn is_unset(&self) -> bool {
        self.0 == [0u8; 6]
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|b| hex::encode([*b])).collect();
        write!(f, "{}", parts.join(":"))
    }
}

impl FromStr for MacAddr {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 6 {
            return Err(AddressError::InvalidMac(s.to_string()));
        }
        let mut octets = [0u8; 6];
        for (slot, part) in octets.iter_mut().zip(parts) {
            let decoded =
                hex::decode(part).map_err(|_| AddressError::InvalidMac(s.to_string()))?;
            match decoded.as_slice() {
                [b] => *slot = *b,
                _ => return Err(AddressError::InvalidMac(s.to_string())),
            }
        }
        Ok(Self(octets))
    }
}

/// Build the mesh address carrying a link-layer address
pub fn mac_to_ipv6(mac: MacAddr) -> Ipv6Addr {
    let mut octets = [0u8; 16];
    octets[0] = 0x01;
    octets[10..].copy_from_slice(&mac.0);
    Ipv6Addr::from(octets)
}

/// Recover the link-layer address embedded in a mesh address
pub fn ipv6_to_mac(addr: Ipv6Addr) -> MacAddr {
    let octets = addr.octets();
    let mut mac = [0u8; 6];
    mac.copy_from_slice(&octets[10..]);
    MacAddr(mac)
}

/// Like [`ipv6_to_mac`], but rejects addresses outside the mesh prefix
pub fn try_ipv6_to_mac(addr: Ipv6Addr) -> Result<MacAddr, AddressError> {
    if in_mesh_range(addr) {
        Ok(ipv6_to_mac(addr))
    } else {
        Err(AddressError::NotMeshAddress(addr))
    }
}

/// Whether `addr` belongs to the mesh prefix
pub fn in_mesh_range(addr: Ipv6Addr) -> bool {
    let prefix_bytes = (MESH_PREFIX_LEN / 8) as usize;
    addr.octets()[..prefix_bytes] == GATEWAY_SEARCH_ADDR.octets()[..prefix_bytes]
}

/// Whether `addr` lies outside the mesh and needs a gateway
pub fn on_internet(addr: Ipv6Addr) -> bool {
    !in_mesh_range(addr)
}

/// Whether `addr` is a unicast link-local address (`fe80::/10`)
pub fn is_link_local(addr: Ipv6Addr) -> bool {
    (addr.segments()[0] & 0xffc0) == 0xfe80
}

/// Whether `addr` is the flood address
pub fn is_all_nodes(addr: Ipv6Addr) -> bool {
    addr == ALL_NODES
}
