//! Collaborator traits
//!
//! The routing engine is driven entirely through these abstractions, so the
//! same code runs under the discrete-event simulator and on a host stack.
//!
//! ## Key Traits
//!
//! - [`Clock`]: Monotonic time source (virtual in simulation)
//! - [`Transport`]: Sends control messages on the well-known port
//! - [`LinkLayer`]: Link-layer address resolution and uplink state

use std::net::Ipv6Addr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::address::{InterfaceIndex, MacAddr, try_ipv6_to_mac};

/// Time abstraction
///
/// `now()` is the time elapsed since an arbitrary fixed origin and must
/// never go backwards.
pub trait Clock: Send + Sync {
    fn now(&self) -> Duration;
}

/// Wall-clock implementation measuring from its creation
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Manually advanced clock
///
/// Clones share the same time, so one handle can drive many nodes.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    nanos: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move time forward by `delta`
    pub fn advance(&self, delta: Duration) {
        self.nanos
            .fetch_add(duration_to_nanos(delta), Ordering::SeqCst);
    }

    /// Jump to `at`; earlier instants are ignored
    pub fn set(&self, at: Duration) {
        self.nanos
            .fetch_max(duration_to_nanos(at), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::SeqCst))
    }
}

fn duration_to_nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

/// A control message leaving the node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlPacket {
    pub interface: InterfaceIndex,
    /// Address of the sending interface
    pub source: Ipv6Addr,
    /// Unicast neighbor or the all-nodes flood address
    pub destination: Ipv6Addr,
    pub hop_limit: u8,
    pub payload: Bytes,
}

/// Control-message transport
///
/// One logical socket per interface, bound to the control port.
pub trait Transport {
    /// Open the socket for an interface
    fn open(&mut self, _interface: InterfaceIndex, _local: Ipv6Addr) {}

    /// Close the socket for an interface
    fn close(&mut self, _interface: InterfaceIndex) {}

    /// Send a control message
    fn send(&mut self, packet: ControlPacket);
}

/// Link-layer services
pub trait LinkLayer {
    /// Resolve the link-layer address of a neighbor
    fn resolve(&self, addr: Ipv6Addr) -> Option<MacAddr>;

    /// Whether this node is associated with an upstream network
    fn has_uplink(&self) -> bool {
        false
    }
}

/// Link layer for mesh addressing, where the MAC is embedded in the address
#[derive(Debug, Clone, Copy, Default)]
pub struct MeshLinkLayer {
    pub uplink: bool,
}

impl MeshLinkLayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A link layer that reports an upstream association
    pub fn with_uplink() -> Self {
        Self { uplink: true }
    }
}

impl LinkLayer for MeshLinkLayer {
    fn resolve(&self, addr: Ipv6Addr) -> Option<MacAddr> {
        try_ipv6_to_mac(addr).ok()
    }

    fn has_uplink(&self) -> bool {
        self.uplink
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::mac_to_ipv6;

    #[test]
    fn test_manual_clock_shared() {
        let clock = ManualClock::new();
        let other = clock.clone();
        assert_eq!(clock.now(), Duration::ZERO);

        clock.advance(Duration::from_millis(40));
        assert_eq!(other.now(), Duration::from_millis(40));

        other.set(Duration::from_millis(10));
        assert_eq!(clock.now(), Duration::from_millis(40));

        other.set(Duration::from_secs(1));
        assert_eq!(clock.now(), Duration::from_secs(1));
    }

    #[test]
    fn test_system_clock_monotonic() {
        let clock = SystemClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }

    #[test]
    fn test_mesh_link_layer() {
        let mac = MacAddr::new([0, 0, 0, 0, 0, 9]);
        let link = MeshLinkLayer::new();
        assert_eq!(link.resolve(mac_to_ipv6(mac)), Some(mac));
        assert_eq!(link.resolve("2001:db8::1".parse().unwrap()), None);
        assert!(!link.has_uplink());
        assert!(MeshLinkLayer::with_uplink().has_uplink());
    }
}
