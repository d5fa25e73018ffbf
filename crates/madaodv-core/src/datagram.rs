//! Data-plane types exchanged with the host stack
//!
//! The routing engine never inspects payloads. It sees a [`Datagram`] with
//! its network-layer header, decides on a [`Route`], and hands both back to
//! the host through the continuations in [`Continuations`].

use std::fmt;
use std::net::Ipv6Addr;
use std::sync::Arc;

use bytes::Bytes;

use crate::address::InterfaceIndex;
use crate::error::DeliveryError;

/// Hop limit stamped on datagrams that do not set one
pub const DEFAULT_HOP_LIMIT: u8 = 64;

/// The network-layer header carried alongside a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv6Header {
    pub source: Ipv6Addr,
    pub destination: Ipv6Addr,
    pub hop_limit: u8,
    pub next_header: u8,
}

impl Ipv6Header {
    pub fn new(source: Ipv6Addr, destination: Ipv6Addr) -> Self {
        Self {
            source,
            destination,
            hop_limit: DEFAULT_HOP_LIMIT,
            next_header: 17,
        }
    }
}

/// An opaque datagram in flight
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    /// Host-assigned identity, unique per originated datagram
    pub uid: u64,
    pub header: Ipv6Header,
    pub payload: Bytes,
    /// Set when route computation was postponed through the loopback path
    pub deferred: bool,
}

impl Datagram {
    pub fn new(uid: u64, source: Ipv6Addr, destination: Ipv6Addr, payload: impl Into<Bytes>) -> Self {
        Self {
            uid,
            header: Ipv6Header::new(source, destination),
            payload: payload.into(),
            deferred: false,
        }
    }

    pub fn destination(&self) -> Ipv6Addr {
        self.header.destination
    }

    pub fn source(&self) -> Ipv6Addr {
        self.header.source
    }
}

/// A forwarding decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Route {
    pub destination: Ipv6Addr,
    /// Next hop toward the destination
    pub gateway: Ipv6Addr,
    /// Address to use as source when originating on this route
    pub source: Ipv6Addr,
    pub interface: InterfaceIndex,
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} via {} src {} dev {}",
            self.destination, self.gateway, self.source, self.interface
        )
    }
}

/// Called with the chosen route when a datagram can be sent
pub type ForwardFn = Arc<dyn Fn(Route, Datagram) + Send + Sync>;

/// Called when a datagram cannot be delivered
pub type ErrorFn = Arc<dyn Fn(Datagram, DeliveryError) + Send + Sync>;

/// Called when a datagram addressed to this node arrives
pub type LocalDeliverFn = Arc<dyn Fn(Datagram, InterfaceIndex) + Send + Sync>;

/// The forward and error continuations supplied with a datagram
#[derive(Clone)]
pub struct Continuations {
    pub forward: ForwardFn,
    pub error: ErrorFn,
}

impl Continuations {
    pub fn new(
        forward: impl Fn(Route, Datagram) + Send + Sync + 'static,
        error: impl Fn(Datagram, DeliveryError) + Send + Sync + 'static,
    ) -> Self {
        Self {
            forward: Arc::new(forward),
            error: Arc::new(error),
        }
    }

    /// Continuations that discard everything
    pub fn noop() -> Self {
        Self::new(|_, _| {}, |_, _| {})
    }

    pub fn forward(&self, route: Route, datagram: Datagram) {
        (self.forward)(route, datagram)
    }

    pub fn fail(&self, datagram: Datagram, error: DeliveryError) {
        (self.error)(datagram, error)
    }
}

impl fmt::Debug for Continuations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Continuations").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn make_addr(last: u16) -> Ipv6Addr {
        Ipv6Addr::new(0x0100, 0, 0, 0, 0, 0, 0, last)
    }

    #[test]
    fn test_datagram_defaults() {
        let d = Datagram::new(7, make_addr(1), make_addr(2), b"ping".to_vec());
        assert_eq!(d.header.hop_limit, DEFAULT_HOP_LIMIT);
        assert_eq!(d.destination(), make_addr(2));
        assert_eq!(d.source(), make_addr(1));
        assert!(!d.deferred);
    }

    #[test]
    fn test_continuations_dispatch() {
        let forwarded = Arc::new(Mutex::new(Vec::new()));
        let failed = Arc::new(Mutex::new(Vec::new()));
        let (f, e) = (forwarded.clone(), failed.clone());

        let cont = Continuations::new(
            move |route, dg| f.lock().unwrap().push((route, dg.uid)),
            move |dg, err| e.lock().unwrap().push((dg.uid, err)),
        );

        let route = Route {
            destination: make_addr(2),
            gateway: make_addr(3),
            source: make_addr(1),
            interface: InterfaceIndex(1),
        };
        cont.forward(route, Datagram::new(1, make_addr(1), make_addr(2), Bytes::new()));
        cont.fail(
            Datagram::new(2, make_addr(1), make_addr(2), Bytes::new()),
            DeliveryError::NoRouteToHost,
        );

        assert_eq!(forwarded.lock().unwrap().as_slice(), &[(route, 1)]);
        assert_eq!(
            failed.lock().unwrap().as_slice(),
            &[(2, DeliveryError::NoRouteToHost)]
        );
    }

    #[test]
    fn test_route_display() {
        let route = Route {
            destination: make_addr(4),
            gateway: make_addr(2),
            source: make_addr(1),
            interface: InterfaceIndex(1),
        };
        assert_eq!(route.to_string(), "100::4 via 100::2 src 100::1 dev if1");
    }
}
