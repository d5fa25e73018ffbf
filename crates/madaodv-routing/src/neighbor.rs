//! Neighbor liveness
//!
//! A neighbor stays alive while traffic or hellos keep pushing its expiry
//! forward. Expired neighbors, and neighbors the link layer reported a
//! transmission failure for, are removed by [`Neighbors::purge`], which
//! returns them so the engine can repair the routes that used them.

use std::net::Ipv6Addr;
use std::time::Duration;

use madaodv_core::{LinkLayer, MacAddr};
use tracing::debug;

use crate::table::expiry_after;

/// One adjacent node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Neighbor {
    pub address: Ipv6Addr,
    /// Link-layer address, resolved lazily
    pub mac: Option<MacAddr>,
    pub expires: Duration,
    /// A transmission to this neighbor failed
    pub closing: bool,
}

impl Neighbor {
    fn is_lost(&self, now: Duration) -> bool {
        self.expires < now || self.closing
    }
}

/// The set of live neighbors
#[derive(Debug, Default)]
pub struct Neighbors {
    entries: Vec<Neighbor>,
}

impl Neighbors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `addr` is a live neighbor at `now`
    pub fn is_neighbor(&self, addr: Ipv6Addr, now: Duration) -> bool {
        self.entries
            .iter()
            .any(|n| n.address == addr && !n.is_lost(now))
    }

    /// Time left before `addr` expires, zero if unknown
    pub fn expire_time(&self, addr: Ipv6Addr, now: Duration) -> Duration {
        self.entries
            .iter()
            .find(|n| n.address == addr)
            .map(|n| n.expires.saturating_sub(now))
            .unwrap_or_default()
    }

    /// Keep `addr` alive for at least `hold` from `now`
    pub fn update(&mut self, addr: Ipv6Addr, hold: Duration, now: Duration, link: &impl LinkLayer) {
        let expires = expiry_after(now, hold);
        if let Some(neighbor) = self.entries.iter_mut().find(|n| n.address == addr) {
            neighbor.expires = neighbor.expires.max(expires);
            if neighbor.mac.is_none() {
                neighbor.mac = link.resolve(addr);
            }
            return;
        }
        debug!(neighbor = %addr, "New neighbor");
        self.entries.push(Neighbor {
            address: addr,
            mac: link.resolve(addr),
            expires,
            closing: false,
        });
    }

    /// Remove expired and closing neighbors, returning their addresses
    pub fn purge(&mut self, now: Duration) -> Vec<Ipv6Addr> {
        let mut lost = Vec::new();
        self.entries.retain(|n| {
            if n.is_lost(now) {
                lost.push(n.address);
                false
            } else {
                true
            }
        });
        for addr in &lost {
            debug!(neighbor = %addr, "Neighbor lost");
        }
        lost
    }

    /// The link layer failed to deliver a frame to `mac`
    pub fn process_tx_error(&mut self, mac: MacAddr, now: Duration) -> Vec<Ipv6Addr> {
        for neighbor in self.entries.iter_mut().filter(|n| n.mac == Some(mac)) {
            neighbor.closing = true;
        }
        self.purge(now)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Earliest instant at which some neighbor counts as lost
    pub fn next_loss(&self) -> Option<Duration> {
        self.entries
            .iter()
            .map(|n| n.expires.saturating_add(Duration::from_nanos(1)))
            .min()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Neighbor> {
        self.entries.iter()
    }
}
