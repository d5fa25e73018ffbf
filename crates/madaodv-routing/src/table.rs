//! Routing table
//!
//! One [`RouteRecord`] per destination. Records are handed out by value:
//! callers look a record up, change the copy, and write it back with
//! [`RoutingTable::update`].
//!
//! Expiry is lazy. Every lookup and mutation first runs [`RoutingTable::purge`],
//! which moves expired VALID records to INVALID with a fresh deletion
//! deadline and deletes expired INVALID records. IN_SEARCH records are left
//! alone; their lifetime is owned by the discovery retry timer.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::net::Ipv6Addr;
use std::time::Duration;

use derive_more::Display;
use madaodv_core::{InterfaceIndex, Route};
use serde::{Deserialize, Serialize};

/// Route state
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RouteFlag {
    #[display("UP")]
    Valid,
    #[display("DOWN")]
    Invalid,
    #[display("IN_SEARCH")]
    InSearch,
}

/// `now + lifetime`, saturating for records that never expire
pub fn expiry_after(now: Duration, lifetime: Duration) -> Duration {
    now.saturating_add(lifetime)
}

/// A route to one destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRecord {
    pub destination: Ipv6Addr,
    pub next_hop: Ipv6Addr,
    pub interface: InterfaceIndex,
    /// Address of `interface`, used as source when originating
    pub source: Ipv6Addr,
    pub valid_seqno: bool,
    pub seqno: u32,
    pub hops: u16,
    pub flag: RouteFlag,
    /// Absolute expiry
    pub expires: Duration,
    /// Discovery attempts made at the network diameter
    pub rreq_count: u32,
    /// The destination is (or stands in for) a gateway
    pub gateway: bool,
    precursors: Vec<Ipv6Addr>,
    blacklisted_until: Option<Duration>,
}

impl RouteRecord {
    /// A VALID record with no sequence number that expires immediately
    pub fn new(
        destination: Ipv6Addr,
        next_hop: Ipv6Addr,
        interface: InterfaceIndex,
        source: Ipv6Addr,
    ) -> Self {
        Self {
            destination,
            next_hop,
            interface,
            source,
            valid_seqno: false,
            seqno: 0,
            hops: 0,
            flag: RouteFlag::Valid,
            expires: Duration::ZERO,
            rreq_count: 0,
            gateway: false,
            precursors: Vec::new(),
            blacklisted_until: None,
        }
    }

    pub fn with_hops(mut self, hops: u16) -> Self {
        self.hops = hops;
        self
    }

    pub fn with_seqno(mut self, seqno: u32, valid: bool) -> Self {
        self.seqno = seqno;
        self.valid_seqno = valid;
        self
    }

    pub fn with_lifetime(mut self, lifetime: Duration, now: Duration) -> Self {
        self.set_lifetime(lifetime, now);
        self
    }

    pub fn with_flag(mut self, flag: RouteFlag) -> Self {
        self.flag = flag;
        self
    }

    pub fn with_gateway(mut self, gateway: bool) -> Self {
        self.gateway = gateway;
        self
    }

    /// Expire `lifetime` from `now`
    pub fn set_lifetime(&mut self, lifetime: Duration, now: Duration) {
        self.expires = expiry_after(now, lifetime);
    }

    /// Time left before expiry, zero once elapsed
    pub fn lifetime(&self, now: Duration) -> Duration {
        self.expires.saturating_sub(now)
    }

    pub fn is_valid(&self) -> bool {
        self.flag == RouteFlag::Valid
    }

    /// Add a precursor. Returns `false` if it was already present.
    pub fn insert_precursor(&mut self, addr: Ipv6Addr) -> bool {
        if self.lookup_precursor(addr) {
            return false;
        }
        self.precursors.push(addr);
        true
    }

    pub fn lookup_precursor(&self, addr: Ipv6Addr) -> bool {
        self.precursors.contains(&addr)
    }

    pub fn delete_precursor(&mut self, addr: Ipv6Addr) -> bool {
        let before = self.precursors.len();
        self.precursors.retain(|p| *p != addr);
        self.precursors.len() != before
    }

    pub fn delete_all_precursors(&mut self) {
        self.precursors.clear();
    }

    pub fn precursors(&self) -> &[Ipv6Addr] {
        &self.precursors
    }

    /// Append this record's precursors to `into`, skipping ones already there
    pub fn collect_precursors(&self, into: &mut Vec<Ipv6Addr>) {
        for p in &self.precursors {
            if !into.contains(p) {
                into.push(*p);
            }
        }
    }

    /// Whether the link to this neighbor is blacklisted at `now`
    pub fn is_unidirectional(&self, now: Duration) -> bool {
        self.blacklisted_until.is_some_and(|until| now < until)
    }

    pub fn blacklisted_until(&self) -> Option<Duration> {
        self.blacklisted_until
    }

    pub fn blacklist_until(&mut self, until: Duration) {
        self.blacklisted_until = Some(until);
    }

    pub fn clear_blacklist(&mut self) {
        self.blacklisted_until = None;
    }

    /// Move to INVALID with a deletion deadline. INVALID records are untouched.
    pub fn invalidate(&mut self, bad_link_lifetime: Duration, now: Duration) {
        if self.flag == RouteFlag::Invalid {
            return;
        }
        self.flag = RouteFlag::Invalid;
        self.rreq_count = 0;
        self.set_lifetime(bad_link_lifetime, now);
    }

    /// The forwarding decision this record represents
    pub fn route(&self) -> Route {
        Route {
            destination: self.destination,
            gateway: self.next_hop,
            source: self.source,
            interface: self.interface,
        }
    }

    fn print_row(&self, now: Duration, out: &mut String) {
        let expire = if self.expires == Duration::MAX {
            "inf".to_string()
        } else {
            let remaining = self.expires.as_secs_f64() - now.as_secs_f64();
            format!("{remaining:.2}s")
        };
        // Writing to a String cannot fail
        let _ = writeln!(
            out,
            "{:<16}{:<16}{:<16}{:<16}{:<16}{}",
            self.destination.to_string(),
            self.next_hop.to_string(),
            self.source.to_string(),
            self.flag.to_string(),
            expire,
            self.hops
        );
    }
}

/// Destination-keyed route store
#[derive(Debug, Clone)]
pub struct RoutingTable {
    entries: BTreeMap<Ipv6Addr, RouteRecord>,
    /// Deletion deadline given to invalidated records
    bad_link_lifetime: Duration,
}

impl RoutingTable {
    pub fn new(bad_link_lifetime: Duration) -> Self {
        Self {
            entries: BTreeMap::new(),
            bad_link_lifetime,
        }
    }

    pub fn bad_link_lifetime(&self) -> Duration {
        self.bad_link_lifetime
    }

    pub fn set_bad_link_lifetime(&mut self, lifetime: Duration) {
        self.bad_link_lifetime = lifetime;
    }

    /// Copy of the record for `dst`, in any state
    pub fn lookup(&mut self, dst: Ipv6Addr, now: Duration) -> Option<RouteRecord> {
        self.purge(now);
        self.entries.get(&dst).cloned()
    }

    /// Copy of the record for `dst` if it is VALID
    pub fn lookup_valid(&mut self, dst: Ipv6Addr, now: Duration) -> Option<RouteRecord> {
        self.lookup(dst, now).filter(RouteRecord::is_valid)
    }

    /// Add a record. Fails if the destination already has one.
    pub fn insert(&mut self, mut record: RouteRecord, now: Duration) -> bool {
        self.purge(now);
        if self.entries.contains_key(&record.destination) {
            return false;
        }
        if record.flag != RouteFlag::InSearch {
            record.rreq_count = 0;
        }
        self.entries.insert(record.destination, record);
        true
    }

    /// Replace the stored record. Fails if the destination has none.
    pub fn update(&mut self, mut record: RouteRecord, now: Duration) -> bool {
        self.purge(now);
        let Some(slot) = self.entries.get_mut(&record.destination) else {
            return false;
        };
        if record.flag != RouteFlag::InSearch {
            record.rreq_count = 0;
        }
        *slot = record;
        true
    }

    /// Set the state of a record and reset its retry counter
    pub fn set_state(&mut self, dst: Ipv6Addr, flag: RouteFlag, now: Duration) -> bool {
        self.purge(now);
        match self.entries.get_mut(&dst) {
            Some(record) => {
                record.flag = flag;
                record.rreq_count = 0;
                true
            }
            None => false,
        }
    }

    pub fn delete_route(&mut self, dst: Ipv6Addr, now: Duration) -> bool {
        self.purge(now);
        self.entries.remove(&dst).is_some()
    }

    /// Destinations, with their sequence numbers, routed through `next_hop`
    pub fn neighbors_using(&mut self, next_hop: Ipv6Addr, now: Duration) -> BTreeMap<Ipv6Addr, u32> {
        self.purge(now);
        self.entries
            .values()
            .filter(|r| r.next_hop == next_hop)
            .map(|r| (r.destination, r.seqno))
            .collect()
    }

    /// Invalidate the VALID records among `unreachable`
    pub fn invalidate(&mut self, unreachable: &BTreeMap<Ipv6Addr, u32>, now: Duration) {
        self.purge(now);
        let bad_link = self.bad_link_lifetime;
        for dst in unreachable.keys() {
            if let Some(record) = self.entries.get_mut(dst) {
                if record.flag == RouteFlag::Valid {
                    record.invalidate(bad_link, now);
                }
            }
        }
    }

    /// Drop every record that leaves through `interface`
    pub fn delete_all_routes_from_interface(&mut self, interface: InterfaceIndex) {
        self.entries.retain(|_, r| r.interface != interface);
    }

    /// Blacklist a neighbor whose link proved unidirectional
    pub fn mark_unidirectional(&mut self, neighbor: Ipv6Addr, timeout: Duration, now: Duration) -> bool {
        match self.entries.get_mut(&neighbor) {
            Some(record) => {
                record.blacklist_until(expiry_after(now, timeout));
                record.rreq_count = 0;
                true
            }
            None => false,
        }
    }

    /// First gateway record still being searched for
    pub fn find_gateway_in_search(&mut self, now: Duration) -> Option<RouteRecord> {
        self.purge(now);
        self.entries
            .values()
            .find(|r| r.gateway && r.flag == RouteFlag::InSearch)
            .cloned()
    }

    /// First usable gateway route
    pub fn find_active_gateway(&mut self, now: Duration) -> Option<RouteRecord> {
        self.purge(now);
        self.entries
            .values()
            .find(|r| r.gateway && r.flag == RouteFlag::Valid)
            .cloned()
    }

    pub fn purge(&mut self, now: Duration) {
        let bad_link = self.bad_link_lifetime;
        self.entries.retain(|_, record| {
            if record.expires >= now {
                return true;
            }
            match record.flag {
                RouteFlag::Invalid => false,
                RouteFlag::Valid => {
                    record.invalidate(bad_link, now);
                    true
                }
                RouteFlag::InSearch => true,
            }
        });
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

    /// All records in destination order, without purging
    pub fn records(&self) -> impl Iterator<Item = &RouteRecord> {
        self.entries.values()
    }

    /// Render the table as it would look after a purge at `now`
    pub fn print(&self, now: Duration) -> String {
        let mut snapshot = self.clone();
        snapshot.purge(now);

        let mut out = String::from("\nAODV Routing table\n");
        // Writing to a String cannot fail
        let _ = writeln!(
            out,
            "{:<16}{:<16}{:<16}{:<16}{:<16}Hops",
            "Destination", "Gateway", "Interface", "Flag", "Expire"
        );
        for record in snapshot.entries.values() {
            record.print_row(now, &mut out);
        }
        out.push('\n');
        out
    }
}
