//! Route maintenance
//!
//! RERR origination on link breaks and forwarding failures, and RERR
//! propagation toward the precursors of the routes it invalidates.

use std::collections::BTreeMap;
use std::net::Ipv6Addr;
use std::time::Duration;

use madaodv_core::{
    ALL_NODES, Clock, ControlMessage, InterfaceIndex, LinkLayer, PacketError, RerrHeader, Transport,
};
use tracing::{debug, trace};

use super::RoutingProtocol;

impl<C, T, L> RoutingProtocol<C, T, L>
where
    C: Clock,
    T: Transport,
    L: LinkLayer,
{
    /// The link to `next_hop` broke. Report every destination routed
    /// through it to their precursors, then invalidate those routes.
    pub(super) fn send_rerr_when_breaks_link_to_next_hop(&mut self, next_hop: Ipv6Addr, now: Duration) {
        let Some(to_next_hop) = self.table.lookup(next_hop, now) else {
            return;
        };
        debug!(%next_hop, "Link broken");

        let mut precursors = Vec::new();
        to_next_hop.collect_precursors(&mut precursors);

        let mut rerr = RerrHeader::new();
        // An empty header always has room
        let _ = rerr.add_unreachable(next_hop, to_next_hop.seqno);

        let mut unreachable = self.table.neighbors_using(next_hop, now);
        for (&dst, &seqno) in &unreachable {
            if self.add_to_rerr(&mut rerr, dst, seqno, &precursors, now) {
                if let Some(record) = self.table.lookup(dst, now) {
                    record.collect_precursors(&mut precursors);
                }
            }
        }
        if rerr.dest_count() != 0 {
            self.send_rerr_message(rerr, &precursors, now);
        }

        unreachable.insert(next_hop, to_next_hop.seqno);
        self.table.invalidate(&unreachable, now);
    }

    /// Append one destination, flushing the header to `precursors` first
    /// if it is full. Returns `false` if the destination was already listed.
    fn add_to_rerr(
        &mut self,
        rerr: &mut RerrHeader,
        dst: Ipv6Addr,
        seqno: u32,
        precursors: &[Ipv6Addr],
        now: Duration,
    ) -> bool {
        match rerr.add_unreachable(dst, seqno) {
            Ok(()) => true,
            Err(PacketError::RerrFull) => {
                self.send_rerr_message(rerr.clone(), precursors, now);
                rerr.clear();
                rerr.add_unreachable(dst, seqno).is_ok()
            }
            Err(_) => false,
        }
    }

    /// A datagram for `dst` could not be forwarded. Tell its origin.
    pub(super) fn send_rerr_when_no_route_to_forward(
        &mut self,
        dst: Ipv6Addr,
        seqno: u32,
        origin: Ipv6Addr,
        now: Duration,
    ) {
        if self.rerr_rate.is_limited() {
            trace!(%dst, "RERR rate limit reached");
            return;
        }
        let mut rerr = RerrHeader::new();
        // An empty header always has room
        let _ = rerr.add_unreachable(dst, seqno);
        let message = ControlMessage::Error(rerr);

        if let Some(to_origin) = self.table.lookup_valid(origin, now) {
            debug!(%dst, %origin, via = %to_origin.next_hop, "Reporting unreachable destination");
            self.send_control(
                to_origin.interface,
                to_origin.next_hop,
                1,
                message,
                false,
                now,
            );
        } else {
            debug!(%dst, %origin, "Reporting unreachable destination to all neighbors");
            for (interface, _) in self.interface_list() {
                self.send_control(interface, ALL_NODES, 1, message.clone(), false, now);
            }
        }
        self.rerr_rate.try_acquire();
    }

    /// Send a RERR to the neighbors in `precursors`: unicast to a single
    /// precursor, flooded one hop otherwise.
    pub(super) fn send_rerr_message(&mut self, rerr: RerrHeader, precursors: &[Ipv6Addr], now: Duration) {
        if precursors.is_empty() {
            trace!("No precursors, RERR not sent");
            return;
        }
        if self.rerr_rate.is_limited() {
            trace!("RERR rate limit reached");
            return;
        }

        let message = ControlMessage::Error(rerr);
        if let [precursor] = precursors {
            if let Some(to_precursor) = self.table.lookup_valid(*precursor, now) {
                trace!(%precursor, "Unicasting RERR");
                self.send_control(to_precursor.interface, *precursor, 1, message, true, now);
                self.rerr_rate.try_acquire();
            }
            return;
        }

        let mut interfaces: Vec<InterfaceIndex> = Vec::new();
        for precursor in precursors {
            if let Some(record) = self.table.lookup_valid(*precursor, now) {
                if !interfaces.contains(&record.interface) {
                    interfaces.push(record.interface);
                }
            }
        }
        for interface in &interfaces {
            trace!(%interface, "Broadcasting RERR");
            self.send_control(*interface, ALL_NODES, 1, message.clone(), true, now);
        }
        if !interfaces.is_empty() {
            self.rerr_rate.try_acquire();
        }
    }

    /// Handle a RERR from neighbor `sender`
    pub(super) fn recv_error(&mut self, rerr: RerrHeader, sender: Ipv6Addr, now: Duration) {
        let routed_via_sender = self.table.neighbors_using(sender, now);
        let unreachable: BTreeMap<Ipv6Addr, u32> = rerr
            .unreachable()
            .filter(|(dst, _)| routed_via_sender.contains_key(dst))
            .collect();
        trace!(%sender, listed = rerr.dest_count(), affected = unreachable.len(), "RERR received");
        if unreachable.is_empty() {
            return;
        }

        let mut out = RerrHeader::new();
        let mut precursors = Vec::new();
        for (&dst, &seqno) in &unreachable {
            if self.add_to_rerr(&mut out, dst, seqno, &precursors, now) {
                if let Some(record) = self.table.lookup(dst, now) {
                    record.collect_precursors(&mut precursors);
                }
            }
        }
        if out.dest_count() != 0 {
            self.send_rerr_message(out, &precursors, now);
        }
        self.table.invalidate(&unreachable, now);
    }
}
