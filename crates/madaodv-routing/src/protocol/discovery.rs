//! Route discovery
//!
//! Expanding-ring RREQ floods, replies from destinations, intermediates and
//! gateways, reply acknowledgments and hellos.

use std::net::Ipv6Addr;
use std::time::Duration;

use madaodv_core::{
    ALL_NODES, Clock, ControlMessage, GATEWAY_SEARCH_ADDR, InterfaceIndex, LinkLayer,
    RrepAckHeader, RrepHeader, RreqHeader, Transport, on_internet, seqno_at_least, seqno_greater,
};
use tracing::{debug, trace};

use super::{DEFERRED_REQUEST_SLACK, RoutingProtocol};
use crate::table::{RouteFlag, RouteRecord};
use crate::timer::TimerKey;

/// Clamp a hop count to the width of the IP hop limit
fn hop_limit(hops: u16) -> u8 {
    u8::try_from(hops).unwrap_or(u8::MAX)
}

impl<C, T, L> RoutingProtocol<C, T, L>
where
    C: Clock,
    T: Transport,
    L: LinkLayer,
{
    // ------------------------------------------------------------------
    // Requests
    // ------------------------------------------------------------------

    /// Flood a RREQ for `dst` with an expanding ring.
    ///
    /// Outside destinations are searched for under the gateway search key,
    /// with the gateway flag set on the request.
    pub(super) fn send_request(&mut self, dst: Ipv6Addr, now: Duration) {
        if !self.rreq_rate.try_acquire() {
            let wait = self
                .timers
                .remaining(TimerKey::RreqRateReset, now)
                .unwrap_or_default();
            debug!(%dst, ?wait, "RREQ rate limit reached, deferring");
            self.timers.schedule(
                TimerKey::DeferredRequest(dst),
                now + wait + DEFERRED_REQUEST_SLACK,
            );
            return;
        }

        let gateway_query = on_internet(dst);
        let search_key = if gateway_query { GATEWAY_SEARCH_ADDR } else { dst };
        let diameter = self.config.net_diameter;

        let mut rreq = RreqHeader {
            destination: dst,
            gateway_query,
            ..Default::default()
        };

        let mut ttl = self.config.ttl_start;
        match self.table.lookup(search_key, now) {
            Some(mut record) => {
                if record.flag != RouteFlag::InSearch {
                    ttl = (record.hops + self.config.ttl_increment).min(diameter);
                } else {
                    ttl = record.hops + self.config.ttl_increment;
                    if ttl > self.config.ttl_threshold {
                        ttl = diameter;
                    }
                }
                if ttl == diameter {
                    record.rreq_count += 1;
                }
                if record.valid_seqno {
                    rreq.destination_seqno = record.seqno;
                } else {
                    rreq.unknown_seqno = true;
                }
                record.hops = ttl;
                record.flag = RouteFlag::InSearch;
                record.gateway = record.gateway || gateway_query;
                record.set_lifetime(self.config.path_discovery_time, now);
                self.table.update(record, now);
            }
            None => {
                rreq.unknown_seqno = true;
                let mut record = RouteRecord::new(
                    search_key,
                    Ipv6Addr::UNSPECIFIED,
                    InterfaceIndex::LOOPBACK,
                    Ipv6Addr::UNSPECIFIED,
                )
                .with_hops(ttl)
                .with_flag(RouteFlag::InSearch)
                .with_gateway(gateway_query)
                .with_lifetime(self.config.path_discovery_time, now);
                if ttl == diameter {
                    record.rreq_count += 1;
                }
                self.table.insert(record, now);
            }
        }

        rreq.gratuitous_reply = self.config.gratuitous_reply;
        rreq.destination_only = self.config.destination_only;
        self.seqno = self.seqno.wrapping_add(1);
        rreq.origin_seqno = self.seqno;
        self.request_id = self.request_id.wrapping_add(1);
        rreq.request_id = self.request_id;

        debug!(
            %dst,
            ttl,
            id = rreq.request_id,
            gateway_query,
            "Sending RREQ"
        );
        for (interface, address) in self.interface_list() {
            rreq.origin = address;
            self.rreq_ids.is_duplicate(address, rreq.request_id, now);
            self.send_control(
                interface,
                ALL_NODES,
                hop_limit(ttl),
                ControlMessage::Request(rreq.clone()),
                true,
                now,
            );
        }
        self.last_broadcast = Some(now);

        self.schedule_rreq_retry(search_key, now);
    }

    /// Arm the retry for a search. Below the network diameter the wait
    /// covers the ring; at the diameter it doubles with every attempt.
    fn schedule_rreq_retry(&mut self, search_key: Ipv6Addr, now: Duration) {
        let Some(record) = self.table.lookup(search_key, now) else {
            return;
        };
        let wait = if record.hops < self.config.net_diameter {
            self.config.node_traversal_time
                * 2
                * (u32::from(record.hops) + u32::from(self.config.timeout_buffer))
        } else {
            let backoff = record.rreq_count.saturating_sub(1).min(16);
            self.config.net_traversal_time * (1u32 << backoff)
        };
        trace!(dst = %search_key, ?wait, "Scheduled RREQ retry");
        self.timers
            .schedule(TimerKey::RouteRequest(search_key), now + wait);
    }

    pub(super) fn route_request_timer_expire(&mut self, search_key: Ipv6Addr, now: Duration) {
        let is_gateway_search = search_key == GATEWAY_SEARCH_ADDR;

        if let Some(record) = self.table.lookup_valid(search_key, now) {
            debug!(dst = %search_key, "Route found, releasing queue");
            if is_gateway_search {
                if let Some(gateway) = self.table.find_active_gateway(now) {
                    self.send_gateway_packets_from_queue(gateway.route(), now);
                }
            } else {
                self.send_packet_from_queue(search_key, record.route(), now);
            }
            return;
        }

        let record = self.table.lookup(search_key, now);
        match record {
            Some(record) if record.rreq_count >= self.config.rreq_retries => {
                debug!(
                    dst = %search_key,
                    attempts = record.rreq_count,
                    "Route discovery failed"
                );
                self.give_up_search(search_key, now);
            }
            Some(record) if record.flag == RouteFlag::InSearch => {
                let target = if is_gateway_search {
                    self.queue.first_gateway_destination()
                } else {
                    Some(search_key)
                };
                match target {
                    Some(target) => {
                        trace!(dst = %target, "Retrying route discovery");
                        self.send_request(target, now);
                    }
                    None => {
                        debug!("No datagram waits for a gateway, ending search");
                        self.table.delete_route(search_key, now);
                    }
                }
            }
            _ => {
                debug!(dst = %search_key, "Route discovery abandoned");
                self.give_up_search(search_key, now);
            }
        }
    }

    fn give_up_search(&mut self, search_key: Ipv6Addr, now: Duration) {
        self.table.delete_route(search_key, now);
        if search_key == GATEWAY_SEARCH_ADDR {
            self.queue.drop_gateway_queries(now);
        } else {
            self.queue.drop_all_for(search_key, now);
        }
    }

    /// Handle a RREQ from neighbor `sender` that arrived with `ttl`
    pub(super) fn recv_request(
        &mut self,
        mut rreq: RreqHeader,
        interface: InterfaceIndex,
        receiver: Ipv6Addr,
        sender: Ipv6Addr,
        ttl: u8,
        now: Duration,
    ) {
        let origin = rreq.origin;
        let id = rreq.request_id;

        if self
            .table
            .lookup(sender, now)
            .is_some_and(|r| r.is_unidirectional(now))
        {
            trace!(%sender, "RREQ over a blacklisted link, ignoring");
            return;
        }
        if self.rreq_ids.is_duplicate(origin, id, now) {
            trace!(%origin, id, "Duplicate RREQ");
            return;
        }

        let hops = rreq.hop_count.saturating_add(1);
        rreq.hop_count = hops;
        let hop_count = u16::from(hops);
        let node_traversal = self.config.node_traversal_time;
        let reverse_lifetime = (self.config.net_traversal_time * 2)
            .saturating_sub(node_traversal * 2 * u32::from(hops));

        match self.table.lookup(origin, now) {
            None => {
                let record = RouteRecord::new(origin, sender, interface, receiver)
                    .with_seqno(rreq.origin_seqno, true)
                    .with_hops(hop_count)
                    .with_lifetime(reverse_lifetime, now);
                self.table.insert(record, now);
            }
            Some(mut record) => {
                if !record.valid_seqno || seqno_greater(rreq.origin_seqno, record.seqno) {
                    record.seqno = rreq.origin_seqno;
                }
                record.valid_seqno = true;
                record.next_hop = sender;
                record.interface = interface;
                record.source = receiver;
                record.hops = hop_count;
                let lifetime = reverse_lifetime.max(record.lifetime(now));
                record.set_lifetime(lifetime, now);
                self.table.update(record, now);
            }
        }

        let active = self.config.active_route_timeout;
        match self.table.lookup(sender, now) {
            None => {
                let record = RouteRecord::new(sender, sender, interface, receiver)
                    .with_seqno(rreq.origin_seqno, false)
                    .with_hops(1)
                    .with_lifetime(active, now);
                self.table.insert(record, now);
            }
            Some(mut record) => {
                record.set_lifetime(active, now);
                record.valid_seqno = false;
                record.seqno = rreq.origin_seqno;
                record.flag = RouteFlag::Valid;
                record.interface = interface;
                record.source = receiver;
                record.hops = 1;
                record.next_hop = sender;
                self.table.update(record, now);
            }
        }
        self.touch_neighbor(sender, self.hello_lifetime(), now);

        trace!(%origin, id, dst = %rreq.destination, hops, "RREQ received");

        if self.is_my_own_address(rreq.destination) {
            if let Some(to_origin) = self.table.lookup(origin, now) {
                debug!(%origin, "Answering RREQ for this node");
                self.send_reply(&rreq, to_origin, now);
            }
            return;
        }

        if let Some(to_dst) = self.table.lookup(rreq.destination, now) {
            if self.answer_from_route(&mut rreq, to_dst, sender, now) {
                return;
            }
        }

        if rreq.gateway_query {
            if self.is_gateway() {
                if let Some(to_origin) = self.table.lookup(origin, now) {
                    debug!(%origin, dst = %rreq.destination, "Answering gateway query");
                    self.send_reply(&rreq, to_origin, now);
                }
                return;
            }
            if let Some(gateway) = self.table.find_active_gateway(now) {
                if self.answer_from_route(&mut rreq, gateway, sender, now) {
                    return;
                }
            }
        }

        if ttl < 2 {
            trace!(%origin, id, "RREQ hop limit exhausted");
            return;
        }
        for (interface, _) in self.interface_list() {
            self.send_control(
                interface,
                ALL_NODES,
                ttl - 1,
                ControlMessage::Request(rreq.clone()),
                true,
                now,
            );
        }
        self.last_broadcast = Some(now);
    }

    /// Try to answer a RREQ from a route this node already holds.
    ///
    /// Returns `true` when the request was consumed. Otherwise the request
    /// may have been refreshed with a newer destination sequence number.
    fn answer_from_route(
        &mut self,
        rreq: &mut RreqHeader,
        to_dst: RouteRecord,
        sender: Ipv6Addr,
        now: Duration,
    ) -> bool {
        if to_dst.next_hop == sender {
            trace!(dst = %to_dst.destination, "RREQ came from our next hop, dropping");
            return true;
        }
        let fresh_enough =
            rreq.unknown_seqno || seqno_at_least(to_dst.seqno, rreq.destination_seqno);
        if !fresh_enough || !to_dst.valid_seqno {
            return false;
        }
        if !rreq.destination_only && to_dst.is_valid() {
            if let Some(to_origin) = self.table.lookup(rreq.origin, now) {
                debug!(
                    dst = %to_dst.destination,
                    origin = %rreq.origin,
                    "Answering RREQ from route cache"
                );
                self.send_reply_by_intermediate(to_dst, to_origin, rreq.gratuitous_reply, now);
            }
            return true;
        }
        rreq.destination_seqno = to_dst.seqno;
        rreq.unknown_seqno = false;
        false
    }

    // ------------------------------------------------------------------
    // Replies
    // ------------------------------------------------------------------

    /// Answer as the destination, or as a gateway for an outside destination
    fn send_reply(&mut self, rreq: &RreqHeader, to_origin: RouteRecord, now: Duration) {
        if !rreq.unknown_seqno && rreq.destination_seqno == self.seqno.wrapping_add(1) {
            self.seqno = self.seqno.wrapping_add(1);
        }
        let mut rrep = RrepHeader {
            hop_count: 0,
            destination: rreq.destination,
            destination_seqno: self.seqno,
            origin: to_origin.destination,
            lifetime: self.config.my_route_timeout,
            ..Default::default()
        };
        if self.is_gateway() {
            rrep.gateway = true;
            if let Some(address) = self.interface_address(to_origin.interface) {
                rrep.destination = address;
            }
        }
        debug!(
            dst = %rrep.destination,
            origin = %rrep.origin,
            gateway = rrep.gateway,
            "Sending RREP"
        );
        self.send_control(
            to_origin.interface,
            to_origin.next_hop,
            hop_limit(to_origin.hops),
            ControlMessage::Reply(rrep),
            false,
            now,
        );
    }

    fn send_reply_by_intermediate(
        &mut self,
        mut to_dst: RouteRecord,
        mut to_origin: RouteRecord,
        gratuitous: bool,
        now: Duration,
    ) {
        let mut rrep = RrepHeader {
            hop_count: hop_limit(to_dst.hops),
            destination: to_dst.destination,
            destination_seqno: to_dst.seqno,
            origin: to_origin.destination,
            lifetime: to_dst.lifetime(now),
            gateway: to_dst.gateway,
            ..Default::default()
        };

        // A one-hop destination means the reply crosses a link we have not
        // heard both ways yet
        if to_dst.hops == 1 {
            rrep.ack_required = true;
            self.timers.schedule(
                TimerKey::AckWait(to_origin.next_hop),
                now + self.config.next_hop_wait,
            );
        }

        to_dst.insert_precursor(to_origin.next_hop);
        to_origin.insert_precursor(to_dst.next_hop);
        self.table.update(to_dst.clone(), now);
        self.table.update(to_origin.clone(), now);

        self.send_control(
            to_origin.interface,
            to_origin.next_hop,
            hop_limit(to_origin.hops),
            ControlMessage::Reply(rrep),
            false,
            now,
        );

        if gratuitous {
            let grat = RrepHeader {
                hop_count: hop_limit(to_origin.hops),
                destination: to_origin.destination,
                destination_seqno: to_origin.seqno,
                origin: to_dst.destination,
                lifetime: to_origin.lifetime(now),
                ..Default::default()
            };
            trace!(dst = %to_dst.destination, "Sending gratuitous RREP");
            self.send_control(
                to_dst.interface,
                to_dst.next_hop,
                hop_limit(to_dst.hops),
                ControlMessage::Reply(grat),
                false,
                now,
            );
        }
    }

    fn send_reply_ack(&mut self, neighbor: Ipv6Addr, now: Duration) {
        let Some(record) = self.table.lookup(neighbor, now) else {
            debug!(%neighbor, "No route to acknowledge RREP");
            return;
        };
        self.send_control(
            record.interface,
            neighbor,
            1,
            ControlMessage::ReplyAck(RrepAckHeader::default()),
            false,
            now,
        );
    }

    /// Handle a RREP from neighbor `sender` that arrived with `ttl`
    pub(super) fn recv_reply(
        &mut self,
        mut rrep: RrepHeader,
        interface: InterfaceIndex,
        receiver: Ipv6Addr,
        sender: Ipv6Addr,
        ttl: u8,
        now: Duration,
    ) {
        let hops = rrep.hop_count.saturating_add(1);
        rrep.hop_count = hops;
        let hop_count = u16::from(hops);

        if rrep.is_hello() {
            self.process_hello(&rrep, interface, receiver, now);
            return;
        }

        let dst = rrep.destination;
        trace!(%dst, origin = %rrep.origin, hops, gateway = rrep.gateway, "RREP received");

        let new_entry = RouteRecord::new(dst, sender, interface, receiver)
            .with_seqno(rrep.destination_seqno, true)
            .with_hops(hop_count)
            .with_lifetime(rrep.lifetime, now)
            .with_gateway(rrep.gateway);

        let previous = self.table.lookup(dst, now);
        match &previous {
            Some(to_dst) => {
                let fresher = !to_dst.valid_seqno
                    || seqno_greater(rrep.destination_seqno, to_dst.seqno)
                    || (rrep.destination_seqno == to_dst.seqno
                        && (!to_dst.is_valid() || hop_count < to_dst.hops));
                if fresher {
                    self.table.update(new_entry.clone(), now);
                }
            }
            None => {
                self.table.insert(new_entry.clone(), now);
            }
        }

        if rrep.gateway {
            while let Some(search) = self.table.find_gateway_in_search(now) {
                debug!(search = %search.destination, gateway = %dst, "Gateway found");
                let record = RouteRecord::new(search.destination, sender, interface, receiver)
                    .with_seqno(rrep.destination_seqno, true)
                    .with_hops(hop_count)
                    .with_lifetime(rrep.lifetime, now);
                self.table.update(record, now);
            }
        }

        if rrep.ack_required {
            self.send_reply_ack(sender, now);
            rrep.ack_required = false;
        }

        if self.is_my_own_address(rrep.origin) {
            if previous.is_some_and(|r| r.flag == RouteFlag::InSearch) {
                self.table.update(new_entry, now);
                self.timers.cancel(TimerKey::RouteRequest(dst));
            }
            if rrep.gateway {
                self.timers.cancel(TimerKey::RouteRequest(GATEWAY_SEARCH_ADDR));
            }
            let Some(to_dst) = self.table.lookup_valid(dst, now) else {
                return;
            };
            debug!(%dst, hops, "Route discovered");
            if rrep.gateway {
                self.send_gateway_packets_from_queue(to_dst.route(), now);
            }
            self.send_packet_from_queue(dst, to_dst.route(), now);
            return;
        }

        let Some(mut to_origin) = self
            .table
            .lookup(rrep.origin, now)
            .filter(|r| r.flag != RouteFlag::InSearch)
        else {
            trace!(origin = %rrep.origin, "No reverse route, dropping RREP");
            return;
        };
        let lifetime = self
            .config
            .active_route_timeout
            .max(to_origin.lifetime(now));
        to_origin.set_lifetime(lifetime, now);
        self.table.update(to_origin.clone(), now);

        if let Some(to_dst) = self.table.lookup_valid(dst, now) {
            self.add_precursor(dst, to_origin.next_hop, now);
            self.add_precursor(to_dst.next_hop, to_origin.next_hop, now);
            self.add_precursor(rrep.origin, to_dst.next_hop, now);
            self.add_precursor(to_origin.next_hop, to_dst.next_hop, now);
        }

        if ttl < 2 {
            trace!(origin = %rrep.origin, "RREP hop limit exhausted");
            return;
        }
        self.send_control(
            to_origin.interface,
            to_origin.next_hop,
            ttl - 1,
            ControlMessage::Reply(rrep),
            false,
            now,
        );
    }

    pub(super) fn recv_reply_ack(&mut self, neighbor: Ipv6Addr, now: Duration) {
        let Some(mut record) = self.table.lookup(neighbor, now) else {
            return;
        };
        trace!(%neighbor, "RREP-ACK received");
        self.timers.cancel(TimerKey::AckWait(neighbor));
        record.flag = RouteFlag::Valid;
        record.clear_blacklist();
        self.table.update(record, now);
    }

    /// No acknowledgment came back: the link only works one way
    pub(super) fn ack_timer_expire(&mut self, neighbor: Ipv6Addr, now: Duration) {
        debug!(%neighbor, "RREP-ACK timed out, blacklisting");
        self.table
            .mark_unidirectional(neighbor, self.config.black_list_timeout, now);
    }

    // ------------------------------------------------------------------
    // Hellos
    // ------------------------------------------------------------------

    fn process_hello(
        &mut self,
        rrep: &RrepHeader,
        interface: InterfaceIndex,
        receiver: Ipv6Addr,
        now: Duration,
    ) {
        let neighbor = rrep.destination;
        trace!(%neighbor, "Hello received");
        match self.table.lookup(neighbor, now) {
            None => {
                let record = RouteRecord::new(neighbor, neighbor, interface, receiver)
                    .with_seqno(rrep.destination_seqno, true)
                    .with_hops(1)
                    .with_lifetime(rrep.lifetime, now);
                self.table.insert(record, now);
            }
            Some(mut record) => {
                let lifetime = self.hello_lifetime().max(record.lifetime(now));
                record.set_lifetime(lifetime, now);
                record.seqno = rrep.destination_seqno;
                record.valid_seqno = true;
                record.flag = RouteFlag::Valid;
                record.interface = interface;
                record.source = receiver;
                record.hops = 1;
                record.next_hop = neighbor;
                self.table.update(record, now);
            }
        }
        if self.config.enable_hello {
            self.touch_neighbor(neighbor, self.hello_lifetime(), now);
        }
    }

    /// Hello tick. A RREQ broadcast since the last tick stands in for the
    /// hello and shifts the next tick.
    pub(super) fn hello_timer_expire(&mut self, now: Duration) {
        let offset = match self.last_broadcast.take() {
            Some(at) => now.saturating_sub(at),
            None => {
                self.send_hello(now);
                Duration::ZERO
            }
        };
        let next = self.config.hello_interval.saturating_sub(offset);
        self.timers.schedule(TimerKey::Hello, now + next);
    }

    fn send_hello(&mut self, now: Duration) {
        let lifetime = self.hello_lifetime();
        trace!("Sending hello");
        for (interface, address) in self.interface_list() {
            let hello = RrepHeader::hello(address, self.seqno, lifetime);
            self.send_control(interface, ALL_NODES, 1, ControlMessage::Reply(hello), true, now);
        }
    }
}
