//! Data-plane decisions
//!
//! Locally originated datagrams go through [`RoutingProtocol::route_output`];
//! datagrams arriving from a neighbor go through
//! [`RoutingProtocol::route_input`]. Anything without a route is parked in
//! the request queue until discovery finishes.

use std::net::Ipv6Addr;
use std::time::Duration;

use madaodv_core::{
    ALL_NODES, Clock, Continuations, Datagram, DeliveryError, GATEWAY_SEARCH_ADDR, InterfaceIndex,
    LinkLayer, LocalDeliverFn, Route, Transport, is_all_nodes, is_link_local, on_internet,
};
use tracing::{debug, trace};

use super::RoutingProtocol;
use crate::queue::QueueEntry;
use crate::table::RouteFlag;

/// Outcome of routing a locally originated datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDecision {
    /// Send it now along this route
    Route(Route),
    /// Queued until discovery finishes; the continuations will be called later
    Deferred,
    /// Cannot be sent at all
    Error(DeliveryError),
}

impl RouteDecision {
    /// The route, if one was found
    pub fn route(&self) -> Option<Route> {
        match self {
            RouteDecision::Route(route) => Some(*route),
            _ => None,
        }
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, RouteDecision::Deferred)
    }
}

impl<C, T, L> RoutingProtocol<C, T, L>
where
    C: Clock,
    T: Transport,
    L: LinkLayer,
{
    /// Route a datagram originated by this node.
    ///
    /// 1. **ROUTE**: a VALID route to the destination exists
    /// 2. **GATEWAY**: the destination is outside the mesh and a gateway route exists
    /// 3. **DEFERRED**: the datagram is queued and discovery starts
    ///
    /// The continuations are only used for deferred datagrams.
    pub fn route_output(&mut self, datagram: Datagram, continuations: Continuations) -> RouteDecision {
        let _span = self.span.clone().entered();
        let now = self.now();
        let dst = datagram.destination();

        if self.interfaces.is_empty() {
            debug!(%dst, "No interfaces, cannot route");
            return RouteDecision::Error(DeliveryError::NoRouteToHost);
        }

        if dst.is_multicast() {
            if !is_all_nodes(dst) {
                return RouteDecision::Error(DeliveryError::NoRouteToHost);
            }
            return match self.interfaces.iter().next() {
                Some((interface, source)) => RouteDecision::Route(Route {
                    destination: ALL_NODES,
                    gateway: ALL_NODES,
                    source: *source,
                    interface: *interface,
                }),
                None => RouteDecision::Error(DeliveryError::NoInterface),
            };
        }

        let active = self.config.active_route_timeout;
        if let Some(record) = self.table.lookup_valid(dst, now) {
            self.update_route_lifetime(dst, active, now);
            self.update_route_lifetime(record.next_hop, active, now);
            trace!(%dst, route = %record.route(), "Route found");
            return RouteDecision::Route(record.route());
        }

        if on_internet(dst) {
            if let Some(gateway) = self.table.find_active_gateway(now) {
                self.update_route_lifetime(gateway.destination, active, now);
                self.update_route_lifetime(gateway.next_hop, active, now);
                trace!(%dst, gateway = %gateway.destination, "Routing through gateway");
                return RouteDecision::Route(gateway.route());
            }
        }

        self.deferred_route_output(datagram, continuations, now);
        RouteDecision::Deferred
    }

    /// Queue a datagram and start discovery unless one is already running
    fn deferred_route_output(&mut self, datagram: Datagram, continuations: Continuations, now: Duration) {
        let dst = datagram.destination();
        if is_link_local(dst) {
            debug!(%dst, "Link-local destination is never discovered");
            continuations.fail(datagram, DeliveryError::NoRouteToHost);
            return;
        }

        let needs_gateway = on_internet(dst);
        let search_key = if needs_gateway { GATEWAY_SEARCH_ADDR } else { dst };
        let entry = QueueEntry::new(datagram, continuations).with_gateway(needs_gateway);
        if !self.queue.enqueue(entry, now) {
            return;
        }
        debug!(%dst, needs_gateway, "Datagram queued for discovery");

        let searching = self
            .table
            .lookup(search_key, now)
            .is_some_and(|r| r.flag == RouteFlag::InSearch);
        if !searching {
            self.send_request(dst, now);
        }
    }

    /// Route a datagram received on `incoming`.
    ///
    /// Returns `true` if the datagram was consumed: delivered locally,
    /// forwarded, queued, or deliberately discarded as a duplicate.
    pub fn route_input(
        &mut self,
        datagram: Datagram,
        incoming: InterfaceIndex,
        continuations: &Continuations,
        local_deliver: &LocalDeliverFn,
    ) -> bool {
        let _span = self.span.clone().entered();
        let now = self.now();

        if self.interfaces.is_empty() {
            return false;
        }

        if incoming == InterfaceIndex::LOOPBACK && datagram.deferred {
            self.deferred_route_output(datagram, continuations.clone(), now);
            return true;
        }

        let origin = datagram.source();
        let dst = datagram.destination();
        let active = self.config.active_route_timeout;

        if self.is_my_own_address(origin) {
            trace!(uid = datagram.uid, "Own datagram came back, discarding");
            return true;
        }

        if dst.is_multicast() && !is_all_nodes(dst) {
            return false;
        }

        if is_all_nodes(dst) {
            if self.dpd.is_duplicate(&datagram, now) {
                trace!(uid = datagram.uid, %origin, "Duplicate broadcast");
                return true;
            }
            self.update_route_lifetime(origin, active, now);
            local_deliver(datagram.clone(), incoming);
            if !self.config.enable_broadcast || datagram.header.hop_limit <= 1 {
                return true;
            }
            for (interface, source) in self.interface_list() {
                let route = Route {
                    destination: ALL_NODES,
                    gateway: ALL_NODES,
                    source,
                    interface,
                };
                continuations.forward(route, datagram.clone());
            }
            return true;
        }

        if self.is_my_own_address(dst) || (self.is_gateway() && on_internet(dst)) {
            self.update_route_lifetime(origin, active, now);
            if let Some(to_origin) = self.table.lookup_valid(origin, now) {
                self.update_route_lifetime(to_origin.next_hop, active, now);
                self.touch_neighbor(to_origin.next_hop, active, now);
            }
            trace!(uid = datagram.uid, %origin, "Local delivery");
            local_deliver(datagram, incoming);
            return true;
        }

        self.forwarding(datagram, continuations, now)
    }

    fn forwarding(&mut self, datagram: Datagram, continuations: &Continuations, now: Duration) -> bool {
        self.table.purge(now);
        let dst = datagram.destination();
        let origin = datagram.source();
        let active = self.config.active_route_timeout;

        let to_dst = match self.table.lookup(dst, now) {
            Some(record) => Some(record),
            None if on_internet(dst) => self.table.find_active_gateway(now),
            None => None,
        };

        match to_dst {
            Some(record) if record.is_valid() => {
                self.update_route_lifetime(origin, active, now);
                self.update_route_lifetime(record.destination, active, now);
                self.update_route_lifetime(record.next_hop, active, now);
                let to_origin = self.table.lookup(origin, now);
                if let Some(to_origin) = &to_origin {
                    self.update_route_lifetime(to_origin.next_hop, active, now);
                }

                self.touch_neighbor(record.next_hop, active, now);
                if let Some(to_origin) = &to_origin {
                    self.touch_neighbor(to_origin.next_hop, active, now);
                }

                trace!(uid = datagram.uid, %dst, next_hop = %record.next_hop, "Forwarding");
                continuations.forward(record.route(), datagram);
                true
            }
            Some(record) if record.valid_seqno => {
                debug!(%dst, state = %record.flag, "No active route, reporting");
                self.send_rerr_when_no_route_to_forward(dst, record.seqno, origin, now);
                false
            }
            _ => {
                debug!(%dst, "No route, reporting");
                self.send_rerr_when_no_route_to_forward(dst, 0, origin, now);
                false
            }
        }
    }

    /// Release every datagram queued for `dst` along `route`
    pub(super) fn send_packet_from_queue(&mut self, dst: Ipv6Addr, route: Route, now: Duration) {
        while let Some(entry) = self.queue.dequeue(dst, now) {
            let QueueEntry {
                mut datagram,
                continuations,
                ..
            } = entry;
            datagram.header.source = route.source;
            datagram.deferred = false;
            trace!(uid = datagram.uid, %dst, "Releasing queued datagram");
            continuations.forward(route, datagram);
        }
    }

    /// Release every datagram waiting for a gateway, addressed to the gateway
    pub(super) fn send_gateway_packets_from_queue(&mut self, route: Route, now: Duration) {
        while let Some(entry) = self.queue.dequeue_gateway_query(now) {
            let QueueEntry {
                mut datagram,
                continuations,
                ..
            } = entry;
            datagram.header.source = route.source;
            datagram.header.destination = route.destination;
            datagram.deferred = false;
            trace!(uid = datagram.uid, gateway = %route.destination, "Releasing datagram to gateway");
            continuations.forward(route, datagram);
        }
    }
}
