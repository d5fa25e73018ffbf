//! The MADAODV routing engine
//!
//! [`RoutingProtocol`] owns every piece of per-node routing state and is
//! driven entirely from outside:
//!
//! - the host calls [`RoutingProtocol::route_output`] and
//!   [`RoutingProtocol::route_input`] for data traffic
//! - received control messages come in through [`RoutingProtocol::handle_control`]
//! - the driver sleeps until [`RoutingProtocol::poll_timeout`] and then calls
//!   [`RoutingProtocol::handle_timeout`]
//! - link-layer feedback arrives through [`RoutingProtocol::notify_tx_error`]
//!   and the interface notifications
//!
//! The engine never blocks and never reads the time on its own: every entry
//! point samples the injected [`Clock`] once and works at that instant.
//!
//! ## Submodules
//!
//! - `output`: data-plane decisions, deferral and queue flushing
//! - `discovery`: RREQ/RREP/RREP-ACK handling and hellos
//! - `maintenance`: RERR origination and link-break repair

mod discovery;
mod maintenance;
mod output;

use std::collections::BTreeMap;
use std::net::Ipv6Addr;
use std::time::Duration;

use madaodv_core::{
    Clock, ControlMessage, ControlPacket, InterfaceIndex, LinkLayer, MacAddr, Transport,
    mac_to_ipv6,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, trace, warn};

use crate::cache::{DuplicatePacketDetection, IdCache};
use crate::config::MadaodvConfig;
use crate::error::{RoutingError, RoutingResult};
use crate::neighbor::Neighbors;
use crate::queue::RequestQueue;
use crate::rate_limit::RateCounter;
use crate::table::{RouteFlag, RouteRecord, RoutingTable};
use crate::timer::{TimerKey, Timers};

pub use output::RouteDecision;

/// Upper bound of the random delay put on broadcasts and RERRs
const MAX_JITTER_MS: u64 = 10;

/// Upper bound of the random offset of the first hello
const MAX_HELLO_START_MS: u64 = 100;

/// Period of the rate-limit windows
const RATE_WINDOW: Duration = Duration::from_secs(1);

/// First uplink probe after start
const FIRST_UPLINK_CHECK: Duration = Duration::from_millis(1);

/// Slack added when a request waits for the rate-limit window to reset
const DEFERRED_REQUEST_SLACK: Duration = Duration::from_micros(100);

const LOOPBACK_ADDR: Ipv6Addr = Ipv6Addr::LOCALHOST;

/// One MADAODV node
///
/// Generic over its collaborators so the same engine runs against the
/// simulator's virtual clock and buffered transport, or real ones.
pub struct RoutingProtocol<C, T, L>
where
    C: Clock,
    T: Transport,
    L: LinkLayer,
{
    config: MadaodvConfig,
    clock: C,
    transport: T,
    link: L,
    /// Interface index to its mesh address
    interfaces: BTreeMap<InterfaceIndex, Ipv6Addr>,
    table: RoutingTable,
    queue: RequestQueue,
    neighbors: Neighbors,
    rreq_ids: IdCache,
    dpd: DuplicatePacketDetection,
    timers: Timers,
    /// Jittered control packets waiting for their `TimerKey::Send`
    outbox: BTreeMap<u64, ControlPacket>,
    next_send_id: u64,
    rreq_rate: RateCounter,
    rerr_rate: RateCounter,
    seqno: u32,
    request_id: u32,
    /// Last RREQ broadcast since the previous hello tick
    last_broadcast: Option<Duration>,
    /// Latest answer of the link-layer uplink probe
    uplink: bool,
    started: bool,
    rng: StdRng,
    span: tracing::Span,
}

impl<C, T, L> RoutingProtocol<C, T, L>
where
    C: Clock,
    T: Transport,
    L: LinkLayer,
{
    /// Create an engine with no interfaces. Call [`Self::start`] once the
    /// host is ready to drive timers.
    pub fn new(config: MadaodvConfig, clock: C, transport: T, link: L) -> RoutingResult<Self> {
        config.validate()?;
        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_rng(&mut rand::rng()),
        };
        Ok(Self {
            table: RoutingTable::new(config.delete_period),
            queue: RequestQueue::new(config.max_queue_len, config.max_queue_time),
            neighbors: Neighbors::new(),
            rreq_ids: IdCache::new(config.path_discovery_time),
            dpd: DuplicatePacketDetection::new(config.path_discovery_time),
            timers: Timers::new(),
            outbox: BTreeMap::new(),
            next_send_id: 0,
            rreq_rate: RateCounter::new(config.rreq_rate_limit),
            rerr_rate: RateCounter::new(config.rerr_rate_limit),
            seqno: 0,
            request_id: 0,
            last_broadcast: None,
            uplink: false,
            started: false,
            rng,
            span: tracing::info_span!("madaodv", node = tracing::field::Empty),
            interfaces: BTreeMap::new(),
            config,
            clock,
            transport,
            link,
        })
    }

    /// Install the loopback route and arm the periodic timers
    pub fn start(&mut self) {
        let _span = self.span.clone().entered();
        if self.started {
            return;
        }
        self.started = true;
        let now = self.now();

        let loopback = RouteRecord::new(
            LOOPBACK_ADDR,
            LOOPBACK_ADDR,
            InterfaceIndex::LOOPBACK,
            LOOPBACK_ADDR,
        )
        .with_seqno(0, true)
        .with_hops(1)
        .with_lifetime(Duration::MAX, now);
        self.table.insert(loopback, now);

        if self.config.enable_hello {
            self.arm_hello(now);
        }
        self.timers.schedule(TimerKey::RreqRateReset, now + RATE_WINDOW);
        self.timers.schedule(TimerKey::RerrRateReset, now + RATE_WINDOW);
        self.timers
            .schedule(TimerKey::UplinkCheck, now + FIRST_UPLINK_CHECK);

        info!(
            hello = self.config.enable_hello,
            access_point = self.config.access_point,
            "Routing started"
        );
    }

    /// Arm the first hello at a random offset, and the neighbor purge
    fn arm_hello(&mut self, now: Duration) {
        let offset = self.rng.random_range(0..=MAX_HELLO_START_MS);
        self.timers
            .schedule(TimerKey::Hello, now + Duration::from_millis(offset));
        self.timers
            .schedule(TimerKey::NeighborPurge, now + self.config.hello_interval);
    }

    /// Start or stop the hello timer after `enable_hello` changed
    fn apply_hello_change(&mut self, was_enabled: bool) {
        let enabled = self.config.enable_hello;
        if !self.started || enabled == was_enabled {
            return;
        }
        if enabled {
            let now = self.now();
            self.arm_hello(now);
        } else {
            self.timers.cancel(TimerKey::Hello);
        }
    }

    // ------------------------------------------------------------------
    // Timer driving
    // ------------------------------------------------------------------

    /// Earliest instant at which [`Self::handle_timeout`] has work to do
    pub fn poll_timeout(&self) -> Option<Duration> {
        self.timers.next_deadline()
    }

    /// Fire every timer due at the current time
    pub fn handle_timeout(&mut self) {
        let _span = self.span.clone().entered();
        let now = self.now();
        while let Some(key) = self.timers.pop_due(now) {
            self.on_timer(key, now);
        }
    }

    fn on_timer(&mut self, key: TimerKey, now: Duration) {
        trace!(?key, "Timer fired");
        match key {
            TimerKey::RouteRequest(dst) => self.route_request_timer_expire(dst, now),
            TimerKey::DeferredRequest(dst) => self.send_request(dst, now),
            TimerKey::AckWait(neighbor) => self.ack_timer_expire(neighbor, now),
            TimerKey::Hello => self.hello_timer_expire(now),
            TimerKey::RreqRateReset => {
                self.rreq_rate.reset();
                self.timers.schedule(TimerKey::RreqRateReset, now + RATE_WINDOW);
            }
            TimerKey::RerrRateReset => {
                self.rerr_rate.reset();
                self.timers.schedule(TimerKey::RerrRateReset, now + RATE_WINDOW);
            }
            TimerKey::NeighborPurge => self.purge_neighbors(now),
            TimerKey::UplinkCheck => self.check_uplink(now),
            TimerKey::Send(id) => self.flush_send(id),
        }
    }

    fn check_uplink(&mut self, now: Duration) {
        let uplink = self.link.has_uplink();
        if uplink != self.uplink {
            info!(uplink, "Uplink state changed");
            self.uplink = uplink;
        }
        self.timers
            .schedule(TimerKey::UplinkCheck, now + self.config.uplink_check_interval);
    }

    // ------------------------------------------------------------------
    // Control plane input
    // ------------------------------------------------------------------

    /// Process a control message received on one of our interfaces.
    ///
    /// `packet.source` is the neighbor that sent it and `packet.hop_limit`
    /// the hop limit it arrived with.
    pub fn handle_control(&mut self, packet: ControlPacket) {
        let _span = self.span.clone().entered();
        let now = self.now();
        let Some(&receiver) = self.interfaces.get(&packet.interface) else {
            warn!(interface = %packet.interface, "Control message on unknown interface");
            return;
        };
        let sender = packet.source;
        if self.is_my_own_address(sender) {
            trace!(%sender, "Ignoring own control message");
            return;
        }

        self.update_route_to_neighbor(sender, packet.interface, receiver, now);

        let message = match ControlMessage::decode(packet.payload) {
            Ok(message) => message,
            Err(e) => {
                debug!(%sender, error = %e, "Dropping malformed control message");
                return;
            }
        };
        trace!(%sender, kind = ?message.message_type(), "Control message received");

        match message {
            ControlMessage::Request(rreq) => {
                self.recv_request(rreq, packet.interface, receiver, sender, packet.hop_limit, now)
            }
            ControlMessage::Reply(rrep) => {
                self.recv_reply(rrep, packet.interface, receiver, sender, packet.hop_limit, now)
            }
            ControlMessage::Error(rerr) => self.recv_error(rerr, sender, now),
            ControlMessage::ReplyAck(_) => self.recv_reply_ack(sender, now),
        }
    }

    /// Keep a one-hop route to whoever sent us a control message
    fn update_route_to_neighbor(
        &mut self,
        sender: Ipv6Addr,
        interface: InterfaceIndex,
        receiver: Ipv6Addr,
        now: Duration,
    ) {
        let active = self.config.active_route_timeout;
        match self.table.lookup(sender, now) {
            None => {
                let record = RouteRecord::new(sender, sender, interface, receiver)
                    .with_hops(1)
                    .with_lifetime(active, now);
                self.table.insert(record, now);
            }
            Some(mut record) => {
                let lifetime = active.max(record.lifetime(now));
                if record.valid_seqno && record.hops == 1 && record.interface == interface {
                    record.set_lifetime(lifetime, now);
                } else {
                    let blacklisted = record.blacklisted_until();
                    record = RouteRecord::new(sender, sender, interface, receiver)
                        .with_hops(1)
                        .with_lifetime(lifetime, now);
                    if let Some(until) = blacklisted {
                        record.blacklist_until(until);
                    }
                }
                self.table.update(record, now);
            }
        }
    }

    // ------------------------------------------------------------------
    // Link and interface notifications
    // ------------------------------------------------------------------

    /// The link layer failed to deliver a frame to `mac`
    pub fn notify_tx_error(&mut self, mac: MacAddr) {
        let _span = self.span.clone().entered();
        let now = self.now();
        let lost = self.neighbors.process_tx_error(mac, now);
        if !lost.is_empty() {
            debug!(%mac, lost = lost.len(), "Transmission failure closed neighbors");
        }
        self.handle_lost_neighbors(lost, now);
    }

    /// Bring up an interface. Its mesh address is derived from `mac`.
    pub fn notify_interface_up(
        &mut self,
        interface: InterfaceIndex,
        mac: MacAddr,
    ) -> RoutingResult<Ipv6Addr> {
        let _span = self.span.clone().entered();
        if self.interfaces.contains_key(&interface) {
            return Err(RoutingError::InterfaceExists(interface));
        }
        let address = mac_to_ipv6(mac);
        if self.interfaces.is_empty() {
            self.span.record("node", tracing::field::display(address));
        }
        self.interfaces.insert(interface, address);
        self.transport.open(interface, address);
        info!(%interface, %address, "Interface up");
        Ok(address)
    }

    /// Take an interface down, dropping every route through it
    pub fn notify_interface_down(&mut self, interface: InterfaceIndex) -> RoutingResult<()> {
        let _span = self.span.clone().entered();
        let Some(address) = self.interfaces.remove(&interface) else {
            return Err(RoutingError::UnknownInterface(interface));
        };
        self.transport.close(interface);
        info!(%interface, %address, "Interface down");

        if self.interfaces.is_empty() {
            self.timers.cancel(TimerKey::Hello);
            self.neighbors.clear();
            self.table.clear();
        } else {
            self.table.delete_all_routes_from_interface(interface);
        }
        Ok(())
    }

    /// An address was added to an interface. Mesh addressing ignores it.
    pub fn notify_add_address(&mut self, interface: InterfaceIndex, address: Ipv6Addr) {
        let _span = self.span.clone().entered();
        debug!(%interface, %address, "Address added");
    }

    /// An address was removed from an interface. Mesh addressing ignores it.
    pub fn notify_remove_address(&mut self, interface: InterfaceIndex, address: Ipv6Addr) {
        let _span = self.span.clone().entered();
        debug!(%interface, %address, "Address removed");
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn config(&self) -> &MadaodvConfig {
        &self.config
    }

    /// Change any tunables at runtime. Derived components pick up the new
    /// values immediately; derived timeouts are not recomputed.
    pub fn update_config(&mut self, f: impl FnOnce(&mut MadaodvConfig)) -> RoutingResult<()> {
        let mut config = self.config.clone();
        f(&mut config);
        config.validate()?;
        self.queue.set_max_len(config.max_queue_len);
        self.queue.set_timeout(config.max_queue_time);
        self.table.set_bad_link_lifetime(config.delete_period);
        self.rreq_ids.set_lifetime(config.path_discovery_time);
        self.dpd.set_lifetime(config.path_discovery_time);
        self.rreq_rate.set_limit(config.rreq_rate_limit);
        self.rerr_rate.set_limit(config.rerr_rate_limit);
        let was_enabled = self.config.enable_hello;
        self.config = config;
        self.apply_hello_change(was_enabled);
        Ok(())
    }

    pub fn max_queue_len(&self) -> usize {
        self.config.max_queue_len
    }

    pub fn set_max_queue_len(&mut self, len: usize) {
        self.config.max_queue_len = len;
        self.queue.set_max_len(len);
    }

    pub fn max_queue_time(&self) -> Duration {
        self.config.max_queue_time
    }

    pub fn set_max_queue_time(&mut self, time: Duration) {
        self.config.max_queue_time = time;
        self.queue.set_timeout(time);
    }

    pub fn hello_enabled(&self) -> bool {
        self.config.enable_hello
    }

    pub fn set_hello_enable(&mut self, enable: bool) {
        let was_enabled = self.config.enable_hello;
        self.config.enable_hello = enable;
        self.apply_hello_change(was_enabled);
    }

    pub fn broadcast_enabled(&self) -> bool {
        self.config.enable_broadcast
    }

    pub fn set_broadcast_enable(&mut self, enable: bool) {
        self.config.enable_broadcast = enable;
    }

    pub fn gratuitous_reply(&self) -> bool {
        self.config.gratuitous_reply
    }

    pub fn set_gratuitous_reply(&mut self, enable: bool) {
        self.config.gratuitous_reply = enable;
    }

    pub fn destination_only(&self) -> bool {
        self.config.destination_only
    }

    pub fn set_destination_only(&mut self, enable: bool) {
        self.config.destination_only = enable;
    }

    /// Configured gateway role, ignoring the uplink probe
    pub fn access_point(&self) -> bool {
        self.config.access_point
    }

    pub fn set_access_point(&mut self, access_point: bool) {
        self.config.access_point = access_point;
    }

    /// Whether this node answers gateway queries right now
    pub fn is_gateway(&self) -> bool {
        self.config.access_point || self.uplink
    }

    /// Own destination sequence number
    pub fn seqno(&self) -> u32 {
        self.seqno
    }

    /// Last RREQ id used
    pub fn request_id(&self) -> u32 {
        self.request_id
    }

    pub fn routing_table(&self) -> &RoutingTable {
        &self.table
    }

    pub fn neighbors(&self) -> &Neighbors {
        &self.neighbors
    }

    /// Number of datagrams waiting for discovery
    pub fn queue_len(&mut self) -> usize {
        let now = self.now();
        self.queue.len(now)
    }

    /// Mesh address of an interface
    pub fn interface_address(&self, interface: InterfaceIndex) -> Option<Ipv6Addr> {
        self.interfaces.get(&interface).copied()
    }

    pub fn interfaces(&self) -> impl Iterator<Item = (InterfaceIndex, Ipv6Addr)> + '_ {
        self.interfaces.iter().map(|(i, a)| (*i, *a))
    }

    /// Whether a discovery for `dst` (or the gateway search key) is pending
    pub fn is_searching(&mut self, dst: Ipv6Addr) -> bool {
        let now = self.now();
        self.table
            .lookup(dst, now)
            .is_some_and(|r| r.flag == RouteFlag::InSearch)
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    /// Human-readable dump of the routing table
    pub fn print_routing_table(&self) -> String {
        let now = self.now();
        let node = self
            .interfaces
            .values()
            .next()
            .map(ToString::to_string)
            .unwrap_or_else(|| "-".to_string());
        format!(
            "Node: {node}, Time: {:.2}s{}",
            now.as_secs_f64(),
            self.table.print(now)
        )
    }

    // ------------------------------------------------------------------
    // Shared helpers
    // ------------------------------------------------------------------

    fn now(&self) -> Duration {
        self.clock.now()
    }

    fn is_my_own_address(&self, addr: Ipv6Addr) -> bool {
        self.interfaces.values().any(|a| *a == addr)
    }

    fn interface_list(&self) -> Vec<(InterfaceIndex, Ipv6Addr)> {
        self.interfaces.iter().map(|(i, a)| (*i, *a)).collect()
    }

    /// Queue a control message on `interface`.
    ///
    /// Jittered messages are parked until a random delay of up to
    /// `MAX_JITTER_MS` has passed; the rest go out immediately.
    fn send_control(
        &mut self,
        interface: InterfaceIndex,
        destination: Ipv6Addr,
        hop_limit: u8,
        message: ControlMessage,
        jitter: bool,
        now: Duration,
    ) {
        let Some(&source) = self.interfaces.get(&interface) else {
            debug!(%interface, "No such interface, control message dropped");
            return;
        };
        let packet = ControlPacket {
            interface,
            source,
            destination,
            hop_limit,
            payload: message.encode(),
        };
        trace!(
            kind = ?message.message_type(),
            %destination,
            hop_limit,
            jitter,
            "Sending control message"
        );
        if !jitter {
            self.transport.send(packet);
            return;
        }
        let delay = Duration::from_millis(self.rng.random_range(0..=MAX_JITTER_MS));
        let id = self.next_send_id;
        self.next_send_id += 1;
        self.outbox.insert(id, packet);
        self.timers.schedule(TimerKey::Send(id), now + delay);
    }

    fn flush_send(&mut self, id: u64) {
        let Some(packet) = self.outbox.remove(&id) else {
            return;
        };
        if !self.interfaces.contains_key(&packet.interface) {
            trace!(interface = %packet.interface, "Interface went down, dropping parked packet");
            return;
        }
        self.transport.send(packet);
    }

    /// Refresh a neighbor and repair routes through any neighbor that
    /// expired in the meantime
    fn touch_neighbor(&mut self, addr: Ipv6Addr, hold: Duration, now: Duration) {
        self.neighbors.update(addr, hold, now, &self.link);
        self.purge_neighbors(now);
    }

    fn purge_neighbors(&mut self, now: Duration) {
        let lost = self.neighbors.purge(now);
        self.handle_lost_neighbors(lost, now);
        if let Some(next) = self.neighbors.next_loss() {
            self.timers.schedule(TimerKey::NeighborPurge, next);
        }
    }

    fn handle_lost_neighbors(&mut self, lost: Vec<Ipv6Addr>, now: Duration) {
        for neighbor in lost {
            self.send_rerr_when_breaks_link_to_next_hop(neighbor, now);
        }
    }

    /// Extend a VALID route to at least `lifetime` from now
    fn update_route_lifetime(&mut self, addr: Ipv6Addr, lifetime: Duration, now: Duration) -> bool {
        let Some(mut record) = self.table.lookup_valid(addr, now) else {
            return false;
        };
        record.rreq_count = 0;
        let lifetime = lifetime.max(record.lifetime(now));
        record.set_lifetime(lifetime, now);
        self.table.update(record, now)
    }

    /// Add `precursor` to the record for `dst`, if there is one
    fn add_precursor(&mut self, dst: Ipv6Addr, precursor: Ipv6Addr, now: Duration) {
        if let Some(mut record) = self.table.lookup(dst, now) {
            if record.insert_precursor(precursor) {
                self.table.update(record, now);
            }
        }
    }

    fn hello_lifetime(&self) -> Duration {
        self.config.hello_interval * u32::from(self.config.allowed_hello_loss)
    }
}
