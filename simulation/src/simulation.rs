//! Discrete-event simulation engine
//!
//! Every node runs its own [`RoutingProtocol`] against one shared virtual
//! [`ManualClock`]. The simulation owns the wires:
//!
//! 1. Engines hand their output to a per-node [`SimTransport`] and to their
//!    continuations, which all push [`Effect`]s into a shared sink
//! 2. After every engine call the sink is drained and each effect becomes a
//!    scheduled arrival `hop_latency` later, or a link-layer failure
//! 3. [`Simulation::run_until`] repeatedly advances the clock to the earliest
//!    of the next arrival and the next engine timer, and fires it
//!
//! Data datagrams lose one hop of hop limit per transmission. A unicast over
//! a link that is down is reported back to the sender with
//! [`RoutingProtocol::notify_tx_error`].

use std::collections::BTreeMap;
use std::net::Ipv6Addr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use derive_more::Display;
use madaodv_core::{
    Clock, Continuations, ControlPacket, DEFAULT_HOP_LIMIT, Datagram, DeliveryError, InterfaceIndex,
    LocalDeliverFn, ManualClock, MeshLinkLayer, MessageType, Route, Transport, is_all_nodes,
};
use madaodv_routing::{MadaodvConfig, RouteDecision, RouteRecord, RoutingProtocol};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, trace, warn};

use crate::error::{SimError, SimResult};
use crate::topology::{Mesh, NodeId};

/// The single radio interface every simulated node has
pub const SIM_INTERFACE: InterfaceIndex = InterfaceIndex(1);

/// A routing engine wired to the simulator
pub type SimEngine = RoutingProtocol<ManualClock, SimTransport, MeshLinkLayer>;

/// Configuration for the simulation
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// One-hop propagation and transmission delay
    pub hop_latency: Duration,
    /// Protocol tunables shared by every node
    pub protocol: MadaodvConfig,
    /// Nodes whose link layer reports an uplink
    pub gateways: Vec<NodeId>,
    /// Base seed; each node's engine is seeded with `seed + node number`
    pub seed: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            hop_latency: Duration::from_millis(1),
            protocol: MadaodvConfig::default(),
            gateways: Vec::new(),
            seed: 1,
        }
    }
}

/// Output of an engine waiting to be put on the wire
#[derive(Debug, Clone)]
pub enum Effect {
    Control(ControlPacket),
    Forward { route: Route, datagram: Datagram },
    Deliver { datagram: Datagram },
    Fail { datagram: Datagram, error: DeliveryError },
}

type EffectSink = Arc<Mutex<Vec<(NodeId, Effect)>>>;

/// Control-message transport that hands packets to the simulation
#[derive(Debug, Clone)]
pub struct SimTransport {
    node: NodeId,
    sink: EffectSink,
}

impl Transport for SimTransport {
    fn open(&mut self, interface: InterfaceIndex, local: Ipv6Addr) {
        trace!(node = %self.node, %interface, %local, "Socket opened");
    }

    fn close(&mut self, interface: InterfaceIndex) {
        trace!(node = %self.node, %interface, "Socket closed");
    }

    fn send(&mut self, packet: ControlPacket) {
        self.sink.lock().push((self.node, Effect::Control(packet)));
    }
}

/// One node of the simulation
pub struct SimNode {
    pub id: NodeId,
    pub engine: SimEngine,
    continuations: Continuations,
    local_deliver: LocalDeliverFn,
}

impl SimNode {
    fn new(id: NodeId, config: &SimConfig, clock: &ManualClock, sink: &EffectSink) -> SimResult<Self> {
        let protocol = config.protocol.clone().with_seed(config.seed + u64::from(id.0));
        let link = if config.gateways.contains(&id) {
            MeshLinkLayer::with_uplink()
        } else {
            MeshLinkLayer::new()
        };
        let transport = SimTransport {
            node: id,
            sink: sink.clone(),
        };
        let mut engine = RoutingProtocol::new(protocol, clock.clone(), transport, link)?;
        engine.notify_interface_up(SIM_INTERFACE, id.mac())?;
        engine.start();

        let forward_sink = sink.clone();
        let error_sink = sink.clone();
        let continuations = Continuations::new(
            move |route, datagram| {
                forward_sink
                    .lock()
                    .push((id, Effect::Forward { route, datagram }));
            },
            move |datagram, error| {
                error_sink.lock().push((id, Effect::Fail { datagram, error }));
            },
        );
        let deliver_sink = sink.clone();
        let local_deliver: LocalDeliverFn = Arc::new(move |datagram, _interface| {
            deliver_sink.lock().push((id, Effect::Deliver { datagram }));
        });

        Ok(Self {
            id,
            engine,
            continuations,
            local_deliver,
        })
    }
}

/// Something that happens at a point in virtual time
#[derive(Debug, Clone)]
enum Event {
    Control { to: NodeId, packet: ControlPacket },
    Data { to: NodeId, datagram: Datagram },
    Originate { from: NodeId, datagram: Datagram },
    LinkDown(NodeId, NodeId),
    LinkUp(NodeId, NodeId),
}

/// Why a datagram left the network without being delivered
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    #[display("refused by the router")]
    Refused,
    #[display("link down")]
    LinkDown,
    #[display("hop limit exceeded")]
    HopLimit,
    #[display("unknown next hop")]
    UnknownNextHop,
}

/// A datagram that reached a node's local delivery
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Delivery {
    pub uid: u64,
    pub node: NodeId,
    /// Destination as it arrived, after any gateway rewrite
    pub destination: Ipv6Addr,
    pub at: Duration,
    pub hops: u8,
}

/// A datagram the routing layer gave up on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub uid: u64,
    pub node: NodeId,
    pub error: DeliveryError,
    pub at: Duration,
}

/// Simulation statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct SimStats {
    pub datagrams_sent: u64,
    pub datagrams_delivered: u64,
    /// Reported through an error continuation
    pub datagrams_failed: u64,
    pub datagrams_dropped: u64,
    pub total_hops: u64,
    pub control_sent: u64,
    pub rreq_sent: u64,
    /// Route replies, hellos included
    pub rrep_sent: u64,
    pub rerr_sent: u64,
    pub ack_sent: u64,
    /// Unicast frames that hit a broken link
    pub tx_errors: u64,
}

impl SimStats {
    /// Fraction of originated datagrams delivered at least once
    pub fn delivery_ratio(&self) -> f64 {
        if self.datagrams_sent == 0 {
            return 0.0;
        }
        self.datagrams_delivered as f64 / self.datagrams_sent as f64
    }

    /// Mean hop count of delivered datagrams
    pub fn average_hops(&self) -> f64 {
        if self.datagrams_delivered == 0 {
            return 0.0;
        }
        self.total_hops as f64 / self.datagrams_delivered as f64
    }

    fn count_control(&mut self, payload: &Bytes) {
        self.control_sent += 1;
        let kind = payload
            .first()
            .and_then(|b| MessageType::try_from(*b).ok());
        match kind {
            Some(MessageType::RouteRequest) => self.rreq_sent += 1,
            Some(MessageType::RouteReply) => self.rrep_sent += 1,
            Some(MessageType::RouteError) => self.rerr_sent += 1,
            Some(MessageType::RouteReplyAck) => self.ack_sent += 1,
            None => {}
        }
    }
}

/// The simulation state
pub struct Simulation {
    pub mesh: Mesh,
    pub config: SimConfig,
    clock: ManualClock,
    nodes: BTreeMap<NodeId, SimNode>,
    addresses: BTreeMap<Ipv6Addr, NodeId>,
    sink: EffectSink,
    /// Pending events keyed by time, then insertion order
    events: BTreeMap<(Duration, u64), Event>,
    next_event: u64,
    next_uid: u64,
    pub stats: SimStats,
    pub deliveries: Vec<Delivery>,
    pub failures: Vec<Failure>,
}

impl Simulation {
    /// Build one engine per mesh node and bring them all up at time zero
    pub fn new(mesh: Mesh, config: SimConfig) -> SimResult<Self> {
        let clock = ManualClock::new();
        let sink: EffectSink = Arc::new(Mutex::new(Vec::new()));
        let mut nodes = BTreeMap::new();
        let mut addresses = BTreeMap::new();
        for id in mesh.node_ids() {
            nodes.insert(id, SimNode::new(id, &config, &clock, &sink)?);
            addresses.insert(id.address(), id);
        }
        info!(
            nodes = nodes.len(),
            links = mesh.edge_count(),
            gateways = config.gateways.len(),
            "Simulation created"
        );

        let mut sim = Self {
            mesh,
            config,
            clock,
            nodes,
            addresses,
            sink,
            events: BTreeMap::new(),
            next_event: 0,
            next_uid: 1,
            stats: SimStats::default(),
            deliveries: Vec::new(),
            failures: Vec::new(),
        };
        sim.drain_effects();
        Ok(sim)
    }

    /// Current virtual time
    pub fn now(&self) -> Duration {
        self.clock.now()
    }

    pub fn node(&self, id: NodeId) -> Option<&SimNode> {
        self.nodes.get(&id)
    }

    pub fn engine(&self, id: NodeId) -> Option<&SimEngine> {
        self.nodes.get(&id).map(|n| &n.engine)
    }

    /// Mutable engine access; effects of calls made through it are picked
    /// up at the next step of the simulation
    pub fn engine_mut(&mut self, id: NodeId) -> Option<&mut SimEngine> {
        self.nodes.get_mut(&id).map(|n| &mut n.engine)
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.keys().copied().collect()
    }

    /// The node owning a mesh address
    pub fn node_by_address(&self, addr: Ipv6Addr) -> Option<NodeId> {
        self.addresses.get(&addr).copied()
    }

    /// `from`'s routing record for `to`, valid or not
    pub fn route_between(&self, from: NodeId, to: NodeId) -> Option<RouteRecord> {
        self.route_to(from, to.address())
    }

    /// `from`'s routing record for an arbitrary destination
    pub fn route_to(&self, from: NodeId, dst: Ipv6Addr) -> Option<RouteRecord> {
        self.engine(from)?
            .routing_table()
            .records()
            .find(|r| r.destination == dst)
            .cloned()
    }

    /// Originate a datagram from `from` to an arbitrary address, now.
    /// Returns the datagram's uid.
    pub fn send(&mut self, from: NodeId, dst: Ipv6Addr, payload: impl Into<Bytes>) -> SimResult<u64> {
        let at = self.now();
        self.send_at(at, from, dst, payload)
    }

    /// Originate a datagram at a later virtual time
    pub fn send_at(
        &mut self,
        at: Duration,
        from: NodeId,
        dst: Ipv6Addr,
        payload: impl Into<Bytes>,
    ) -> SimResult<u64> {
        if !self.nodes.contains_key(&from) {
            return Err(SimError::UnknownNode(from));
        }
        let uid = self.next_uid;
        self.next_uid += 1;
        let datagram = Datagram::new(uid, from.address(), dst, payload);
        self.schedule(at, Event::Originate { from, datagram });
        Ok(uid)
    }

    /// Originate a datagram from one node to another, now
    pub fn send_to_node(&mut self, from: NodeId, to: NodeId, payload: impl Into<Bytes>) -> SimResult<u64> {
        if !self.nodes.contains_key(&to) {
            return Err(SimError::UnknownNode(to));
        }
        self.send(from, to.address(), payload)
    }

    /// Take a link down at `at`
    pub fn break_link_at(&mut self, at: Duration, a: NodeId, b: NodeId) -> SimResult<()> {
        if !self.mesh.has_link(a, b) {
            return Err(SimError::NoSuchLink(a, b));
        }
        self.schedule(at, Event::LinkDown(a, b));
        Ok(())
    }

    /// Bring a link back up at `at`
    pub fn restore_link_at(&mut self, at: Duration, a: NodeId, b: NodeId) -> SimResult<()> {
        if !self.mesh.has_link(a, b) {
            return Err(SimError::NoSuchLink(a, b));
        }
        self.schedule(at, Event::LinkUp(a, b));
        Ok(())
    }

    /// Run every event and timer due up to and including `until`
    pub fn run_until(&mut self, until: Duration) {
        loop {
            let next_event = self.events.keys().next().map(|(at, _)| *at);
            let next_timer = self
                .nodes
                .values()
                .filter_map(|n| n.engine.poll_timeout())
                .min();
            let next = match (next_event, next_timer) {
                (Some(e), Some(t)) => Some(e.min(t)),
                (e, t) => e.or(t),
            };
            let Some(at) = next.filter(|at| *at <= until) else {
                break;
            };
            self.clock.set(at);

            if next_timer == Some(at) {
                for node in self.nodes.values_mut() {
                    if node.engine.poll_timeout().is_some_and(|t| t <= at) {
                        node.engine.handle_timeout();
                    }
                }
            } else if let Some((_, event)) = self.events.pop_first() {
                self.dispatch(event);
            }
            self.drain_effects();
        }
        self.clock.set(until);
    }

    /// Run for `duration` of virtual time from now
    pub fn run_for(&mut self, duration: Duration) {
        let until = self.now() + duration;
        self.run_until(until);
    }

    /// Every node's routing table
    pub fn print_tables(&self) -> String {
        let mut output = String::new();
        for node in self.nodes.values() {
            output.push_str(&format!("[{}]\n", node.id));
            output.push_str(&node.engine.print_routing_table());
            output.push('\n');
        }
        output
    }

    /// One-line summary of the statistics
    pub fn state_summary(&self) -> String {
        format!(
            "t={:.3}s sent={} delivered={} failed={} dropped={} control={} (rreq={} rrep={} rerr={}) tx_errors={}",
            self.now().as_secs_f64(),
            self.stats.datagrams_sent,
            self.stats.datagrams_delivered,
            self.stats.datagrams_failed,
            self.stats.datagrams_dropped,
            self.stats.control_sent,
            self.stats.rreq_sent,
            self.stats.rrep_sent,
            self.stats.rerr_sent,
            self.stats.tx_errors,
        )
    }

    fn schedule(&mut self, at: Duration, event: Event) {
        let seq = self.next_event;
        self.next_event += 1;
        self.events.insert((at.max(self.now()), seq), event);
    }

    fn dispatch(&mut self, event: Event) {
        match event {
            Event::Control { to, packet } => {
                if let Some(node) = self.nodes.get_mut(&to) {
                    node.engine.handle_control(packet);
                }
            }
            Event::Data { to, datagram } => {
                let Some(node) = self.nodes.get_mut(&to) else {
                    return;
                };
                let uid = datagram.uid;
                let consumed = node.engine.route_input(
                    datagram,
                    SIM_INTERFACE,
                    &node.continuations,
                    &node.local_deliver,
                );
                if !consumed {
                    self.drop_datagram(to, uid, DropReason::Refused);
                }
            }
            Event::Originate { from, datagram } => {
                let Some(node) = self.nodes.get_mut(&from) else {
                    return;
                };
                self.stats.datagrams_sent += 1;
                trace!(node = %from, uid = datagram.uid, dst = %datagram.destination(), "Originating");
                let decision = node
                    .engine
                    .route_output(datagram.clone(), node.continuations.clone());
                match decision {
                    RouteDecision::Route(route) => {
                        let mut datagram = datagram;
                        datagram.header.source = route.source;
                        self.sink
                            .lock()
                            .push((from, Effect::Forward { route, datagram }));
                    }
                    RouteDecision::Deferred => {}
                    RouteDecision::Error(error) => {
                        self.sink.lock().push((from, Effect::Fail { datagram, error }));
                    }
                }
            }
            Event::LinkDown(a, b) => {
                if self.mesh.break_link(a, b) {
                    info!(%a, %b, "Link down");
                }
            }
            Event::LinkUp(a, b) => {
                if self.mesh.restore_link(a, b) {
                    info!(%a, %b, "Link up");
                }
            }
        }
    }

    /// Turn everything the engines produced into scheduled arrivals
    fn drain_effects(&mut self) {
        loop {
            let effects = std::mem::take(&mut *self.sink.lock());
            if effects.is_empty() {
                break;
            }
            for (node, effect) in effects {
                self.apply(node, effect);
            }
        }
    }

    fn apply(&mut self, from: NodeId, effect: Effect) {
        let now = self.now();
        match effect {
            Effect::Control(packet) => {
                self.stats.count_control(&packet.payload);
                self.transmit_control(from, packet);
            }
            Effect::Forward { route, datagram } => self.transmit_data(from, route, datagram),
            Effect::Deliver { datagram } => {
                let hops = DEFAULT_HOP_LIMIT.saturating_sub(datagram.header.hop_limit);
                debug!(node = %from, uid = datagram.uid, hops, "Datagram delivered");
                self.stats.datagrams_delivered += 1;
                self.stats.total_hops += u64::from(hops);
                self.deliveries.push(Delivery {
                    uid: datagram.uid,
                    node: from,
                    destination: datagram.destination(),
                    at: now,
                    hops,
                });
            }
            Effect::Fail { datagram, error } => {
                debug!(node = %from, uid = datagram.uid, %error, "Datagram failed");
                self.stats.datagrams_failed += 1;
                self.failures.push(Failure {
                    uid: datagram.uid,
                    node: from,
                    error,
                    at: now,
                });
            }
        }
    }

    fn transmit_control(&mut self, from: NodeId, packet: ControlPacket) {
        let arrival = self.now() + self.config.hop_latency;
        if is_all_nodes(packet.destination) {
            for to in self.mesh.neighbors(from) {
                let packet = ControlPacket {
                    interface: SIM_INTERFACE,
                    ..packet.clone()
                };
                self.schedule(arrival, Event::Control { to, packet });
            }
            return;
        }

        let Some(to) = self.node_by_address(packet.destination) else {
            warn!(node = %from, dst = %packet.destination, "Control message to unknown address");
            return;
        };
        if self.mesh.are_connected(from, to) {
            let packet = ControlPacket {
                interface: SIM_INTERFACE,
                ..packet
            };
            self.schedule(arrival, Event::Control { to, packet });
        } else {
            self.report_tx_error(from, to);
        }
    }

    fn transmit_data(&mut self, from: NodeId, route: Route, mut datagram: Datagram) {
        if datagram.header.hop_limit <= 1 {
            self.drop_datagram(from, datagram.uid, DropReason::HopLimit);
            return;
        }
        datagram.header.hop_limit -= 1;
        let arrival = self.now() + self.config.hop_latency;

        if is_all_nodes(route.gateway) {
            for to in self.mesh.neighbors(from) {
                self.schedule(
                    arrival,
                    Event::Data {
                        to,
                        datagram: datagram.clone(),
                    },
                );
            }
            return;
        }

        let Some(to) = self.node_by_address(route.gateway) else {
            self.drop_datagram(from, datagram.uid, DropReason::UnknownNextHop);
            return;
        };
        if self.mesh.are_connected(from, to) {
            trace!(node = %from, next_hop = %to, uid = datagram.uid, "Data on the wire");
            self.schedule(arrival, Event::Data { to, datagram });
        } else {
            self.drop_datagram(from, datagram.uid, DropReason::LinkDown);
            self.report_tx_error(from, to);
        }
    }

    fn report_tx_error(&mut self, from: NodeId, to: NodeId) {
        debug!(node = %from, neighbor = %to, "Transmission failed");
        self.stats.tx_errors += 1;
        if let Some(node) = self.nodes.get_mut(&from) {
            node.engine.notify_tx_error(to.mac());
        }
    }

    fn drop_datagram(&mut self, node: NodeId, uid: u64, reason: DropReason) {
        debug!(%node, uid, %reason, "Datagram dropped");
        self.stats.datagrams_dropped += 1;
    }
}
