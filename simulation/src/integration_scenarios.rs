//! Multi-node scenarios exercising the full routing stack
//!
//! These run real engines over the simulated mesh and check the protocol's
//! end-to-end properties:
//! - discovery along a line and the reverse routes it leaves behind
//! - gateway discovery for destinations outside the mesh
//! - route errors after a link break, and repair around it
//! - giving up on unreachable destinations

use std::collections::BTreeSet;
use std::time::Duration;

use bytes::Bytes;
use madaodv_core::{Continuations, Datagram, DeliveryError, MessageType};
use madaodv_routing::{MadaodvConfig, RouteDecision, RouteFlag};

use crate::scenarios::{OUTSIDE_HOST, run_link_break_scenario};
use crate::simulation::{SimConfig, Simulation};
use crate::topology::{Mesh, MeshBuilder, NodeId, from_edges};

fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

fn node(c: char) -> NodeId {
    NodeId::from(c)
}

fn make_sim(mesh: Mesh) -> Simulation {
    madaodv_logging::init_testing();
    Simulation::new(mesh, SimConfig::default()).unwrap()
}

/// A - B - C - D: A learns D at three hops, B and C learn A on the way
#[test]
fn test_line_discovery() {
    let mut sim = make_sim(MeshBuilder::new(4).line());
    let uid = sim.send_to_node(node('A'), node('D'), &b"hello D"[..]).unwrap();
    sim.run_for(ms(1_500));

    let to_d = sim.route_between(node('A'), node('D')).unwrap();
    assert_eq!(to_d.flag, RouteFlag::Valid);
    assert_eq!(to_d.hops, 3);
    assert_eq!(to_d.next_hop, node('B').address());

    let retries = MadaodvConfig::default().rreq_retries;
    let attempts = sim.engine(node('A')).unwrap().request_id();
    assert!(attempts >= 1 && attempts <= retries + 1, "took {} attempts", attempts);

    let b_to_a = sim.route_between(node('B'), node('A')).unwrap();
    assert_eq!(b_to_a.hops, 1);
    let c_to_a = sim.route_between(node('C'), node('A')).unwrap();
    assert_eq!(c_to_a.hops, 2);
    assert_eq!(c_to_a.next_hop, node('B').address());

    assert_eq!(sim.deliveries.len(), 1);
    assert_eq!(sim.deliveries[0].uid, uid);
    assert_eq!(sim.deliveries[0].node, node('D'));
    assert_eq!(sim.deliveries[0].hops, 3);
    assert!(sim.failures.is_empty());
}

/// Every node keeps at most one record per destination
#[test]
fn test_one_record_per_destination() {
    let mut sim = make_sim(MeshBuilder::new(9).grid(3));
    sim.send_to_node(NodeId(0), NodeId(8), Bytes::new()).unwrap();
    sim.send_to_node(NodeId(2), NodeId(6), Bytes::new()).unwrap();
    sim.send_to_node(NodeId(4), NodeId(0), Bytes::new()).unwrap();
    sim.run_for(ms(3_000));

    assert_eq!(sim.stats.datagrams_delivered, 3);
    for id in sim.node_ids() {
        let engine = sim.engine(id).unwrap();
        let records: Vec<_> = engine.routing_table().records().collect();
        let unique: BTreeSet<_> = records.iter().map(|r| r.destination).collect();
        assert_eq!(unique.len(), records.len(), "duplicate record at {}", id);
    }
}

/// Repeated route_output returns the same route and never shortens it
#[test]
fn test_route_output_is_idempotent() {
    let mut sim = make_sim(MeshBuilder::new(3).line());
    sim.send_to_node(node('A'), node('C'), Bytes::new()).unwrap();
    sim.run_for(ms(1_000));

    let dst = node('C').address();
    let before = sim.route_between(node('A'), node('C')).unwrap();
    let engine = sim.engine_mut(node('A')).unwrap();
    let datagram = Datagram::new(99, node('A').address(), dst, Bytes::new());
    let first = engine.route_output(datagram.clone(), Continuations::noop());
    let second = engine.route_output(datagram, Continuations::noop());
    assert_eq!(first, second);
    assert!(matches!(first, RouteDecision::Route(route) if route.gateway == node('B').address()));

    let after = sim.route_between(node('A'), node('C')).unwrap();
    assert!(after.expires >= before.expires);
    assert_eq!(after.hops, before.hops);
}

/// Outside traffic triggers a gateway query answered by the uplink node
#[test]
fn test_gateway_discovery() {
    madaodv_logging::init_testing();
    let gateway = node('D');
    let mut sim = Simulation::new(
        MeshBuilder::new(4).line(),
        SimConfig {
            gateways: vec![gateway],
            ..Default::default()
        },
    )
    .unwrap();
    sim.send_at(ms(50), node('A'), OUTSIDE_HOST, &b"out"[..]).unwrap();
    sim.run_for(ms(1_500));

    assert!(sim.engine(gateway).unwrap().is_gateway());
    assert!(!sim.engine(node('C')).unwrap().is_gateway());

    let to_gateway = sim.route_between(node('A'), gateway).unwrap();
    assert!(to_gateway.is_valid());
    assert!(to_gateway.gateway);
    assert_eq!(to_gateway.hops, 3);

    // Queued traffic is readdressed to the gateway and delivered there
    assert_eq!(sim.deliveries.len(), 1);
    let delivery = &sim.deliveries[0];
    assert_eq!(delivery.node, gateway);
    assert_eq!(delivery.destination, gateway.address());
    assert!(sim.failures.is_empty());
}

/// Without a gateway the outside destination cannot be resolved
#[test]
fn test_gateway_query_without_gateway_fails() {
    let mut sim = make_sim(MeshBuilder::new(2).line());
    let uid = sim.send(node('A'), OUTSIDE_HOST, Bytes::new()).unwrap();
    sim.run_for(ms(15_000));

    assert!(sim.deliveries.is_empty());
    assert_eq!(sim.failures.len(), 1);
    assert_eq!(sim.failures[0].uid, uid);
    assert_eq!(sim.failures[0].error, DeliveryError::NoRouteToHost);
}

/// A B-C break is reported to A, which then repairs around it
#[test]
fn test_link_break_and_repair() {
    madaodv_logging::init_testing();
    let sim = run_link_break_scenario().unwrap();

    // First datagram over B-C, second lost at the break, third around it
    assert_eq!(sim.stats.datagrams_sent, 3);
    assert_eq!(sim.stats.datagrams_delivered, 2);
    assert!(sim.stats.tx_errors >= 1);
    assert!(sim.stats.rerr_sent >= 1);
    assert_eq!(sim.deliveries[0].hops, 3);
    assert_eq!(sim.deliveries[1].hops, 5);

    assert!(sim.failures.is_empty());
    let repaired = sim.route_between(node('A'), node('D')).unwrap();
    assert!(repaired.is_valid());
    assert_eq!(repaired.hops, 5);
}

/// The RERR invalidates A's route before any repair is attempted
#[test]
fn test_link_break_invalidates_upstream() {
    let mut sim = make_sim(MeshBuilder::new(4).line());
    sim.send_to_node(node('A'), node('D'), Bytes::new()).unwrap();
    sim.run_until(ms(1_000));
    assert!(sim.route_between(node('A'), node('D')).unwrap().is_valid());

    sim.break_link_at(ms(1_000), node('B'), node('C')).unwrap();
    sim.send_at(ms(1_100), node('A'), node('D').address(), Bytes::new())
        .unwrap();
    sim.run_until(ms(1_300));

    let at_b = sim.route_between(node('B'), node('D')).unwrap();
    assert!(!at_b.is_valid());
    let at_a = sim.route_between(node('A'), node('D')).unwrap();
    assert_eq!(at_a.flag, RouteFlag::Invalid);
    assert_eq!(sim.stats.datagrams_delivered, 1);
    assert_eq!(sim.stats.datagrams_dropped, 1);
}

/// Isolated destinations exhaust the retries and fail the datagram
#[test]
fn test_unreachable_destination_fails() {
    let mut mesh = Mesh::new();
    mesh.add_node(node('A'));
    mesh.add_node(node('B'));
    let mut sim = make_sim(mesh);
    let uid = sim.send_to_node(node('A'), node('B'), Bytes::new()).unwrap();

    sim.run_for(ms(5_000));
    assert!(sim.failures.is_empty(), "gave up too early");

    sim.run_for(ms(10_000));
    assert_eq!(sim.failures.len(), 1);
    assert_eq!(sim.failures[0].uid, uid);
    assert_eq!(sim.failures[0].error, DeliveryError::NoRouteToHost);
    assert!(sim.route_between(node('A'), node('B')).is_none_or(|r| !r.is_valid()));
}

/// Broadcast data floods every node exactly once
#[test]
fn test_broadcast_flood() {
    let mut sim = make_sim(from_edges(&[('A', 'B'), ('B', 'C'), ('A', 'C'), ('C', 'D')]));
    sim.send(node('A'), madaodv_core::ALL_NODES, &b"everyone"[..])
        .unwrap();
    sim.run_for(ms(200));

    let reached: BTreeSet<NodeId> = sim.deliveries.iter().map(|d| d.node).collect();
    assert_eq!(reached, [node('B'), node('C'), node('D')].into_iter().collect());
    assert_eq!(sim.deliveries.len(), 3);
}

/// Control overhead only ever uses the four message types
#[test]
fn test_control_accounting() {
    let mut sim = make_sim(MeshBuilder::new(3).line());
    sim.send_to_node(node('A'), node('C'), Bytes::new()).unwrap();
    sim.run_for(ms(1_000));

    let typed = sim.stats.rreq_sent + sim.stats.rrep_sent + sim.stats.rerr_sent + sim.stats.ack_sent;
    assert_eq!(typed, sim.stats.control_sent);
    assert!(sim.stats.rreq_sent >= 2);
    assert_eq!(MessageType::try_from(1u8).unwrap(), MessageType::RouteRequest);
}
