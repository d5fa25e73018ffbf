//! Pre-defined simulation scenarios
//!
//! Each scenario builds a mesh, drives some traffic through it and prints
//! what happened. They return the finished [`Simulation`] so callers and
//! tests can inspect it.

use std::net::Ipv6Addr;
use std::time::Duration;

use tracing::info;

use crate::error::SimResult;
use crate::simulation::{SimConfig, Simulation};
use crate::topology::{MeshBuilder, NodeId, from_edges};

/// A host beyond the mesh, reachable only through a gateway
pub const OUTSIDE_HOST: Ipv6Addr = Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1);

fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

fn print_summary(sim: &Simulation) {
    println!("\n=== Final Statistics ===");
    println!("  Datagrams sent: {}", sim.stats.datagrams_sent);
    println!("  Datagrams delivered: {}", sim.stats.datagrams_delivered);
    println!("  Datagrams failed: {}", sim.stats.datagrams_failed);
    println!("  Datagrams dropped: {}", sim.stats.datagrams_dropped);
    println!("  Average hops: {:.2}", sim.stats.average_hops());
    println!(
        "  Control messages: {} (RREQ {}, RREP {}, RERR {}, ACK {})",
        sim.stats.control_sent,
        sim.stats.rreq_sent,
        sim.stats.rrep_sent,
        sim.stats.rerr_sent,
        sim.stats.ack_sent
    );
    println!("  Delivery rate: {:.1}%", sim.stats.delivery_ratio() * 100.0);
}

fn print_route(sim: &Simulation, from: NodeId, to: NodeId) {
    match sim.route_between(from, to) {
        Some(route) => println!(
            "  {} -> {}: next hop {}, {} hops, {}",
            from,
            to,
            sim.node_by_address(route.next_hop)
                .map(|n| n.to_string())
                .unwrap_or_else(|| route.next_hop.to_string()),
            route.hops,
            route.flag
        ),
        None => println!("  {} -> {}: no route", from, to),
    }
}

/// Route discovery along a line: A - B - C - ... , first node to last
pub fn run_line_scenario(nodes: u32) -> SimResult<Simulation> {
    info!(nodes, "=== Running Line Discovery Scenario ===");
    let nodes = nodes.max(2);
    let mesh = MeshBuilder::new(nodes).line();
    println!("{}", mesh.visualize());

    let mut sim = Simulation::new(mesh, SimConfig::default())?;
    let first = NodeId(0);
    let last = NodeId(nodes - 1);

    println!("\n--- {} sends to {} with no routes known ---", first, last);
    sim.send_to_node(first, last, &b"hello over the mesh"[..])?;
    sim.run_for(ms(1_500));
    println!("  {}", sim.state_summary());

    println!("\n--- Routes after discovery ---");
    print_route(&sim, first, last);
    for relay in 1..nodes - 1 {
        print_route(&sim, NodeId(relay), first);
    }

    println!("\n--- Second datagram uses the cached route ---");
    sim.send_to_node(first, last, &b"again"[..])?;
    sim.run_for(ms(500));
    println!("  {}", sim.state_summary());

    print_summary(&sim);
    Ok(sim)
}

/// Traffic for a host outside the mesh, through a line ending in the gateway
///
/// ```text
/// A - B - ... - G(uplink) ~~ 2001:db8::1
/// ```
pub fn run_gateway_scenario(nodes: u32) -> SimResult<Simulation> {
    info!(nodes, "=== Running Gateway Scenario ===");
    let nodes = nodes.max(2);
    let mesh = MeshBuilder::new(nodes).line();
    println!("{}", mesh.visualize());

    let gateway = NodeId(nodes - 1);
    let mut sim = Simulation::new(
        mesh,
        SimConfig {
            gateways: vec![gateway],
            ..Default::default()
        },
    )?;
    let first = NodeId(0);

    // Give the gateway's uplink probe a chance to run first
    println!("\n--- {} sends to {} (outside the mesh) ---", first, OUTSIDE_HOST);
    sim.send_at(ms(50), first, OUTSIDE_HOST, &b"to the internet"[..])?;
    sim.run_for(ms(1_500));
    println!("  {}", sim.state_summary());

    println!("\n--- Gateway route at {} ---", first);
    print_route(&sim, first, gateway);
    for delivery in &sim.deliveries {
        println!(
            "  uid {} reached {} as {} after {} hops",
            delivery.uid, delivery.node, delivery.destination, delivery.hops
        );
    }

    print_summary(&sim);
    Ok(sim)
}

/// Route repair after a mid-path link failure
///
/// ```text
/// A - B - C - D
///     |   |
///     E - F
/// ```
///
/// A finds D through B-C. The B-C link then fails: the next datagram is
/// lost, B reports the break and A rediscovers D around the detour.
pub fn run_link_break_scenario() -> SimResult<Simulation> {
    info!("=== Running Link Break Scenario ===");
    let mesh = from_edges(&[
        ('A', 'B'),
        ('B', 'C'),
        ('C', 'D'),
        ('B', 'E'),
        ('E', 'F'),
        ('F', 'C'),
    ]);
    println!("{}", mesh.visualize());

    let mut sim = Simulation::new(mesh, SimConfig::default())?;
    let (a, b, c, d): (NodeId, NodeId, NodeId, NodeId) =
        ('A'.into(), 'B'.into(), 'C'.into(), 'D'.into());

    println!("\n--- A sends to D ---");
    sim.send_to_node(a, d, &b"first"[..])?;
    sim.run_until(ms(1_000));
    print_route(&sim, a, d);

    println!("\n--- Link B-C fails, A sends again ---");
    sim.break_link_at(ms(1_000), b, c)?;
    sim.send_at(ms(1_100), a, d.address(), &b"lost at B"[..])?;
    sim.run_until(ms(1_400));
    println!("  {}", sim.state_summary());
    print_route(&sim, a, d);

    println!("\n--- A sends once more and the route is repaired ---");
    sim.send_at(ms(1_500), a, d.address(), &b"around the break"[..])?;
    sim.run_until(ms(2_500));
    print_route(&sim, a, d);

    print_summary(&sim);
    Ok(sim)
}

/// Corner-to-corner traffic across a grid, then every node's routing table
pub fn run_table_scenario(width: u32, height: u32) -> SimResult<Simulation> {
    info!(width, height, "=== Running Routing Table Scenario ===");
    let width = width.max(1);
    let count = width * height.max(1);
    let mesh = MeshBuilder::new(count).grid(width);
    println!("{}", mesh.visualize());

    let mut sim = Simulation::new(mesh, SimConfig::default())?;
    let first = NodeId(0);
    let last = NodeId(count - 1);
    sim.send_to_node(first, last, &b"corner to corner"[..])?;
    if width > 1 {
        sim.send_to_node(NodeId(width - 1), NodeId(count - width), &b"the other diagonal"[..])?;
    }
    sim.run_for(ms(3_000));

    println!("\n=== Routing Tables ===");
    println!("{}", sim.print_tables());
    print_summary(&sim);
    Ok(sim)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_scenario_delivers_both() {
        let sim = run_line_scenario(4).unwrap();
        assert_eq!(sim.stats.datagrams_delivered, 2);
        assert_eq!(sim.stats.average_hops(), 3.0);
    }

    #[test]
    fn test_gateway_scenario_reaches_gateway() {
        let sim = run_gateway_scenario(3).unwrap();
        assert_eq!(sim.stats.datagrams_delivered, 1);
        assert_eq!(sim.deliveries[0].node, NodeId(2));
    }

    #[test]
    fn test_table_scenario_lists_every_node() {
        let sim = run_table_scenario(3, 2).unwrap();
        let tables = sim.print_tables();
        for id in sim.node_ids() {
            assert!(tables.contains(&format!("[{}]", id)));
        }
    }
}
