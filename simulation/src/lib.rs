//! # MADAODV Simulation
//!
//! A discrete-event mesh simulator that runs one MADAODV routing engine per
//! node on a shared virtual clock.
//!
//! ## Overview
//!
//! - **Named nodes** (A, B, C, ...): each has one radio interface and a mesh
//!   address derived from its MAC
//! - **Links**: bidirectional, fixed per-hop latency, can be broken and
//!   restored while the simulation runs
//! - **Gateways**: nodes whose link layer reports an uplink answer gateway
//!   queries for destinations outside the mesh
//! - **Statistics**: deliveries, failures, drops and control overhead
//!
//! ## Architecture
//!
//! - **Topology** (`topology.rs`): node ids and mesh construction (line, ring,
//!   grid, random, custom edges)
//! - **Simulation** (`simulation.rs`): the event loop and the wiring between
//!   engines
//! - **Scenarios** (`scenarios.rs`): pre-built runs used by the CLI
//!
//! ## Example: A-B-C-D discovery
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use madaodv_simulation::*;
//!
//! let mesh = MeshBuilder::new(4).line();
//! let mut sim = Simulation::new(mesh, SimConfig::default())?;
//!
//! sim.send_to_node(NodeId::from('A'), NodeId::from('D'), &b"hello"[..])?;
//! sim.run_for(Duration::from_secs(2));
//!
//! let route = sim.route_between(NodeId::from('A'), NodeId::from('D')).unwrap();
//! assert_eq!(route.hops, 3);
//! ```

pub mod error;
pub mod scenarios;
pub mod simulation;
pub mod topology;

#[cfg(test)]
mod integration_scenarios;

// Re-export main types
pub use error::{SimError, SimResult};
pub use simulation::{
    Delivery, DropReason, Effect, Failure, SIM_INTERFACE, SimConfig, SimEngine, SimNode, SimStats,
    SimTransport, Simulation,
};
pub use topology::{Mesh, MeshBuilder, NodeId, from_edges};
