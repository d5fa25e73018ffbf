//! # MADAODV Routing
//!
//! Reactive on-demand routing for mesh networks, with gateway discovery for
//! destinations outside the mesh.
//!
//! Routes are found only when traffic needs them. A node floods a route
//! request (RREQ) in an expanding ring; the destination, or any node with a
//! fresh enough route, answers with a route reply (RREP) that travels back
//! along the reverse path. Broken links are reported upstream with route
//! errors (RERR). Datagrams for addresses outside the mesh prefix are sent
//! to whichever node answers a gateway query.
//!
//! ## Core Components
//!
//! - [`RoutingProtocol`]: The per-node engine
//! - [`RoutingTable`]: Destination-keyed routes with lazy expiry
//! - [`RequestQueue`]: Datagrams waiting for discovery
//! - [`Neighbors`]: Neighbor liveness and link-failure detection
//! - [`IdCache`] / [`DuplicatePacketDetection`]: Flood suppression
//! - [`Timers`]: Virtual timers the driver fires through the engine
//! - [`MadaodvConfig`]: Protocol tunables
//!
//! ## Driving the Engine
//!
//! The engine is sans-IO. The host supplies a [`Clock`](madaodv_core::Clock),
//! a [`Transport`](madaodv_core::Transport) and a
//! [`LinkLayer`](madaodv_core::LinkLayer), and then:
//!
//! 1. brings interfaces up and calls [`RoutingProtocol::start`]
//! 2. routes its own traffic with [`RoutingProtocol::route_output`]
//! 3. feeds received datagrams to [`RoutingProtocol::route_input`] and
//!    control messages to [`RoutingProtocol::handle_control`]
//! 4. calls [`RoutingProtocol::handle_timeout`] whenever
//!    [`RoutingProtocol::poll_timeout`] comes due
//!
//! ## Example
//!
//! ```rust,ignore
//! use madaodv_core::{Continuations, Datagram, InterfaceIndex, MacAddr, MeshLinkLayer, SystemClock};
//! use madaodv_routing::{MadaodvConfig, RouteDecision, RoutingProtocol};
//!
//! let mut node = RoutingProtocol::new(MadaodvConfig::default(), SystemClock::new(), transport, MeshLinkLayer::new())?;
//! node.notify_interface_up(InterfaceIndex(1), MacAddr::from_node_index(1))?;
//! node.start();
//!
//! match node.route_output(datagram, continuations) {
//!     RouteDecision::Route(route) => { /* send via route.gateway */ }
//!     RouteDecision::Deferred => { /* continuations will fire later */ }
//!     RouteDecision::Error(err) => { /* give up */ }
//! }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod neighbor;
pub mod protocol;
pub mod queue;
pub mod rate_limit;
pub mod table;
pub mod timer;

// Re-export main types
pub use cache::{DuplicatePacketDetection, IdCache};
pub use config::MadaodvConfig;
pub use error::{RoutingError, RoutingResult};
pub use neighbor::{Neighbor, Neighbors};
pub use protocol::{RouteDecision, RoutingProtocol};
pub use queue::{QueueEntry, RequestQueue};
pub use rate_limit::RateCounter;
pub use table::{RouteFlag, RouteRecord, RoutingTable};
pub use timer::{TimerKey, Timers};
