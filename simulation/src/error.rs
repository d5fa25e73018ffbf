//! Simulation error types

use madaodv_routing::RoutingError;
use thiserror::Error;

use crate::topology::NodeId;

/// Errors raised while building or driving a simulation
#[derive(Debug, Error)]
pub enum SimError {
    #[error("Routing error: {0}")]
    Routing(#[from] RoutingError),

    #[error("Unknown node: {0}")]
    UnknownNode(NodeId),

    #[error("No link between {0} and {1}")]
    NoSuchLink(NodeId, NodeId),
}

/// Result type for simulation operations
pub type SimResult<T> = Result<T, SimError>;
