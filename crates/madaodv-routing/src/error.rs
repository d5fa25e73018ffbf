//! Routing error types
//!
//! Re-exports the core error and adds engine-specific failures. None of these
//! reach a datagram's sender; those go through the error continuation.

use madaodv_core::{InterfaceIndex, MadaodvError, PacketError};
use thiserror::Error;

/// Errors raised by the routing engine's management surface
#[derive(Debug, Error)]
pub enum RoutingError {
    /// Core error
    #[error("Core error: {0}")]
    Core(#[from] MadaodvError),

    /// Control message could not be decoded
    #[error("Packet error: {0}")]
    Packet(#[from] PacketError),

    /// A tunable is out of range
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The interface is not known to the engine
    #[error("Unknown interface: {0}")]
    UnknownInterface(InterfaceIndex),

    /// The interface is already up
    #[error("Interface already up: {0}")]
    InterfaceExists(InterfaceIndex),
}

/// Result type for routing operations
pub type RoutingResult<T> = Result<T, RoutingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RoutingError::UnknownInterface(InterfaceIndex(3));
        assert_eq!(err.to_string(), "Unknown interface: if3");

        let err: RoutingError = PacketError::UnknownMessageType(9).into();
        assert!(matches!(err, RoutingError::Packet(_)));
    }
}
