//! Error types for MADAODV

use thiserror::Error;

/// Top-level error type for MADAODV
#[derive(Debug, Error)]
pub enum MadaodvError {
    #[error("Packet error: {0}")]
    Packet(#[from] PacketError),

    #[error("Address error: {0}")]
    Address(#[from] AddressError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),
}

/// Errors raised while encoding or decoding control messages
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PacketError {
    #[error("Unknown message type: {0}")]
    UnknownMessageType(u8),

    #[error("Truncated {kind} header: need {needed} bytes, got {actual}")]
    Truncated {
        kind: &'static str,
        needed: usize,
        actual: usize,
    },

    #[error("Message type {found} does not match expected {expected}")]
    TypeMismatch { expected: u8, found: u8 },

    #[error("RERR destination list is full")]
    RerrFull,

    #[error("Duplicate RERR destination: {0}")]
    DuplicateRerrDestination(std::net::Ipv6Addr),
}

/// Errors related to addressing
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("Invalid MAC address: {0}")]
    InvalidMac(String),

    #[error("Address {0} is not a mesh address")]
    NotMeshAddress(std::net::Ipv6Addr),
}

/// Conditions reported to callers through the error continuation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum DeliveryError {
    /// No route could be found or maintained for the destination
    #[error("No route to host")]
    NoRouteToHost,

    /// The node has no interface able to carry the datagram
    #[error("No interface available")]
    NoInterface,
}

/// Result type alias for codec operations
pub type PacketResult<T> = Result<T, PacketError>;

/// Result type alias for MADAODV operations
pub type MadaodvResult<T> = Result<T, MadaodvError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_error_display() {
        let err = PacketError::UnknownMessageType(9);
        assert!(format!("{}", err).contains("9"));

        let err = PacketError::Truncated {
            kind: "RREQ",
            needed: 47,
            actual: 12,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("RREQ"));
        assert!(msg.contains("47"));
        assert!(msg.contains("12"));
    }

    #[test]
    fn test_delivery_error_display() {
        assert_eq!(format!("{}", DeliveryError::NoRouteToHost), "No route to host");
        assert!(format!("{}", DeliveryError::NoInterface).contains("interface"));
    }

    #[test]
    fn test_error_conversions() {
        let err: MadaodvError = PacketError::RerrFull.into();
        assert!(matches!(err, MadaodvError::Packet(_)));

        let err: MadaodvError = AddressError::InvalidMac("zz".to_string()).into();
        assert!(matches!(err, MadaodvError::Address(_)));

        let err: MadaodvError = DeliveryError::NoRouteToHost.into();
        assert!(format!("{}", err).contains("Delivery error"));
    }
}
