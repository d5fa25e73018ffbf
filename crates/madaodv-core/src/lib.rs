//! # MADAODV Core
//!
//! Core types, codec, and collaborator traits for the MADAODV routing stack.
//!
//! This crate holds everything the routing engine shares with its
//! surroundings: mesh addressing, the control-message wire format, the
//! data-plane types handed back to the host, and the traits through which
//! the engine reaches time, the transport, and the link layer.
//!
//! ## Key Traits
//!
//! - [`Clock`]: Time abstraction for testability
//! - [`Transport`]: Control-message socket per interface
//! - [`LinkLayer`]: Neighbor address resolution and uplink state
//!
//! ## Key Types
//!
//! - [`ControlMessage`]: RREQ, RREP, RERR and RREP-ACK with their headers
//! - [`Datagram`]: An opaque payload with its network-layer header
//! - [`Route`]: A forwarding decision handed to the host
//! - [`Continuations`]: Forward and error callbacks carried with a datagram

pub mod address;
pub mod datagram;
pub mod error;
pub mod packet;
pub mod seqno;
pub mod traits;

// Re-export main types
pub use address::*;
pub use datagram::*;
pub use error::*;
pub use packet::*;
pub use seqno::*;
pub use traits::*;
