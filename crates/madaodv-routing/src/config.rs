//! Engine configuration
//!
//! [`MadaodvConfig`] carries every protocol tunable. The derived timeouts are
//! independent fields so they can be overridden one by one;
//! [`MadaodvConfig::derive_timeouts`] recomputes them from the base values.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RoutingError, RoutingResult};

/// Tunables for one routing engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MadaodvConfig {
    /// Discovery attempts at the network diameter before giving up
    pub rreq_retries: u32,
    /// Hop budget of the first discovery flood
    pub ttl_start: u16,
    /// Hop budget growth per expanding-ring attempt
    pub ttl_increment: u16,
    /// Largest expanding-ring budget before jumping to the diameter
    pub ttl_threshold: u16,
    /// Extra hops allowed for in the ring traversal timeout
    pub timeout_buffer: u16,
    /// Route requests originated per second
    pub rreq_rate_limit: u32,
    /// Route errors originated per second
    pub rerr_rate_limit: u32,
    /// Lifetime granted to a route on use
    pub active_route_timeout: Duration,
    /// Maximum number of hops between two nodes
    pub net_diameter: u16,
    /// Conservative one-hop traversal estimate, queueing included
    pub node_traversal_time: Duration,
    pub net_traversal_time: Duration,
    /// Window in which a request id is remembered
    pub path_discovery_time: Duration,
    /// Lifetime advertised in replies generated by the destination
    pub my_route_timeout: Duration,
    pub hello_interval: Duration,
    /// Missed hellos before a neighbor is considered lost
    pub allowed_hello_loss: u16,
    /// How long an invalid route is kept before deletion
    pub delete_period: Duration,
    /// Time to wait for a reply acknowledgment
    pub next_hop_wait: Duration,
    /// How long a neighbor with a unidirectional link is ignored
    pub black_list_timeout: Duration,
    pub max_queue_len: usize,
    pub max_queue_time: Duration,
    /// Only the destination may answer requests
    pub destination_only: bool,
    /// Ask intermediate repliers to notify the destination
    pub gratuitous_reply: bool,
    pub enable_hello: bool,
    /// Forward broadcast data
    pub enable_broadcast: bool,
    /// Act as the gateway regardless of the link layer's uplink state
    pub access_point: bool,
    /// Period of the uplink probe
    pub uplink_check_interval: Duration,
    /// Seed for the jitter generator. Unseeded engines draw from the thread RNG.
    pub rng_seed: Option<u64>,
}

impl Default for MadaodvConfig {
    fn default() -> Self {
        let mut config = Self {
            rreq_retries: 2,
            ttl_start: 1,
            ttl_increment: 2,
            ttl_threshold: 7,
            timeout_buffer: 2,
            rreq_rate_limit: 10,
            rerr_rate_limit: 10,
            active_route_timeout: Duration::from_secs(3),
            net_diameter: 35,
            node_traversal_time: Duration::from_millis(40),
            net_traversal_time: Duration::ZERO,
            path_discovery_time: Duration::ZERO,
            my_route_timeout: Duration::ZERO,
            hello_interval: Duration::from_secs(1),
            allowed_hello_loss: 2,
            delete_period: Duration::ZERO,
            next_hop_wait: Duration::ZERO,
            black_list_timeout: Duration::ZERO,
            max_queue_len: 64,
            max_queue_time: Duration::from_secs(30),
            destination_only: false,
            gratuitous_reply: true,
            enable_hello: false,
            enable_broadcast: true,
            access_point: false,
            uplink_check_interval: Duration::from_millis(10),
            rng_seed: None,
        };
        config.derive_timeouts();
        config
    }
}

impl MadaodvConfig {
    /// Recompute the derived timeouts from the base tunables
    pub fn derive_timeouts(&mut self) {
        self.net_traversal_time = self.node_traversal_time * 2 * u32::from(self.net_diameter);
        self.path_discovery_time = self.net_traversal_time * 2;
        self.my_route_timeout = self.path_discovery_time.max(self.active_route_timeout) * 2;
        self.delete_period = self.active_route_timeout.max(self.hello_interval) * 5;
        self.next_hop_wait = self.node_traversal_time + Duration::from_millis(10);
        self.black_list_timeout = self.net_traversal_time * self.rreq_retries;
    }

    /// Builder-style seed setter
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    /// Builder-style hello toggle
    pub fn with_hello(mut self, enable: bool) -> Self {
        self.enable_hello = enable;
        self
    }

    /// Builder-style gateway toggle
    pub fn with_access_point(mut self, access_point: bool) -> Self {
        self.access_point = access_point;
        self
    }

    /// Check that the tunables describe a usable engine
    pub fn validate(&self) -> RoutingResult<()> {
        if self.net_diameter == 0 {
            return Err(RoutingError::InvalidConfig(
                "net_diameter must be at least 1".into(),
            ));
        }
        if self.ttl_start == 0 {
            return Err(RoutingError::InvalidConfig(
                "ttl_start must be at least 1".into(),
            ));
        }
        if self.ttl_start > self.net_diameter || self.ttl_threshold > self.net_diameter {
            return Err(RoutingError::InvalidConfig(format!(
                "ttl_start {} and ttl_threshold {} must not exceed net_diameter {}",
                self.ttl_start, self.ttl_threshold, self.net_diameter
            )));
        }
        if self.max_queue_len == 0 {
            return Err(RoutingError::InvalidConfig(
                "max_queue_len must be at least 1".into(),
            ));
        }
        if self.hello_interval.is_zero() {
            return Err(RoutingError::InvalidConfig(
                "hello_interval must be non-zero".into(),
            ));
        }
        if self.uplink_check_interval.is_zero() {
            return Err(RoutingError::InvalidConfig(
                "uplink_check_interval must be non-zero".into(),
            ));
        }
        if self.active_route_timeout.is_zero() || self.delete_period.is_zero() {
            return Err(RoutingError::InvalidConfig(
                "route lifetimes must be non-zero".into(),
            ));
        }
        Ok(())
    }
}
