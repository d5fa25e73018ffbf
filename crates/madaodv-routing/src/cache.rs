//! Duplicate suppression caches
//!
//! Two independent sliding-window caches:
//!
//! - [`IdCache`]: (originator, request id) pairs seen while flooding RREQs
//! - [`DuplicatePacketDetection`]: (source, datagram uid) pairs of broadcast data
//!
//! An entry lives for a fixed window from its first sighting. Hits do not
//! extend it. Expired entries are dropped lazily on the next lookup.

use std::collections::BTreeMap;
use std::net::Ipv6Addr;
use std::time::Duration;

use madaodv_core::Datagram;

/// Keyed set whose members expire a fixed time after insertion
#[derive(Debug, Clone)]
struct ExpiringSet<K: Ord> {
    entries: BTreeMap<K, Duration>,
    lifetime: Duration,
}

impl<K: Ord + Copy> ExpiringSet<K> {
    fn new(lifetime: Duration) -> Self {
        Self {
            entries: BTreeMap::new(),
            lifetime,
        }
    }

    fn check_and_insert(&mut self, key: K, now: Duration) -> bool {
        self.purge(now);
        if self.entries.contains_key(&key) {
            return true;
        }
        self.entries.insert(key, now + self.lifetime);
        false
    }

    fn purge(&mut self, now: Duration) {
        self.entries.retain(|_, expires| *expires > now);
    }
}

/// Cache of flooded route request identities
#[derive(Debug, Clone)]
pub struct IdCache {
    seen: ExpiringSet<(Ipv6Addr, u32)>,
}

impl IdCache {
    pub fn new(lifetime: Duration) -> Self {
        Self {
            seen: ExpiringSet::new(lifetime),
        }
    }

    /// Whether `(origin, id)` was already seen. A first sighting is recorded.
    pub fn is_duplicate(&mut self, origin: Ipv6Addr, id: u32, now: Duration) -> bool {
        self.seen.check_and_insert((origin, id), now)
    }

    /// Number of live entries
    pub fn len(&mut self, now: Duration) -> usize {
        self.seen.purge(now);
        self.seen.entries.len()
    }

    pub fn lifetime(&self) -> Duration {
        self.seen.lifetime
    }

    pub fn set_lifetime(&mut self, lifetime: Duration) {
        self.seen.lifetime = lifetime;
    }
}

/// Cache of broadcast datagrams already handled
#[derive(Debug, Clone)]
pub struct DuplicatePacketDetection {
    seen: ExpiringSet<(Ipv6Addr, u64)>,
}

impl DuplicatePacketDetection {
    pub fn new(lifetime: Duration) -> Self {
        Self {
            seen: ExpiringSet::new(lifetime),
        }
    }

    /// Whether this datagram was already handled. A first sighting is recorded.
    pub fn is_duplicate(&mut self, datagram: &Datagram, now: Duration) -> bool {
        self.seen
            .check_and_insert((datagram.source(), datagram.uid), now)
    }

    pub fn set_lifetime(&mut self, lifetime: Duration) {
        self.seen.lifetime = lifetime;
    }
}
