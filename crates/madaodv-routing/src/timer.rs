//! Virtual timers
//!
//! The engine never sleeps. Every delayed action is a [`TimerKey`] with a
//! deadline, and the driver asks for [`Timers::next_deadline`] and hands due
//! keys back to the engine. A key is pending at most once: scheduling it
//! again moves the deadline, the way a restarted timer would.

use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv6Addr;
use std::time::Duration;

/// Identity of a pending timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TimerKey {
    /// Discovery retry for a destination (or the gateway search key)
    RouteRequest(Ipv6Addr),
    /// Discovery postponed by the request rate limit
    DeferredRequest(Ipv6Addr),
    /// Waiting for a reply acknowledgment from a neighbor
    AckWait(Ipv6Addr),
    Hello,
    RreqRateReset,
    RerrRateReset,
    NeighborPurge,
    UplinkCheck,
    /// A jittered transmission parked in the engine's send buffer
    Send(u64),
}

/// Deadline-ordered set of pending timers
#[derive(Debug, Default)]
pub struct Timers {
    pending: BTreeMap<TimerKey, (Duration, u64)>,
    order: BTreeSet<(Duration, u64, TimerKey)>,
    next_seq: u64,
}

impl Timers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm `key` to fire at `deadline`, replacing any pending instance
    pub fn schedule(&mut self, key: TimerKey, deadline: Duration) {
        self.cancel(key);
        let seq = self.next_seq;
        self.next_seq += 1;
        self.pending.insert(key, (deadline, seq));
        self.order.insert((deadline, seq, key));
    }

    /// Disarm `key`. Returns whether it was pending.
    pub fn cancel(&mut self, key: TimerKey) -> bool {
        match self.pending.remove(&key) {
            Some((deadline, seq)) => {
                self.order.remove(&(deadline, seq, key));
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self, key: TimerKey) -> bool {
        self.pending.contains_key(&key)
    }

    /// Time left before `key` fires
    pub fn remaining(&self, key: TimerKey, now: Duration) -> Option<Duration> {
        self.pending
            .get(&key)
            .map(|(deadline, _)| deadline.saturating_sub(now))
    }

    /// Earliest pending deadline
    pub fn next_deadline(&self) -> Option<Duration> {
        self.order.first().map(|(deadline, _, _)| *deadline)
    }

    /// Remove and return the earliest timer due at or before `now`.
    ///
    /// Timers sharing a deadline come out in the order they were armed.
    pub fn pop_due(&mut self, now: Duration) -> Option<TimerKey> {
        let (deadline, _, _) = self.order.first()?;
        if *deadline > now {
            return None;
        }
        let (_, _, key) = self.order.pop_first()?;
        self.pending.remove(&key);
        Some(key)
    }

    /// Disarm everything matching `predicate`
    pub fn cancel_where(&mut self, predicate: impl Fn(&TimerKey) -> bool) {
        let keys: Vec<TimerKey> = self
            .pending
            .keys()
            .filter(|key| predicate(key))
            .copied()
            .collect();
        for key in keys {
            self.cancel(key);
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
