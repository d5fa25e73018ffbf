//! Request queue
//!
//! Datagrams waiting for route discovery. The queue is bounded in length and
//! in time; anything that leaves it without a route is failed through its
//! own error continuation with [`DeliveryError::NoRouteToHost`].

use std::collections::VecDeque;
use std::net::Ipv6Addr;
use std::time::Duration;

use madaodv_core::{Continuations, Datagram, DeliveryError};
use tracing::{debug, trace};

use crate::table::expiry_after;

/// A deferred datagram with its continuations
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub datagram: Datagram,
    pub continuations: Continuations,
    /// The destination is outside the mesh and must go through a gateway
    pub needs_gateway: bool,
    expires: Duration,
}

impl QueueEntry {
    pub fn new(datagram: Datagram, continuations: Continuations) -> Self {
        Self {
            datagram,
            continuations,
            needs_gateway: false,
            expires: Duration::ZERO,
        }
    }

    pub fn with_gateway(mut self, needs_gateway: bool) -> Self {
        self.needs_gateway = needs_gateway;
        self
    }

    pub fn destination(&self) -> Ipv6Addr {
        self.datagram.destination()
    }

    /// Expiry stamped by the queue on admission
    pub fn expires(&self) -> Duration {
        self.expires
    }

    fn same_packet(&self, other: &QueueEntry) -> bool {
        self.datagram.uid == other.datagram.uid && self.destination() == other.destination()
    }

    fn fail(self, reason: &'static str) {
        debug!(
            uid = self.datagram.uid,
            dst = %self.destination(),
            reason,
            "Dropping queued datagram"
        );
        self.continuations
            .fail(self.datagram, DeliveryError::NoRouteToHost);
    }
}

/// Bounded FIFO of datagrams awaiting a route
#[derive(Debug)]
pub struct RequestQueue {
    entries: VecDeque<QueueEntry>,
    max_len: usize,
    timeout: Duration,
}

impl RequestQueue {
    pub fn new(max_len: usize, timeout: Duration) -> Self {
        Self {
            entries: VecDeque::new(),
            max_len,
            timeout,
        }
    }

    /// Admit an entry, evicting the oldest one at capacity.
    ///
    /// Returns `false` if the same datagram is already queued for the same
    /// destination, or if the capacity is 0 (the entry is failed then).
    pub fn enqueue(&mut self, mut entry: QueueEntry, now: Duration) -> bool {
        self.purge(now);
        if self.entries.iter().any(|e| e.same_packet(&entry)) {
            trace!(uid = entry.datagram.uid, "Datagram already queued");
            return false;
        }
        if self.max_len == 0 {
            entry.fail("queue disabled");
            return false;
        }
        entry.expires = expiry_after(now, self.timeout);
        self.shrink_to(self.max_len - 1);
        self.entries.push_back(entry);
        true
    }

    /// Fail the oldest entries until at most `len` remain
    fn shrink_to(&mut self, len: usize) {
        while self.entries.len() > len {
            if let Some(oldest) = self.entries.pop_front() {
                oldest.fail("queue full, dropping the oldest datagram");
            }
        }
    }

    /// Remove the oldest entry for `dst`
    pub fn dequeue(&mut self, dst: Ipv6Addr, now: Duration) -> Option<QueueEntry> {
        self.purge(now);
        let pos = self.entries.iter().position(|e| e.destination() == dst)?;
        self.entries.remove(pos)
    }

    /// Remove the oldest entry waiting for a gateway
    pub fn dequeue_gateway_query(&mut self, now: Duration) -> Option<QueueEntry> {
        self.purge(now);
        let pos = self.entries.iter().position(|e| e.needs_gateway)?;
        self.entries.remove(pos)
    }

    /// Whether anything is queued for `dst`. Does not purge.
    pub fn find(&self, dst: Ipv6Addr) -> bool {
        self.entries.iter().any(|e| e.destination() == dst)
    }

    /// Destination of the oldest entry waiting for a gateway. Does not purge.
    pub fn first_gateway_destination(&self) -> Option<Ipv6Addr> {
        self.entries
            .iter()
            .find(|e| e.needs_gateway)
            .map(QueueEntry::destination)
    }

    /// Fail every entry for `dst`
    pub fn drop_all_for(&mut self, dst: Ipv6Addr, now: Duration) {
        self.purge(now);
        self.drop_where(|e| e.destination() == dst, "no route to destination");
    }

    /// Fail every entry waiting for a gateway
    pub fn drop_gateway_queries(&mut self, now: Duration) {
        self.purge(now);
        self.drop_where(|e| e.needs_gateway, "no gateway found");
    }

    /// Fail every expired entry
    pub fn purge(&mut self, now: Duration) {
        self.drop_where(|e| e.expires < now, "queue timeout");
    }

    fn drop_where(&mut self, predicate: impl Fn(&QueueEntry) -> bool, reason: &'static str) {
        let (dropped, kept): (VecDeque<_>, VecDeque<_>) =
            self.entries.drain(..).partition(|e| predicate(e));
        self.entries = kept;
        for entry in dropped {
            entry.fail(reason);
        }
    }

    /// Number of live entries
    pub fn len(&mut self, now: Duration) -> usize {
        self.purge(now);
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Change the capacity, failing the oldest entries that no longer fit
    pub fn set_max_len(&mut self, max_len: usize) {
        self.max_len = max_len;
        self.shrink_to(max_len);
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::sync::{Arc, Mutex};

    fn make_addr(last: u16) -> Ipv6Addr {
        Ipv6Addr::new(0x0100, 0, 0, 0, 0, 0, 0, last)
    }

    fn secs(v: u64) -> Duration {
        Duration::from_secs(v)
    }

    fn recording() -> (Continuations, Arc<Mutex<Vec<u64>>>) {
        let failed = Arc::new(Mutex::new(Vec::new()));
        let sink = failed.clone();
        let cont = Continuations::new(|_, _| {}, move |dg, err| {
            assert_eq!(err, DeliveryError::NoRouteToHost);
            sink.lock().unwrap().push(dg.uid);
        });
        (cont, failed)
    }

    fn make_entry(uid: u64, dst: u16, cont: &Continuations) -> QueueEntry {
        QueueEntry::new(
            Datagram::new(uid, make_addr(1), make_addr(dst), Bytes::new()),
            cont.clone(),
        )
    }

    #[test]
    fn test_rejects_duplicates() {
        let (cont, _) = recording();
        let mut queue = RequestQueue::new(4, secs(30));
        assert!(queue.enqueue(make_entry(1, 4, &cont), Duration::ZERO));
        assert!(!queue.enqueue(make_entry(1, 4, &cont), Duration::ZERO));
        assert!(queue.enqueue(make_entry(1, 5, &cont), Duration::ZERO));
        assert_eq!(queue.len(Duration::ZERO), 2);
    }

    #[test]
    fn test_overflow_evicts_oldest() {
        let (cont, failed) = recording();
        let mut queue = RequestQueue::new(2, secs(30));
        queue.enqueue(make_entry(1, 4, &cont), Duration::ZERO);
        queue.enqueue(make_entry(2, 4, &cont), Duration::ZERO);
        queue.enqueue(make_entry(3, 4, &cont), Duration::ZERO);

        assert_eq!(failed.lock().unwrap().as_slice(), &[1]);
        assert_eq!(queue.len(Duration::ZERO), 2);
        assert_eq!(queue.dequeue(make_addr(4), Duration::ZERO).unwrap().datagram.uid, 2);
    }

    #[test]
    fn test_shrinking_capacity_fails_oldest() {
        let (cont, failed) = recording();
        let mut queue = RequestQueue::new(8, secs(30));
        for uid in 1..=5 {
            queue.enqueue(make_entry(uid, 4, &cont), Duration::ZERO);
        }

        queue.set_max_len(2);
        assert_eq!(queue.len(Duration::ZERO), 2);
        assert_eq!(failed.lock().unwrap().as_slice(), &[1, 2, 3]);

        queue.set_max_len(1);
        assert!(queue.enqueue(make_entry(6, 4, &cont), Duration::ZERO));
        assert_eq!(queue.len(Duration::ZERO), 1);
        assert_eq!(failed.lock().unwrap().as_slice(), &[1, 2, 3, 4, 5]);
        assert_eq!(queue.dequeue(make_addr(4), Duration::ZERO).unwrap().datagram.uid, 6);
    }

    #[test]
    fn test_zero_capacity_rejects() {
        let (cont, failed) = recording();
        let mut queue = RequestQueue::new(0, secs(30));
        assert!(!queue.enqueue(make_entry(1, 4, &cont), Duration::ZERO));
        assert_eq!(queue.len(Duration::ZERO), 0);
        assert_eq!(failed.lock().unwrap().as_slice(), &[1]);
    }

    #[test]
    fn test_dequeue_is_fifo_per_destination() {
        let (cont, _) = recording();
        let mut queue = RequestQueue::new(8, secs(30));
        queue.enqueue(make_entry(1, 4, &cont), Duration::ZERO);
        queue.enqueue(make_entry(2, 5, &cont), Duration::ZERO);
        queue.enqueue(make_entry(3, 4, &cont), Duration::ZERO);

        assert!(queue.find(make_addr(5)));
        assert_eq!(queue.dequeue(make_addr(4), Duration::ZERO).unwrap().datagram.uid, 1);
        assert_eq!(queue.dequeue(make_addr(4), Duration::ZERO).unwrap().datagram.uid, 3);
        assert!(queue.dequeue(make_addr(4), Duration::ZERO).is_none());
    }

    #[test]
    fn test_expiry_fails_entries() {
        let (cont, failed) = recording();
        let mut queue = RequestQueue::new(8, secs(30));
        queue.enqueue(make_entry(1, 4, &cont), Duration::ZERO);
        queue.enqueue(make_entry(2, 4, &cont), secs(20));

        assert_eq!(queue.len(secs(31)), 1);
        assert_eq!(failed.lock().unwrap().as_slice(), &[1]);
        assert_eq!(queue.len(secs(60)), 0);
        assert_eq!(failed.lock().unwrap().as_slice(), &[1, 2]);
    }

    #[test]
    fn test_gateway_entries() {
        let (cont, failed) = recording();
        let mut queue = RequestQueue::new(8, secs(30));
        queue.enqueue(make_entry(1, 4, &cont), Duration::ZERO);
        queue.enqueue(make_entry(2, 9, &cont).with_gateway(true), Duration::ZERO);
        queue.enqueue(make_entry(3, 9, &cont).with_gateway(true), Duration::ZERO);

        assert_eq!(queue.first_gateway_destination(), Some(make_addr(9)));
        let entry = queue.dequeue_gateway_query(Duration::ZERO).unwrap();
        assert_eq!(entry.datagram.uid, 2);
        assert!(entry.needs_gateway);

        queue.drop_gateway_queries(Duration::ZERO);
        assert_eq!(failed.lock().unwrap().as_slice(), &[3]);
        assert_eq!(queue.len(Duration::ZERO), 1);
    }

    #[test]
    fn test_drop_all_for() {
        let (cont, failed) = recording();
        let mut queue = RequestQueue::new(8, secs(30));
        queue.enqueue(make_entry(1, 4, &cont), Duration::ZERO);
        queue.enqueue(make_entry(2, 5, &cont), Duration::ZERO);
        queue.enqueue(make_entry(3, 4, &cont), Duration::ZERO);

        queue.drop_all_for(make_addr(4), Duration::ZERO);
        assert_eq!(failed.lock().unwrap().as_slice(), &[1, 3]);
        assert!(!queue.find(make_addr(4)));
        assert!(queue.find(make_addr(5)));
    }
}
