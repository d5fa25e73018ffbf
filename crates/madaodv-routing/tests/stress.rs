//! Stress tests for madaodv-routing
//!
//! These tests exercise the routing components with large tables, long
//! queues and heavy control traffic.

use std::net::Ipv6Addr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use madaodv_core::{
    ALL_NODES, Continuations, ControlMessage, ControlPacket, Datagram, InterfaceIndex, MacAddr,
    ManualClock, MeshLinkLayer, RreqHeader, Transport, mac_to_ipv6,
};
use madaodv_routing::{
    IdCache, MadaodvConfig, QueueEntry, RequestQueue, RouteRecord, RoutingProtocol, RoutingTable,
    TimerKey, Timers,
};

// Test helpers
fn make_addr(index: u32) -> Ipv6Addr {
    mac_to_ipv6(MacAddr::from_node_index(index))
}

fn make_route(dst: u32, next_hop: u32, hops: u16, now: Duration) -> RouteRecord {
    RouteRecord::new(make_addr(dst), make_addr(next_hop), InterfaceIndex(1), make_addr(1))
        .with_seqno(dst, true)
        .with_hops(hops)
        .with_lifetime(Duration::from_secs(3), now)
}

#[derive(Default)]
struct CountingTransport {
    sent: Vec<ControlPacket>,
}

impl Transport for CountingTransport {
    fn send(&mut self, packet: ControlPacket) {
        self.sent.push(packet);
    }
}

#[test]
fn test_routing_table_throughput() {
    const ROUTE_COUNT: u32 = 10_000;
    let mut table = RoutingTable::new(Duration::from_secs(15));
    let now = Duration::ZERO;

    let start = Instant::now();
    for i in 0..ROUTE_COUNT {
        assert!(table.insert(make_route(i + 2, 2 + i % 16, (i % 30) as u16 + 1, now), now));
    }
    println!("Inserted {} routes in {:?}", ROUTE_COUNT, start.elapsed());

    let start = Instant::now();
    let found = (0..ROUTE_COUNT)
        .filter(|i| table.lookup_valid(make_addr(i + 2), now).is_some())
        .count();
    println!("Looked up {} routes in {:?}", found, start.elapsed());
    assert_eq!(found, ROUTE_COUNT as usize);

    // Everything routed through one next hop breaks at once
    let broken = table.neighbors_using(make_addr(5), now);
    assert_eq!(broken.len(), (ROUTE_COUNT / 16) as usize);
    table.invalidate(&broken, now);
    let still_valid = table.records().filter(|r| r.is_valid()).count();
    assert_eq!(still_valid, ROUTE_COUNT as usize - broken.len());

    // Expiry walks the whole table
    table.purge(Duration::from_secs(4));
    assert!(table.records().all(|r| !r.is_valid()));
    table.purge(Duration::from_secs(30));
    assert!(table.is_empty());
}

#[test]
fn test_request_queue_churn() {
    const DATAGRAMS: u64 = 50_000;
    let failed = Arc::new(AtomicUsize::new(0));
    let counter = failed.clone();
    let cont = Continuations::new(
        |_, _| {},
        move |_, _| {
            counter.fetch_add(1, Ordering::Relaxed);
        },
    );

    let mut queue = RequestQueue::new(64, Duration::from_secs(30));
    let start = Instant::now();
    for uid in 0..DATAGRAMS {
        let dst = make_addr(2 + (uid % 8) as u32);
        let datagram = Datagram::new(uid, make_addr(1), dst, Bytes::new());
        queue.enqueue(QueueEntry::new(datagram, cont.clone()), Duration::ZERO);
    }
    println!("Queued {} datagrams in {:?}", DATAGRAMS, start.elapsed());

    assert_eq!(queue.len(Duration::ZERO), 64);
    assert_eq!(failed.load(Ordering::Relaxed), (DATAGRAMS - 64) as usize);

    let mut released = 0;
    while queue.dequeue(make_addr(2), Duration::ZERO).is_some() {
        released += 1;
    }
    assert_eq!(released, 8);
}

#[test]
fn test_id_cache_scale() {
    let mut cache = IdCache::new(Duration::from_secs(5));
    let start = Instant::now();
    for origin in 0..100 {
        for id in 0..100 {
            assert!(!cache.is_duplicate(make_addr(origin), id, Duration::ZERO));
        }
    }
    println!("Recorded 10000 request ids in {:?}", start.elapsed());

    for origin in 0..100 {
        assert!(cache.is_duplicate(make_addr(origin), 42, Duration::from_secs(1)));
    }
    assert_eq!(cache.len(Duration::from_secs(6)), 0);
}

#[test]
fn test_timers_order_at_scale() {
    let mut timers = Timers::new();
    for id in 0..10_000u64 {
        // Deadlines deliberately out of insertion order
        let deadline = Duration::from_micros((id * 7919) % 10_000);
        timers.schedule(TimerKey::Send(id), deadline);
    }

    let mut last = Duration::ZERO;
    let mut fired = 0;
    while let Some(deadline) = timers.next_deadline() {
        assert!(deadline >= last);
        last = deadline;
        while timers.pop_due(deadline).is_some() {
            fired += 1;
        }
    }
    assert_eq!(fired, 10_000);
    assert!(timers.is_empty());
}

#[test]
fn test_engine_under_rreq_flood() {
    const ORIGINS: u32 = 200;
    let clock = ManualClock::new();
    let mut node = RoutingProtocol::new(
        MadaodvConfig::default().with_seed(1),
        clock.clone(),
        CountingTransport::default(),
        MeshLinkLayer::new(),
    )
    .unwrap();
    node.notify_interface_up(InterfaceIndex(1), MacAddr::from_node_index(1))
        .unwrap();
    node.start();

    let start = Instant::now();
    for origin in 0..ORIGINS {
        let rreq = RreqHeader {
            origin: make_addr(100 + origin),
            origin_seqno: 1,
            request_id: 1,
            destination: make_addr(9_999),
            unknown_seqno: true,
            ..Default::default()
        };
        // Every request arrives twice, from two different neighbors
        for neighbor in [2, 3] {
            node.handle_control(ControlPacket {
                interface: InterfaceIndex(1),
                source: make_addr(neighbor),
                destination: ALL_NODES,
                hop_limit: 10,
                payload: ControlMessage::Request(rreq.clone()).encode(),
            });
        }
    }
    clock.advance(Duration::from_millis(20));
    node.handle_timeout();
    println!("Handled {} RREQs in {:?}", ORIGINS * 2, start.elapsed());

    // One rebroadcast per request, none for the duplicates
    let rebroadcasts = node
        .transport()
        .sent
        .iter()
        .filter(|p| p.destination == ALL_NODES && p.hop_limit == 9)
        .count();
    assert_eq!(rebroadcasts, ORIGINS as usize);

    // Reverse routes to every origin
    let reverse = node
        .routing_table()
        .records()
        .filter(|r| r.hops == 1 && r.next_hop == make_addr(2) && r.destination != make_addr(2))
        .count();
    assert_eq!(reverse, ORIGINS as usize);
}
