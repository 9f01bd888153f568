// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! End-to-end discovery scenarios: broker rendezvous and the full
//! discover-then-attach pipeline.

use shmbus::{Broker, Participant, PeerRole, Ring};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

const RECV_WAIT: Duration = Duration::from_secs(2);

fn unique_ring_name(tag: &str) -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    static SEQ: AtomicU32 = AtomicU32::new(0);
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let seq = SEQ.fetch_add(1, Ordering::Relaxed);
    format!("/shmbus_disc_{tag}_{ts}_{seq}")
}

struct BrokerUnderTest {
    path: PathBuf,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<Broker>>,
}

impl BrokerUnderTest {
    fn start(dir: &Path) -> Self {
        let path = dir.join("broker.sock");
        let mut broker = Broker::bind(&path).expect("broker bind failed");
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&shutdown);
        let handle = thread::spawn(move || {
            broker.run(&flag);
            broker
        });
        Self {
            path,
            shutdown,
            handle: Some(handle),
        }
    }

    fn stop(mut self) -> Broker {
        self.shutdown.store(true, Ordering::Relaxed);
        self.handle
            .take()
            .expect("broker already stopped")
            .join()
            .expect("broker panicked")
    }
}

impl Drop for BrokerUnderTest {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            handle.join().ok();
        }
    }
}

#[test]
fn rendezvous_exchanges_peer_records() {
    let dir = tempfile::tempdir().unwrap();
    let broker = BrokerUnderTest::start(dir.path());

    let producer = Participant::register_at(
        &broker.path,
        &dir.path().join("producer.sock"),
        "demo",
        Some("/r1"),
    )
    .expect("producer register failed");

    let consumer = Participant::register_at(
        &broker.path,
        &dir.path().join("consumer.sock"),
        "demo",
        None,
    )
    .expect("consumer register failed");

    // Consumer learns the producer's ring name.
    let notice = consumer
        .recv_peer(Some(RECV_WAIT))
        .expect("recv failed")
        .expect("consumer got no PEER");
    assert_eq!(notice.service_key, "demo");
    assert_eq!(notice.address, producer.address());
    assert_eq!(notice.ring_name.as_deref(), Some("/r1"));

    // Producer learns about the consumer, ring token `-`.
    let notice = producer
        .recv_peer(Some(RECV_WAIT))
        .expect("recv failed")
        .expect("producer got no PEER");
    assert_eq!(notice.service_key, "demo");
    assert_eq!(notice.address, consumer.address());
    assert_eq!(notice.ring_name, None);

    drop(producer);
    drop(consumer);
    let broker = broker.stop();
    assert_eq!(broker.stats().peers_sent, 2);
}

#[test]
fn late_joiner_is_announced_to_all_earlier_joiners() {
    let dir = tempfile::tempdir().unwrap();
    let broker = BrokerUnderTest::start(dir.path());

    let producer = Participant::register_at(
        &broker.path,
        &dir.path().join("producer.sock"),
        "demo",
        Some("/r1"),
    )
    .expect("producer register failed");

    let consumer_a = Participant::register_at(
        &broker.path,
        &dir.path().join("a.sock"),
        "demo",
        None,
    )
    .expect("consumer a register failed");

    // Drain the notifications produced by A's registration.
    let replay = consumer_a.recv_peer(Some(RECV_WAIT)).unwrap().unwrap();
    assert_eq!(replay.address, producer.address());
    let about_a = producer.recv_peer(Some(RECV_WAIT)).unwrap().unwrap();
    assert_eq!(about_a.address, consumer_a.address());

    let consumer_b = Participant::register_at(
        &broker.path,
        &dir.path().join("b.sock"),
        "demo",
        None,
    )
    .expect("consumer b register failed");

    // B's registration reaches both earlier joiners.
    let on_a = consumer_a.recv_peer(Some(RECV_WAIT)).unwrap().unwrap();
    assert_eq!(on_a.address, consumer_b.address());
    assert_eq!(on_a.ring_name, None);

    let on_producer = producer.recv_peer(Some(RECV_WAIT)).unwrap().unwrap();
    assert_eq!(on_producer.address, consumer_b.address());

    // B itself got the replay of producer and A.
    let mut replayed = Vec::new();
    while let Some(notice) = consumer_b.recv_peer(Some(Duration::from_millis(300))).unwrap() {
        replayed.push(notice.address);
    }
    assert_eq!(replayed.len(), 2);
    assert!(replayed.contains(&producer.address().to_string()));
    assert!(replayed.contains(&consumer_a.address().to_string()));
}

#[test]
fn deregistered_participant_is_not_replayed() {
    let dir = tempfile::tempdir().unwrap();
    let broker = BrokerUnderTest::start(dir.path());

    let producer = Participant::register_at(
        &broker.path,
        &dir.path().join("producer.sock"),
        "demo",
        Some("/r1"),
    )
    .expect("producer register failed");

    let consumer_a = Participant::register_at(
        &broker.path,
        &dir.path().join("a.sock"),
        "demo",
        None,
    )
    .expect("consumer a register failed");
    let a_address = consumer_a.address().to_string();

    // Dropping sends DEREGISTER; give the broker a beat to process it.
    drop(consumer_a);
    thread::sleep(Duration::from_millis(200));

    let consumer_c = Participant::register_at(
        &broker.path,
        &dir.path().join("c.sock"),
        "demo",
        None,
    )
    .expect("consumer c register failed");

    // C's replay holds only the producer; A is gone.
    let mut replayed = Vec::new();
    while let Some(notice) = consumer_c.recv_peer(Some(Duration::from_millis(300))).unwrap() {
        replayed.push(notice.address);
    }
    assert_eq!(replayed, vec![producer.address().to_string()]);
    assert!(!replayed.contains(&a_address));
}

#[test]
fn discover_then_attach_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let broker = BrokerUnderTest::start(dir.path());
    let ring_name = unique_ring_name("pipeline");

    // Producer side: ring first, then announce it.
    let mut ring = Ring::create(&ring_name, 8, 64).expect("create failed");
    let _producer = Participant::register_at(
        &broker.path,
        &dir.path().join("producer.sock"),
        "sensors",
        Some(&ring_name),
    )
    .expect("producer register failed");

    ring.write_message(b"over the bus").expect("write failed");

    // Consumer side: learn the ring name from discovery, attach blindly.
    let consumer = Participant::register_at(
        &broker.path,
        &dir.path().join("consumer.sock"),
        "sensors",
        None,
    )
    .expect("consumer register failed");

    let notice = consumer
        .recv_peer(Some(RECV_WAIT))
        .expect("recv failed")
        .expect("no PEER for consumer");
    let discovered = notice.ring_name.expect("producer announced no ring");
    assert_eq!(discovered, ring_name);

    let mut attached = Ring::attach(&discovered).expect("attach failed");
    let mut out = Vec::new();
    attached.read_message(&mut out).expect("read failed");
    assert_eq!(out, b"over the bus");

    ring.unlink_resources().expect("unlink failed");
}

#[test]
fn default_socket_roles_register_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let broker = BrokerUnderTest::start(dir.path());

    // The /tmp-template constructor; roles only affect the path.
    let producer = Participant::register(&broker.path, PeerRole::Producer, "roles", Some("/r9"))
        .expect("producer register failed");
    let consumer = Participant::register(&broker.path, PeerRole::Consumer, "roles", None)
        .expect("consumer register failed");

    assert!(producer.address().contains("producer"));
    assert!(consumer.address().contains("consumer"));

    let notice = consumer
        .recv_peer(Some(RECV_WAIT))
        .expect("recv failed")
        .expect("consumer got no PEER");
    assert_eq!(notice.ring_name.as_deref(), Some("/r9"));
}
