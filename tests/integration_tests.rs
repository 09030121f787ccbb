//! End-to-end mesh scenarios across engines wired through the in-process
//! fabric: session establishment, fragmentation, multi-hop flood routing
//! with dedup, TTL termination, and abuse control.

use std::time::Duration;
use weft_core::{Frame, FrameType, Identity, MeshFabric, MessageId, PeerId, Transport};
use weft_integration_tests::{assert_no_delivery, connect, fast_config, recv, spawn_node};

// ============================================================================
// Session + fragmentation end to end
// ============================================================================

/// Two peers: handshake, session establishment, then a 10 KB payload that
/// exceeds single-frame capacity, reassembled identically on the far side.
#[tokio::test]
async fn test_two_peer_handshake_and_10kb_transfer() {
    let fabric = MeshFabric::new();
    let a = spawn_node(&fabric, fast_config());
    let mut b = spawn_node(&fabric, fast_config());
    connect(&a, &b);

    let payload: Vec<u8> = (0..10_240u32).map(|i| (i % 251) as u8).collect();
    let message_id = a
        .engine
        .send_message(b.id(), payload.clone())
        .await
        .unwrap();

    let delivery = recv(&mut b).await;
    assert_eq!(delivery.sender, a.id());
    assert_eq!(delivery.message_id, message_id);
    assert_eq!(delivery.payload, payload);

    // Exactly one logical delivery: no duplicate reassembly.
    assert_no_delivery(&mut b, Duration::from_millis(300)).await;
    assert_eq!(b.engine.stats().delivered, 1);
}

/// Directed traffic between transport neighbors stays on the direct link:
/// a third node attached to the recipient never sees a delivery.
#[tokio::test]
async fn test_directed_traffic_not_flooded_to_third_parties() {
    let fabric = MeshFabric::new();
    let a = spawn_node(&fabric, fast_config());
    let mut b = spawn_node(&fabric, fast_config());
    connect(&a, &b);

    // Prime the session.
    a.engine.send_message(b.id(), b"prime".to_vec()).await.unwrap();
    recv(&mut b).await;

    // Eavesdrop on the link by attaching a wiretap node B relays to.
    let mut tap = spawn_node(&fabric, fast_config());
    connect(&b, &tap);

    let secret = b"the plans for the north bridge".to_vec();
    a.engine.send_message(b.id(), secret.clone()).await.unwrap();
    let delivery = recv(&mut b).await;
    assert_eq!(delivery.payload, secret);

    // The tap saw nothing addressed to it and delivers nothing.
    assert_no_delivery(&mut tap, Duration::from_millis(300)).await;
}

// ============================================================================
// Multi-hop flood routing
// ============================================================================

/// A–B–C line: A and C are not transport neighbors, yet a directed message
/// from A reaches C through B (handshake, reply, and data all relayed).
#[tokio::test]
async fn test_directed_message_across_two_hops() {
    let fabric = MeshFabric::new();
    let a = spawn_node(&fabric, fast_config());
    let b = spawn_node(&fabric, fast_config());
    let mut c = spawn_node(&fabric, fast_config());
    connect(&a, &b);
    connect(&b, &c);

    a.engine
        .send_message(c.id(), b"across the mesh".to_vec())
        .await
        .unwrap();

    let delivery = recv(&mut c).await;
    assert_eq!(delivery.sender, a.id());
    assert_eq!(delivery.payload, b"across the mesh");
}

/// Diamond topology A→{B,D}→C with TTL 3: C is reachable over two paths,
/// receives two copies, and delivers exactly one (dedup suppresses the
/// second).
#[tokio::test]
async fn test_broadcast_dedup_over_redundant_paths() {
    let fabric = MeshFabric::new();
    let mut config = fast_config();
    config.ttl = 3;

    let mut a = spawn_node(&fabric, config.clone());
    let mut b = spawn_node(&fabric, config.clone());
    let mut d = spawn_node(&fabric, config.clone());
    let mut c = spawn_node(&fabric, config);
    connect(&a, &b);
    connect(&a, &d);
    connect(&b, &c);
    connect(&d, &c);

    a.engine
        .send_message(PeerId::BROADCAST, b"flood".to_vec())
        .await
        .unwrap();

    assert_eq!(recv(&mut b).await.payload, b"flood");
    assert_eq!(recv(&mut d).await.payload, b"flood");
    assert_eq!(recv(&mut c).await.payload, b"flood");

    // Exactly one copy at C despite two live paths.
    assert_no_delivery(&mut c, Duration::from_millis(300)).await;
    assert_eq!(c.engine.stats().delivered, 1);
    assert!(c.engine.stats().dropped_duplicate >= 1);

    // The originator never hears its own frame back.
    assert_no_delivery(&mut a, Duration::from_millis(100)).await;
}

/// A frame sent with TTL 1 is delivered by the first hop and never relayed
/// beyond it.
#[tokio::test]
async fn test_ttl_one_delivered_but_not_relayed() {
    let fabric = MeshFabric::new();
    let mut config = fast_config();
    config.ttl = 1;

    let a = spawn_node(&fabric, config.clone());
    let mut b = spawn_node(&fabric, config.clone());
    let mut c = spawn_node(&fabric, config);
    connect(&a, &b);
    connect(&b, &c);

    a.engine
        .send_message(PeerId::BROADCAST, b"one hop only".to_vec())
        .await
        .unwrap();

    assert_eq!(recv(&mut b).await.payload, b"one hop only");
    assert_no_delivery(&mut c, Duration::from_millis(300)).await;
    assert_eq!(b.engine.stats().relayed, 0);
}

/// A frame arriving with TTL 0 is malformed: rejected at the codec, never
/// processed, never relayed.
#[tokio::test]
async fn test_ttl_zero_rejected_as_malformed() {
    let fabric = MeshFabric::new();
    let mut a = spawn_node(&fabric, fast_config());

    let evil = Identity::generate();
    let (evil_link, _evil_rx) = fabric.attach(evil.id());
    evil_link.connect(a.id());

    let mut frame = Frame::new(
        FrameType::Data,
        evil.id(),
        PeerId::BROADCAST,
        1,
        b"expired".to_vec(),
    );
    frame.sign(evil.signing_key());
    let mut bytes = frame.encode().unwrap();
    bytes[2] = 0; // ttl byte

    evil_link.send(a.id(), bytes).await.unwrap();

    assert_no_delivery(&mut a, Duration::from_millis(300)).await;
    assert_eq!(a.engine.stats().dropped_malformed, 1);
}

// ============================================================================
// Abuse control
// ============================================================================

/// Forged signatures push the sender over the violation threshold; it is
/// blacklisted, excluded, and automatically readmitted after expiry.
#[tokio::test]
async fn test_signature_forgery_blacklists_then_rehabilitates() {
    let fabric = MeshFabric::new();
    let mut config = fast_config();
    config.abuse.violation_threshold = 2;
    config.abuse.base_blacklist = Duration::from_millis(200);
    let mut a = spawn_node(&fabric, config);

    let evil = Identity::generate();
    let (evil_link, _evil_rx) = fabric.attach(evil.id());
    evil_link.connect(a.id());

    for i in 0..2u8 {
        let mut frame = Frame::new(
            FrameType::Data,
            evil.id(),
            PeerId::BROADCAST,
            3,
            vec![i; 8],
        );
        // Deliberately never signed: 65 zero bytes cannot verify.
        frame.message_id = MessageId::random();
        evil_link.send(a.id(), frame.encode().unwrap()).await.unwrap();
    }

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(a.engine.stats().dropped_verification, 2);
    let snapshot = a
        .engine
        .peers()
        .into_iter()
        .find(|p| p.id == evil.id())
        .expect("violator must be tracked");
    assert!(snapshot.blacklisted, "threshold crossed, peer must be banned");

    // While banned, even a validly signed frame is dropped at admission.
    let mut valid = Frame::new(
        FrameType::Data,
        evil.id(),
        PeerId::BROADCAST,
        3,
        b"let me in".to_vec(),
    );
    valid.sign(evil.signing_key());
    evil_link.send(a.id(), valid.encode().unwrap()).await.unwrap();
    assert_no_delivery(&mut a, Duration::from_millis(200)).await;

    // After expiry plus a maintenance tick the peer is rehabilitated.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let mut valid = Frame::new(
        FrameType::Data,
        evil.id(),
        PeerId::BROADCAST,
        3,
        b"reformed".to_vec(),
    );
    valid.sign(evil.signing_key());
    evil_link.send(a.id(), valid.encode().unwrap()).await.unwrap();
    assert_eq!(recv(&mut a).await.payload, b"reformed");
}

/// A peer over its frame-rate budget is deprioritized: excess frames drop
/// silently at admission without crashing or punishing honest retries.
#[tokio::test]
async fn test_rate_limited_peer_frames_dropped() {
    let fabric = MeshFabric::new();
    let mut config = fast_config();
    config.abuse.max_frames_per_window = 5;
    let mut a = spawn_node(&fabric, config);

    let chatty = Identity::generate();
    let (chatty_link, _rx) = fabric.attach(chatty.id());
    chatty_link.connect(a.id());

    for i in 0..20u8 {
        let mut frame = Frame::new(
            FrameType::Data,
            chatty.id(),
            PeerId::BROADCAST,
            3,
            vec![i; 16],
        );
        frame.sign(chatty.signing_key());
        chatty_link.send(a.id(), frame.encode().unwrap()).await.unwrap();
    }

    tokio::time::sleep(Duration::from_millis(200)).await;
    let stats = a.engine.stats();
    assert_eq!(stats.delivered, 5, "budget admits exactly the window quota");
    assert_eq!(stats.dropped_admission, 15);

    // Rate limiting alone never blacklists.
    let banned = a.engine.peers().into_iter().any(|p| p.blacklisted);
    assert!(!banned);
    assert_eq!(recv(&mut a).await.payload, vec![0u8; 16]);
}

/// Resending the same dedup key past the burst threshold is treated as an
/// amplification attack, not a benign retry storm.
#[tokio::test]
async fn test_identical_content_flood_blacklists() {
    let fabric = MeshFabric::new();
    let mut config = fast_config();
    config.abuse.identical_burst_threshold = 3;
    config.abuse.violation_threshold = 1;
    let mut a = spawn_node(&fabric, config);

    let flooder = Identity::generate();
    let (flood_link, _rx) = fabric.attach(flooder.id());
    flood_link.connect(a.id());

    let mut frame = Frame::new(
        FrameType::Data,
        flooder.id(),
        PeerId::BROADCAST,
        3,
        b"same bytes every time".to_vec(),
    );
    frame.sign(flooder.signing_key());
    let bytes = frame.encode().unwrap();

    for _ in 0..8 {
        flood_link.send(a.id(), bytes.clone()).await.unwrap();
    }

    // First copy delivers; the rest are duplicates.
    assert_eq!(recv(&mut a).await.payload, b"same bytes every time");
    tokio::time::sleep(Duration::from_millis(200)).await;

    let stats = a.engine.stats();
    assert!(stats.dropped_duplicate >= 4);
    let snapshot = a
        .engine
        .peers()
        .into_iter()
        .find(|p| p.id == flooder.id())
        .expect("flooder must be tracked");
    assert!(snapshot.blacklisted);
}

/// Random garbage on the wire degrades to drop-and-record; the engine and
/// its neighbors keep working.
#[tokio::test]
async fn test_garbage_bytes_never_crash_the_pipeline() {
    let fabric = MeshFabric::new();
    let a = spawn_node(&fabric, fast_config());
    let mut b = spawn_node(&fabric, fast_config());
    connect(&a, &b);

    let noisy = Identity::generate();
    let (noise_link, _rx) = fabric.attach(noisy.id());
    noise_link.connect(a.id());

    for len in [0usize, 1, 17, 157, 158, 400] {
        let garbage = vec![0xEEu8; len];
        noise_link.send(a.id(), garbage).await.unwrap();
    }

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(a.engine.stats().dropped_malformed >= 5);

    // Real traffic still flows through A.
    a.engine
        .send_message(PeerId::BROADCAST, b"still standing".to_vec())
        .await
        .unwrap();
    assert_eq!(recv(&mut b).await.payload, b"still standing");
}

// ============================================================================
// Rotation under traffic
// ============================================================================

/// With an aggressive message-count rotation policy, sessions rotate
/// underneath a stream of directed messages and every message still lands.
#[tokio::test]
async fn test_session_rotation_under_traffic() {
    let fabric = MeshFabric::new();
    let mut config = fast_config();
    config.session.rotation_message_limit = 3;
    let a = spawn_node(&fabric, config.clone());
    let mut b = spawn_node(&fabric, config);
    connect(&a, &b);

    for i in 0..10u8 {
        let payload = vec![i; 32];
        a.engine.send_message(b.id(), payload.clone()).await.unwrap();
        let delivery = recv(&mut b).await;
        assert_eq!(delivery.payload, payload, "message {i} must survive rotation");
    }
}

/// A route advertisement creates the peer record (with addresses) on
/// nodes that had never heard of the sender.
#[tokio::test]
async fn test_route_advert_populates_peer_table() {
    let fabric = MeshFabric::new();
    let mut config = fast_config();
    config.local_addresses = vec!["lan://10.9.8.7:4000".to_string(), "ble://aa:bb".to_string()];
    let a = spawn_node(&fabric, config);
    let b = spawn_node(&fabric, fast_config());

    // One-sided introduction: A can reach B, B knows nothing about A.
    a.link.connect(b.id());
    b.link.connect(a.id());
    a.engine.connect_peer(b.id());
    assert!(b.engine.peers().is_empty());

    a.engine.announce().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let peers = b.engine.peers();
    let snapshot = peers
        .iter()
        .find(|p| p.id == a.id())
        .expect("advert must create the peer record");
    assert!(snapshot.addresses.contains(&"lan://10.9.8.7:4000".to_string()));
    assert!(snapshot.addresses.contains(&"ble://aa:bb".to_string()));
}

/// Heartbeats keep an otherwise silent peer from being reaped by the
/// staleness timer.
#[tokio::test]
async fn test_heartbeats_keep_silent_peers_alive() {
    let fabric = MeshFabric::new();
    let mut config = fast_config();
    config.router.silence_timeout = Duration::from_millis(300);
    config.router.heartbeat_min = Duration::from_millis(20);
    config.router.heartbeat_max = Duration::from_millis(80);

    let a = spawn_node(&fabric, config.clone());
    let b = spawn_node(&fabric, config);
    connect(&a, &b);

    // No application traffic at all; only heartbeats flow.
    tokio::time::sleep(Duration::from_millis(700)).await;

    assert!(
        a.engine.peers().iter().any(|p| p.id == b.id()),
        "heartbeating peer must survive the silence timeout"
    );
    assert!(b.engine.peers().iter().any(|p| p.id == a.id()));
}

/// ACK round trips feed the sender's health view of the recipient.
#[tokio::test]
async fn test_ack_roundtrip_raises_health() {
    let fabric = MeshFabric::new();
    let a = spawn_node(&fabric, fast_config());
    let mut b = spawn_node(&fabric, fast_config());
    connect(&a, &b);

    for i in 0..3u8 {
        a.engine.send_message(b.id(), vec![i; 8]).await.unwrap();
        recv(&mut b).await;
    }
    tokio::time::sleep(Duration::from_millis(150)).await;

    let health = a.engine.peer_health(&b.id()).expect("peer known");
    assert!(health > 0.5, "acked traffic must raise health, got {health}");
}
