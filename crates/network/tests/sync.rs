mod common;

use common::{extend, members, random_gossip, TestNode};
use hashweave_network::{
    connected_pair, HealthCheckConfig, HealthMonitor, NetworkError, Protocol, SyncAbort, SyncConfig, SyncMessage,
    SyncOutcome, SyncPermits, SyncProtocol,
};
use hashweave_types::{AncientMode, EventDescriptor, EventWindow, Hash, NodeId};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_test::assert_ok;

#[tokio::test]
async fn missing_events_flow_to_the_peer() {
    let (book, keys) = members(4);
    let events = random_gossip(&keys, 7, 60);
    let a = TestNode::spawn(book.clone());
    let b = TestNode::spawn(book);
    a.submit_all(&events).await;
    b.submit_all(&events[..30]).await;

    let sync_a = a.synchronizer(3, SyncConfig::default());
    let sync_b = b.synchronizer(3, SyncConfig::default());
    let (mut conn_a, mut conn_b) = connected_pair(NodeId(0), NodeId(1), 4096, 1 << 20);
    let (from_a, from_b) = tokio::join!(sync_a.synchronize(&mut conn_a), sync_b.synchronize(&mut conn_b));
    assert_eq!(assert_ok!(from_a), SyncOutcome::Completed { sent: 30, received: 0 });
    assert_eq!(assert_ok!(from_b), SyncOutcome::Completed { sent: 0, received: 30 });

    b.wait_for(60).await;
    for event in &events {
        assert!(b.handle.dag().read().contains(&event.unsigned.compute_hash()));
    }

    // Nothing left to exchange.
    let (again_a, again_b) = tokio::join!(sync_a.synchronize(&mut conn_a), sync_b.synchronize(&mut conn_b));
    assert_eq!(assert_ok!(again_a), SyncOutcome::Completed { sent: 0, received: 0 });
    assert_eq!(assert_ok!(again_b), SyncOutcome::Completed { sent: 0, received: 0 });
}

#[tokio::test]
async fn divergent_nodes_exchange_both_ways() {
    let (book, keys) = members(4);
    let shared = random_gossip(&keys, 11, 20);
    let a = TestNode::spawn(book.clone());
    let b = TestNode::spawn(book);
    a.submit_all(&shared).await;
    b.submit_all(&shared).await;

    // Each side learns one event of its own that the other does not have.
    a.submit_all(&[extend(&keys, &shared, 0, 1)]).await;
    b.submit_all(&[extend(&keys, &shared, 2, 3)]).await;
    a.wait_for(21).await;
    b.wait_for(21).await;

    let sync_a = a.synchronizer(3, SyncConfig::default());
    let sync_b = b.synchronizer(3, SyncConfig::default());
    let (mut conn_a, mut conn_b) = connected_pair(NodeId(0), NodeId(1), 256, 1 << 20);
    let (from_a, from_b) = tokio::join!(sync_a.synchronize(&mut conn_a), sync_b.synchronize(&mut conn_b));
    assert_eq!(assert_ok!(from_a), SyncOutcome::Completed { sent: 1, received: 1 });
    assert_eq!(assert_ok!(from_b), SyncOutcome::Completed { sent: 1, received: 1 });
    a.wait_for(22).await;
    b.wait_for(22).await;
}

#[tokio::test]
async fn recently_exchanged_events_are_not_sent_again() {
    let (book, keys) = members(4);
    let events = random_gossip(&keys, 9, 60);
    let a = TestNode::spawn(book.clone());
    let b = TestNode::spawn(book);
    a.submit_all(&events).await;
    b.submit_all(&events[..30]).await;

    let sync_a = a.synchronizer(3, SyncConfig::default());
    let sync_b = b.synchronizer(3, SyncConfig::default());
    let now = Instant::now();
    for event in &events[30..40] {
        sync_a.memory().record(NodeId(1), event.unsigned.compute_hash(), now);
    }

    let (mut conn_a, mut conn_b) = connected_pair(NodeId(0), NodeId(1), 4096, 1 << 20);
    let (from_a, from_b) = tokio::join!(sync_a.synchronize(&mut conn_a), sync_b.synchronize(&mut conn_b));
    assert_eq!(assert_ok!(from_a), SyncOutcome::Completed { sent: 20, received: 0 });
    assert_eq!(assert_ok!(from_b), SyncOutcome::Completed { sent: 0, received: 20 });
}

#[tokio::test]
async fn backpressure_aborts_and_returns_the_permit() {
    let (book, keys) = members(4);
    let events = random_gossip(&keys, 5, 40);
    let a = TestNode::spawn(book.clone());
    let b = TestNode::spawn(book);
    a.submit_all(&events).await;

    let sync_a = a.synchronizer(3, SyncConfig::default());
    let sync_b = b.synchronizer(
        3,
        SyncConfig {
            max_intake_backlog: 0,
            ..SyncConfig::default()
        },
    );
    let permits_a = Arc::new(SyncPermits::new(4, 1));
    let permits_b = Arc::new(SyncPermits::new(4, 1));
    let health = Arc::new(HealthMonitor::new(HealthCheckConfig::default()));
    let mut proto_a = SyncProtocol::new(NodeId(1), sync_a.clone(), permits_a.clone(), health.clone());
    let mut proto_b = SyncProtocol::new(NodeId(0), sync_b, permits_b.clone(), health);
    assert!(proto_a.should_initiate());
    assert!(proto_b.should_accept());
    assert_eq!(permits_b.held_by(NodeId(0)), 1);

    // One event from a still queued in b's intake puts b over its limit.
    b.handle.counter().event_entered(NodeId(0));

    let (mut conn_a, conn_b) = connected_pair(NodeId(0), NodeId(1), 1024, 1 << 20);
    let (from_a, from_b) = tokio::join!(proto_a.run_protocol(&mut conn_a), async move {
        let mut conn_b = conn_b;
        proto_b.run_protocol(&mut conn_b).await
    });
    assert!(matches!(from_b, Err(NetworkError::SyncAborted(SyncAbort::Backpressure))));
    assert!(from_a.is_err());

    assert_eq!(permits_b.held_by(NodeId(0)), 0);
    assert_eq!(permits_b.available(), 4);
    assert_eq!(permits_a.held_by(NodeId(1)), 0);
    assert_eq!(sync_a.memory().size(NodeId(1)), 0);
}

#[tokio::test]
async fn sync_past_its_maximum_duration_is_aborted() {
    let (book, keys) = members(4);
    let events = random_gossip(&keys, 13, 40);
    let a = TestNode::spawn(book.clone());
    let b = TestNode::spawn(book);
    a.submit_all(&events).await;

    let sync_a = a.synchronizer(
        3,
        SyncConfig {
            max_sync_duration: Duration::ZERO,
            ..SyncConfig::default()
        },
    );
    let sync_b = b.synchronizer(3, SyncConfig::default());
    let (conn_a, mut conn_b) = connected_pair(NodeId(0), NodeId(1), 4096, 1 << 20);
    let (from_a, from_b) = tokio::join!(
        async move {
            let mut conn_a = conn_a;
            sync_a.synchronize(&mut conn_a).await
        },
        sync_b.synchronize(&mut conn_b)
    );
    assert!(matches!(from_a, Err(NetworkError::SyncAborted(SyncAbort::MaxDuration))));
    assert!(from_b.is_err());
}

fn advanced_window() -> EventWindow {
    EventWindow::genesis(AncientMode::BirthRoundThreshold).advance(30, 5, 1)
}

#[tokio::test]
async fn tips_ancient_to_the_peer_mean_we_fell_behind() {
    let (book, keys) = members(4);
    let events = random_gossip(&keys, 17, 12);
    let a = TestNode::spawn(book);
    a.submit_all(&events).await;
    let sync_a = a.synchronizer(1, SyncConfig::default());

    let (mut conn_a, mut conn_b) = connected_pair(NodeId(0), NodeId(1), 4096, 1 << 20);
    let peer_tips = SyncMessage::Tips {
        window: advanced_window(),
        tips: Vec::new(),
    };
    let (from_a, reply) = tokio::join!(
        sync_a.synchronize(&mut conn_a),
        conn_b.exchange::<_, SyncMessage>(&peer_tips)
    );
    assert_eq!(assert_ok!(from_a), SyncOutcome::SelfFallenBehind);
    assert!(matches!(assert_ok!(reply), SyncMessage::Tips { tips, .. } if !tips.is_empty()));
    assert_eq!(sync_a.fallen_behind().peers_reporting(), 1);
    assert!(sync_a.fallen_behind().is_behind());
}

#[tokio::test]
async fn tips_ancient_to_us_mean_the_peer_fell_behind() {
    let (book, keys) = members(4);
    let events = random_gossip(&keys, 21, 12);
    let a = TestNode::spawn(book);
    a.submit_all(&events).await;
    let sync_a = a.synchronizer(1, SyncConfig::default());
    sync_a.fallen_behind().report(NodeId(1));

    let (mut conn_a, mut conn_b) = connected_pair(NodeId(0), NodeId(1), 4096, 1 << 20);
    let stale_tip = EventDescriptor {
        hash: Hash::digest(b"pruned long ago"),
        creator: NodeId(1),
        generation: 3,
        birth_round: 0,
    };
    let peer_tips = SyncMessage::Tips {
        window: EventWindow::genesis(AncientMode::BirthRoundThreshold),
        tips: vec![stale_tip],
    };
    let (from_a, reply) = tokio::join!(
        sync_a.synchronize(&mut conn_a),
        conn_b.exchange::<_, SyncMessage>(&peer_tips)
    );
    assert_eq!(assert_ok!(from_a), SyncOutcome::PeerFallenBehind);
    assert!(matches!(assert_ok!(reply), SyncMessage::Tips { .. }));
    // A peer that can sync with us no longer counts us as behind.
    assert_eq!(sync_a.fallen_behind().peers_reporting(), 0);
}
