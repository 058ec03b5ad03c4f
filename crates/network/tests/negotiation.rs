mod common;

use common::{members, random_gossip, TestNode};
use hashweave_crypto::Ed25519Verifier;
use hashweave_network::{
    connected_pair, FallenBehindMonitor, HealthCheckConfig, HealthMonitor, HeartbeatProtocol, Negotiated,
    Negotiator, Protocol, ReconnectConfig, ReconnectContext, ReconnectProtocol, SyncConfig, SyncPermits,
    SyncProtocol, HEARTBEAT_PROTOCOL_ID, SYNC_PROTOCOL_ID,
};
use hashweave_state::SignedStateNexus;
use hashweave_types::{AddressBook, NodeId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

struct Side {
    negotiator: Negotiator,
    health: Arc<HealthMonitor>,
    synced: mpsc::UnboundedReceiver<NodeId>,
}

fn side(node: &TestNode, peer: NodeId, book: Arc<AddressBook>) -> Side {
    let health = Arc::new(HealthMonitor::new(HealthCheckConfig::default()));
    let config = SyncConfig {
        heartbeat_period: Duration::from_secs(60),
        ..SyncConfig::default()
    };
    let (tx, synced) = mpsc::unbounded_channel();
    let reconnect = Arc::new(ReconnectContext::new(
        book,
        Arc::new(Ed25519Verifier),
        Arc::new(SignedStateNexus::new()),
        Arc::new(FallenBehindMonitor::new(1)),
        ReconnectConfig::default(),
    ));
    let protocols: Vec<Box<dyn Protocol>> = vec![
        Box::new(HeartbeatProtocol::new(peer, config.heartbeat_period, health.clone())),
        Box::new(ReconnectProtocol::new(peer, reconnect)),
        Box::new(
            SyncProtocol::new(
                peer,
                node.synchronizer(1, config.clone()),
                Arc::new(SyncPermits::new(config.sync_permits, config.per_peer_permits)),
                health.clone(),
            )
            .with_completion_notice(tx),
        ),
    ];
    Side {
        negotiator: Negotiator::new(protocols, CancellationToken::new()).unwrap(),
        health,
        synced,
    }
}

#[tokio::test]
async fn heartbeat_then_sync_over_one_connection() {
    let (book, keys) = members(4);
    let events = random_gossip(&keys, 3, 25);
    let a = TestNode::spawn(book.clone());
    let b = TestNode::spawn(book.clone());
    a.submit_all(&events).await;

    let mut side_a = side(&a, NodeId(1), book.clone());
    let mut side_b = side(&b, NodeId(0), book);
    let (mut conn_a, mut conn_b) = connected_pair(NodeId(0), NodeId(1), 1024, 1 << 20);

    let (first_a, first_b) = tokio::join!(
        side_a.negotiator.negotiate(&mut conn_a),
        side_b.negotiator.negotiate(&mut conn_b)
    );
    assert_eq!(first_a.unwrap(), Negotiated::Ran(HEARTBEAT_PROTOCOL_ID));
    assert_eq!(first_b.unwrap(), Negotiated::Ran(HEARTBEAT_PROTOCOL_ID));
    assert!(side_a.health.round_trip(NodeId(1)).is_some());

    let (second_a, second_b) = tokio::join!(
        side_a.negotiator.negotiate(&mut conn_a),
        side_b.negotiator.negotiate(&mut conn_b)
    );
    assert_eq!(second_a.unwrap(), Negotiated::Ran(SYNC_PROTOCOL_ID));
    assert_eq!(second_b.unwrap(), Negotiated::Ran(SYNC_PROTOCOL_ID));
    assert_eq!(side_a.synced.try_recv().unwrap(), NodeId(1));
    assert_eq!(side_b.synced.try_recv().unwrap(), NodeId(0));
    b.wait_for(events.len()).await;
}
