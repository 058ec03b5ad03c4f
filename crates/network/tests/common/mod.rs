#![allow(dead_code)]

use hashweave_consensus::{ConsensusConfig, ConsensusEngine, EngineHandle, EventWindowConfig, IntakeConfig};
use hashweave_crypto::{Ed25519Verifier, KeyPair};
use hashweave_network::{FallenBehindMonitor, PeerEventMemory, ShadowgraphSynchronizer, SyncConfig};
use hashweave_types::{
    Address, AddressBook, Event, EventTransaction, GossipEvent, NodeId, Timestamp, UnsignedEvent,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub fn members(count: usize) -> (Arc<AddressBook>, Vec<KeyPair>) {
    let keys: Vec<KeyPair> = (0..count).map(|i| KeyPair::from_seed([i as u8 + 31; 32])).collect();
    let book = AddressBook::new(keys.iter().enumerate().map(|(i, k)| Address {
        node_id: NodeId(i as u64),
        weight: 10,
        public_key: k.public_key(),
        endpoint: None,
    }))
    .unwrap();
    (Arc::new(book), keys)
}

/// Random gossip between members, reproducible from a seed. Every prefix of
/// the result is closed under ancestry.
pub fn random_gossip(keys: &[KeyPair], seed: u64, steps: usize) -> Vec<GossipEvent> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut latest: Vec<Option<Event>> = vec![None; keys.len()];
    let mut events = Vec::with_capacity(steps);
    for step in 0..steps {
        let creator = rng.gen_range(0..keys.len());
        let other = (creator + rng.gen_range(1..keys.len())) % keys.len();
        let unsigned = UnsignedEvent::new(
            NodeId(creator as u64),
            latest[creator].as_ref().map(Event::descriptor),
            latest[other].as_ref().map(Event::descriptor),
            1,
            Timestamp::from_millis(1_000 + step as u64 * 10),
            vec![EventTransaction::application(vec![step as u8; 4])],
        );
        let event = keys[creator].sign_event(unsigned);
        latest[creator] = Some(event.clone().into_hashed());
        events.push(event);
    }
    events
}

/// A running consensus engine whose outputs are discarded.
pub struct TestNode {
    pub handle: EngineHandle,
    pub cancel: CancellationToken,
}

impl TestNode {
    pub fn spawn(book: Arc<AddressBook>) -> Self {
        let (engine, handle, receiver) = ConsensusEngine::new(
            book,
            Arc::new(Ed25519Verifier),
            ConsensusConfig::default(),
            IntakeConfig::default(),
            EventWindowConfig::default(),
        );
        let cancel = CancellationToken::new();
        let (output_tx, mut output_rx) = mpsc::channel(64);
        tokio::spawn(engine.run(receiver, output_tx, cancel.clone()));
        tokio::spawn(async move { while output_rx.recv().await.is_some() {} });
        Self { handle, cancel }
    }

    pub async fn submit_all(&self, events: &[GossipEvent]) {
        for event in events {
            self.handle.submit(event.clone(), None).await.unwrap();
        }
        self.wait_for(events.len()).await;
    }

    /// Wait until the DAG holds at least `count` events.
    pub async fn wait_for(&self, count: usize) {
        let dag = self.handle.dag().clone();
        tokio::time::timeout(Duration::from_secs(10), async move {
            while dag.read().len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("DAG never reached {count} events"));
    }

    pub fn synchronizer(&self, peers: usize, config: SyncConfig) -> Arc<ShadowgraphSynchronizer> {
        Arc::new(ShadowgraphSynchronizer::new(
            self.handle.clone(),
            Arc::new(PeerEventMemory::new(config.duplicate_threshold, 10_000)),
            Arc::new(FallenBehindMonitor::new(peers)),
            config,
        ))
    }
}

impl Drop for TestNode {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// A new event of `creator` on top of the latest events of `creator` and
/// `other` in `history`.
pub fn extend(keys: &[KeyPair], history: &[GossipEvent], creator: usize, other: usize) -> GossipEvent {
    let latest = |member: usize| {
        history
            .iter()
            .rev()
            .find(|event| event.unsigned.creator == NodeId(member as u64))
            .map(|event| event.clone().into_hashed().descriptor())
    };
    let newest = history.iter().map(|event| event.unsigned.time_created.as_nanos()).max().unwrap_or(0);
    let unsigned = UnsignedEvent::new(
        NodeId(creator as u64),
        latest(creator),
        latest(other),
        1,
        Timestamp::from_nanos(newest + 1_000_000),
        vec![EventTransaction::application(vec![creator as u8, other as u8])],
    );
    keys[creator].sign_event(unsigned)
}
