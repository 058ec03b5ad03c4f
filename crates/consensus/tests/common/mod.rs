#![allow(dead_code)]

use hashweave_crypto::KeyPair;
use hashweave_types::{
    Address, AddressBook, Event, EventTransaction, GossipEvent, NodeId, Timestamp, UnsignedEvent,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

pub fn members(weights: &[u64]) -> (Arc<AddressBook>, Vec<KeyPair>) {
    let keys: Vec<KeyPair> = (0..weights.len())
        .map(|i| KeyPair::from_seed([i as u8 + 11; 32]))
        .collect();
    let book = AddressBook::new(weights.iter().zip(&keys).enumerate().map(|(i, (w, k))| Address {
        node_id: NodeId(i as u64),
        weight: *w,
        public_key: k.public_key(),
        endpoint: None,
    }))
    .unwrap();
    (Arc::new(book), keys)
}

/// Random gossip between members, reproducible from a seed.
pub fn random_gossip(keys: &[KeyPair], seed: u64, steps: usize) -> Vec<GossipEvent> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut latest: Vec<Option<Event>> = vec![None; keys.len()];
    let mut events = Vec::with_capacity(steps);
    for step in 0..steps {
        let creator = rng.gen_range(0..keys.len());
        let mut other = rng.gen_range(0..keys.len());
        if other == creator {
            other = (other + 1) % keys.len();
        }
        let unsigned = UnsignedEvent::new(
            NodeId(creator as u64),
            latest[creator].as_ref().map(Event::descriptor),
            latest[other].as_ref().map(Event::descriptor),
            1,
            Timestamp::from_millis(1_000 + step as u64 * 10 + rng.gen_range(0..5)),
            vec![EventTransaction::application(vec![step as u8; 3])],
        );
        let event = keys[creator].sign_event(unsigned);
        latest[creator] = Some(event.clone().into_hashed());
        events.push(event);
    }
    events
}
