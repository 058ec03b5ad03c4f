use hashweave_crypto::KeyPair;
use hashweave_types::{Address, AddressBook, Event, EventTransaction, NodeId, Timestamp, UnsignedEvent};
use std::sync::Arc;

/// Small signed network used by unit tests.
pub struct Network {
    pub book: Arc<AddressBook>,
    pub keys: Vec<KeyPair>,
    pub latest: Vec<Option<Event>>,
    pub birth_round: u64,
    clock: u64,
}

impl Network {
    pub fn new(weights: &[u64]) -> Self {
        let keys: Vec<KeyPair> = (0..weights.len())
            .map(|i| KeyPair::from_seed([i as u8 + 1; 32]))
            .collect();
        let book = AddressBook::new(weights.iter().zip(&keys).enumerate().map(|(i, (weight, key))| Address {
            node_id: NodeId(i as u64),
            weight: *weight,
            public_key: key.public_key(),
            endpoint: None,
        }))
        .unwrap();
        Self {
            book: Arc::new(book),
            latest: vec![None; weights.len()],
            keys,
            birth_round: 1,
            clock: 1_000_000,
        }
    }

    /// Create the next event of `creator` on top of its last event and the
    /// last event of `other`.
    pub fn create(&mut self, creator: usize, other: Option<usize>) -> Event {
        self.clock += 1_000_000;
        let self_parent = self.latest[creator].as_ref().map(Event::descriptor);
        let other_parent = other.and_then(|o| self.latest[o].as_ref().map(Event::descriptor));
        let unsigned = UnsignedEvent::new(
            NodeId(creator as u64),
            self_parent,
            other_parent,
            self.birth_round,
            Timestamp::from_nanos(self.clock),
            vec![EventTransaction::application(self.clock.to_be_bytes().to_vec())],
        );
        let event = self.keys[creator].sign_event(unsigned).into_hashed();
        self.latest[creator] = Some(event.clone());
        event
    }
}
