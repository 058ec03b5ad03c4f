use hashweave_crypto::KeyPair;
use hashweave_types::{
    EventDescriptor, EventTransaction, EventWindow, GossipEvent, NodeId, Timestamp, UnsignedEvent,
};
use std::collections::VecDeque;

/// Builds and signs the local node's events.
#[derive(Debug)]
pub struct EventCreator {
    self_id: NodeId,
    keys: KeyPair,
    last_self: Option<EventDescriptor>,
    last_created: Timestamp,
    pending: VecDeque<EventTransaction>,
    max_transactions: usize,
    window: EventWindow,
}

impl EventCreator {
    pub fn new(self_id: NodeId, keys: KeyPair, max_transactions: usize, window: EventWindow) -> Self {
        Self {
            self_id,
            keys,
            last_self: None,
            last_created: Timestamp::EPOCH,
            pending: VecDeque::new(),
            max_transactions: max_transactions.max(1),
            window,
        }
    }

    pub fn self_id(&self) -> NodeId {
        self.self_id
    }

    pub fn submit(&mut self, transaction: EventTransaction) {
        self.pending.push_back(transaction);
    }

    pub fn pending_transactions(&self) -> usize {
        self.pending.len()
    }

    pub fn set_window(&mut self, window: EventWindow) {
        self.window = window;
    }

    /// Create the next self event with `other_parent` as its other parent.
    /// Ancient parents are left out.
    pub fn create_event(&mut self, other_parent: Option<EventDescriptor>, now: Timestamp) -> GossipEvent {
        let window = self.window;
        let self_parent = self.last_self.filter(|p| !window.is_ancient(p));
        let other_parent = other_parent
            .filter(|p| p.creator != self.self_id)
            .filter(|p| !window.is_ancient(p));
        let take = self.pending.len().min(self.max_transactions);
        let transactions: Vec<EventTransaction> = self.pending.drain(..take).collect();
        let time_created = if now > self.last_created {
            now
        } else {
            self.last_created.plus_nanos(1)
        };
        let birth_round = window.latest_consensus_round() + 1;
        let unsigned = UnsignedEvent::new(
            self.self_id,
            self_parent,
            other_parent,
            birth_round,
            time_created,
            transactions,
        );
        let event = self.keys.sign_event(unsigned);
        self.last_created = time_created;
        self.last_self = Some(EventDescriptor {
            hash: event.unsigned.compute_hash(),
            creator: self.self_id,
            generation: event.unsigned.generation,
            birth_round,
        });
        tracing::trace!(
            target = "event_creator",
            generation = event.unsigned.generation,
            transactions = event.unsigned.transactions.len(),
            "created self event",
        );
        event
    }
}
