use hashweave_types::NodeId;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Number of events each peer currently has inside the intake pipeline.
///
/// Gossip increments the count when it hands an event to intake, intake
/// decrements it when the event leaves the pipeline (inserted, rejected or
/// discarded). Sync uses the count to stop pulling from a peer whose events
/// are still being processed.
#[derive(Debug, Default)]
pub struct IntakeEventCounter {
    counts: RwLock<HashMap<NodeId, Arc<AtomicUsize>>>,
}

impl IntakeEventCounter {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, peer: NodeId) -> Arc<AtomicUsize> {
        if let Some(slot) = self.counts.read().get(&peer) {
            return slot.clone();
        }
        self.counts
            .write()
            .entry(peer)
            .or_insert_with(|| Arc::new(AtomicUsize::new(0)))
            .clone()
    }

    pub fn event_entered(&self, peer: NodeId) {
        self.slot(peer).fetch_add(1, Ordering::AcqRel);
    }

    pub fn event_exited(&self, peer: NodeId) {
        let slot = self.slot(peer);
        let previous = slot.fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
            count.checked_sub(1)
        });
        if previous.is_err() {
            tracing::warn!(
                target = "intake",
                peer = %peer,
                "intake counter decremented below zero",
            );
        }
    }

    pub fn backlog(&self, peer: NodeId) -> usize {
        self.counts
            .read()
            .get(&peer)
            .map(|slot| slot.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    pub fn has_unprocessed_events(&self, peer: NodeId) -> bool {
        self.backlog(peer) > 0
    }

    pub fn total(&self) -> usize {
        self.counts
            .read()
            .values()
            .map(|slot| slot.load(Ordering::Acquire))
            .sum()
    }
}
