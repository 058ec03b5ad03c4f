use hashweave_types::{Event, EventTransaction, NodeId};
use tracing::debug;

/// Picks the state signatures of a stale self event that are worth putting
/// into a new event.
#[derive(Debug, Clone, Copy)]
pub struct StateSignatureResubmitter {
    self_id: NodeId,
    max_age: u64,
}

impl StateSignatureResubmitter {
    pub fn new(self_id: NodeId, max_age: u64) -> Self {
        Self { self_id, max_age }
    }

    /// Signatures of `stale` for rounds at most `max_age` behind
    /// `latest_round`. Events of other creators yield nothing.
    pub fn resubmit(&self, stale: &Event, latest_round: u64) -> Vec<EventTransaction> {
        if stale.creator() != self.self_id {
            return Vec::new();
        }
        let mut kept = Vec::new();
        for tx in stale.transactions() {
            let Some(signature) = tx.as_state_signature() else {
                continue;
            };
            let age = latest_round.saturating_sub(signature.round);
            if age <= self.max_age {
                kept.push(tx.clone());
            } else {
                debug!(
                    target = "resubmit",
                    round = signature.round,
                    latest_round,
                    "dropping state signature that is too old"
                );
            }
        }
        if !kept.is_empty() {
            debug!(target = "resubmit", event = %stale.hash(), count = kept.len(), "resubmitting state signatures");
        }
        kept
    }
}
