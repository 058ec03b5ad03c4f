//! Reservation counted snapshots of the state at a consensus round.
//!
//! A [`SignedState`] lives in an `Arc`, but its contents are only released
//! through explicit reservations. The count starts in a fresh state, goes up
//! with every [`ReservedSignedState`] and the state is destroyed exactly once,
//! when the count drops from one to zero. A destroyed state can never be
//! reserved again.

use crate::merkle::StateTree;
use hashweave_crypto::{verify_hash_signature, SignatureVerifier};
use hashweave_types::{AddressBook, ConsensusSnapshot, EventWindow, Hash, NodeId, RunningEventHash, Timestamp};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::trace;

const FRESH: i64 = -1;
const DESTROYED: i64 = 0;

/// Result of offering a signature to a signed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureOutcome {
    Added,
    /// Added, and the state just became complete.
    Completed,
    Duplicate,
    UnknownSigner,
    ZeroWeight,
    Invalid,
}

#[derive(Debug, Default)]
struct Signatures {
    by_node: BTreeMap<NodeId, Vec<u8>>,
    weight: u64,
}

pub struct SignedState {
    round: u64,
    root_hash: Hash,
    tree: RwLock<Option<Arc<StateTree>>>,
    running_event_hash: RunningEventHash,
    consensus_timestamp: Timestamp,
    consensus_event_count: u64,
    event_window: EventWindow,
    epoch_hash: Option<Hash>,
    snapshot: Option<ConsensusSnapshot>,
    signatures: Mutex<Signatures>,
    reservations: AtomicI64,
    destruction_notice: Option<UnboundedSender<u64>>,
}

/// Everything known about a round when its state is created.
#[derive(Debug, Clone)]
pub struct SignedStateParams {
    pub round: u64,
    pub tree: Arc<StateTree>,
    pub running_event_hash: RunningEventHash,
    pub consensus_timestamp: Timestamp,
    pub consensus_event_count: u64,
    pub event_window: EventWindow,
    pub epoch_hash: Option<Hash>,
    /// What consensus needs to resume from this round.
    pub snapshot: Option<ConsensusSnapshot>,
}

impl SignedState {
    pub fn new(params: SignedStateParams) -> Arc<Self> {
        Self::with_destruction_notice(params, None)
    }

    /// The round number is sent on `notice` when the state is destroyed.
    pub fn with_destruction_notice(params: SignedStateParams, notice: Option<UnboundedSender<u64>>) -> Arc<Self> {
        Arc::new(Self {
            round: params.round,
            root_hash: params.tree.root_hash(),
            tree: RwLock::new(Some(params.tree)),
            running_event_hash: params.running_event_hash,
            consensus_timestamp: params.consensus_timestamp,
            consensus_event_count: params.consensus_event_count,
            event_window: params.event_window,
            epoch_hash: params.epoch_hash,
            snapshot: params.snapshot,
            signatures: Mutex::new(Signatures::default()),
            reservations: AtomicI64::new(FRESH),
            destruction_notice: notice,
        })
    }

    pub fn round(&self) -> u64 {
        self.round
    }

    pub fn root_hash(&self) -> Hash {
        self.root_hash
    }

    pub fn running_event_hash(&self) -> RunningEventHash {
        self.running_event_hash
    }

    pub fn consensus_timestamp(&self) -> Timestamp {
        self.consensus_timestamp
    }

    pub fn consensus_event_count(&self) -> u64 {
        self.consensus_event_count
    }

    pub fn event_window(&self) -> EventWindow {
        self.event_window
    }

    pub fn epoch_hash(&self) -> Option<Hash> {
        self.epoch_hash
    }

    pub fn snapshot(&self) -> Option<&ConsensusSnapshot> {
        self.snapshot.as_ref()
    }

    /// The state tree, `None` once the state has been destroyed.
    pub fn tree(&self) -> Option<Arc<StateTree>> {
        self.tree.read().clone()
    }

    pub fn reservation_count(&self) -> i64 {
        self.reservations.load(Ordering::Acquire).max(0)
    }

    pub fn is_destroyed(&self) -> bool {
        self.reservations.load(Ordering::Acquire) == DESTROYED
    }

    /// Take a reservation unless the state is already destroyed.
    pub fn try_reserve(self: &Arc<Self>, reason: &'static str) -> Option<ReservedSignedState> {
        let mut current = self.reservations.load(Ordering::Acquire);
        loop {
            if current == DESTROYED {
                return None;
            }
            let next = if current == FRESH {
                1
            } else {
                current
                    .checked_add(1)
                    .unwrap_or_else(|| panic!("reservation overflow on signed state {}", self.round))
            };
            match self
                .reservations
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => {
                    trace!(target = "signed_state", round = self.round, reason, count = next, "reserved");
                    return Some(ReservedSignedState {
                        state: self.clone(),
                        reason,
                    });
                }
                Err(actual) => current = actual,
            }
        }
    }

    fn release(&self, reason: &'static str) {
        let previous = self.reservations.fetch_sub(1, Ordering::AcqRel);
        if previous <= 0 {
            panic!(
                "reservation underflow on signed state {} (count was {previous}, reason {reason})",
                self.round
            );
        }
        trace!(target = "signed_state", round = self.round, reason, count = previous - 1, "released");
        if previous == 1 {
            self.destroy();
        }
    }

    fn destroy(&self) {
        self.tree.write().take();
        trace!(target = "signed_state", round = self.round, "destroyed");
        if let Some(notice) = &self.destruction_notice {
            let _ = notice.send(self.round);
        }
    }

    /// Verify and record a signature on the root hash.
    pub fn add_signature(
        &self,
        verifier: &dyn SignatureVerifier,
        book: &AddressBook,
        signer: NodeId,
        signature: &[u8],
    ) -> SignatureOutcome {
        let Some(address) = book.get(signer) else {
            return SignatureOutcome::UnknownSigner;
        };
        if address.weight == 0 {
            return SignatureOutcome::ZeroWeight;
        }
        let mut signatures = self.signatures.lock();
        if signatures.by_node.contains_key(&signer) {
            return SignatureOutcome::Duplicate;
        }
        if verify_hash_signature(verifier, book, signer, &self.root_hash, signature).is_err() {
            return SignatureOutcome::Invalid;
        }
        let was_complete = book.is_supermajority(signatures.weight);
        signatures.by_node.insert(signer, signature.to_vec());
        signatures.weight += address.weight;
        if !was_complete && book.is_supermajority(signatures.weight) {
            SignatureOutcome::Completed
        } else {
            SignatureOutcome::Added
        }
    }

    pub fn signing_weight(&self) -> u64 {
        self.signatures.lock().weight
    }

    pub fn signatures(&self) -> BTreeMap<NodeId, Vec<u8>> {
        self.signatures.lock().by_node.clone()
    }

    pub fn signing_nodes(&self) -> Vec<NodeId> {
        self.signatures.lock().by_node.keys().copied().collect()
    }

    pub fn is_complete(&self, book: &AddressBook) -> bool {
        book.is_supermajority(self.signing_weight())
    }
}

impl fmt::Debug for SignedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignedState")
            .field("round", &self.round)
            .field("root_hash", &self.root_hash)
            .field("reservations", &self.reservations.load(Ordering::Relaxed))
            .field("signing_weight", &self.signing_weight())
            .finish()
    }
}

/// A held reservation. Dropping it releases the reservation.
pub struct ReservedSignedState {
    state: Arc<SignedState>,
    reason: &'static str,
}

impl ReservedSignedState {
    pub fn reason(&self) -> &'static str {
        self.reason
    }

    pub fn state(&self) -> &Arc<SignedState> {
        &self.state
    }

    /// Take another reservation on the same state for a different holder.
    pub fn reserve_again(&self, reason: &'static str) -> ReservedSignedState {
        match self.state.try_reserve(reason) {
            Some(reserved) => reserved,
            None => panic!("signed state {} destroyed while reserved", self.state.round),
        }
    }
}

impl Deref for ReservedSignedState {
    type Target = SignedState;

    fn deref(&self) -> &SignedState {
        &self.state
    }
}

impl Drop for ReservedSignedState {
    fn drop(&mut self) {
        self.state.release(self.reason);
    }
}

impl fmt::Debug for ReservedSignedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReservedSignedState")
            .field("state", &self.state)
            .field("reason", &self.reason)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use hashweave_types::AncientMode;

    pub(crate) fn params(round: u64, leaves: &[&[u8]]) -> SignedStateParams {
        SignedStateParams {
            round,
            tree: Arc::new(StateTree::from_leaves(leaves.iter().map(|l| l.to_vec()).collect(), 2).unwrap()),
            running_event_hash: RunningEventHash::default(),
            consensus_timestamp: Timestamp::from_millis(round),
            consensus_event_count: round * 10,
            event_window: EventWindow::genesis(AncientMode::BirthRoundThreshold),
            epoch_hash: None,
            snapshot: None,
        }
    }

    #[test]
    fn destroyed_exactly_once_when_last_reservation_drops() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let state = SignedState::with_destruction_notice(params(4, &[b"a"]), Some(tx));
        let first = state.try_reserve("first").unwrap();
        let second = first.reserve_again("second");
        assert_eq!(state.reservation_count(), 2);
        drop(first);
        assert!(!state.is_destroyed());
        assert!(state.tree().is_some());
        drop(second);
        assert!(state.is_destroyed());
        assert!(state.tree().is_none());
        assert_eq!(rx.try_recv().unwrap(), 4);
        assert!(rx.try_recv().is_err());
        assert!(state.try_reserve("late").is_none());
    }

    #[test]
    #[should_panic(expected = "reservation underflow")]
    fn underflow_is_fatal() {
        let state = SignedState::new(params(1, &[b"a"]));
        state.release("bogus");
    }
}
