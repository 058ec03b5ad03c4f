//! Collects state signatures from consensus and promotes complete states
//! into the nexus.

use crate::iss::{IssDetector, IssNotification};
use crate::nexus::SignedStateNexus;
use crate::signed_state::{ReservedSignedState, SignatureOutcome};
use hashweave_crypto::SignatureVerifier;
use hashweave_types::{AddressBook, ConsensusRound, NodeId, StateSignatureTransaction};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct SignatureCollector {
    book: Arc<AddressBook>,
    verifier: Arc<dyn SignatureVerifier>,
    nexus: Arc<SignedStateNexus>,
    pending: BTreeMap<u64, ReservedSignedState>,
    /// Signatures that reached consensus before the local state existed.
    early: BTreeMap<u64, Vec<(NodeId, StateSignatureTransaction)>>,
    max_pending_rounds: u64,
    latest_round: u64,
    iss: IssDetector,
    iss_notifications: Vec<IssNotification>,
}

impl SignatureCollector {
    pub fn new(
        book: Arc<AddressBook>,
        verifier: Arc<dyn SignatureVerifier>,
        nexus: Arc<SignedStateNexus>,
        max_pending_rounds: u64,
    ) -> Self {
        Self {
            iss: IssDetector::new(book.clone(), max_pending_rounds),
            iss_notifications: Vec::new(),
            book,
            verifier,
            nexus,
            pending: BTreeMap::new(),
            early: BTreeMap::new(),
            max_pending_rounds: max_pending_rounds.max(1),
            latest_round: 0,
        }
    }

    /// Track a freshly created state. Signatures that arrived early are
    /// applied immediately. Returns the state if it is already complete.
    pub fn add_state(&mut self, state: ReservedSignedState) -> Option<ReservedSignedState> {
        let round = state.round();
        self.latest_round = self.latest_round.max(round);
        self.iss_notifications.extend(self.iss.self_hash(round, state.root_hash()));
        self.pending.insert(round, state);
        let mut completed = None;
        for (signer, signature) in self.early.remove(&round).unwrap_or_default() {
            if let Some(state) = self.handle_signature(signer, &signature) {
                completed = Some(state);
            }
        }
        self.expire();
        completed
    }

    /// Apply every state signature carried by the events of a consensus round.
    pub fn handle_round(&mut self, round: &ConsensusRound) -> Vec<ReservedSignedState> {
        let mut completed = Vec::new();
        for consensus_event in &round.events {
            let signer = consensus_event.event.creator();
            for tx in consensus_event.event.transactions() {
                if let Some(signature) = tx.as_state_signature() {
                    completed.extend(self.handle_signature(signer, signature));
                }
            }
        }
        completed
    }

    /// Returns the state if this signature completed it.
    pub fn handle_signature(
        &mut self,
        signer: NodeId,
        signature: &StateSignatureTransaction,
    ) -> Option<ReservedSignedState> {
        self.iss_notifications
            .extend(self.iss.network_hash(signer, signature.round, signature.state_hash));
        let Some(state) = self.pending.get(&signature.round) else {
            if signature.round > self.latest_round
                && signature.round <= self.latest_round + self.max_pending_rounds
            {
                self.early
                    .entry(signature.round)
                    .or_default()
                    .push((signer, signature.clone()));
            }
            return None;
        };
        if state.root_hash() != signature.state_hash {
            warn!(
                target = "signature_collector",
                round = signature.round,
                signer = %signer,
                ours = %state.root_hash(),
                theirs = %signature.state_hash,
                "peer signed a different state hash"
            );
            return None;
        }
        let outcome = state.add_signature(self.verifier.as_ref(), &self.book, signer, &signature.signature);
        debug!(target = "signature_collector", round = signature.round, signer = %signer, ?outcome, "state signature");
        if outcome != SignatureOutcome::Completed {
            return None;
        }
        let state = self.pending.remove(&signature.round)?;
        info!(
            target = "signature_collector",
            round = state.round(),
            weight = state.signing_weight(),
            "signed state complete"
        );
        self.nexus.set_if_newer(state.reserve_again("nexus"));
        Some(state)
    }

    /// Drop states that stayed incomplete for too long.
    fn expire(&mut self) {
        let oldest_kept = self.latest_round.saturating_sub(self.max_pending_rounds);
        let kept = self.pending.split_off(&oldest_kept);
        for (round, state) in std::mem::replace(&mut self.pending, kept) {
            warn!(
                target = "signature_collector",
                round,
                weight = state.signing_weight(),
                total = self.book.total_weight(),
                "signed state never collected enough signatures"
            );
        }
        let kept_early = self.early.split_off(&oldest_kept);
        self.early = kept_early;
    }

    pub fn pending_rounds(&self) -> Vec<u64> {
        self.pending.keys().copied().collect()
    }

    /// ISS decisions made since the last call.
    pub fn take_iss_notifications(&mut self) -> Vec<IssNotification> {
        std::mem::take(&mut self.iss_notifications)
    }

    /// Start over from an adopted state: nothing at or before its round is
    /// pending any more.
    pub fn reset_to(&mut self, round: u64) {
        self.pending = self.pending.split_off(&(round + 1));
        self.early = self.early.split_off(&(round + 1));
        self.latest_round = self.latest_round.max(round);
        self.iss.reset_to(round);
    }
}

impl std::fmt::Debug for SignatureCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureCollector")
            .field("pending", &self.pending.keys().collect::<Vec<_>>())
            .field("early", &self.early.keys().collect::<Vec<_>>())
            .field("latest_round", &self.latest_round)
            .finish()
    }
}
