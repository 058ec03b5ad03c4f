//! Turns consensus rounds into signed states.
//!
//! Every round is applied to the ledger. At checkpoint rounds a signed state
//! is created from the ledger tree and signed with the node's key; the
//! signature goes back into gossip as a system transaction. Signatures that
//! reach consensus are collected until a state is complete.
//!
//! A state adopted through reconnect replaces the ledger. Rounds up to the
//! adopted one are ignored from then on.

use crate::ledger::Ledger;
use anyhow::anyhow;
use hashweave_consensus::RestorePoint;
use hashweave_crypto::{KeyPair, SignatureVerifier};
use hashweave_network::StateSignatureResubmitter;
use hashweave_state::{
    IssKind, IssNotification, ReservedSignedState, Result, SignatureCollector, SignedState, SignedStateNexus,
    SignedStateParams, StateConfig,
};
use hashweave_types::{AddressBook, ConsensusRound, Event, EventTransaction, NodeId, StateSignatureTransaction};
use std::sync::Arc;
use tracing::{debug, info};

/// What handling one round produced.
#[derive(Debug, Default)]
pub struct RoundOutcome {
    /// Our signature on the state created for this round.
    pub own_signature: Option<EventTransaction>,
    /// States that became complete.
    pub completed: Vec<ReservedSignedState>,
    /// Rounds whose signed state hashes were found inconsistent.
    pub iss: Vec<IssNotification>,
}

pub struct Checkpointer {
    keys: KeyPair,
    ledger: Ledger,
    collector: SignatureCollector,
    resubmitter: StateSignatureResubmitter,
    config: StateConfig,
    latest_round: u64,
    adopted_round: Option<u64>,
}

impl Checkpointer {
    pub fn new(
        self_id: NodeId,
        keys: KeyPair,
        book: Arc<AddressBook>,
        verifier: Arc<dyn SignatureVerifier>,
        nexus: Arc<SignedStateNexus>,
        config: StateConfig,
        signature_max_age: u64,
    ) -> Self {
        Self {
            keys,
            ledger: Ledger::new(),
            collector: SignatureCollector::new(book, verifier, nexus, config.max_pending_rounds),
            resubmitter: StateSignatureResubmitter::new(self_id, signature_max_age),
            config,
            latest_round: 0,
            adopted_round: None,
        }
    }

    pub fn latest_round(&self) -> u64 {
        self.latest_round
    }

    pub fn handle_round(&mut self, round: &ConsensusRound) -> Result<RoundOutcome> {
        if self.adopted_round.is_some_and(|adopted| round.round <= adopted) {
            debug!(target = "checkpoint", round = round.round, "skipping round covered by the adopted state");
            return Ok(RoundOutcome::default());
        }
        self.latest_round = self.latest_round.max(round.round);
        self.ledger.apply(round);
        let mut outcome = RoundOutcome {
            own_signature: None,
            completed: self.collector.handle_round(round),
            iss: Vec::new(),
        };
        if !self.config.is_checkpoint(round.round) {
            outcome.iss = self.collector.take_iss_notifications();
            return Ok(outcome);
        }

        let tree = Arc::new(self.ledger.tree(round, self.config.tree_fanout)?);
        let state = SignedState::new(SignedStateParams {
            round: round.round,
            tree,
            running_event_hash: round.running_event_hash,
            consensus_timestamp: round.last_timestamp(),
            consensus_event_count: round.consensus_event_count,
            event_window: round.event_window,
            epoch_hash: None,
            snapshot: Some(round.snapshot.clone()),
        });
        let root = state.root_hash();
        debug!(target = "checkpoint", round = round.round, %root, "created signed state");
        outcome.own_signature = Some(EventTransaction::StateSignature(StateSignatureTransaction {
            round: round.round,
            state_hash: root,
            signature: self.keys.sign_hash(&root),
        }));
        if let Some(reserved) = state.try_reserve("signature collector") {
            outcome.completed.extend(self.collector.add_state(reserved));
        }
        outcome.iss = self.collector.take_iss_notifications();
        for state in &outcome.completed {
            info!(
                target = "checkpoint",
                round = state.round(),
                weight = state.signing_weight(),
                "state finalized"
            );
        }
        Ok(outcome)
    }

    /// Continue from a state adopted from a peer. Returns where consensus has
    /// to resume.
    pub fn adopt(&mut self, state: &SignedState) -> anyhow::Result<RestorePoint> {
        let round = state.round();
        let snapshot = state
            .snapshot()
            .ok_or_else(|| anyhow!("adopted state of round {round} carries no consensus snapshot"))?;
        let tree = state
            .tree()
            .ok_or_else(|| anyhow!("adopted state of round {round} was destroyed"))?;
        self.ledger = Ledger::from_tree(&tree, snapshot)?;
        self.collector.reset_to(round);
        self.latest_round = self.latest_round.max(round);
        self.adopted_round = Some(round);
        info!(target = "checkpoint", round, "ledger rebuilt from adopted state");
        Ok(RestorePoint {
            snapshot: snapshot.clone(),
            event_window: state.event_window(),
            running_event_hash: state.running_event_hash(),
            consensus_event_count: state.consensus_event_count(),
        })
    }

    /// Whether `notification` has to stop the node.
    pub fn is_fatal(&self, notification: &IssNotification) -> bool {
        notification.kind == IssKind::Catastrophic && self.config.halt_on_catastrophic_iss
    }

    /// State signatures to put back into gossip after `stale` became ancient.
    pub fn handle_stale(&self, stale: &Event) -> Vec<EventTransaction> {
        self.resubmitter.resubmit(stale, self.latest_round)
    }

    pub fn pending_rounds(&self) -> Vec<u64> {
        self.collector.pending_rounds()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hashweave_crypto::Ed25519Verifier;
    use hashweave_types::{
        Address, AncientMode, ConsensusEvent, ConsensusSnapshot, EventWindow, RunningEventHash, Timestamp,
        UnsignedEvent,
    };

    fn members() -> (Arc<AddressBook>, Vec<KeyPair>) {
        let keys: Vec<KeyPair> = (0..4u8).map(|i| KeyPair::from_seed([i + 41; 32])).collect();
        let book = AddressBook::new(keys.iter().enumerate().map(|(i, key)| Address {
            node_id: NodeId(i as u64),
            weight: 10,
            public_key: key.public_key(),
            endpoint: None,
        }))
        .unwrap();
        (Arc::new(book), keys)
    }

    fn round(number: u64, events: Vec<Event>) -> ConsensusRound {
        let mut running = RunningEventHash::default();
        let events: Vec<ConsensusEvent> = events
            .into_iter()
            .enumerate()
            .map(|(i, event)| {
                running.absorb(&event.hash());
                ConsensusEvent {
                    event: Arc::new(event),
                    round_received: number,
                    consensus_order: i as u64,
                    consensus_timestamp: Timestamp::from_millis(number * 100 + i as u64),
                }
            })
            .collect();
        ConsensusRound {
            round: number,
            consensus_event_count: events.len() as u64,
            judges: Vec::new(),
            snapshot: ConsensusSnapshot {
                round: number,
                judges: Vec::new(),
                next_consensus_order: events.len() as u64,
                consensus_timestamp: Timestamp::from_millis(number * 100),
                minimum_judge_generation: 0,
                last_transaction_count: 0,
                creator_timestamps: Vec::new(),
            },
            event_window: EventWindow::genesis(AncientMode::BirthRoundThreshold),
            running_event_hash: running,
            events,
        }
    }

    fn event(keys: &[KeyPair], creator: usize, transactions: Vec<EventTransaction>) -> Event {
        let unsigned = UnsignedEvent::new(
            NodeId(creator as u64),
            None,
            None,
            1,
            Timestamp::from_millis(creator as u64 + 1),
            transactions,
        );
        keys[creator].sign_event(unsigned).into_hashed()
    }

    fn checkpointers(book: &Arc<AddressBook>, keys: &[KeyPair]) -> Vec<(Checkpointer, Arc<SignedStateNexus>)> {
        keys.iter()
            .enumerate()
            .map(|(i, key)| {
                let nexus = Arc::new(SignedStateNexus::new());
                let checkpointer = Checkpointer::new(
                    NodeId(i as u64),
                    key.clone(),
                    book.clone(),
                    Arc::new(Ed25519Verifier),
                    nexus.clone(),
                    StateConfig::default(),
                    5,
                );
                (checkpointer, nexus)
            })
            .collect()
    }

    #[test]
    fn nodes_agree_and_finalize_from_gossiped_signatures() {
        let (book, keys) = members();
        let mut nodes = checkpointers(&book, &keys);
        let first = round(
            1,
            vec![
                event(&keys, 0, vec![EventTransaction::application(b"pay 5".to_vec())]),
                event(&keys, 2, vec![EventTransaction::application(b"pay 7".to_vec())]),
            ],
        );

        let signatures: Vec<EventTransaction> = nodes
            .iter_mut()
            .map(|(node, _)| {
                let outcome = node.handle_round(&first).unwrap();
                assert!(outcome.completed.is_empty());
                outcome.own_signature.unwrap()
            })
            .collect();
        let hashes: Vec<_> = signatures
            .iter()
            .map(|tx| tx.as_state_signature().unwrap().state_hash)
            .collect();
        assert!(hashes.windows(2).all(|pair| pair[0] == pair[1]));

        // Three of four signatures reach consensus in round 2.
        let second = round(
            2,
            (0..3).map(|i| event(&keys, i, vec![signatures[i].clone()])).collect(),
        );
        for (node, nexus) in &mut nodes {
            let outcome = node.handle_round(&second).unwrap();
            assert_eq!(outcome.completed.len(), 1);
            assert_eq!(outcome.completed[0].round(), 1);
            assert_eq!(outcome.completed[0].root_hash(), hashes[0]);
            assert_eq!(nexus.round(), Some(1));
            assert_eq!(node.pending_rounds(), vec![2]);
        }
    }

    #[test]
    fn ledger_counts_application_transactions_only() {
        let (book, keys) = members();
        let mut nodes = checkpointers(&book, &keys);
        let (node, _) = &mut nodes[0];
        let signature = EventTransaction::StateSignature(StateSignatureTransaction {
            round: 9,
            state_hash: hashweave_types::Hash::digest(b"x"),
            signature: vec![0; 64],
        });
        let r = round(
            1,
            vec![event(
                &keys,
                1,
                vec![EventTransaction::application(b"a".to_vec()), signature],
            )],
        );
        node.handle_round(&r).unwrap();
        assert_eq!(node.ledger.transactions_of(NodeId(1)), 1);
        assert_eq!(node.ledger.transactions_of(NodeId(0)), 0);
    }

    #[test]
    fn stale_self_signatures_are_resubmitted() {
        let (book, keys) = members();
        let mut nodes = checkpointers(&book, &keys);
        let (node, _) = &mut nodes[0];
        let first = round(1, Vec::new());
        let signature = node.handle_round(&first).unwrap().own_signature.unwrap();
        let stale = event(&keys, 0, vec![signature.clone()]);
        assert_eq!(node.handle_stale(&stale), vec![signature]);

        for number in 2..=7 {
            node.handle_round(&round(number, Vec::new())).unwrap();
        }
        assert!(node.handle_stale(&stale).is_empty());
    }

    fn pay(keys: &[KeyPair], creator: usize, what: &[u8]) -> Event {
        event(keys, creator, vec![EventTransaction::application(what.to_vec())])
    }

    #[test]
    fn diverging_ledger_is_reported_as_a_self_iss() {
        let (book, keys) = members();
        let mut nodes = checkpointers(&book, &keys);
        let honest = round(1, vec![pay(&keys, 0, b"pay 5")]);
        let diverged = round(1, vec![pay(&keys, 0, b"pay 6")]);
        let signatures: Vec<EventTransaction> = nodes
            .iter_mut()
            .enumerate()
            .map(|(i, (node, _))| {
                let first = if i == 0 { &diverged } else { &honest };
                node.handle_round(first).unwrap().own_signature.unwrap()
            })
            .collect();

        let second = round(
            2,
            (1..4).map(|i| event(&keys, i, vec![signatures[i].clone()])).collect(),
        );
        let outcome = nodes[0].0.handle_round(&second).unwrap();
        assert!(outcome.completed.is_empty());
        assert_eq!(outcome.iss.len(), 1);
        assert_eq!(outcome.iss[0].round, 1);
        assert_eq!(outcome.iss[0].kind, IssKind::SelfIss);
        assert!(!nodes[0].0.is_fatal(&outcome.iss[0]));

        let healthy = nodes[1].0.handle_round(&second).unwrap();
        assert!(healthy.iss.is_empty());
        assert_eq!(healthy.completed.len(), 1);
    }

    #[test]
    fn three_way_split_is_catastrophic_and_halts_when_configured() {
        let (book, keys) = members();
        let mut nodes = checkpointers(&book, &keys);
        let config = StateConfig {
            halt_on_catastrophic_iss: true,
            ..StateConfig::default()
        };
        let nexus = Arc::new(SignedStateNexus::new());
        nodes[0].0 = Checkpointer::new(NodeId(0), keys[0].clone(), book.clone(), Arc::new(Ed25519Verifier), nexus, config, 5);

        let signatures: Vec<EventTransaction> = nodes
            .iter_mut()
            .take(3)
            .enumerate()
            .map(|(i, (node, _))| {
                let first = round(1, vec![pay(&keys, 0, format!("pay {i}").as_bytes())]);
                node.handle_round(&first).unwrap().own_signature.unwrap()
            })
            .collect();
        let second = round(
            2,
            (0..3).map(|i| event(&keys, i, vec![signatures[i].clone()])).collect(),
        );
        let outcome = nodes[0].0.handle_round(&second).unwrap();
        assert_eq!(outcome.iss.len(), 1);
        assert_eq!(outcome.iss[0].kind, IssKind::Catastrophic);
        assert!(nodes[0].0.is_fatal(&outcome.iss[0]));
        assert!(!nodes[1].0.is_fatal(&outcome.iss[0]));
    }

    /// The state node 0 would create for `round`, with every other node's
    /// signature on it.
    fn state_of(node: &Checkpointer, round: &ConsensusRound, keys: &[KeyPair], book: &AddressBook) -> Arc<SignedState> {
        let state = SignedState::new(SignedStateParams {
            round: round.round,
            tree: Arc::new(node.ledger.tree(round, node.config.tree_fanout).unwrap()),
            running_event_hash: round.running_event_hash,
            consensus_timestamp: round.last_timestamp(),
            consensus_event_count: round.consensus_event_count,
            event_window: round.event_window,
            epoch_hash: None,
            snapshot: Some(round.snapshot.clone()),
        });
        for (i, key) in keys.iter().enumerate() {
            state.add_signature(&Ed25519Verifier, book, NodeId(i as u64), &key.sign_hash(&state.root_hash()));
        }
        state
    }

    #[test]
    fn adopted_state_replaces_the_ledger_and_skips_covered_rounds() {
        let (book, keys) = members();
        let mut nodes = checkpointers(&book, &keys);
        let first = round(1, vec![pay(&keys, 0, b"pay 5"), pay(&keys, 3, b"pay 1")]);
        let second = round(2, vec![pay(&keys, 2, b"pay 7")]);
        let third = round(3, vec![pay(&keys, 1, b"pay 9")]);

        nodes[0].0.handle_round(&first).unwrap();
        nodes[0].0.handle_round(&second).unwrap();
        let adopted = state_of(&nodes[0].0, &second, &keys, &book);

        let (learner, _) = &mut nodes[1];
        let point = learner.adopt(&adopted).unwrap();
        assert_eq!(point.snapshot, second.snapshot);
        assert_eq!(point.consensus_event_count, second.consensus_event_count);
        assert_eq!(learner.ledger.transactions_of(NodeId(0)), 1);
        assert_eq!(learner.ledger.transactions_of(NodeId(2)), 1);
        assert_eq!(learner.latest_round(), 2);

        let skipped = learner.handle_round(&second).unwrap();
        assert!(skipped.own_signature.is_none());
        assert_eq!(learner.ledger.transactions_of(NodeId(2)), 1);

        let ours = learner.handle_round(&third).unwrap().own_signature.unwrap();
        let theirs = nodes[0].0.handle_round(&third).unwrap().own_signature.unwrap();
        assert_eq!(
            ours.as_state_signature().unwrap().state_hash,
            theirs.as_state_signature().unwrap().state_hash
        );
    }

    #[test]
    fn adoption_refuses_a_snapshot_the_state_did_not_commit_to() {
        let (book, keys) = members();
        let mut nodes = checkpointers(&book, &keys);
        let first = round(1, vec![pay(&keys, 0, b"pay 5")]);
        nodes[0].0.handle_round(&first).unwrap();

        let mut forged = first.clone();
        forged.snapshot.next_consensus_order += 10;
        let tree = nodes[0].0.ledger.tree(&first, 8).unwrap();
        let state = SignedState::new(SignedStateParams {
            round: 1,
            tree: Arc::new(tree),
            running_event_hash: first.running_event_hash,
            consensus_timestamp: first.last_timestamp(),
            consensus_event_count: first.consensus_event_count,
            event_window: first.event_window,
            epoch_hash: None,
            snapshot: Some(forged.snapshot),
        });
        let err = nodes[1].0.adopt(&state).unwrap_err();
        assert!(format!("{err:#}").contains("not the one the state committed to"), "{err:#}");
        assert_eq!(nodes[1].0.latest_round(), 0);
    }
}
