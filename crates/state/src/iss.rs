//! Detection of inconsistent state signatures (ISS).
//!
//! Each member signs the state hash it computed for a checkpoint round. Once
//! members holding a supermajority of weight signed the same hash, that hash
//! is the consensus hash for the round, and a node that computed anything
//! else has a self ISS. If the signatures already seen leave no hash able to
//! reach a supermajority, the ISS is catastrophic.

use hashweave_crypto::mnemonic;
use hashweave_types::{AddressBook, Hash, NodeId};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssKind {
    /// This node computed a hash other than the consensus hash.
    SelfIss,
    /// The consensus hash matches ours but some members signed another one.
    OtherIss,
    /// No hash can reach a supermajority for the round.
    Catastrophic,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssNotification {
    pub round: u64,
    pub kind: IssKind,
    pub self_hash: Option<Hash>,
    pub consensus_hash: Option<Hash>,
}

#[derive(Debug, Default)]
struct RoundHashes {
    self_hash: Option<Hash>,
    weight_by_hash: HashMap<Hash, u64>,
    signers: HashSet<NodeId>,
    reported_weight: u64,
    consensus_hash: Option<Hash>,
    decided: bool,
}

/// Tracks the hashes members signed per round and decides, once per round,
/// whether they agree.
#[derive(Debug)]
pub struct IssDetector {
    book: Arc<AddressBook>,
    rounds: BTreeMap<u64, RoundHashes>,
    max_rounds: u64,
    latest_round: u64,
    /// Rounds at or below this are never tracked again.
    floor: u64,
}

impl IssDetector {
    pub fn new(book: Arc<AddressBook>, max_rounds: u64) -> Self {
        Self {
            book,
            rounds: BTreeMap::new(),
            max_rounds: max_rounds.max(1),
            latest_round: 0,
            floor: 0,
        }
    }

    /// Record the hash this node computed for `round`.
    pub fn self_hash(&mut self, round: u64, hash: Hash) -> Option<IssNotification> {
        if round > self.latest_round {
            self.latest_round = round;
            self.expire();
        }
        let entry = self.track(round)?;
        entry.self_hash = Some(hash);
        self.evaluate(round)
    }

    /// Record the hash `signer` signed for `round`. A second report from the
    /// same signer is ignored.
    pub fn network_hash(&mut self, signer: NodeId, round: u64, hash: Hash) -> Option<IssNotification> {
        let weight = self.book.weight(signer);
        if weight == 0 {
            return None;
        }
        let entry = self.track(round)?;
        if !entry.signers.insert(signer) {
            return None;
        }
        *entry.weight_by_hash.entry(hash).or_default() += weight;
        entry.reported_weight += weight;
        self.evaluate(round)
    }

    /// Forget every round up to `round`, e.g. after adopting a state from a
    /// peer. Rounds skipped this way are not evidence of an ISS.
    pub fn reset_to(&mut self, round: u64) {
        self.rounds = self.rounds.split_off(&(round + 1));
        self.latest_round = self.latest_round.max(round);
        self.floor = self.floor.max(round);
    }

    pub fn tracked_rounds(&self) -> Vec<u64> {
        self.rounds.keys().copied().collect()
    }

    fn track(&mut self, round: u64) -> Option<&mut RoundHashes> {
        let oldest = self.latest_round.saturating_sub(self.max_rounds).max(self.floor);
        if round <= oldest || round > self.latest_round + self.max_rounds {
            return None;
        }
        Some(self.rounds.entry(round).or_default())
    }

    fn evaluate(&mut self, round: u64) -> Option<IssNotification> {
        let total = self.book.total_weight();
        let book = &self.book;
        let entry = self.rounds.get_mut(&round)?;
        if entry.decided {
            return None;
        }
        if entry.consensus_hash.is_none() {
            entry.consensus_hash = entry
                .weight_by_hash
                .iter()
                .find(|(_, weight)| book.is_supermajority(**weight))
                .map(|(hash, _)| *hash);
        }
        let Some(consensus_hash) = entry.consensus_hash else {
            let best = entry.weight_by_hash.values().copied().max().unwrap_or(0);
            let unreported = total.saturating_sub(entry.reported_weight);
            if book.is_supermajority(best + unreported) {
                return None;
            }
            entry.decided = true;
            let notification = IssNotification {
                round,
                kind: IssKind::Catastrophic,
                self_hash: entry.self_hash,
                consensus_hash: None,
            };
            error!(
                target = "iss",
                round,
                partitions = entry.weight_by_hash.len(),
                largest_weight = best,
                total_weight = total,
                "catastrophic ISS: no state hash can reach a supermajority"
            );
            return Some(notification);
        };
        let self_hash = entry.self_hash?;
        entry.decided = true;
        let kind = if self_hash != consensus_hash {
            error!(
                target = "iss",
                round,
                ours = %mnemonic(&self_hash),
                consensus = %mnemonic(&consensus_hash),
                "ISS: this node computed the wrong state hash"
            );
            IssKind::SelfIss
        } else if entry.weight_by_hash.len() > 1 {
            warn!(
                target = "iss",
                round,
                dissenting_weight = entry.reported_weight - entry.weight_by_hash[&consensus_hash],
                "members signed a state hash other than the consensus hash"
            );
            IssKind::OtherIss
        } else {
            return None;
        };
        Some(IssNotification {
            round,
            kind,
            self_hash: Some(self_hash),
            consensus_hash: Some(consensus_hash),
        })
    }

    fn expire(&mut self) {
        let oldest_kept = self.latest_round.saturating_sub(self.max_rounds) + 1;
        let kept = self.rounds.split_off(&oldest_kept);
        for (round, entry) in std::mem::replace(&mut self.rounds, kept) {
            if !entry.decided && entry.self_hash.is_some() {
                warn!(
                    target = "iss",
                    round,
                    reported_weight = entry.reported_weight,
                    total_weight = self.book.total_weight(),
                    "too few state signatures to check the round for an ISS"
                );
            }
        }
    }
}
