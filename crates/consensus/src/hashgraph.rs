//! Virtual voting over the event DAG, following the Swirlds hashgraph
//! algorithm with weighted members.
//!
//! Every event carries a `last_seen` vector: for each member, the highest
//! generation among that member's events in the ancestry. Because a member's
//! own events form a single self-parent chain, `x` sees `y` exactly when
//! `x.last_seen[creator(y)] >= generation(y)`. Strongly seeing is derived from
//! the same vector by looking up, for each member, the newest event of that
//! member known to `x`.
//!
//! Rounds are decided strictly in order. A witness arriving for a round that
//! is already decided can never be famous.
//!
//! After [`ConsensusAlgorithm::restore`] the graph starts empty at a snapshot
//! round. The snapshot judges become the only witnesses of that round, events
//! that do not descend from them get no round, and events every judge sees
//! are taken as already ordered.

use crate::config::{ConsensusConfig, EventWindowConfig};
use crate::error::{ConsensusError, Result};
use crate::window::EventWindowManager;
use hashweave_types::{
    AddressBook, ConsensusEvent, ConsensusRound, ConsensusSnapshot, Event, EventWindow, Hash, NodeId,
    RunningEventHash, Threshold, Timestamp, GENESIS_ROUND,
};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, trace};

/// Below every real round. Events that cannot be placed relative to a
/// restored snapshot get this round and are never witnesses.
const NO_ROUND: u64 = GENESIS_ROUND - 1;

/// Where consensus resumes after a signed state was adopted.
#[derive(Debug, Clone)]
pub struct RestorePoint {
    pub snapshot: ConsensusSnapshot,
    pub event_window: EventWindow,
    pub running_event_hash: RunningEventHash,
    pub consensus_event_count: u64,
}

/// Seam between the DAG and the ordering algorithm.
pub trait ConsensusAlgorithm: Send + std::fmt::Debug {
    /// Add an event whose parents, if not ancient, were added before it.
    /// Returns every round that reached consensus as a result.
    fn add_event(&mut self, event: Arc<Event>) -> Result<Vec<ConsensusRound>>;

    /// Forget events that became ancient.
    fn set_window(&mut self, window: &EventWindow);

    fn window(&self) -> EventWindow;

    /// Highest round created so far.
    fn max_round(&self) -> u64;

    /// Drop every event and resume right after `point.snapshot.round`.
    fn restore(&mut self, point: &RestorePoint);
}

#[derive(Debug)]
struct Node {
    event: Arc<Event>,
    creator: usize,
    self_parent: Option<Hash>,
    round: u64,
    witness: bool,
    famous: Option<bool>,
    last_seen: Vec<Option<u64>>,
    consensus: bool,
}

#[derive(Debug)]
struct Resumed {
    round: u64,
    judges: HashSet<Hash>,
    /// Cleared once the first round after the snapshot is finalized.
    skip_ordered: bool,
}

#[derive(Debug, Default)]
struct RoundInfo {
    /// Ordered by (creator index, hash).
    witnesses: Vec<(usize, Hash)>,
    decided: bool,
}

pub struct Hashgraph {
    config: ConsensusConfig,
    weights: Vec<u64>,
    member_ids: Vec<NodeId>,
    member_index: HashMap<NodeId, usize>,
    total_weight: u64,

    nodes: HashMap<Hash, Node>,
    by_creator_generation: HashMap<(usize, u64), Hash>,
    rounds: BTreeMap<u64, RoundInfo>,
    votes: HashMap<(Hash, Hash), bool>,
    strongly_seen_cache: HashMap<Hash, Vec<Hash>>,
    pending: BTreeSet<(u64, Hash)>,
    next_undecided: u64,

    next_order: u64,
    last_timestamp: Option<Timestamp>,
    last_transaction_count: usize,
    last_by_creator: HashMap<NodeId, Timestamp>,
    running_hash: RunningEventHash,
    consensus_event_count: u64,
    window: EventWindowManager,
    resumed: Option<Resumed>,
}

impl Hashgraph {
    pub fn new(config: ConsensusConfig, window_config: EventWindowConfig, book: &AddressBook) -> Self {
        let member_ids: Vec<NodeId> = book.node_ids().collect();
        let weights = member_ids.iter().map(|id| book.weight(*id)).collect();
        let member_index = member_ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();
        Self {
            config,
            weights,
            member_ids,
            member_index,
            total_weight: book.total_weight(),
            nodes: HashMap::new(),
            by_creator_generation: HashMap::new(),
            rounds: BTreeMap::new(),
            votes: HashMap::new(),
            strongly_seen_cache: HashMap::new(),
            pending: BTreeSet::new(),
            next_undecided: GENESIS_ROUND,
            next_order: 0,
            last_timestamp: None,
            last_transaction_count: 0,
            last_by_creator: HashMap::new(),
            running_hash: RunningEventHash::default(),
            consensus_event_count: 0,
            window: EventWindowManager::new(window_config),
            resumed: None,
        }
    }

    pub fn round_of(&self, hash: &Hash) -> Option<u64> {
        self.nodes.get(hash).map(|node| node.round)
    }

    pub fn is_witness(&self, hash: &Hash) -> bool {
        self.nodes.get(hash).map(|node| node.witness).unwrap_or(false)
    }

    pub fn is_famous(&self, hash: &Hash) -> Option<bool> {
        self.nodes.get(hash).and_then(|node| node.famous)
    }

    /// Oldest round whose fame is not decided yet.
    pub fn next_undecided_round(&self) -> u64 {
        self.next_undecided
    }

    pub fn running_hash(&self) -> RunningEventHash {
        self.running_hash
    }

    fn is_supermajority(&self, weight: u64) -> bool {
        Threshold::SuperMajority.is_satisfied_by(weight, self.total_weight)
    }

    fn sees(&self, x: &Node, y: &Node) -> bool {
        x.last_seen[y.creator].is_some_and(|generation| generation >= y.event.generation())
    }

    fn strongly_sees(&self, x: &Node, y: &Node) -> bool {
        let mut weight = 0u64;
        for (member, last) in x.last_seen.iter().enumerate() {
            let Some(generation) = last else {
                continue;
            };
            let Some(hash) = self.by_creator_generation.get(&(member, *generation)) else {
                continue;
            };
            let Some(intermediate) = self.nodes.get(hash) else {
                continue;
            };
            if self.sees(intermediate, y) {
                weight += self.weights[member];
            }
        }
        self.is_supermajority(weight)
    }

    /// Witnesses of `round` strongly seen by `x`, in witness order.
    fn strongly_seen_witnesses(&mut self, x: &Hash, round: u64) -> Vec<Hash> {
        if let Some(cached) = self.strongly_seen_cache.get(x) {
            return cached.clone();
        }
        let Some(node) = self.nodes.get(x) else {
            return Vec::new();
        };
        let seen: Vec<Hash> = self
            .rounds
            .get(&round)
            .map(|info| {
                info.witnesses
                    .iter()
                    .filter_map(|(_, w)| self.nodes.get(w))
                    .filter(|w| self.strongly_sees(node, w))
                    .map(|w| w.event.hash())
                    .collect()
            })
            .unwrap_or_default();
        self.strongly_seen_cache.insert(*x, seen.clone());
        seen
    }

    fn round_created(&self, node: &Node, parent_round: u64) -> u64 {
        let Some(info) = self.rounds.get(&parent_round) else {
            return parent_round;
        };
        let mut creators = HashSet::new();
        let mut weight = 0u64;
        for (creator, hash) in &info.witnesses {
            let Some(witness) = self.nodes.get(hash) else {
                continue;
            };
            if !creators.contains(creator) && self.strongly_sees(node, witness) {
                creators.insert(*creator);
                weight += self.weights[*creator];
            }
        }
        if self.is_supermajority(weight) {
            parent_round + 1
        } else {
            parent_round
        }
    }

    fn coin_bit(event: &Event) -> bool {
        let signature = event.signature();
        signature
            .get(signature.len() / 2)
            .map(|byte| byte & 1 == 1)
            .unwrap_or(false)
    }

    /// Weight of strongly seen previous-round witnesses voting yes and no on `y`.
    fn tally(&mut self, x: &Hash, y: &Hash, voter_round: u64) -> (u64, u64) {
        let voters = self.strongly_seen_witnesses(x, voter_round);
        let (mut yes, mut no) = (0u64, 0u64);
        for voter in voters {
            let Some(weight) = self.nodes.get(&voter).map(|n| self.weights[n.creator]) else {
                continue;
            };
            if self.vote(&voter, y) {
                yes += weight;
            } else {
                no += weight;
            }
        }
        (yes, no)
    }

    fn vote(&mut self, x: &Hash, y: &Hash) -> bool {
        if let Some(vote) = self.votes.get(&(*x, *y)) {
            return *vote;
        }
        let (Some(xn), Some(yn)) = (self.nodes.get(x), self.nodes.get(y)) else {
            return false;
        };
        let (x_round, distance) = (xn.round, xn.round.saturating_sub(yn.round));
        let vote = if distance <= 1 {
            self.sees(xn, yn)
        } else {
            let coin = distance % self.config.coin_round_frequency.max(2) == 0;
            let coin_bit = Self::coin_bit(&xn.event);
            let (yes, no) = self.tally(x, y, x_round - 1);
            if coin {
                if self.is_supermajority(yes) {
                    true
                } else if self.is_supermajority(no) {
                    false
                } else {
                    coin_bit
                }
            } else {
                yes >= no
            }
        };
        self.votes.insert((*x, *y), vote);
        vote
    }

    /// Try to decide the fame of `y`, a witness of `round`.
    fn decide_witness(&mut self, y: &Hash, round: u64) -> Option<bool> {
        let max_round = self.rounds.keys().next_back().copied().unwrap_or(round);
        for voter_round in (round + 2)..=max_round {
            let distance = voter_round - round;
            if distance % self.config.coin_round_frequency.max(2) == 0 {
                continue;
            }
            let deciders: Vec<Hash> = self
                .rounds
                .get(&voter_round)
                .map(|info| info.witnesses.iter().map(|(_, h)| *h).collect())
                .unwrap_or_default();
            for x in deciders {
                let (yes, no) = self.tally(&x, y, voter_round - 1);
                if self.is_supermajority(yes) {
                    return Some(true);
                }
                if self.is_supermajority(no) {
                    return Some(false);
                }
            }
        }
        None
    }

    fn decide_rounds(&mut self) -> Result<Vec<ConsensusRound>> {
        let mut decided = Vec::new();
        loop {
            let round = self.next_undecided;
            let witnesses: Vec<Hash> = match self.rounds.get(&round) {
                Some(info) if !info.witnesses.is_empty() => {
                    info.witnesses.iter().map(|(_, h)| *h).collect()
                }
                _ => break,
            };
            let mut all_decided = true;
            for y in &witnesses {
                if self.nodes.get(y).and_then(|n| n.famous).is_some() {
                    continue;
                }
                match self.decide_witness(y, round) {
                    Some(famous) => {
                        if let Some(node) = self.nodes.get_mut(y) {
                            node.famous = Some(famous);
                        }
                    }
                    None => all_decided = false,
                }
            }
            if !all_decided {
                break;
            }
            if let Some(info) = self.rounds.get_mut(&round) {
                info.decided = true;
            }
            self.next_undecided = round + 1;
            debug!(target = "consensus", round, "round fame decided");
            if let Some(consensus_round) = self.finalize_round(round, &witnesses)? {
                decided.push(consensus_round);
            }
        }
        Ok(decided)
    }

    /// Earliest self-ancestor of `judge` that sees `event`.
    fn first_seen_timestamp(&self, judge: &Node, event: &Node) -> Timestamp {
        let mut earliest = judge.event.time_created();
        let mut current = judge;
        while let Some(parent) = current.self_parent.as_ref().and_then(|h| self.nodes.get(h)) {
            if !self.sees(parent, event) {
                break;
            }
            earliest = parent.event.time_created();
            current = parent;
        }
        earliest
    }

    fn finalize_round(&mut self, round: u64, witnesses: &[Hash]) -> Result<Option<ConsensusRound>> {
        let judges: Vec<Hash> = witnesses
            .iter()
            .filter(|h| self.nodes.get(*h).and_then(|n| n.famous) == Some(true))
            .copied()
            .collect();
        if judges.is_empty() {
            tracing::warn!(target = "consensus", round, "round decided without famous witnesses");
            return Ok(None);
        }
        let whitening = judges.iter().fold(Hash::ZERO, |acc, judge| acc.xor(judge));
        let min_judge_generation = judges
            .iter()
            .filter_map(|h| self.nodes.get(h))
            .map(|n| n.event.generation())
            .min()
            .unwrap_or(0);

        self.skip_ordered_before_snapshot();
        let mut received: Vec<(Timestamp, u64, Hash, Hash)> = Vec::new();
        for (_, hash) in &self.pending {
            let Some(event) = self.nodes.get(hash) else {
                continue;
            };
            let judge_nodes: Vec<&Node> = judges.iter().filter_map(|j| self.nodes.get(j)).collect();
            if !judge_nodes.iter().all(|judge| self.sees(judge, event)) {
                continue;
            }
            let mut times: Vec<Timestamp> = judge_nodes
                .iter()
                .map(|judge| self.first_seen_timestamp(judge, event))
                .collect();
            times.sort();
            let median = times[times.len() / 2];
            received.push((median, event.event.generation(), hash.xor(&whitening), *hash));
        }
        received.sort();

        let mut events = Vec::with_capacity(received.len());
        for (median, _, _, hash) in received {
            let event = self.mark_consensus(&hash)?;
            let timestamp = self.consensus_timestamp(&event, median)?;
            self.running_hash.absorb(&hash);
            self.consensus_event_count += 1;
            events.push(ConsensusEvent {
                event,
                round_received: round,
                consensus_order: self.next_order,
                consensus_timestamp: timestamp,
            });
            self.next_order += 1;
        }

        let event_window = self.window.advance(round, min_judge_generation);
        let mut creator_timestamps: Vec<(NodeId, Timestamp)> =
            self.last_by_creator.iter().map(|(id, at)| (*id, *at)).collect();
        creator_timestamps.sort();
        let snapshot = ConsensusSnapshot {
            round,
            judges: judges.clone(),
            next_consensus_order: self.next_order,
            consensus_timestamp: self.last_timestamp.unwrap_or_default(),
            minimum_judge_generation: min_judge_generation,
            last_transaction_count: self.last_transaction_count as u64,
            creator_timestamps,
        };
        debug!(
            target = "consensus",
            round,
            events = events.len(),
            judges = judges.len(),
            "round reached consensus",
        );
        Ok(Some(ConsensusRound {
            round,
            events,
            judges,
            snapshot,
            event_window,
            running_event_hash: self.running_hash,
            consensus_event_count: self.consensus_event_count,
        }))
    }

    /// The first round finalized after a restore must not order events that
    /// reached consensus before the snapshot. Those are seen by every judge
    /// of the snapshot round.
    fn skip_ordered_before_snapshot(&mut self) {
        let Some(resumed) = self.resumed.as_mut() else {
            return;
        };
        if !std::mem::take(&mut resumed.skip_ordered) {
            return;
        }
        let judges: Vec<&Node> = resumed.judges.iter().filter_map(|j| self.nodes.get(j)).collect();
        if judges.is_empty() {
            return;
        }
        let ordered: Vec<(u64, Hash)> = self
            .pending
            .iter()
            .filter(|(_, hash)| {
                self.nodes
                    .get(hash)
                    .is_some_and(|event| judges.iter().all(|judge| self.sees(judge, event)))
            })
            .copied()
            .collect();
        for key in &ordered {
            self.pending.remove(key);
            if let Some(node) = self.nodes.get_mut(&key.1) {
                node.consensus = true;
            }
        }
        debug!(target = "consensus", skipped = ordered.len(), "events ordered before the snapshot");
    }

    fn mark_consensus(&mut self, hash: &Hash) -> Result<Arc<Event>> {
        let node = self
            .nodes
            .get_mut(hash)
            .ok_or_else(|| ConsensusError::InvariantViolation(format!("event {hash} vanished before ordering")))?;
        if node.consensus {
            return Err(ConsensusError::InvariantViolation(format!(
                "event {hash} received consensus twice"
            )));
        }
        node.consensus = true;
        let generation = node.event.generation();
        let event = node.event.clone();
        self.pending.remove(&(generation, *hash));
        Ok(event)
    }

    fn consensus_timestamp(&mut self, event: &Event, median: Timestamp) -> Result<Timestamp> {
        let mut timestamp = median;
        if let Some(previous) = self.last_timestamp {
            let step = self.last_transaction_count.max(1) as u64;
            timestamp = timestamp.max(previous.plus_nanos(step));
        }
        let increment = self.config.min_same_creator_increment.as_nanos() as u64;
        if let Some(previous) = self.last_by_creator.get(&event.creator()) {
            timestamp = timestamp.max(previous.plus_nanos(increment));
        }
        if let Some(previous) = self.last_timestamp {
            if timestamp <= previous {
                return Err(ConsensusError::InvariantViolation(format!(
                    "consensus timestamp {timestamp} does not follow {previous}"
                )));
            }
        }
        self.last_timestamp = Some(timestamp);
        self.last_transaction_count = event.transactions().len();
        self.last_by_creator.insert(event.creator(), timestamp);
        Ok(timestamp)
    }
}

impl ConsensusAlgorithm for Hashgraph {
    fn add_event(&mut self, event: Arc<Event>) -> Result<Vec<ConsensusRound>> {
        let hash = event.hash();
        if self.nodes.contains_key(&hash) {
            return Err(ConsensusError::DuplicateEvent(hash));
        }
        let creator = *self.member_index.get(&event.creator()).ok_or_else(|| {
            ConsensusError::InvariantViolation(format!("event {hash} from non-member {}", event.creator()))
        })?;

        let mut last_seen = vec![None; self.weights.len()];
        let mut parent_round = None;
        for parent in event.parents() {
            let Some(parent) = self.nodes.get(&parent.hash) else {
                continue;
            };
            for (slot, seen) in last_seen.iter_mut().zip(&parent.last_seen) {
                *slot = (*slot).max(*seen);
            }
            parent_round = parent_round.max(Some(parent.round));
        }
        last_seen[creator] = last_seen[creator].max(Some(event.generation()));
        let self_parent = event.self_parent().map(|p| p.hash).filter(|h| self.nodes.contains_key(h));
        let self_parent_round = self_parent.and_then(|h| self.nodes.get(&h)).map(|n| n.round);

        let generation = event.generation();
        self.nodes.insert(
            hash,
            Node {
                event,
                creator,
                self_parent,
                round: 0,
                witness: false,
                famous: None,
                last_seen,
                consensus: false,
            },
        );
        self.by_creator_generation.entry((creator, generation)).or_insert(hash);
        self.pending.insert((generation, hash));

        let anchor = self
            .resumed
            .as_ref()
            .filter(|resumed| resumed.judges.contains(&hash))
            .map(|resumed| resumed.round);
        let round = match (anchor, parent_round, self.nodes.get(&hash)) {
            (Some(anchor), _, _) => anchor,
            (None, Some(parent_round), Some(node)) if parent_round >= GENESIS_ROUND => {
                self.round_created(node, parent_round)
            }
            _ if self.resumed.is_some() => NO_ROUND,
            _ => GENESIS_ROUND,
        };
        let witness = anchor.is_some() || (round >= GENESIS_ROUND && self_parent_round.map_or(true, |r| round > r));
        let late = witness && round < self.next_undecided;
        if let Some(node) = self.nodes.get_mut(&hash) {
            node.round = round;
            node.witness = witness;
            if late {
                node.famous = Some(anchor.is_some());
            }
        }
        trace!(target = "consensus", event = %hash, round, witness, "event added");
        if !witness {
            return Ok(Vec::new());
        }
        let info = self.rounds.entry(round).or_default();
        let position = info
            .witnesses
            .binary_search(&(creator, hash))
            .unwrap_or_else(|p| p);
        info.witnesses.insert(position, (creator, hash));
        if late {
            return Ok(Vec::new());
        }
        self.decide_rounds()
    }

    fn set_window(&mut self, window: &EventWindow) {
        let ancient: Vec<Hash> = self
            .nodes
            .values()
            .filter(|node| window.is_ancient(&node.event.descriptor()))
            .map(|node| node.event.hash())
            .collect();
        if ancient.is_empty() {
            return;
        }
        for hash in &ancient {
            if let Some(node) = self.nodes.remove(hash) {
                self.pending.remove(&(node.event.generation(), *hash));
            }
        }
        let nodes = &self.nodes;
        self.by_creator_generation.retain(|_, hash| nodes.contains_key(hash));
        self.votes.retain(|(x, y), _| nodes.contains_key(x) && nodes.contains_key(y));
        self.strongly_seen_cache.retain(|hash, _| nodes.contains_key(hash));
        let next_undecided = self.next_undecided;
        self.rounds.retain(|round, info| {
            info.witnesses.retain(|(_, hash)| nodes.contains_key(hash));
            *round >= next_undecided || !info.witnesses.is_empty()
        });
        debug!(
            target = "consensus",
            removed = ancient.len(),
            remaining = self.nodes.len(),
            "pruned ancient events from hashgraph",
        );
    }

    fn window(&self) -> EventWindow {
        self.window.window()
    }

    fn max_round(&self) -> u64 {
        self.rounds.keys().next_back().copied().unwrap_or(GENESIS_ROUND)
    }

    fn restore(&mut self, point: &RestorePoint) {
        let snapshot = &point.snapshot;
        self.nodes.clear();
        self.by_creator_generation.clear();
        self.votes.clear();
        self.strongly_seen_cache.clear();
        self.pending.clear();
        self.rounds.clear();
        self.next_undecided = snapshot.round + 1;
        self.next_order = snapshot.next_consensus_order;
        self.last_timestamp = Some(snapshot.consensus_timestamp);
        self.last_transaction_count = snapshot.last_transaction_count as usize;
        self.last_by_creator = snapshot.creator_timestamps.iter().copied().collect();
        self.running_hash = point.running_event_hash;
        self.consensus_event_count = point.consensus_event_count;
        self.window = EventWindowManager::restore(
            self.window.config().clone(),
            point.event_window,
            snapshot.round,
            snapshot.minimum_judge_generation,
        );
        self.resumed = Some(Resumed {
            round: snapshot.round,
            judges: snapshot.judges.iter().copied().collect(),
            skip_ordered: true,
        });
        debug!(
            target = "consensus",
            round = snapshot.round,
            judges = snapshot.judges.len(),
            next_order = self.next_order,
            "restored consensus from snapshot",
        );
    }
}

impl std::fmt::Debug for Hashgraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hashgraph")
            .field("members", &self.member_ids.len())
            .field("events", &self.nodes.len())
            .field("pending", &self.pending.len())
            .field("next_undecided", &self.next_undecided)
            .field("next_order", &self.next_order)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Network;

    fn hashgraph(net: &Network) -> Hashgraph {
        Hashgraph::new(ConsensusConfig::default(), EventWindowConfig::default(), &net.book)
    }

    /// Round robin gossip: every member in turn creates an event on top of the
    /// previous member's latest event.
    fn gossip_rounds(net: &mut Network, graph: &mut Hashgraph, steps: usize) -> Vec<ConsensusRound> {
        let members = net.keys.len();
        let mut rounds = Vec::new();
        for step in 0..steps {
            let creator = step % members;
            let other = (step > 0).then(|| (step - 1) % members);
            let event = net.create(creator, other);
            rounds.extend(graph.add_event(Arc::new(event)).unwrap());
        }
        rounds
    }

    #[test]
    fn first_events_are_round_one_witnesses() {
        let mut net = Network::new(&[1, 1, 1, 1]);
        let mut graph = hashgraph(&net);
        let a = net.create(0, None);
        graph.add_event(Arc::new(a.clone())).unwrap();
        assert_eq!(graph.round_of(&a.hash()), Some(GENESIS_ROUND));
        assert!(graph.is_witness(&a.hash()));
        let b = net.create(0, None);
        graph.add_event(Arc::new(b.clone())).unwrap();
        assert!(!graph.is_witness(&b.hash()));
    }

    #[test]
    fn rounds_advance_and_reach_consensus() {
        let mut net = Network::new(&[1, 1, 1, 1]);
        let mut graph = hashgraph(&net);
        let rounds = gossip_rounds(&mut net, &mut graph, 120);
        assert!(graph.max_round() > 4);
        assert!(!rounds.is_empty());

        let mut order = 0;
        let mut last = Timestamp::EPOCH;
        for round in &rounds {
            for event in &round.events {
                assert_eq!(event.consensus_order, order);
                assert!(event.consensus_timestamp > last);
                order += 1;
                last = event.consensus_timestamp;
            }
        }
        assert!(order > 0);
    }

    #[test]
    fn rounds_are_decided_in_order() {
        let mut net = Network::new(&[3, 1, 1, 1]);
        let mut graph = hashgraph(&net);
        let rounds = gossip_rounds(&mut net, &mut graph, 150);
        let numbers: Vec<u64> = rounds.iter().map(|r| r.round).collect();
        let mut sorted = numbers.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(numbers, sorted);
        assert_eq!(graph.next_undecided_round(), numbers.last().unwrap() + 1);
    }

    #[test]
    fn late_witness_is_not_famous() {
        let mut net = Network::new(&[1, 1, 1, 1, 1]);
        let mut graph = Hashgraph::new(ConsensusConfig::default(), EventWindowConfig::default(), &net.book);
        // member 4 stays silent while the others reach consensus on round 1
        let members = 4;
        let mut step = 0;
        while graph.next_undecided_round() <= 2 {
            let creator = step % members;
            let other = (step > 0).then(|| (step - 1) % members);
            let event = net.create(creator, other);
            graph.add_event(Arc::new(event)).unwrap();
            step += 1;
            assert!(step < 500, "round 1 never decided");
        }
        let late = net.create(4, None);
        graph.add_event(Arc::new(late.clone())).unwrap();
        assert_eq!(graph.round_of(&late.hash()), Some(GENESIS_ROUND));
        assert_eq!(graph.is_famous(&late.hash()), Some(false));
    }
}
