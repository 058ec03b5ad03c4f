use anyhow::{anyhow, ensure};
use hashweave_state::{MerkleNode, Result, StateTree};
use hashweave_types::{ConsensusRound, ConsensusSnapshot, Hash, NodeId};
use std::collections::BTreeMap;

const LEDGER_DOMAIN: &[u8] = b"hashweave/ledger/v1";
const HEADER_BYTES: usize = 88;
const TALLY_BYTES: usize = 48;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Tally {
    transactions: u64,
    digest: Hash,
}

/// Application state driven purely by consensus order: per creator, the
/// number of application transactions and a hash chain over their payloads.
/// Every node that sees the same rounds ends up with the same tree.
#[derive(Debug, Default)]
pub struct Ledger {
    tallies: BTreeMap<NodeId, Tally>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the ledger from the tree of an adopted state. The header leaf
    /// must commit to `snapshot`, so the snapshot is covered by the state
    /// signatures.
    pub fn from_tree(tree: &StateTree, snapshot: &ConsensusSnapshot) -> anyhow::Result<Self> {
        let mut payloads = tree.leaves().into_iter().map(move |index| match tree.node(index) {
            Some(MerkleNode::Leaf { payload }) => Ok(payload.as_slice()),
            _ => Err(anyhow!("state tree leaf {index} is missing")),
        });
        let header = payloads.next().ok_or_else(|| anyhow!("state tree has no header leaf"))??;
        ensure!(header.len() == HEADER_BYTES, "header leaf has {} bytes", header.len());
        ensure!(
            header[..8] == snapshot.round.to_be_bytes(),
            "header does not describe round {}",
            snapshot.round
        );
        ensure!(
            header[56..] == snapshot.digest().as_bytes()[..],
            "consensus snapshot of round {} is not the one the state committed to",
            snapshot.round
        );

        let mut tallies = BTreeMap::new();
        for payload in payloads {
            let leaf = payload?;
            ensure!(leaf.len() == TALLY_BYTES, "ledger leaf has {} bytes", leaf.len());
            let creator = NodeId(u64::from_be_bytes(leaf[..8].try_into()?));
            let transactions = u64::from_be_bytes(leaf[8..16].try_into()?);
            let digest = Hash(leaf[16..].try_into()?);
            tallies.insert(creator, Tally { transactions, digest });
        }
        Ok(Self { tallies })
    }

    pub fn apply(&mut self, round: &ConsensusRound) {
        for consensus_event in &round.events {
            let creator = consensus_event.event.creator();
            for tx in consensus_event.event.transactions().iter().filter(|tx| !tx.is_system()) {
                let tally = self.tallies.entry(creator).or_default();
                tally.transactions += 1;
                tally.digest = Hash::digest_parts(
                    LEDGER_DOMAIN,
                    &[&tally.digest.as_bytes()[..], &tx.payload_hash().as_bytes()[..]],
                );
            }
        }
    }

    pub fn transactions_of(&self, creator: NodeId) -> u64 {
        self.tallies.get(&creator).map_or(0, |tally| tally.transactions)
    }

    /// The state tree after `round` was applied. The first leaf describes
    /// the round and commits to its consensus snapshot, then one leaf per
    /// creator in id order.
    pub fn tree(&self, round: &ConsensusRound, fanout: usize) -> Result<StateTree> {
        let mut header = Vec::with_capacity(HEADER_BYTES);
        header.extend_from_slice(&round.round.to_be_bytes());
        header.extend_from_slice(&round.consensus_event_count.to_be_bytes());
        header.extend_from_slice(&round.last_timestamp().as_nanos().to_be_bytes());
        header.extend_from_slice(round.running_event_hash.current.as_bytes());
        header.extend_from_slice(round.snapshot.digest().as_bytes());
        let mut leaves = vec![header];
        for (creator, tally) in &self.tallies {
            let mut leaf = Vec::with_capacity(TALLY_BYTES);
            leaf.extend_from_slice(&creator.0.to_be_bytes());
            leaf.extend_from_slice(&tally.transactions.to_be_bytes());
            leaf.extend_from_slice(tally.digest.as_bytes());
            leaves.push(leaf);
        }
        StateTree::from_leaves(leaves, fanout)
    }
}
