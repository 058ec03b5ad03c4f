//! Human readable metadata written next to every saved signed state.
//!
//! The file holds one `KEY: value` pair per line. Parsing is lenient: lines
//! that cannot be understood are logged and skipped, and fields that do not
//! appear are left empty.

use crate::error::Result;
use crate::signed_state::SignedState;
use hashweave_crypto::mnemonic;
use hashweave_types::{AddressBook, Hash, NodeId, Timestamp};
use std::fmt::Write as _;
use std::path::Path;
use std::str::FromStr;
use tracing::warn;

pub const METADATA_FILE_NAME: &str = "stateMetadata.txt";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SavedStateMetadata {
    pub round: Option<u64>,
    pub hash: Option<Hash>,
    pub hash_mnemonic: Option<String>,
    pub number_of_consensus_events: Option<u64>,
    pub consensus_timestamp: Option<Timestamp>,
    pub running_event_hash: Option<Hash>,
    pub running_event_hash_mnemonic: Option<String>,
    pub legacy_running_event_hash: Option<Hash>,
    pub minimum_generation_non_ancient: Option<u64>,
    pub software_version: Option<String>,
    pub wall_clock_time: Option<Timestamp>,
    pub node_id: Option<NodeId>,
    pub signing_nodes: Option<Vec<NodeId>>,
    pub signing_weight_sum: Option<u64>,
    pub total_weight: Option<u64>,
    pub epoch_hash: Option<Hash>,
    pub epoch_hash_mnemonic: Option<String>,
}

impl SavedStateMetadata {
    pub fn from_signed_state(
        state: &SignedState,
        self_id: NodeId,
        book: &AddressBook,
        software_version: &str,
        now: Timestamp,
    ) -> Self {
        let running = state.running_event_hash();
        Self {
            round: Some(state.round()),
            hash: Some(state.root_hash()),
            hash_mnemonic: Some(mnemonic(&state.root_hash())),
            number_of_consensus_events: Some(state.consensus_event_count()),
            consensus_timestamp: Some(state.consensus_timestamp()),
            running_event_hash: Some(running.current),
            running_event_hash_mnemonic: Some(mnemonic(&running.current)),
            legacy_running_event_hash: Some(running.legacy),
            minimum_generation_non_ancient: Some(state.event_window().ancient_threshold()),
            software_version: Some(software_version.to_string()),
            wall_clock_time: Some(now),
            node_id: Some(self_id),
            signing_nodes: Some(state.signing_nodes()),
            signing_weight_sum: Some(state.signing_weight()),
            total_weight: Some(book.total_weight()),
            epoch_hash: state.epoch_hash(),
            epoch_hash_mnemonic: state.epoch_hash().map(|h| mnemonic(&h)),
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let mut line = |key: &str, value: Option<String>| {
            if let Some(value) = value {
                let _ = writeln!(out, "{key}: {value}");
            }
        };
        line("ROUND", self.round.map(|v| v.to_string()));
        line("HASH", self.hash.map(|h| h.to_hex()));
        line("HASH_MNEMONIC", self.hash_mnemonic.clone());
        line(
            "NUMBER_OF_CONSENSUS_EVENTS",
            self.number_of_consensus_events.map(|v| v.to_string()),
        );
        line("CONSENSUS_TIMESTAMP", self.consensus_timestamp.map(|t| t.to_rfc3339()));
        line("RUNNING_EVENT_HASH", self.running_event_hash.map(|h| h.to_hex()));
        line(
            "RUNNING_EVENT_HASH_MNEMONIC",
            self.running_event_hash_mnemonic.clone(),
        );
        line(
            "LEGACY_RUNNING_EVENT_HASH",
            self.legacy_running_event_hash.map(|h| h.to_hex()),
        );
        line(
            "MINIMUM_GENERATION_NON_ANCIENT",
            self.minimum_generation_non_ancient.map(|v| v.to_string()),
        );
        line("SOFTWARE_VERSION", self.software_version.clone());
        line("WALL_CLOCK_TIME", self.wall_clock_time.map(|t| t.to_rfc3339()));
        line("NODE_ID", self.node_id.map(|n| n.to_string()));
        line(
            "SIGNING_NODES",
            self.signing_nodes.as_ref().map(|nodes| {
                nodes
                    .iter()
                    .map(|n| n.to_string())
                    .collect::<Vec<_>>()
                    .join(",")
            }),
        );
        line("SIGNING_WEIGHT_SUM", self.signing_weight_sum.map(|v| v.to_string()));
        line("TOTAL_WEIGHT", self.total_weight.map(|v| v.to_string()));
        line("EPOCH_HASH", self.epoch_hash.map(|h| h.to_hex()));
        line("EPOCH_HASH_MNEMONIC", self.epoch_hash_mnemonic.clone());
        out
    }

    pub fn parse(contents: &str) -> Self {
        let mut metadata = Self::default();
        for (index, raw) in contents.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }
            let Some((key, value)) = line.split_once(':') else {
                warn!(target = "state_metadata", line = index + 1, "malformed metadata line");
                continue;
            };
            let (key, value) = (key.trim(), value.trim());
            if let Err(reason) = metadata.apply(key, value) {
                warn!(target = "state_metadata", line = index + 1, key, %reason, "skipping metadata field");
            }
        }
        metadata
    }

    fn apply(&mut self, key: &str, value: &str) -> std::result::Result<(), String> {
        match key {
            "ROUND" => self.round = Some(number(value)?),
            "HASH" => self.hash = Some(hash(value)?),
            "HASH_MNEMONIC" => self.hash_mnemonic = Some(value.to_string()),
            "NUMBER_OF_CONSENSUS_EVENTS" => self.number_of_consensus_events = Some(number(value)?),
            "CONSENSUS_TIMESTAMP" => self.consensus_timestamp = Some(timestamp(value)?),
            "RUNNING_EVENT_HASH" => self.running_event_hash = Some(hash(value)?),
            "RUNNING_EVENT_HASH_MNEMONIC" => self.running_event_hash_mnemonic = Some(value.to_string()),
            "LEGACY_RUNNING_EVENT_HASH" => self.legacy_running_event_hash = Some(hash(value)?),
            "MINIMUM_GENERATION_NON_ANCIENT" => self.minimum_generation_non_ancient = Some(number(value)?),
            "SOFTWARE_VERSION" => self.software_version = Some(value.to_string()),
            "WALL_CLOCK_TIME" => self.wall_clock_time = Some(timestamp(value)?),
            "NODE_ID" => self.node_id = Some(NodeId(number(value)?)),
            "SIGNING_NODES" => {
                let nodes = value
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|s| number(s).map(NodeId))
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                self.signing_nodes = Some(nodes);
            }
            "SIGNING_WEIGHT_SUM" => self.signing_weight_sum = Some(number(value)?),
            "TOTAL_WEIGHT" => self.total_weight = Some(number(value)?),
            "EPOCH_HASH" => self.epoch_hash = Some(hash(value)?),
            "EPOCH_HASH_MNEMONIC" => self.epoch_hash_mnemonic = Some(value.to_string()),
            _ => return Err("unknown key".to_string()),
        }
        Ok(())
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.render())?;
        Ok(())
    }

    pub fn read(path: &Path) -> Result<Self> {
        Ok(Self::parse(&std::fs::read_to_string(path)?))
    }
}

fn number<T: FromStr>(value: &str) -> std::result::Result<T, String>
where
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| e.to_string())
}

fn hash(value: &str) -> std::result::Result<Hash, String> {
    Hash::from_hex(value).map_err(|e| e.to_string())
}

fn timestamp(value: &str) -> std::result::Result<Timestamp, String> {
    Timestamp::parse_rfc3339(value).map_err(|e| e.to_string())
}
