use anyhow::{anyhow, bail, Context, Result};
use config::{Config, File as ConfigFile};
use hashweave_consensus::{ConsensusConfig, EventWindowConfig, HashingMode, IntakeConfig};
use hashweave_crypto::KeyPair;
use hashweave_network::{HealthCheckConfig, NegotiatorConfig, ReconnectConfig, SyncConfig};
use hashweave_state::StateConfig;
use hashweave_types::{Address, AddressBook, AncientMode, NodeId};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Everything a node needs to join the network, loaded from an optional
/// TOML file overlaid by `HASHWEAVE_*` environment variables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub node: NodeSection,
    pub members: Vec<MemberEntry>,
    pub sync: SyncSection,
    pub consensus: ConsensusSection,
    pub intake: IntakeSection,
    pub state: StateSection,
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSection {
    pub id: u64,
    /// Hex encoded 32 byte ed25519 seed.
    pub key_seed: String,
    pub listen: String,
    pub max_transactions_per_event: usize,
    /// Event creation period when this node has no peers.
    pub solo_event_period_ms: u64,
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            id: 0,
            key_seed: String::new(),
            listen: "127.0.0.1:40100".to_string(),
            max_transactions_per_event: 64,
            solo_event_period_ms: 100,
        }
    }
}

/// One address book entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberEntry {
    pub node_id: u64,
    pub weight: u64,
    /// Hex encoded ed25519 public key.
    pub public_key: String,
    #[serde(default)]
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSection {
    pub sync_permits: usize,
    pub per_peer_permits: usize,
    pub max_intake_backlog: usize,
    pub heartbeat_period_ms: u64,
    pub max_sync_duration_ms: u64,
    pub sleep_after_sync_ms: u64,
    pub sleep_after_failed_negotiation_ms: u64,
    pub duplicate_threshold_ms: u64,
    pub state_signature_max_age: u64,
    pub max_frame_bytes: u32,
    pub reconnect_interval_ms: u64,
}

impl Default for SyncSection {
    fn default() -> Self {
        let sync = SyncConfig::default();
        let negotiator = NegotiatorConfig::default();
        Self {
            sync_permits: sync.sync_permits,
            per_peer_permits: sync.per_peer_permits,
            max_intake_backlog: sync.max_intake_backlog,
            heartbeat_period_ms: millis(sync.heartbeat_period),
            max_sync_duration_ms: millis(sync.max_sync_duration),
            sleep_after_sync_ms: millis(sync.sleep_after_sync),
            sleep_after_failed_negotiation_ms: millis(negotiator.sleep_after_failed_negotiation),
            duplicate_threshold_ms: millis(sync.duplicate_threshold),
            state_signature_max_age: sync.state_signature_max_age,
            max_frame_bytes: sync.max_frame_bytes,
            reconnect_interval_ms: millis(ReconnectConfig::default().min_interval),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusSection {
    pub coin_round_frequency: u64,
    pub min_same_creator_increment_us: u64,
    pub ancient_mode: AncientMode,
    pub rounds_non_ancient: u64,
    pub rounds_expired: u64,
}

impl Default for ConsensusSection {
    fn default() -> Self {
        let consensus = ConsensusConfig::default();
        let window = EventWindowConfig::default();
        Self {
            coin_round_frequency: consensus.coin_round_frequency,
            min_same_creator_increment_us: consensus.min_same_creator_increment.as_micros() as u64,
            ancient_mode: window.ancient_mode,
            rounds_non_ancient: window.rounds_non_ancient,
            rounds_expired: window.rounds_expired,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashingSetting {
    Gossip,
    #[default]
    Intake,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntakeSection {
    pub queue_capacity: usize,
    pub orphan_timeout_ms: u64,
    pub hashing: HashingSetting,
}

impl Default for IntakeSection {
    fn default() -> Self {
        let intake = IntakeConfig::default();
        Self {
            queue_capacity: intake.queue_capacity,
            orphan_timeout_ms: millis(intake.orphan_timeout),
            hashing: HashingSetting::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateSection {
    pub signed_state_frequency: u64,
    pub max_pending_rounds: u64,
    pub tree_fanout: usize,
    pub saved_state_dir: PathBuf,
    pub halt_on_catastrophic_iss: bool,
}

impl Default for StateSection {
    fn default() -> Self {
        let state = StateConfig::default();
        Self {
            signed_state_frequency: state.signed_state_frequency,
            max_pending_rounds: state.max_pending_rounds,
            tree_fanout: state.tree_fanout,
            saved_state_dir: state.saved_state_dir,
            halt_on_catastrophic_iss: state.halt_on_catastrophic_iss,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: String,
    pub format: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

fn millis(duration: Duration) -> u64 {
    duration.as_millis() as u64
}

impl NodeConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            if !path.exists() {
                bail!("Configuration file {} not found (specified via --config)", path.display());
            }
            builder = builder.add_source(ConfigFile::from(path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("HASHWEAVE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );
        let config: NodeConfig = builder
            .build()?
            .try_deserialize()
            .context("invalid node configuration")?;
        Ok(config)
    }

    pub fn self_id(&self) -> NodeId {
        NodeId(self.node.id)
    }

    pub fn key_pair(&self) -> Result<KeyPair> {
        let mut seed = [0u8; 32];
        hex::decode_to_slice(self.node.key_seed.trim(), &mut seed)
            .context("node.key_seed must be 64 hex characters")?;
        Ok(KeyPair::from_seed(seed))
    }

    pub fn address_book(&self) -> Result<AddressBook> {
        let addresses = self
            .members
            .iter()
            .map(|member| {
                let mut public_key = [0u8; 32];
                hex::decode_to_slice(member.public_key.trim(), &mut public_key)
                    .with_context(|| format!("member {} has a malformed public key", member.node_id))?;
                Ok(Address {
                    node_id: NodeId(member.node_id),
                    weight: member.weight,
                    public_key,
                    endpoint: member.endpoint.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        AddressBook::new(addresses).map_err(|err| anyhow!("invalid address book: {err}"))
    }

    pub fn validate(&self) -> Result<()> {
        if self.members.is_empty() {
            bail!("the address book must list at least one member");
        }
        if self.node.listen.trim().is_empty() {
            bail!("node.listen must not be empty");
        }
        if self.sync.sync_permits == 0 || self.sync.per_peer_permits == 0 {
            bail!("sync permit counts must be greater than zero");
        }
        if self.state.signed_state_frequency == 0 {
            bail!("state.signed_state_frequency must be greater than zero");
        }
        if self.consensus.rounds_expired < self.consensus.rounds_non_ancient {
            bail!("consensus.rounds_expired must not be below consensus.rounds_non_ancient");
        }
        let book = self.address_book()?;
        let Some(own) = book.get(self.self_id()) else {
            bail!("node {} is not in the address book", self.node.id);
        };
        if own.public_key != self.key_pair()?.public_key() {
            bail!("node.key_seed does not match the public key of node {}", self.node.id);
        }
        Ok(())
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            sync_permits: self.sync.sync_permits,
            per_peer_permits: self.sync.per_peer_permits,
            max_intake_backlog: self.sync.max_intake_backlog,
            heartbeat_period: Duration::from_millis(self.sync.heartbeat_period_ms),
            max_sync_duration: Duration::from_millis(self.sync.max_sync_duration_ms),
            sleep_after_sync: Duration::from_millis(self.sync.sleep_after_sync_ms),
            duplicate_threshold: Duration::from_millis(self.sync.duplicate_threshold_ms),
            state_signature_max_age: self.sync.state_signature_max_age,
            max_frame_bytes: self.sync.max_frame_bytes,
        }
    }

    pub fn negotiator_config(&self) -> NegotiatorConfig {
        NegotiatorConfig {
            sleep_after_failed_negotiation: Duration::from_millis(self.sync.sleep_after_failed_negotiation_ms),
            ..NegotiatorConfig::default()
        }
    }

    pub fn reconnect_config(&self) -> ReconnectConfig {
        ReconnectConfig {
            min_interval: Duration::from_millis(self.sync.reconnect_interval_ms),
            ..ReconnectConfig::default()
        }
    }

    pub fn health_config(&self) -> HealthCheckConfig {
        HealthCheckConfig::default()
    }

    pub fn consensus_config(&self) -> ConsensusConfig {
        ConsensusConfig {
            coin_round_frequency: self.consensus.coin_round_frequency,
            min_same_creator_increment: Duration::from_micros(self.consensus.min_same_creator_increment_us),
        }
    }

    pub fn window_config(&self) -> EventWindowConfig {
        EventWindowConfig {
            ancient_mode: self.consensus.ancient_mode,
            rounds_non_ancient: self.consensus.rounds_non_ancient,
            rounds_expired: self.consensus.rounds_expired,
        }
    }

    pub fn intake_config(&self) -> IntakeConfig {
        IntakeConfig {
            queue_capacity: self.intake.queue_capacity,
            hashing_mode: match self.intake.hashing {
                HashingSetting::Gossip => HashingMode::GossipThread,
                HashingSetting::Intake => HashingMode::IntakeThread,
            },
            orphan_timeout: Duration::from_millis(self.intake.orphan_timeout_ms),
            ..IntakeConfig::default()
        }
    }

    pub fn state_config(&self) -> StateConfig {
        StateConfig {
            signed_state_frequency: self.state.signed_state_frequency,
            max_pending_rounds: self.state.max_pending_rounds,
            tree_fanout: self.state.tree_fanout,
            saved_state_dir: self.state.saved_state_dir.clone(),
            halt_on_catastrophic_iss: self.state.halt_on_catastrophic_iss,
        }
    }
}
