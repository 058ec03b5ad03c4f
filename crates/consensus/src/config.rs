use hashweave_types::AncientMode;
use std::time::Duration;

/// Tunables of the virtual voting algorithm.
#[derive(Debug, Clone)]
pub struct ConsensusConfig {
    /// Every n-th voting round is a coin round.
    pub coin_round_frequency: u64,
    /// Minimum distance between consensus timestamps of two events by the
    /// same creator.
    pub min_same_creator_increment: Duration,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            coin_round_frequency: 12,
            min_same_creator_increment: Duration::from_micros(1),
        }
    }
}

/// Where event hashes are computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HashingMode {
    /// The gossip task hashes before handing the event over.
    GossipThread,
    /// The intake task hashes on arrival.
    #[default]
    IntakeThread,
}

#[derive(Debug, Clone)]
pub struct IntakeConfig {
    /// Capacity of the bounded channel feeding the engine.
    pub queue_capacity: usize,
    pub hashing_mode: HashingMode,
    /// Orphans waiting longer than this for their parents are dropped.
    pub orphan_timeout: Duration,
    /// How often the engine sweeps timed out orphans.
    pub orphan_sweep_interval: Duration,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10_000,
            hashing_mode: HashingMode::default(),
            orphan_timeout: Duration::from_secs(60),
            orphan_sweep_interval: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventWindowConfig {
    pub ancient_mode: AncientMode,
    /// Number of most recent consensus rounds whose events stay non-ancient.
    pub rounds_non_ancient: u64,
    /// Number of rounds after which even descriptors are forgotten.
    pub rounds_expired: u64,
}

impl Default for EventWindowConfig {
    fn default() -> Self {
        Self {
            ancient_mode: AncientMode::BirthRoundThreshold,
            rounds_non_ancient: 26,
            rounds_expired: 500,
        }
    }
}
