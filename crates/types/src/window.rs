use crate::event::{EventDescriptor, FIRST_GENERATION, GENESIS_ROUND};
use serde::{Deserialize, Serialize};

/// Which event field decides whether an event is ancient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AncientMode {
    /// Legacy mode: compare generations against the minimum judge generation.
    GenerationThreshold,
    /// Compare birth rounds against `latest round - rounds non-ancient + 1`.
    #[default]
    BirthRoundThreshold,
}

impl AncientMode {
    /// The smallest possible threshold for this mode.
    pub fn genesis_threshold(&self) -> u64 {
        match self {
            AncientMode::GenerationThreshold => FIRST_GENERATION,
            AncientMode::BirthRoundThreshold => GENESIS_ROUND,
        }
    }

    /// Value compared against the thresholds for a given event.
    pub fn indicator(&self, descriptor: &EventDescriptor) -> u64 {
        match self {
            AncientMode::GenerationThreshold => descriptor.generation,
            AncientMode::BirthRoundThreshold => descriptor.birth_round,
        }
    }
}

/// Boundary between ancient and non-ancient events.
///
/// The window owns no events. It is a small copyable value produced by the
/// consensus engine after every round and read by intake, the orphan buffer,
/// gossip and the pruner. Thresholds never move backwards: [`EventWindow::advance`]
/// keeps the larger of the old and new value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventWindow {
    latest_consensus_round: u64,
    ancient_threshold: u64,
    expired_threshold: u64,
    mode: AncientMode,
}

impl EventWindow {
    pub fn genesis(mode: AncientMode) -> Self {
        let threshold = mode.genesis_threshold();
        Self {
            latest_consensus_round: 0,
            ancient_threshold: threshold,
            expired_threshold: threshold,
            mode,
        }
    }

    /// Build a window from raw values, e.g. when restoring from a signed state.
    pub fn new(
        latest_consensus_round: u64,
        ancient_threshold: u64,
        expired_threshold: u64,
        mode: AncientMode,
    ) -> Self {
        Self {
            latest_consensus_round,
            ancient_threshold,
            expired_threshold: expired_threshold.min(ancient_threshold),
            mode,
        }
    }

    pub fn latest_consensus_round(&self) -> u64 {
        self.latest_consensus_round
    }

    pub fn ancient_threshold(&self) -> u64 {
        self.ancient_threshold
    }

    pub fn expired_threshold(&self) -> u64 {
        self.expired_threshold
    }

    pub fn mode(&self) -> AncientMode {
        self.mode
    }

    pub fn indicator(&self, descriptor: &EventDescriptor) -> u64 {
        self.mode.indicator(descriptor)
    }

    pub fn is_ancient(&self, descriptor: &EventDescriptor) -> bool {
        self.indicator(descriptor) < self.ancient_threshold
    }

    /// Expired events may be forgotten entirely, descriptors included.
    pub fn is_expired(&self, descriptor: &EventDescriptor) -> bool {
        self.indicator(descriptor) < self.expired_threshold
    }

    /// Move the window forward. Values lower than the current ones are ignored.
    pub fn advance(&self, latest_consensus_round: u64, ancient_threshold: u64, expired_threshold: u64) -> Self {
        let ancient_threshold = self.ancient_threshold.max(ancient_threshold);
        Self {
            latest_consensus_round: self.latest_consensus_round.max(latest_consensus_round),
            ancient_threshold,
            expired_threshold: self
                .expired_threshold
                .max(expired_threshold)
                .min(ancient_threshold),
            mode: self.mode,
        }
    }
}

impl Default for EventWindow {
    fn default() -> Self {
        Self::genesis(AncientMode::default())
    }
}
