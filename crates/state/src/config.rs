use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct StateConfig {
    /// A signed state is created for every n-th consensus round.
    pub signed_state_frequency: u64,
    /// Rounds an incomplete state waits for signatures before it is dropped.
    pub max_pending_rounds: u64,
    /// Children per internal node of the state tree.
    pub tree_fanout: usize,
    /// Directory receiving one subdirectory per saved round.
    pub saved_state_dir: PathBuf,
    /// Stop the node when no state hash can reach a supermajority.
    pub halt_on_catastrophic_iss: bool,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            signed_state_frequency: 1,
            max_pending_rounds: 26,
            tree_fanout: 8,
            saved_state_dir: PathBuf::from("data/saved"),
            halt_on_catastrophic_iss: false,
        }
    }
}

impl StateConfig {
    pub fn is_checkpoint(&self, round: u64) -> bool {
        round % self.signed_state_frequency.max(1) == 0
    }

    pub fn metadata_path(&self, round: u64) -> PathBuf {
        self.saved_state_dir
            .join(round.to_string())
            .join(crate::metadata::METADATA_FILE_NAME)
    }
}
