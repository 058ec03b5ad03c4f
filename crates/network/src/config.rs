use std::time::Duration;

/// Tunables of the gossip sync engine.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Concurrent syncs across all peers.
    pub sync_permits: usize,
    /// Concurrent syncs with a single peer.
    pub per_peer_permits: usize,
    /// Events queued in intake from one peer above which syncs with it stop.
    pub max_intake_backlog: usize,
    pub heartbeat_period: Duration,
    pub max_sync_duration: Duration,
    /// Minimum pause between two syncs with the same peer.
    pub sleep_after_sync: Duration,
    /// Events exchanged with a peer more recently than this are not sent again.
    pub duplicate_threshold: Duration,
    /// State signatures older than this many rounds are not resubmitted.
    pub state_signature_max_age: u64,
    /// Largest frame accepted from the wire.
    pub max_frame_bytes: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_permits: 17,
            per_peer_permits: 1,
            max_intake_backlog: 5_000,
            heartbeat_period: Duration::from_secs(1),
            max_sync_duration: Duration::from_secs(30),
            sleep_after_sync: Duration::from_millis(25),
            duplicate_threshold: Duration::from_secs(10),
            state_signature_max_age: 26,
            max_frame_bytes: 64 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NegotiatorConfig {
    /// Pause before reconnecting after a failed negotiation.
    pub sleep_after_failed_negotiation: Duration,
    /// Pause after a negotiation in which neither side wanted to run anything.
    pub idle_sleep: Duration,
}

impl Default for NegotiatorConfig {
    fn default() -> Self {
        Self {
            sleep_after_failed_negotiation: Duration::from_millis(250),
            idle_sleep: Duration::from_millis(10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Learners served at the same time by this node.
    pub max_concurrent_providers: usize,
    /// Minimum pause between two reconnects as a learner.
    pub min_interval: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_concurrent_providers: 1,
            min_interval: Duration::from_secs(10),
        }
    }
}
