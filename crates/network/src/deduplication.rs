use hashweave_types::{Hash, NodeId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Remembers which events were recently exchanged with each peer, so a sync
/// does not send an event back to the peer it just came from.
///
/// Entries older than the threshold are forgotten; an event exchanged that
/// long ago is sent again if the peer still lacks it.
#[derive(Debug)]
pub struct PeerEventMemory {
    exchanged: RwLock<HashMap<NodeId, HashMap<Hash, Instant>>>,
    last_cleanup: RwLock<Instant>,
    threshold: Duration,
    max_per_peer: usize,
}

impl PeerEventMemory {
    pub fn new(threshold: Duration, max_per_peer: usize) -> Self {
        Self {
            exchanged: RwLock::new(HashMap::new()),
            last_cleanup: RwLock::new(Instant::now()),
            threshold,
            max_per_peer,
        }
    }

    /// Record that `event` was received from or sent to `peer`.
    pub fn record(&self, peer: NodeId, event: Hash, now: Instant) {
        self.maybe_cleanup(now);
        let mut exchanged = self.exchanged.write();
        let seen = exchanged.entry(peer).or_default();
        if seen.len() >= self.max_per_peer && !seen.contains_key(&event) {
            if let Some(oldest) = seen.iter().min_by_key(|(_, at)| **at).map(|(hash, _)| *hash) {
                seen.remove(&oldest);
            }
        }
        seen.insert(event, now);
    }

    /// Whether `event` is likely a duplicate for `peer`.
    pub fn is_likely_duplicate(&self, peer: NodeId, event: &Hash, now: Instant) -> bool {
        self.exchanged
            .read()
            .get(&peer)
            .and_then(|seen| seen.get(event))
            .is_some_and(|at| now.saturating_duration_since(*at) < self.threshold)
    }

    pub fn size(&self, peer: NodeId) -> usize {
        self.exchanged.read().get(&peer).map(HashMap::len).unwrap_or(0)
    }

    pub fn forget_peer(&self, peer: NodeId) {
        self.exchanged.write().remove(&peer);
    }

    fn maybe_cleanup(&self, now: Instant) {
        let mut last_cleanup = self.last_cleanup.write();
        if now.saturating_duration_since(*last_cleanup) < self.threshold {
            return;
        }
        let mut exchanged = self.exchanged.write();
        for seen in exchanged.values_mut() {
            seen.retain(|_, at| now.saturating_duration_since(*at) < self.threshold);
        }
        exchanged.retain(|_, seen| !seen.is_empty());
        *last_cleanup = now;
    }
}

impl Default for PeerEventMemory {
    fn default() -> Self {
        Self::new(Duration::from_secs(10), 100_000)
    }
}
