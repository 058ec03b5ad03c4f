//! Limits on concurrent syncs, in total and per peer.

use hashweave_types::NodeId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::trace;

#[derive(Debug)]
pub struct SyncPermits {
    total: Arc<Semaphore>,
    per_peer: Arc<Mutex<HashMap<NodeId, usize>>>,
    per_peer_limit: usize,
}

/// Held for the duration of one sync. Dropping it returns the permit.
#[derive(Debug)]
pub struct SyncPermit {
    peer: NodeId,
    per_peer: Arc<Mutex<HashMap<NodeId, usize>>>,
    _permit: OwnedSemaphorePermit,
}

impl SyncPermits {
    pub fn new(total: usize, per_peer_limit: usize) -> Self {
        Self {
            total: Arc::new(Semaphore::new(total)),
            per_peer: Arc::new(Mutex::new(HashMap::new())),
            per_peer_limit: per_peer_limit.max(1),
        }
    }

    /// Take a permit without waiting.
    pub fn try_acquire(&self, peer: NodeId) -> Option<SyncPermit> {
        let mut per_peer = self.per_peer.lock();
        let held = per_peer.entry(peer).or_insert(0);
        if *held >= self.per_peer_limit {
            return None;
        }
        let permit = self.total.clone().try_acquire_owned().ok()?;
        *held += 1;
        trace!(target = "sync_permits", %peer, held = *held, "permit acquired");
        Some(SyncPermit {
            peer,
            per_peer: self.per_peer.clone(),
            _permit: permit,
        })
    }

    pub fn available(&self) -> usize {
        self.total.available_permits()
    }

    pub fn held_by(&self, peer: NodeId) -> usize {
        self.per_peer.lock().get(&peer).copied().unwrap_or(0)
    }
}

impl SyncPermit {
    pub fn peer(&self) -> NodeId {
        self.peer
    }
}

impl Drop for SyncPermit {
    fn drop(&mut self) {
        let mut per_peer = self.per_peer.lock();
        if let Some(held) = per_peer.get_mut(&self.peer) {
            *held = held.saturating_sub(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_total_and_per_peer() {
        let permits = SyncPermits::new(2, 1);
        let a = permits.try_acquire(NodeId(1)).unwrap();
        assert!(permits.try_acquire(NodeId(1)).is_none());
        let b = permits.try_acquire(NodeId(2)).unwrap();
        assert!(permits.try_acquire(NodeId(3)).is_none());
        assert_eq!(permits.available(), 0);

        drop(a);
        assert_eq!(permits.held_by(NodeId(1)), 0);
        assert!(permits.try_acquire(NodeId(3)).is_some());
        assert_eq!(b.peer(), NodeId(2));
    }
}
