//! Hash-linked event DAG shared read-only with gossip.
//!
//! The consensus engine is the only writer. Gossip takes a read lock to
//! compute tips and the events a peer is missing.

use crate::error::{ConsensusError, Result};
use hashweave_types::{Event, EventDescriptor, EventWindow, Hash, NodeId};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub type SharedDag = Arc<RwLock<Dag>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DagSnapshot {
    pub events: usize,
    pub retained_descriptors: usize,
    pub tips: usize,
    pub window: EventWindow,
}

#[derive(Debug)]
pub struct Dag {
    events: HashMap<Hash, Arc<Event>>,
    /// Descriptors of pruned events, kept until they expire so descendants
    /// can still describe their ancestry.
    retained: HashMap<Hash, EventDescriptor>,
    tips: HashSet<Hash>,
    latest_by_creator: HashMap<NodeId, EventDescriptor>,
    window: EventWindow,
}

impl Dag {
    pub fn new(window: EventWindow) -> Self {
        Self {
            events: HashMap::new(),
            retained: HashMap::new(),
            tips: HashSet::new(),
            latest_by_creator: HashMap::new(),
            window,
        }
    }

    pub fn shared(window: EventWindow) -> SharedDag {
        Arc::new(RwLock::new(Self::new(window)))
    }

    pub fn window(&self) -> EventWindow {
        self.window
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn get(&self, hash: &Hash) -> Option<&Arc<Event>> {
        self.events.get(hash)
    }

    /// True for stored events and for pruned events whose descriptor is
    /// still retained.
    pub fn contains(&self, hash: &Hash) -> bool {
        self.events.contains_key(hash) || self.retained.contains_key(hash)
    }

    pub fn descriptor(&self, hash: &Hash) -> Option<EventDescriptor> {
        self.events
            .get(hash)
            .map(|event| event.descriptor())
            .or_else(|| self.retained.get(hash).copied())
    }

    pub fn insert(&mut self, event: Arc<Event>) -> Result<()> {
        let hash = event.hash();
        if self.contains(&hash) {
            return Err(ConsensusError::DuplicateEvent(hash));
        }
        for parent in event.parents() {
            self.tips.remove(&parent.hash);
        }
        self.tips.insert(hash);
        let descriptor = event.descriptor();
        self.latest_by_creator
            .entry(event.creator())
            .and_modify(|latest| {
                if latest.generation < descriptor.generation {
                    *latest = descriptor;
                }
            })
            .or_insert(descriptor);
        self.events.insert(hash, event);
        Ok(())
    }

    /// Events with no known children, ordered by generation.
    pub fn tips(&self) -> Vec<EventDescriptor> {
        let mut tips: Vec<EventDescriptor> = self
            .tips
            .iter()
            .filter_map(|hash| self.events.get(hash))
            .map(|event| event.descriptor())
            .collect();
        tips.sort_by_key(|d| (d.generation, d.hash));
        tips
    }

    pub fn latest_by_creator(&self, creator: NodeId) -> Option<EventDescriptor> {
        self.latest_by_creator.get(&creator).copied()
    }

    /// Highest generation of any stored event.
    pub fn max_generation(&self) -> u64 {
        self.events.values().map(|e| e.generation()).max().unwrap_or(0)
    }

    /// All stored ancestors of `starts`, the starts included.
    pub fn ancestors<'a>(&self, starts: impl IntoIterator<Item = &'a Hash>) -> HashSet<Hash> {
        let mut seen = HashSet::new();
        let mut stack: Vec<Hash> = starts.into_iter().copied().collect();
        while let Some(hash) = stack.pop() {
            let Some(event) = self.events.get(&hash) else {
                continue;
            };
            if !seen.insert(hash) {
                continue;
            }
            stack.extend(event.parents().map(|parent| parent.hash));
        }
        seen
    }

    /// Stored events not in `known` and not ancient for the peer, in
    /// generation order so parents precede children.
    pub fn events_unknown_to(&self, known: &HashSet<Hash>, peer_window: &EventWindow) -> Vec<Arc<Event>> {
        let mut missing: Vec<Arc<Event>> = self
            .events
            .values()
            .filter(|event| !known.contains(&event.hash()))
            .filter(|event| !peer_window.is_ancient(&event.descriptor()))
            .cloned()
            .collect();
        missing.sort_by_key(|event| (event.generation(), event.hash()));
        missing
    }

    /// Forget every event, e.g. when consensus restarts from a signed state.
    pub fn reset(&mut self, window: EventWindow) {
        self.events.clear();
        self.retained.clear();
        self.tips.clear();
        self.latest_by_creator.clear();
        self.window = window;
    }

    /// Apply a new window: remove ancient events, keep their descriptors
    /// until they expire. Returns the removed events.
    pub fn prune(&mut self, window: EventWindow) -> Vec<Arc<Event>> {
        self.window = window;
        let ancient: Vec<Hash> = self
            .events
            .values()
            .filter(|event| window.is_ancient(&event.descriptor()))
            .map(|event| event.hash())
            .collect();
        let mut removed = Vec::with_capacity(ancient.len());
        for hash in ancient {
            if let Some(event) = self.events.remove(&hash) {
                self.tips.remove(&hash);
                self.retained.insert(hash, event.descriptor());
                removed.push(event);
            }
        }
        self.retained.retain(|_, descriptor| !window.is_expired(descriptor));
        removed.sort_by_key(|event| (event.generation(), event.hash()));
        removed
    }

    pub fn snapshot(&self) -> DagSnapshot {
        DagSnapshot {
            events: self.events.len(),
            retained_descriptors: self.retained.len(),
            tips: self.tips.len(),
            window: self.window,
        }
    }
}
