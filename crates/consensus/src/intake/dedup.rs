use hashweave_types::{Event, EventDescriptor, EventWindow};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupOutcome {
    New,
    /// Same descriptor seen before, but with a different signature.
    Disparate,
    Duplicate,
}

/// Drops events already seen, keyed by descriptor and signature.
#[derive(Debug)]
pub struct EventDeduplicator {
    seen: HashMap<EventDescriptor, HashSet<Vec<u8>>>,
    window: EventWindow,
    disparate: u64,
    duplicates: u64,
}

impl EventDeduplicator {
    pub fn new(window: EventWindow) -> Self {
        Self {
            seen: HashMap::new(),
            window,
            disparate: 0,
            duplicates: 0,
        }
    }

    pub fn handle(&mut self, event: &Event) -> DedupOutcome {
        let signatures = self.seen.entry(event.descriptor()).or_default();
        if signatures.contains(event.signature()) {
            self.duplicates += 1;
            return DedupOutcome::Duplicate;
        }
        let outcome = if signatures.is_empty() {
            DedupOutcome::New
        } else {
            self.disparate += 1;
            DedupOutcome::Disparate
        };
        signatures.insert(event.signature().to_vec());
        outcome
    }

    pub fn set_window(&mut self, window: EventWindow) {
        self.window = window;
        self.seen.retain(|descriptor, _| !window.is_ancient(descriptor));
    }

    /// Forget every descriptor. The counters keep running.
    pub fn reset(&mut self, window: EventWindow) {
        self.seen.clear();
        self.window = window;
    }

    pub fn disparate_count(&self) -> u64 {
        self.disparate
    }

    pub fn duplicate_count(&self) -> u64 {
        self.duplicates
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
