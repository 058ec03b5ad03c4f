use crate::error::IntakeRejection;
use hashweave_types::{Event, EventDescriptor, EventWindow, Hash, NodeId};
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

/// An event travelling through intake with the peer it came from.
#[derive(Debug, Clone)]
pub struct IntakeItem {
    pub event: Event,
    pub source: Option<NodeId>,
}

#[derive(Debug)]
struct Orphan {
    item: IntakeItem,
    missing: HashSet<EventDescriptor>,
    received: Instant,
}

/// Holds events until all of their non-ancient parents have been emitted,
/// then releases them in topological order.
///
/// A parent is satisfied only by an event whose full descriptor matches the
/// one the child claims, not by a hash match alone.
#[derive(Debug)]
pub struct OrphanBuffer {
    window: EventWindow,
    emitted: HashMap<Hash, Event>,
    orphans: HashMap<Hash, Orphan>,
    waiting_on: HashMap<EventDescriptor, Vec<Hash>>,
    timeout: Duration,
}

impl OrphanBuffer {
    pub fn new(window: EventWindow, timeout: Duration) -> Self {
        Self {
            window,
            emitted: HashMap::new(),
            orphans: HashMap::new(),
            waiting_on: HashMap::new(),
            timeout,
        }
    }

    pub fn orphan_count(&self) -> usize {
        self.orphans.len()
    }

    pub fn is_known(&self, hash: &Hash) -> bool {
        self.emitted.contains_key(hash) || self.orphans.contains_key(hash)
    }

    /// Add an event. Returns every event that became ready, parents first.
    /// Events already held or emitted are refused as duplicates.
    pub fn add(&mut self, item: IntakeItem, now: Instant) -> Result<Vec<IntakeItem>, IntakeRejection> {
        let hash = item.event.hash();
        if self.is_known(&hash) {
            return Err(IntakeRejection::Duplicate);
        }
        let mut missing = HashSet::new();
        for parent in item.event.parents() {
            match self.emitted.get(&parent.hash) {
                Some(known) if known.descriptor() != *parent => {
                    return Err(IntakeRejection::ParentMismatch(parent.hash));
                }
                Some(_) => {}
                None if self.window.is_ancient(parent) => {}
                None => {
                    missing.insert(*parent);
                }
            }
        }
        if missing.is_empty() {
            return Ok(self.release(item));
        }
        for parent in &missing {
            self.waiting_on.entry(*parent).or_default().push(hash);
        }
        tracing::trace!(
            target = "orphan_buffer",
            event = %hash,
            missing = missing.len(),
            "buffering orphan",
        );
        self.orphans.insert(
            hash,
            Orphan {
                item,
                missing,
                received: now,
            },
        );
        Ok(Vec::new())
    }

    fn release(&mut self, item: IntakeItem) -> Vec<IntakeItem> {
        let mut ready = Vec::new();
        let mut queue = VecDeque::from([item]);
        while let Some(item) = queue.pop_front() {
            let descriptor = item.event.descriptor();
            self.emitted.insert(descriptor.hash, item.event.clone());
            for child in self.waiting_on.remove(&descriptor).unwrap_or_default() {
                let Some(orphan) = self.orphans.get_mut(&child) else {
                    continue;
                };
                orphan.missing.remove(&descriptor);
                if orphan.missing.is_empty() {
                    if let Some(orphan) = self.orphans.remove(&child) {
                        queue.push_back(orphan.item);
                    }
                }
            }
            ready.push(item);
        }
        ready
    }

    /// Apply a new window. Returns `(released, discarded)`: orphans whose
    /// missing parents all became ancient, and orphans that became ancient
    /// themselves.
    pub fn set_window(&mut self, window: EventWindow) -> (Vec<IntakeItem>, Vec<IntakeItem>) {
        self.window = window;
        self.emitted.retain(|_, event| !window.is_ancient(&event.descriptor()));

        let mut discarded = Vec::new();
        let ancient: Vec<Hash> = self
            .orphans
            .iter()
            .filter(|(_, orphan)| window.is_ancient(&orphan.item.event.descriptor()))
            .map(|(hash, _)| *hash)
            .collect();
        for hash in ancient {
            if let Some(orphan) = self.orphans.remove(&hash) {
                discarded.push(orphan.item);
            }
        }

        let mut unblocked: Vec<(u64, Hash)> = Vec::new();
        for (hash, orphan) in self.orphans.iter_mut() {
            orphan.missing.retain(|parent| !window.is_ancient(parent));
            if orphan.missing.is_empty() {
                unblocked.push((orphan.item.event.generation(), *hash));
            }
        }
        unblocked.sort();

        let mut released = Vec::new();
        for (_, hash) in unblocked {
            if let Some(orphan) = self.orphans.remove(&hash) {
                released.extend(self.release(orphan.item));
            }
        }
        self.waiting_on
            .retain(|_, children| children.iter().any(|child| self.orphans.contains_key(child)));
        (released, discarded)
    }

    /// Forget emitted events and hand back every held orphan.
    pub fn clear(&mut self, window: EventWindow) -> Vec<IntakeItem> {
        self.window = window;
        self.emitted.clear();
        self.waiting_on.clear();
        self.orphans.drain().map(|(_, orphan)| orphan.item).collect()
    }

    /// Drop orphans that waited longer than the configured timeout.
    pub fn sweep(&mut self, now: Instant) -> Vec<IntakeItem> {
        let timeout = self.timeout;
        let expired: Vec<Hash> = self
            .orphans
            .iter()
            .filter(|(_, orphan)| now.saturating_duration_since(orphan.received) >= timeout)
            .map(|(hash, _)| *hash)
            .collect();
        let mut dropped = Vec::with_capacity(expired.len());
        for hash in expired {
            if let Some(orphan) = self.orphans.remove(&hash) {
                tracing::debug!(
                    target = "orphan_buffer",
                    event = %hash,
                    "discarding orphan after timeout",
                );
                dropped.push(orphan.item);
            }
        }
        if !dropped.is_empty() {
            self.waiting_on
                .retain(|_, children| children.iter().any(|child| self.orphans.contains_key(child)));
        }
        dropped
    }
}
