use crate::config::EventWindowConfig;
use hashweave_types::{AncientMode, Event, EventWindow, Hash};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Computes the event window after each consensus round.
#[derive(Debug)]
pub struct EventWindowManager {
    config: EventWindowConfig,
    window: EventWindow,
    /// Minimum judge generation of each decided round, for generation mode.
    min_judge_generations: BTreeMap<u64, u64>,
}

impl EventWindowManager {
    pub fn new(config: EventWindowConfig) -> Self {
        let window = EventWindow::genesis(config.ancient_mode);
        Self {
            config,
            window,
            min_judge_generations: BTreeMap::new(),
        }
    }

    /// Resume from the window of a signed state for `round`, whose judges
    /// had `min_judge_generation` as their lowest generation.
    pub fn restore(config: EventWindowConfig, window: EventWindow, round: u64, min_judge_generation: u64) -> Self {
        Self {
            config,
            window,
            min_judge_generations: BTreeMap::from([(round, min_judge_generation)]),
        }
    }

    pub fn config(&self) -> &EventWindowConfig {
        &self.config
    }

    pub fn window(&self) -> EventWindow {
        self.window
    }

    fn threshold_for(&self, latest_round: u64, rounds: u64) -> u64 {
        let oldest_kept = latest_round.saturating_sub(rounds.saturating_sub(1)).max(1);
        match self.config.ancient_mode {
            AncientMode::BirthRoundThreshold => oldest_kept,
            AncientMode::GenerationThreshold => self
                .min_judge_generations
                .range(oldest_kept..)
                .next()
                .map(|(_, generation)| *generation)
                .unwrap_or_else(|| self.config.ancient_mode.genesis_threshold()),
        }
    }

    /// Record a decided round and move the window forward.
    pub fn advance(&mut self, round: u64, min_judge_generation: u64) -> EventWindow {
        self.min_judge_generations.insert(round, min_judge_generation);
        let ancient = self.threshold_for(round, self.config.rounds_non_ancient);
        let expired = self.threshold_for(round, self.config.rounds_expired.max(self.config.rounds_non_ancient));
        self.window = self.window.advance(round, ancient, expired);

        let keep_from = round.saturating_sub(self.config.rounds_expired.max(self.config.rounds_non_ancient));
        self.min_judge_generations = self.min_judge_generations.split_off(&keep_from);
        self.window
    }
}

/// Reports events that became ancient before reaching consensus.
///
/// Each event is reported at most once.
#[derive(Debug, Default)]
pub struct StaleEventDetector {
    pending: HashMap<Hash, Arc<Event>>,
}

impl StaleEventDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn track(&mut self, event: Arc<Event>) {
        self.pending.insert(event.hash(), event);
    }

    pub fn reached_consensus(&mut self, hash: &Hash) {
        self.pending.remove(hash);
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub fn set_window(&mut self, window: &EventWindow) -> Vec<Arc<Event>> {
        let stale: Vec<Hash> = self
            .pending
            .values()
            .filter(|event| window.is_ancient(&event.descriptor()))
            .map(|event| event.hash())
            .collect();
        let mut out: Vec<Arc<Event>> = stale
            .iter()
            .filter_map(|hash| self.pending.remove(hash))
            .collect();
        out.sort_by_key(|event| (event.generation(), event.hash()));
        out
    }
}
