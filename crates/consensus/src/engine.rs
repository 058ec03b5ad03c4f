//! The single logical thread that owns intake, the DAG and consensus.
//!
//! Gossip tasks hand events over through a bounded channel. The engine
//! processes them one at a time, so the consensus output is a pure function
//! of the order in which validated events were inserted.
//!
//! After a signed state is adopted, [`EngineHandle::restore`] makes the engine
//! drop its DAG and intake buffers and resume consensus from the state's
//! snapshot.

use crate::config::{ConsensusConfig, EventWindowConfig, HashingMode, IntakeConfig};
use crate::dag::{Dag, SharedDag};
use crate::error::{ConsensusError, IntakeRejection, Result};
use crate::hashgraph::{ConsensusAlgorithm, Hashgraph, RestorePoint};
use crate::intake::{EventValidator, IntakeEventCounter, IntakeInput, IntakePipeline};
use crate::window::StaleEventDetector;
use hashweave_crypto::SignatureVerifier;
use hashweave_types::{AddressBook, ConsensusRound, Event, EventWindow, GossipEvent, NodeId};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

#[derive(Debug)]
pub struct IntakeMessage {
    pub input: IntakeInput,
    /// Peer the event was received from, `None` for self events.
    pub source: Option<NodeId>,
}

#[derive(Debug, Clone)]
pub enum EngineOutput {
    Round(ConsensusRound),
    /// An event that became ancient without reaching consensus.
    Stale(Arc<Event>),
    /// Consensus now resumes after this round.
    Restored(u64),
}

/// Cloneable entry point used by gossip and the event creator.
#[derive(Clone)]
pub struct EngineHandle {
    sender: mpsc::Sender<IntakeMessage>,
    restores: mpsc::UnboundedSender<RestorePoint>,
    window: watch::Receiver<EventWindow>,
    dag: SharedDag,
    counter: Arc<IntakeEventCounter>,
    hashing_mode: HashingMode,
}

impl EngineHandle {
    /// Queue an event for intake. Waits while the channel is full.
    pub async fn submit(&self, event: GossipEvent, source: Option<NodeId>) -> Result<()> {
        let input = match self.hashing_mode {
            HashingMode::GossipThread => IntakeInput::Hashed(event.into_hashed()),
            HashingMode::IntakeThread => IntakeInput::Unhashed(event),
        };
        if let Some(peer) = source {
            self.counter.event_entered(peer);
        }
        if self.sender.send(IntakeMessage { input, source }).await.is_err() {
            if let Some(peer) = source {
                self.counter.event_exited(peer);
            }
            return Err(ConsensusError::ChannelClosed);
        }
        Ok(())
    }

    /// Ask the engine to resume from an adopted signed state.
    pub fn restore(&self, point: RestorePoint) -> Result<()> {
        self.restores.send(point).map_err(|_| ConsensusError::ChannelClosed)
    }

    pub fn window(&self) -> EventWindow {
        *self.window.borrow()
    }

    pub fn watch_window(&self) -> watch::Receiver<EventWindow> {
        self.window.clone()
    }

    pub fn dag(&self) -> &SharedDag {
        &self.dag
    }

    pub fn counter(&self) -> &Arc<IntakeEventCounter> {
        &self.counter
    }

    pub fn queued(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }
}

pub struct ConsensusEngine {
    intake: IntakePipeline,
    dag: SharedDag,
    algorithm: Box<dyn ConsensusAlgorithm>,
    stale: StaleEventDetector,
    window_tx: watch::Sender<EventWindow>,
    restores: mpsc::UnboundedReceiver<RestorePoint>,
    config: IntakeConfig,
}

impl ConsensusEngine {
    pub fn new(
        book: Arc<AddressBook>,
        verifier: Arc<dyn SignatureVerifier>,
        consensus: ConsensusConfig,
        intake: IntakeConfig,
        window: EventWindowConfig,
    ) -> (Self, EngineHandle, mpsc::Receiver<IntakeMessage>) {
        let algorithm = Box::new(Hashgraph::new(consensus, window, &book));
        Self::with_algorithm(book, verifier, algorithm, intake)
    }

    fn with_algorithm(
        book: Arc<AddressBook>,
        verifier: Arc<dyn SignatureVerifier>,
        algorithm: Box<dyn ConsensusAlgorithm>,
        config: IntakeConfig,
    ) -> (Self, EngineHandle, mpsc::Receiver<IntakeMessage>) {
        let window = algorithm.window();
        let counter = Arc::new(IntakeEventCounter::new());
        let validator = EventValidator::new(book, verifier);
        let dag = Dag::shared(window);
        let (window_tx, window_rx) = watch::channel(window);
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let (restore_tx, restores) = mpsc::unbounded_channel();
        let handle = EngineHandle {
            sender,
            restores: restore_tx,
            window: window_rx,
            dag: dag.clone(),
            counter: counter.clone(),
            hashing_mode: config.hashing_mode,
        };
        let engine = Self {
            intake: IntakePipeline::new(&config, validator, counter, window),
            dag,
            algorithm,
            stale: StaleEventDetector::new(),
            window_tx,
            restores,
            config,
        };
        (engine, handle, receiver)
    }

    pub fn dag(&self) -> &SharedDag {
        &self.dag
    }

    pub fn window(&self) -> EventWindow {
        self.algorithm.window()
    }

    /// Process one intake message. Rejected events are logged and dropped;
    /// only fatal errors are returned.
    pub fn handle_message(&mut self, message: IntakeMessage, now: Instant) -> Result<Vec<EngineOutput>> {
        match self.intake.submit(message.input, message.source, now) {
            Ok(ready) => self.insert_ready(ready),
            Err(rejection @ (IntakeRejection::Duplicate | IntakeRejection::Ancient)) => {
                trace!(target = "intake", reason = %rejection, "dropping event");
                Ok(Vec::new())
            }
            Err(rejection) => {
                warn!(
                    target = "intake",
                    peer = ?message.source,
                    reason = %rejection,
                    "rejected event",
                );
                Ok(Vec::new())
            }
        }
    }

    /// Drop every event and resume consensus after the snapshot round.
    /// Events still queued for intake are processed against the new window.
    pub fn restore(&mut self, point: &RestorePoint) -> EngineOutput {
        let window = point.event_window;
        self.algorithm.restore(point);
        self.dag.write().reset(window);
        self.stale.clear();
        let dropped = self.intake.reset(window);
        self.window_tx.send_replace(window);
        info!(
            target = "consensus",
            round = point.snapshot.round,
            ancient_threshold = window.ancient_threshold(),
            dropped_orphans = dropped,
            "consensus restarted from an adopted state",
        );
        EngineOutput::Restored(point.snapshot.round)
    }

    fn insert_ready(&mut self, ready: Vec<Event>) -> Result<Vec<EngineOutput>> {
        let mut outputs = Vec::new();
        let mut queue: VecDeque<Event> = ready.into();
        while let Some(event) = queue.pop_front() {
            let event = Arc::new(event);
            if let Err(err) = self.dag.write().insert(event.clone()) {
                warn!(target = "consensus", error = %err, "skipping event already in the DAG");
                continue;
            }
            self.stale.track(event.clone());
            let rounds = self.algorithm.add_event(event)?;
            for round in rounds {
                for consensus_event in &round.events {
                    self.stale.reached_consensus(&consensus_event.event.hash());
                }
                let window = round.event_window;
                outputs.push(EngineOutput::Round(round));
                queue.extend(self.apply_window(window, &mut outputs));
            }
        }
        Ok(outputs)
    }

    fn apply_window(&mut self, window: EventWindow, outputs: &mut Vec<EngineOutput>) -> Vec<Event> {
        self.algorithm.set_window(&window);
        let pruned = self.dag.write().prune(window);
        for event in self.stale.set_window(&window) {
            info!(
                target = "consensus",
                event = %event.hash(),
                creator = %event.creator(),
                birth_round = event.birth_round(),
                "event became stale",
            );
            outputs.push(EngineOutput::Stale(event));
        }
        debug!(
            target = "consensus",
            ancient_threshold = window.ancient_threshold(),
            pruned = pruned.len(),
            "event window advanced",
        );
        self.window_tx.send_replace(window);
        self.intake.set_window(window)
    }

    /// Drive the engine until cancelled or the intake channel closes.
    pub async fn run(
        mut self,
        mut receiver: mpsc::Receiver<IntakeMessage>,
        output: mpsc::Sender<EngineOutput>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let mut sweep = tokio::time::interval(self.config.orphan_sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(target = "consensus", "consensus engine started");
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(target = "consensus", "consensus engine stopping");
                    return Ok(());
                }
                message = receiver.recv() => {
                    let Some(message) = message else {
                        info!(target = "consensus", "intake channel closed");
                        return Ok(());
                    };
                    let outputs = match self.handle_message(message, Instant::now()) {
                        Ok(outputs) => outputs,
                        Err(err) => {
                            error!(
                                target = "consensus",
                                error = %err,
                                algorithm = ?self.algorithm,
                                dag = ?self.dag.read().snapshot(),
                                orphans = self.intake.orphan_count(),
                                "consensus failure, halting",
                            );
                            return Err(err);
                        }
                    };
                    for item in outputs {
                        if output.send(item).await.is_err() {
                            return Err(ConsensusError::ChannelClosed);
                        }
                    }
                }
                Some(point) = self.restores.recv() => {
                    let restored = self.restore(&point);
                    if output.send(restored).await.is_err() {
                        return Err(ConsensusError::ChannelClosed);
                    }
                }
                _ = sweep.tick() => {
                    let dropped = self.intake.sweep(Instant::now());
                    if dropped > 0 {
                        let (duplicates, disparate) = self.intake.dedup_counts();
                        debug!(
                            target = "intake",
                            dropped,
                            duplicates,
                            disparate,
                            "discarded timed out orphans",
                        );
                    }
                }
            }
        }
    }
}
