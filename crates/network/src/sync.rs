//! Shadowgraph synchronization with one peer.
//!
//! A sync runs in three phases, each side sending while it receives:
//!
//! 1. Both sides send their event window and current tips. If every tip of
//!    one side is ancient for the other, that side has fallen behind and the
//!    sync stops; the node that fell behind needs a reconnect.
//! 2. Each side answers, per tip of the peer, whether it has that event.
//! 3. Each side streams the events the peer is missing in generation order,
//!    followed by an end marker. Received events go to intake.

use crate::config::SyncConfig;
use crate::deduplication::PeerEventMemory;
use crate::error::{NetworkError, Result, SyncAbort};
use crate::health::HealthMonitor;
use crate::negotiator::Protocol;
use crate::permits::{SyncPermit, SyncPermits};
use crate::reconnect::FallenBehindMonitor;
use crate::wire::Connection;
use async_trait::async_trait;
use hashweave_consensus::EngineHandle;
use hashweave_types::{EventDescriptor, EventWindow, GossipEvent, Hash, NodeId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub const SYNC_PROTOCOL_ID: u8 = 2;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SyncMessage {
    Tips {
        window: EventWindow,
        tips: Vec<EventDescriptor>,
    },
    Known(Vec<bool>),
    Event(GossipEvent),
    Done,
    Abort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Completed { sent: usize, received: usize },
    SelfFallenBehind,
    PeerFallenBehind,
}

pub struct ShadowgraphSynchronizer {
    engine: EngineHandle,
    memory: Arc<PeerEventMemory>,
    fallen_behind: Arc<FallenBehindMonitor>,
    config: SyncConfig,
}

impl ShadowgraphSynchronizer {
    pub fn new(
        engine: EngineHandle,
        memory: Arc<PeerEventMemory>,
        fallen_behind: Arc<FallenBehindMonitor>,
        config: SyncConfig,
    ) -> Self {
        Self {
            engine,
            memory,
            fallen_behind,
            config,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn fallen_behind(&self) -> &Arc<FallenBehindMonitor> {
        &self.fallen_behind
    }

    pub fn memory(&self) -> &Arc<PeerEventMemory> {
        &self.memory
    }

    /// Intake holds too many events from `peer` to accept more.
    pub fn is_backpressured(&self, peer: NodeId) -> bool {
        self.engine.counter().backlog(peer) > self.config.max_intake_backlog
    }

    pub async fn synchronize(&self, connection: &mut Connection) -> Result<SyncOutcome> {
        // The sender aborts at the configured duration; this is the hard stop
        // for a peer that stops talking.
        let hard_limit = self.config.max_sync_duration.saturating_mul(2);
        match tokio::time::timeout(hard_limit, self.sync_phases(connection)).await {
            Ok(result) => result,
            Err(_) => Err(NetworkError::SyncAborted(SyncAbort::MaxDuration)),
        }
    }

    async fn sync_phases(&self, connection: &mut Connection) -> Result<SyncOutcome> {
        let peer = connection.peer();
        let started = Instant::now();

        let (our_window, our_tips) = {
            let dag = self.engine.dag().read();
            (dag.window(), dag.tips())
        };
        let reply = connection
            .exchange(&SyncMessage::Tips {
                window: our_window,
                tips: our_tips.clone(),
            })
            .await?;
        let (their_window, their_tips) = match reply {
            SyncMessage::Tips { window, tips } => (window, tips),
            other => return Err(NetworkError::unexpected("tips", other)),
        };

        if !our_tips.is_empty() && our_tips.iter().all(|tip| their_window.is_ancient(tip)) {
            info!(
                target = "sync",
                %peer,
                ours = our_window.latest_consensus_round(),
                theirs = their_window.latest_consensus_round(),
                "fallen behind peer"
            );
            self.fallen_behind.report(peer);
            return Ok(SyncOutcome::SelfFallenBehind);
        }
        self.fallen_behind.clear_peer(peer);
        if !their_tips.is_empty() && their_tips.iter().all(|tip| our_window.is_ancient(tip)) {
            debug!(target = "sync", %peer, "peer has fallen behind");
            return Ok(SyncOutcome::PeerFallenBehind);
        }

        let we_have: Vec<bool> = {
            let dag = self.engine.dag().read();
            their_tips.iter().map(|tip| dag.contains(&tip.hash)).collect()
        };
        let reply = connection.exchange(&SyncMessage::Known(we_have.clone())).await?;
        let they_have = match reply {
            SyncMessage::Known(flags) => flags,
            other => return Err(NetworkError::unexpected("known tips", other)),
        };
        if they_have.len() != our_tips.len() {
            return Err(NetworkError::unexpected(
                "one flag per tip",
                format!("{} flags for {} tips", they_have.len(), our_tips.len()),
            ));
        }

        let known_starts: Vec<Hash> = their_tips
            .iter()
            .zip(&we_have)
            .filter(|(_, have)| **have)
            .map(|(tip, _)| tip.hash)
            .chain(
                our_tips
                    .iter()
                    .zip(&they_have)
                    .filter(|(_, have)| **have)
                    .map(|(tip, _)| tip.hash),
            )
            .collect();
        let now = Instant::now();
        let to_send: Vec<GossipEvent> = {
            let dag = self.engine.dag().read();
            let known: HashSet<Hash> = dag.ancestors(known_starts.iter());
            dag.events_unknown_to(&known, &their_window)
                .into_iter()
                .filter(|event| !self.memory.is_likely_duplicate(peer, &event.hash(), now))
                .map(|event| event.gossip().clone())
                .collect()
        };

        let deadline = started + self.config.max_sync_duration;
        let reader = &mut connection.reader;
        let writer = &mut connection.writer;

        let send = async {
            let mut sent = 0usize;
            for gossip in &to_send {
                if Instant::now() >= deadline {
                    writer.send(&SyncMessage::Abort).await?;
                    return Err(NetworkError::SyncAborted(SyncAbort::MaxDuration));
                }
                writer.write_frame(&SyncMessage::Event(gossip.clone())).await?;
                self.memory.record(peer, gossip.unsigned.compute_hash(), Instant::now());
                sent += 1;
            }
            writer.send(&SyncMessage::Done).await?;
            Ok::<_, NetworkError>(sent)
        };

        let receive = async {
            let mut received = 0usize;
            loop {
                match reader.read_frame::<SyncMessage>().await? {
                    SyncMessage::Event(gossip) => {
                        if self.is_backpressured(peer) {
                            return Err(NetworkError::SyncAborted(SyncAbort::Backpressure));
                        }
                        self.memory.record(peer, gossip.unsigned.compute_hash(), Instant::now());
                        self.engine.submit(gossip, Some(peer)).await?;
                        received += 1;
                    }
                    SyncMessage::Done => return Ok::<_, NetworkError>(received),
                    SyncMessage::Abort => return Err(NetworkError::SyncAborted(SyncAbort::PeerAborted)),
                    other => return Err(NetworkError::unexpected("event or end marker", other)),
                }
            }
        };

        let (sent, received) = tokio::try_join!(send, receive)?;
        debug!(
            target = "sync",
            %peer,
            sent,
            received,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "sync complete"
        );
        Ok(SyncOutcome::Completed { sent, received })
    }
}

/// The sync engine as a negotiated protocol for one peer.
pub struct SyncProtocol {
    peer: NodeId,
    synchronizer: Arc<ShadowgraphSynchronizer>,
    permits: Arc<SyncPermits>,
    health: Arc<HealthMonitor>,
    permit: Option<SyncPermit>,
    last_sync: Option<Instant>,
    completed: Option<mpsc::UnboundedSender<NodeId>>,
}

impl SyncProtocol {
    pub fn new(
        peer: NodeId,
        synchronizer: Arc<ShadowgraphSynchronizer>,
        permits: Arc<SyncPermits>,
        health: Arc<HealthMonitor>,
    ) -> Self {
        Self {
            peer,
            synchronizer,
            permits,
            health,
            permit: None,
            last_sync: None,
            completed: None,
        }
    }

    /// The peer id is sent on `completed` after every successful sync.
    pub fn with_completion_notice(mut self, completed: mpsc::UnboundedSender<NodeId>) -> Self {
        self.completed = Some(completed);
        self
    }

    fn may_sync(&mut self) -> bool {
        if self.synchronizer.fallen_behind().is_behind() || self.synchronizer.is_backpressured(self.peer) {
            return false;
        }
        let rested = self
            .last_sync
            .map_or(true, |at| at.elapsed() >= self.synchronizer.config().sleep_after_sync);
        if !rested {
            return false;
        }
        if self.permit.is_none() {
            self.permit = self.permits.try_acquire(self.peer);
        }
        self.permit.is_some()
    }
}

#[async_trait]
impl Protocol for SyncProtocol {
    fn id(&self) -> u8 {
        SYNC_PROTOCOL_ID
    }

    fn name(&self) -> &'static str {
        "sync"
    }

    fn should_initiate(&mut self) -> bool {
        self.may_sync()
    }

    fn initiate_failed(&mut self) {
        self.permit = None;
    }

    fn should_accept(&mut self) -> bool {
        self.may_sync()
    }

    fn accept_on_simultaneous_initiate(&self) -> bool {
        true
    }

    async fn run_protocol(&mut self, connection: &mut Connection) -> Result<()> {
        let permit = self.permit.take();
        let result = self.synchronizer.synchronize(connection).await;
        drop(permit);
        self.last_sync = Some(Instant::now());
        match result {
            Ok(SyncOutcome::Completed { .. }) => {
                self.health.record_success(self.peer, None);
                if let Some(completed) = &self.completed {
                    let _ = completed.send(self.peer);
                }
                Ok(())
            }
            Ok(_) => Ok(()),
            Err(err) => {
                warn!(target = "sync", peer = %self.peer, error = %err, "sync failed");
                // Events sent in a failed sync may never have reached intake.
                self.synchronizer.memory().forget_peer(self.peer);
                Err(err)
            }
        }
    }
}
