//! Reconnect: a node that has fallen behind fetches the latest complete
//! signed state from a peer.
//!
//! The learner initiates once enough peers told it that it has fallen
//! behind. The provider answers with the state currently in its nexus, along
//! with the signatures that made it complete. The learner only adopts the
//! state if those signatures carry a supermajority of its own address book.

use crate::config::ReconnectConfig;
use crate::error::{NetworkError, Result};
use crate::negotiator::Protocol;
use crate::wire::Connection;
use async_trait::async_trait;
use hashweave_crypto::SignatureVerifier;
use hashweave_state::{
    NodeSignature, ReservedSignedState, SignedState, SignedStateNexus, SignedStateParams, StateTree,
};
use hashweave_types::{AddressBook, ConsensusSnapshot, EventWindow, Hash, NodeId, RunningEventHash, Timestamp};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

pub const RECONNECT_PROTOCOL_ID: u8 = 1;

/// Collects the peers that reported this node as fallen behind.
#[derive(Debug)]
pub struct FallenBehindMonitor {
    peer_count: usize,
    reporting: Mutex<HashSet<NodeId>>,
}

impl FallenBehindMonitor {
    pub fn new(peer_count: usize) -> Self {
        Self {
            peer_count,
            reporting: Mutex::new(HashSet::new()),
        }
    }

    pub fn report(&self, peer: NodeId) {
        let mut reporting = self.reporting.lock();
        if reporting.insert(peer) {
            debug!(target = "reconnect", %peer, reports = reporting.len(), "peer reports us behind");
        }
    }

    pub fn clear_peer(&self, peer: NodeId) {
        self.reporting.lock().remove(&peer);
    }

    /// Behind once at least half of the peers, and at least one, reported it.
    pub fn is_behind(&self) -> bool {
        let needed = self.peer_count.div_ceil(2).max(1);
        self.reporting.lock().len() >= needed
    }

    pub fn peers_reporting(&self) -> usize {
        self.reporting.lock().len()
    }

    pub fn clear(&self) {
        self.reporting.lock().clear();
    }
}

/// A complete signed state as sent over the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransfer {
    pub round: u64,
    pub tree: StateTree,
    pub running_event_hash: RunningEventHash,
    pub consensus_timestamp: Timestamp,
    pub consensus_event_count: u64,
    pub event_window: EventWindow,
    pub epoch_hash: Option<Hash>,
    pub snapshot: Option<ConsensusSnapshot>,
    pub signatures: Vec<NodeSignature>,
}

impl StateTransfer {
    /// `None` if the state was destroyed in the meantime.
    pub fn from_state(state: &SignedState) -> Option<Self> {
        let tree = state.tree()?;
        Some(Self {
            round: state.round(),
            tree: StateTree::clone(&tree),
            running_event_hash: state.running_event_hash(),
            consensus_timestamp: state.consensus_timestamp(),
            consensus_event_count: state.consensus_event_count(),
            event_window: state.event_window(),
            epoch_hash: state.epoch_hash(),
            snapshot: state.snapshot().cloned(),
            signatures: state
                .signatures()
                .into_iter()
                .map(|(node_id, signature)| NodeSignature { node_id, signature })
                .collect(),
        })
    }

    /// Rebuild the signed state, keeping only signatures that verify against
    /// `book`. Fails unless they add up to a supermajority.
    pub fn into_signed_state(
        self,
        book: &AddressBook,
        verifier: &dyn SignatureVerifier,
    ) -> Result<ReservedSignedState> {
        let state = SignedState::new(SignedStateParams {
            round: self.round,
            tree: Arc::new(self.tree),
            running_event_hash: self.running_event_hash,
            consensus_timestamp: self.consensus_timestamp,
            consensus_event_count: self.consensus_event_count,
            event_window: self.event_window,
            epoch_hash: self.epoch_hash,
            snapshot: self.snapshot,
        });
        for signature in &self.signatures {
            let outcome = state.add_signature(verifier, book, signature.node_id, &signature.signature);
            debug!(target = "reconnect", round = self.round, signer = %signature.node_id, ?outcome, "received signature");
        }
        if !state.is_complete(book) {
            return Err(NetworkError::Reconnect(format!(
                "state for round {} carries weight {} of {}",
                self.round,
                state.signing_weight(),
                book.total_weight()
            )));
        }
        state
            .try_reserve("reconnect learner")
            .ok_or_else(|| NetworkError::Reconnect("received state destroyed before adoption".into()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ReconnectMessage {
    Declined,
    State(Box<StateTransfer>),
}

/// Shared by the reconnect protocols of every connection.
pub struct ReconnectContext {
    book: Arc<AddressBook>,
    verifier: Arc<dyn SignatureVerifier>,
    nexus: Arc<SignedStateNexus>,
    monitor: Arc<FallenBehindMonitor>,
    providers: Arc<Semaphore>,
    config: ReconnectConfig,
    last_attempt: Mutex<Option<Instant>>,
    adopted: Option<mpsc::UnboundedSender<u64>>,
}

impl ReconnectContext {
    pub fn new(
        book: Arc<AddressBook>,
        verifier: Arc<dyn SignatureVerifier>,
        nexus: Arc<SignedStateNexus>,
        monitor: Arc<FallenBehindMonitor>,
        config: ReconnectConfig,
    ) -> Self {
        Self {
            book,
            verifier,
            nexus,
            monitor,
            providers: Arc::new(Semaphore::new(config.max_concurrent_providers.max(1))),
            config,
            last_attempt: Mutex::new(None),
            adopted: None,
        }
    }

    /// The round of every adopted state is sent on `adopted`.
    pub fn with_adoption_notice(mut self, adopted: mpsc::UnboundedSender<u64>) -> Self {
        self.adopted = Some(adopted);
        self
    }

    pub fn monitor(&self) -> &Arc<FallenBehindMonitor> {
        &self.monitor
    }

    fn may_learn(&self) -> bool {
        if !self.monitor.is_behind() {
            return false;
        }
        let mut last = self.last_attempt.lock();
        if last.is_some_and(|at| at.elapsed() < self.config.min_interval) {
            return false;
        }
        *last = Some(Instant::now());
        true
    }
}

#[derive(Debug)]
enum Role {
    Learner,
    Provider(OwnedSemaphorePermit),
}

pub struct ReconnectProtocol {
    peer: NodeId,
    context: Arc<ReconnectContext>,
    role: Option<Role>,
}

impl ReconnectProtocol {
    pub fn new(peer: NodeId, context: Arc<ReconnectContext>) -> Self {
        Self {
            peer,
            context,
            role: None,
        }
    }

    async fn provide(&self, connection: &mut Connection) -> Result<()> {
        let transfer = self
            .context
            .nexus
            .get("reconnect provider")
            .and_then(|state| StateTransfer::from_state(&state));
        let Some(transfer) = transfer else {
            debug!(target = "reconnect", peer = %self.peer, "no state to provide");
            return connection.send(&ReconnectMessage::Declined).await;
        };
        info!(target = "reconnect", peer = %self.peer, round = transfer.round, "sending signed state");
        connection.send(&ReconnectMessage::State(Box::new(transfer))).await
    }

    async fn learn(&self, connection: &mut Connection) -> Result<()> {
        let transfer = match connection.receive::<ReconnectMessage>().await? {
            ReconnectMessage::State(transfer) => *transfer,
            ReconnectMessage::Declined => {
                debug!(target = "reconnect", peer = %self.peer, "provider declined");
                return Ok(());
            }
        };
        let round = transfer.round;
        if self.context.nexus.round().is_some_and(|ours| ours >= round) {
            debug!(target = "reconnect", peer = %self.peer, round, "received state is not newer");
            return Ok(());
        }
        let state = transfer.into_signed_state(&self.context.book, self.context.verifier.as_ref())?;
        if self.context.nexus.set_if_newer(state) {
            self.context.monitor.clear();
            info!(target = "reconnect", peer = %self.peer, round, "adopted signed state");
            if let Some(adopted) = &self.context.adopted {
                let _ = adopted.send(round);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Protocol for ReconnectProtocol {
    fn id(&self) -> u8 {
        RECONNECT_PROTOCOL_ID
    }

    fn name(&self) -> &'static str {
        "reconnect"
    }

    fn should_initiate(&mut self) -> bool {
        if self.context.may_learn() {
            self.role = Some(Role::Learner);
            return true;
        }
        false
    }

    fn initiate_failed(&mut self) {
        self.role = None;
    }

    fn should_accept(&mut self) -> bool {
        if self.context.monitor.is_behind() || self.context.nexus.round().is_none() {
            return false;
        }
        match self.context.providers.clone().try_acquire_owned() {
            Ok(permit) => {
                self.role = Some(Role::Provider(permit));
                true
            }
            Err(_) => false,
        }
    }

    fn accept_on_simultaneous_initiate(&self) -> bool {
        false
    }

    async fn run_protocol(&mut self, connection: &mut Connection) -> Result<()> {
        let result = match self.role.take() {
            Some(Role::Learner) => self.learn(connection).await,
            Some(Role::Provider(_permit)) => self.provide(connection).await,
            None => Err(NetworkError::Reconnect("protocol ran without a role".into())),
        };
        if let Err(err) = &result {
            warn!(target = "reconnect", peer = %self.peer, error = %err, "reconnect failed");
        }
        result
    }
}
