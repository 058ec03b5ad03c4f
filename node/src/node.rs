//! Wiring of a running node.
//!
//! Tasks:
//! - the consensus engine, the only writer of the DAG
//! - the checkpoint task consuming engine output and reseeding consensus
//!   from states adopted through reconnect
//! - the event creator, woken by completed syncs
//! - the metadata writer for finalized states
//! - one negotiator per peer connection, dialed by the lower node id

use crate::checkpoint::Checkpointer;
use crate::config::NodeConfig;
use crate::transport::{accept_loop, dial};
use crate::version::HASHWEAVE_VERSION;
use anyhow::{anyhow, Context, Result};
use hashweave_consensus::{ConsensusEngine, EngineHandle, EngineOutput, EventCreator};
use hashweave_crypto::{Ed25519Verifier, SignatureVerifier};
use hashweave_network::{
    maintain_connection, Connection, FallenBehindMonitor, HealthMonitor, HeartbeatProtocol, NegotiatorConfig,
    Negotiator, PeerDirectory, PeerEventMemory, Protocol, ReconnectContext, ReconnectProtocol,
    ShadowgraphSynchronizer, SyncPermits, SyncProtocol,
};
use hashweave_state::{ReservedSignedState, SavedStateMetadata, SignedStateNexus, StateConfig};
use hashweave_types::{AddressBook, EventTransaction, NodeId, Timestamp};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const MAX_REMEMBERED_PER_PEER: usize = 100_000;

/// Builds the protocols of one peer connection, in preference order.
#[derive(Clone)]
struct ProtocolSet {
    synchronizer: Arc<ShadowgraphSynchronizer>,
    permits: Arc<SyncPermits>,
    health: Arc<HealthMonitor>,
    reconnect: Arc<ReconnectContext>,
    heartbeat_period: Duration,
    synced: mpsc::UnboundedSender<NodeId>,
}

impl ProtocolSet {
    fn for_peer(&self, peer: NodeId) -> Vec<Box<dyn Protocol>> {
        vec![
            Box::new(HeartbeatProtocol::new(peer, self.heartbeat_period, self.health.clone())),
            Box::new(ReconnectProtocol::new(peer, self.reconnect.clone())),
            Box::new(
                SyncProtocol::new(peer, self.synchronizer.clone(), self.permits.clone(), self.health.clone())
                    .with_completion_notice(self.synced.clone()),
            ),
        ]
    }
}

/// Run the node until `cancel` fires or a component fails fatally.
pub async fn run(config: NodeConfig, cancel: CancellationToken) -> Result<()> {
    let self_id = config.self_id();
    let keys = config.key_pair()?;
    let book = Arc::new(config.address_book()?);
    let verifier: Arc<dyn SignatureVerifier> = Arc::new(Ed25519Verifier);
    let sync_config = config.sync_config();
    let state_config = config.state_config();

    let (engine, handle, intake) = ConsensusEngine::new(
        book.clone(),
        verifier.clone(),
        config.consensus_config(),
        config.intake_config(),
        config.window_config(),
    );
    let (output_tx, output_rx) = mpsc::channel(1024);
    let mut tasks: JoinSet<Result<()>> = JoinSet::new();
    {
        let cancel = cancel.clone();
        tasks.spawn(async move {
            engine
                .run(intake, output_tx, cancel)
                .await
                .context("consensus engine halted")
        });
    }

    let nexus = Arc::new(SignedStateNexus::new());
    let (transactions_tx, transactions_rx) = mpsc::unbounded_channel();
    let (synced_tx, synced_rx) = mpsc::unbounded_channel();
    let (finalized_tx, finalized_rx) = mpsc::unbounded_channel();
    let (adopted_tx, adopted_rx) = mpsc::unbounded_channel();

    let checkpointer = Checkpointer::new(
        self_id,
        keys.clone(),
        book.clone(),
        verifier.clone(),
        nexus.clone(),
        state_config.clone(),
        sync_config.state_signature_max_age,
    );
    tasks.spawn(checkpoint_task(
        checkpointer,
        output_rx,
        adopted_rx,
        handle.clone(),
        nexus.clone(),
        transactions_tx,
        finalized_tx,
    ));
    tasks.spawn(metadata_task(
        finalized_rx,
        self_id,
        book.clone(),
        state_config,
    ));

    let peers = PeerDirectory::from_address_book(&book, self_id);
    let creator = EventCreator::new(self_id, keys, config.node.max_transactions_per_event, handle.window());
    let solo_period = peers
        .is_empty()
        .then(|| Duration::from_millis(config.node.solo_event_period_ms.max(1)));
    tasks.spawn(creator_task(
        creator,
        handle.clone(),
        synced_rx,
        transactions_rx,
        solo_period,
        cancel.clone(),
    ));

    let health = Arc::new(HealthMonitor::new(config.health_config()));
    let monitor = Arc::new(FallenBehindMonitor::new(peers.len()));
    let synchronizer = Arc::new(ShadowgraphSynchronizer::new(
        handle.clone(),
        Arc::new(PeerEventMemory::new(sync_config.duplicate_threshold, MAX_REMEMBERED_PER_PEER)),
        monitor.clone(),
        sync_config.clone(),
    ));
    let protocols = ProtocolSet {
        synchronizer,
        permits: Arc::new(SyncPermits::new(sync_config.sync_permits, sync_config.per_peer_permits)),
        health: health.clone(),
        reconnect: Arc::new(
            ReconnectContext::new(
                book.clone(),
                verifier,
                nexus.clone(),
                monitor,
                config.reconnect_config(),
            )
            .with_adoption_notice(adopted_tx),
        ),
        heartbeat_period: sync_config.heartbeat_period,
        synced: synced_tx,
    };
    let listener = TcpListener::bind(&config.node.listen)
        .await
        .with_context(|| format!("binding {}", config.node.listen))?;
    info!(target = "node", %self_id, listen = %config.node.listen, peers = peers.len(), version = HASHWEAVE_VERSION, "node started");

    let negotiator_config = config.negotiator_config();
    let (inbound_tx, inbound_rx) = mpsc::channel(16);
    tokio::spawn(accept_loop(
        listener,
        self_id,
        sync_config.max_frame_bytes,
        inbound_tx,
        cancel.clone(),
    ));
    tokio::spawn(inbound_task(
        inbound_rx,
        self_id,
        book.clone(),
        protocols.clone(),
        negotiator_config.clone(),
        cancel.clone(),
    ));

    for peer in peers.outbound(self_id) {
        let Some(endpoint) = peer.endpoint.clone() else {
            continue;
        };
        let max_frame_bytes = sync_config.max_frame_bytes;
        let protocols = protocols.clone();
        let node_id = peer.node_id;
        debug!(target = "node", peer = %node_id, %endpoint, "maintaining outbound connection");
        tokio::spawn(maintain_connection(
            node_id,
            move || dial(endpoint.clone(), self_id, max_frame_bytes),
            move || protocols.for_peer(node_id),
            health.clone(),
            negotiator_config.clone(),
            cancel.clone(),
        ));
    }

    // Any component ending before cancellation is fatal.
    let outcome = tokio::select! {
        _ = cancel.cancelled() => Ok(()),
        Some(joined) = tasks.join_next() => match joined {
            Ok(Ok(())) if cancel.is_cancelled() => Ok(()),
            Ok(Ok(())) => Err(anyhow!("a node component stopped unexpectedly")),
            Ok(Err(err)) => Err(err),
            Err(err) => Err(anyhow!("a node component panicked: {err}")),
        },
    };
    cancel.cancel();
    if let Err(err) = &outcome {
        error!(target = "node", error = %format!("{err:#}"), "fatal error, halting");
    }
    tasks.shutdown().await;
    outcome
}

async fn checkpoint_task(
    mut checkpointer: Checkpointer,
    mut output: mpsc::Receiver<EngineOutput>,
    mut adopted: mpsc::UnboundedReceiver<u64>,
    engine: EngineHandle,
    nexus: Arc<SignedStateNexus>,
    transactions: mpsc::UnboundedSender<EventTransaction>,
    finalized: mpsc::UnboundedSender<ReservedSignedState>,
) -> Result<()> {
    loop {
        let item = tokio::select! {
            Some(round) = adopted.recv() => {
                reseed(&mut checkpointer, &engine, &nexus, round)?;
                continue;
            }
            item = output.recv() => item,
        };
        let Some(item) = item else {
            return Ok(());
        };
        match item {
            EngineOutput::Round(round) => {
                let outcome = checkpointer
                    .handle_round(&round)
                    .with_context(|| format!("building the signed state of round {}", round.round))?;
                if let Some(fatal) = outcome.iss.iter().find(|iss| checkpointer.is_fatal(iss)) {
                    return Err(anyhow!("catastrophic ISS in round {}", fatal.round));
                }
                if let Some(signature) = outcome.own_signature {
                    let _ = transactions.send(signature);
                }
                for state in outcome.completed {
                    let _ = finalized.send(state);
                }
            }
            EngineOutput::Stale(event) => {
                for tx in checkpointer.handle_stale(&event) {
                    let _ = transactions.send(tx);
                }
            }
            EngineOutput::Restored(round) => {
                debug!(target = "node", round, "consensus resumed after the adopted round");
            }
        }
    }
}

/// Move the ledger and consensus onto the state adopted in `round`.
fn reseed(checkpointer: &mut Checkpointer, engine: &EngineHandle, nexus: &SignedStateNexus, round: u64) -> Result<()> {
    let Some(state) = nexus.get("reseed").filter(|state| state.round() == round) else {
        warn!(target = "node", round, "adopted state was replaced before it could be used");
        return Ok(());
    };
    match checkpointer.adopt(state.state()) {
        Ok(point) => engine.restore(point).context("consensus engine stopped accepting restores"),
        Err(err) => {
            warn!(target = "node", round, error = %format!("{err:#}"), "could not continue from the adopted state");
            Ok(())
        }
    }
}

async fn metadata_task(
    mut finalized: mpsc::UnboundedReceiver<ReservedSignedState>,
    self_id: NodeId,
    book: Arc<AddressBook>,
    config: StateConfig,
) -> Result<()> {
    while let Some(state) = finalized.recv().await {
        let path = config.metadata_path(state.round());
        let book = book.clone();
        let written = tokio::task::spawn_blocking(move || {
            let metadata =
                SavedStateMetadata::from_signed_state(&state, self_id, &book, HASHWEAVE_VERSION, Timestamp::now());
            metadata.write(&path).map(|()| path)
        })
        .await?;
        match written {
            Ok(path) => debug!(target = "node", path = %path.display(), "wrote state metadata"),
            Err(err) => warn!(target = "node", error = %err, "could not write state metadata"),
        }
    }
    Ok(())
}

async fn creator_task(
    mut creator: EventCreator,
    engine: EngineHandle,
    mut synced: mpsc::UnboundedReceiver<NodeId>,
    mut transactions: mpsc::UnboundedReceiver<EventTransaction>,
    solo_period: Option<Duration>,
    cancel: CancellationToken,
) -> Result<()> {
    let mut solo = solo_period.map(tokio::time::interval);
    loop {
        let solo_tick = async {
            match solo.as_mut() {
                Some(interval) => {
                    interval.tick().await;
                }
                None => std::future::pending::<()>().await,
            }
        };
        let partner = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            Some(tx) = transactions.recv() => {
                creator.submit(tx);
                continue;
            }
            Some(peer) = synced.recv() => Some(peer),
            _ = solo_tick => None,
        };
        let other = partner.and_then(|peer| engine.dag().read().latest_by_creator(peer));
        creator.set_window(engine.window());
        let event = creator.create_event(other, Timestamp::now());
        engine
            .submit(event, None)
            .await
            .context("consensus engine stopped accepting events")?;
    }
}

async fn inbound_task(
    mut inbound: mpsc::Receiver<Connection>,
    self_id: NodeId,
    book: Arc<AddressBook>,
    protocols: ProtocolSet,
    config: NegotiatorConfig,
    cancel: CancellationToken,
) {
    while let Some(mut connection) = tokio::select! {
        _ = cancel.cancelled() => None,
        connection = inbound.recv() => connection,
    } {
        let peer = connection.peer();
        if !book.contains(peer) || peer >= self_id {
            warn!(target = "node", %peer, "refusing inbound connection");
            continue;
        }
        let protocols = protocols.clone();
        let config = config.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let result = match Negotiator::new(protocols.for_peer(peer), cancel) {
                Ok(mut negotiator) => negotiator.run_connection(&mut connection, &config).await,
                Err(err) => Err(err),
            };
            match result {
                Err(hashweave_network::NetworkError::Cancelled) => {}
                Err(err) => {
                    protocols.health.record_failure(peer);
                    warn!(target = "node", %peer, error = %err, "inbound connection ended");
                }
                Ok(()) => {}
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemberEntry;
    use hashweave_crypto::KeyPair;

    fn solo_config(listen: &str, dir: &std::path::Path) -> NodeConfig {
        let seed = [7u8; 32];
        let mut config = NodeConfig::default();
        config.node.key_seed = hex::encode(seed);
        config.node.listen = listen.to_string();
        config.members = vec![MemberEntry {
            node_id: 0,
            weight: 10,
            public_key: hex::encode(KeyPair::from_seed(seed).public_key()),
            endpoint: None,
        }];
        config.state.saved_state_dir = dir.to_path_buf();
        config
    }

    #[tokio::test]
    async fn cancellation_stops_the_node_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let config = solo_config("127.0.0.1:0", dir.path());
        config.validate().unwrap();
        let cancel = CancellationToken::new();
        let running = tokio::spawn(run(config, cancel.clone()));

        tokio::time::sleep(Duration::from_millis(300)).await;
        cancel.cancel();
        let outcome = tokio::time::timeout(Duration::from_secs(5), running).await.unwrap().unwrap();
        assert!(outcome.is_ok(), "unexpected failure: {outcome:?}");
    }

    #[tokio::test]
    async fn occupied_listen_address_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let listen = taken.local_addr().unwrap().to_string();
        let outcome = run(solo_config(&listen, dir.path()), CancellationToken::new()).await;
        let err = outcome.unwrap_err();
        assert!(format!("{err:#}").contains("binding"), "unexpected error: {err:#}");
    }
}
