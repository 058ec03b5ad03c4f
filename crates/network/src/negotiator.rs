//! Per-connection protocol negotiation.
//!
//! Both sides repeatedly send one byte: the id of a protocol they want to
//! initiate, or [`KEEPALIVE`]. A side that receives an initiation answers with
//! [`ACCEPT`] or [`REJECT`]. When both initiate at once, the same protocol
//! runs only if it allows simultaneous initiation; otherwise the lower id
//! keeps the initiator role and the other side becomes its acceptor.
//!
//! A rejected protocol is not offered again during the same negotiation, so
//! the initiator falls through to its next candidate. A negotiation ends when
//! a protocol has run or when both sides sent a keepalive.

use crate::config::NegotiatorConfig;
use crate::error::{NetworkError, Result};
use crate::health::HealthMonitor;
use crate::wire::Connection;
use async_trait::async_trait;
use hashweave_types::NodeId;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

pub const KEEPALIVE: u8 = 255;
pub const ACCEPT: u8 = 254;
pub const REJECT: u8 = 253;
/// Protocol ids must stay below the control bytes.
pub const MAX_PROTOCOL_ID: u8 = REJECT - 1;

#[async_trait]
pub trait Protocol: Send + Sync {
    fn id(&self) -> u8;

    fn name(&self) -> &'static str;

    /// Called before offering the protocol. May acquire resources that are
    /// held until the protocol runs or [`Protocol::initiate_failed`].
    fn should_initiate(&mut self) -> bool;

    /// The peer rejected or pre-empted our initiation.
    fn initiate_failed(&mut self) {}

    fn should_accept(&mut self) -> bool;

    fn accept_on_simultaneous_initiate(&self) -> bool;

    async fn run_protocol(&mut self, connection: &mut Connection) -> Result<()>;
}

/// Outcome of a single negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Negotiated {
    /// The protocol with this id ran to completion.
    Ran(u8),
    /// Neither side wanted to run anything.
    Idle,
}

/// The candidate protocols of one connection, in preference order.
pub struct Negotiator {
    protocols: Vec<Box<dyn Protocol>>,
    cancel: CancellationToken,
}

impl Negotiator {
    pub fn new(protocols: Vec<Box<dyn Protocol>>, cancel: CancellationToken) -> Result<Self> {
        let mut ids = HashSet::new();
        for protocol in &protocols {
            if protocol.id() > MAX_PROTOCOL_ID {
                return Err(NetworkError::Negotiation(format!(
                    "protocol id {} collides with control bytes",
                    protocol.id()
                )));
            }
            if !ids.insert(protocol.id()) {
                return Err(NetworkError::Negotiation(format!(
                    "protocol id {} registered twice",
                    protocol.id()
                )));
            }
        }
        Ok(Self { protocols, cancel })
    }

    fn index_of(&self, id: u8) -> Result<usize> {
        self.protocols
            .iter()
            .position(|p| p.id() == id)
            .ok_or_else(|| NetworkError::Negotiation(format!("peer sent unknown protocol id {id}")))
    }

    async fn cancellable<T>(&self, future: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(NetworkError::Cancelled),
            result = future => result,
        }
    }

    async fn read_reply(&self, connection: &mut Connection) -> Result<bool> {
        match self.cancellable(connection.reader.read_byte()).await? {
            ACCEPT => Ok(true),
            REJECT => Ok(false),
            other => Err(NetworkError::Negotiation(format!(
                "expected accept or reject, received {other}"
            ))),
        }
    }

    async fn run(&mut self, index: usize, connection: &mut Connection) -> Result<Negotiated> {
        let protocol = &mut self.protocols[index];
        let id = protocol.id();
        debug!(target = "negotiator", peer = %connection.peer(), protocol = protocol.name(), "running protocol");
        let cancel = self.cancel.clone();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(NetworkError::Cancelled),
            result = protocol.run_protocol(connection) => result.map(|()| Negotiated::Ran(id)),
        }
    }

    /// Respond to the peer's initiation of `theirs`.
    async fn accept(&mut self, theirs: usize, connection: &mut Connection) -> Result<Option<Negotiated>> {
        if self.protocols[theirs].should_accept() {
            self.cancellable(connection.writer.write_byte(ACCEPT)).await?;
            return self.run(theirs, connection).await.map(Some);
        }
        trace!(
            target = "negotiator",
            peer = %connection.peer(),
            protocol = self.protocols[theirs].name(),
            "rejecting initiation"
        );
        self.cancellable(connection.writer.write_byte(REJECT)).await?;
        Ok(None)
    }

    /// Negotiate once and run at most one protocol.
    pub async fn negotiate(&mut self, connection: &mut Connection) -> Result<Negotiated> {
        let mut rejected: HashSet<u8> = HashSet::new();
        loop {
            let ours = self
                .protocols
                .iter_mut()
                .position(|p| !rejected.contains(&p.id()) && p.should_initiate());
            let sent = ours.map(|i| self.protocols[i].id()).unwrap_or(KEEPALIVE);

            let received = self
                .cancellable(async {
                    let (written, received) = tokio::join!(
                        connection.writer.write_byte(sent),
                        connection.reader.read_byte()
                    );
                    written?;
                    received
                })
                .await?;

            let theirs = match received {
                KEEPALIVE => None,
                id if id <= MAX_PROTOCOL_ID => Some(self.index_of(id)?),
                other => {
                    return Err(NetworkError::Negotiation(format!(
                        "expected protocol id or keepalive, received {other}"
                    )))
                }
            };

            match (ours, theirs) {
                (None, None) => return Ok(Negotiated::Idle),
                (None, Some(theirs)) => {
                    if let Some(done) = self.accept(theirs, connection).await? {
                        return Ok(done);
                    }
                }
                (Some(ours), None) => {
                    if self.read_reply(connection).await? {
                        return self.run(ours, connection).await;
                    }
                    self.protocols[ours].initiate_failed();
                    rejected.insert(sent);
                }
                (Some(ours), Some(theirs)) if ours == theirs && self.protocols[ours].accept_on_simultaneous_initiate() => {
                    return self.run(ours, connection).await;
                }
                (Some(ours), Some(theirs)) => {
                    let their_id = self.protocols[theirs].id();
                    if their_id < sent {
                        self.protocols[ours].initiate_failed();
                        if let Some(done) = self.accept(theirs, connection).await? {
                            return Ok(done);
                        }
                    } else if sent < their_id {
                        if self.read_reply(connection).await? {
                            return self.run(ours, connection).await;
                        }
                        self.protocols[ours].initiate_failed();
                        rejected.insert(sent);
                    } else {
                        // Same protocol, but it cannot run with two initiators.
                        self.protocols[ours].initiate_failed();
                        rejected.insert(sent);
                    }
                }
            }
        }
    }

    /// Negotiate and run protocols until cancelled or the connection fails.
    pub async fn run_connection(&mut self, connection: &mut Connection, config: &NegotiatorConfig) -> Result<()> {
        loop {
            match self.negotiate(connection).await {
                Ok(Negotiated::Ran(_)) => {}
                Ok(Negotiated::Idle) => {
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Err(NetworkError::Cancelled),
                        _ = tokio::time::sleep(config.idle_sleep) => {}
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Keep a negotiator running against one peer: connect, negotiate until the
/// connection fails, sleep, and retry on a fresh connection. Failures mark
/// the peer in `health`. Returns when cancelled.
pub async fn maintain_connection<C, CFut, P>(
    peer: NodeId,
    mut connect: C,
    mut protocols: P,
    health: Arc<HealthMonitor>,
    config: NegotiatorConfig,
    cancel: CancellationToken,
) where
    C: FnMut() -> CFut,
    CFut: Future<Output = Result<Connection>>,
    P: FnMut() -> Vec<Box<dyn Protocol>>,
{
    while !cancel.is_cancelled() {
        let attempt = async {
            let mut connection = tokio::select! {
                _ = cancel.cancelled() => return Err(NetworkError::Cancelled),
                connection = connect() => connection?,
            };
            if connection.peer() != peer {
                return Err(NetworkError::Negotiation(format!(
                    "expected peer {peer}, connected to {}",
                    connection.peer()
                )));
            }
            let mut negotiator = Negotiator::new(protocols(), cancel.clone())?;
            negotiator.run_connection(&mut connection, &config).await
        };
        match attempt.await {
            Err(NetworkError::Cancelled) => return,
            Err(err) => {
                health.record_failure(peer);
                warn!(target = "negotiator", %peer, error = %err, "connection failed, retrying");
            }
            Ok(()) => {}
        }
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(config.sleep_after_failed_negotiation) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::connected_pair;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts runs, accepts only when told to.
    struct StubProtocol {
        id: u8,
        initiate: bool,
        accept: bool,
        simultaneous: bool,
        runs: Arc<AtomicUsize>,
        failed: Arc<AtomicUsize>,
    }

    impl StubProtocol {
        fn new(id: u8, initiate: bool, accept: bool) -> (Box<dyn Protocol>, Arc<AtomicUsize>, Arc<AtomicUsize>) {
            let runs = Arc::new(AtomicUsize::new(0));
            let failed = Arc::new(AtomicUsize::new(0));
            let stub = StubProtocol {
                id,
                initiate,
                accept,
                simultaneous: false,
                runs: runs.clone(),
                failed: failed.clone(),
            };
            (Box::new(stub), runs, failed)
        }
    }

    #[async_trait]
    impl Protocol for StubProtocol {
        fn id(&self) -> u8 {
            self.id
        }

        fn name(&self) -> &'static str {
            "stub"
        }

        fn should_initiate(&mut self) -> bool {
            self.initiate
        }

        fn initiate_failed(&mut self) {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }

        fn should_accept(&mut self) -> bool {
            self.accept
        }

        fn accept_on_simultaneous_initiate(&self) -> bool {
            self.simultaneous
        }

        async fn run_protocol(&mut self, connection: &mut Connection) -> Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            let _: u8 = connection.exchange(&self.id).await?;
            Ok(())
        }
    }

    #[tokio::test]
    async fn falls_through_rejected_candidates() {
        let (mut client_conn, mut server_conn) = connected_pair(NodeId(1), NodeId(2), 1024, 1024);
        let (p2, runs2, failed2) = StubProtocol::new(2, true, false);
        let (p0, runs0, _) = StubProtocol::new(0, true, false);
        let (p1, runs1, _) = StubProtocol::new(1, true, false);
        let mut client = Negotiator::new(vec![p2, p0, p1], CancellationToken::new()).unwrap();

        let (s2, _, _) = StubProtocol::new(2, false, false);
        let (s0, server_runs0, _) = StubProtocol::new(0, false, true);
        let (s1, _, _) = StubProtocol::new(1, false, false);
        let mut server = Negotiator::new(vec![s2, s0, s1], CancellationToken::new()).unwrap();

        let (client_result, server_result) = tokio::join!(
            client.negotiate(&mut client_conn),
            server.negotiate(&mut server_conn)
        );
        assert_eq!(client_result.unwrap(), Negotiated::Ran(0));
        assert_eq!(server_result.unwrap(), Negotiated::Ran(0));
        assert_eq!(runs0.load(Ordering::SeqCst), 1);
        assert_eq!(server_runs0.load(Ordering::SeqCst), 1);
        assert_eq!(runs1.load(Ordering::SeqCst), 0);
        assert_eq!(runs2.load(Ordering::SeqCst), 0);
        assert_eq!(failed2.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn lower_id_wins_simultaneous_initiation() {
        let (mut a_conn, mut b_conn) = connected_pair(NodeId(1), NodeId(2), 1024, 1024);
        let (a0, a_runs0, _) = StubProtocol::new(0, false, true);
        let (a3, a_runs3, a_failed3) = StubProtocol::new(3, true, true);
        let mut a = Negotiator::new(vec![a0, a3], CancellationToken::new()).unwrap();
        let (b0, b_runs0, _) = StubProtocol::new(0, true, true);
        let (b3, _, _) = StubProtocol::new(3, false, true);
        let mut b = Negotiator::new(vec![b0, b3], CancellationToken::new()).unwrap();

        let (ra, rb) = tokio::join!(a.negotiate(&mut a_conn), b.negotiate(&mut b_conn));
        assert_eq!(ra.unwrap(), Negotiated::Ran(0));
        assert_eq!(rb.unwrap(), Negotiated::Ran(0));
        assert_eq!(a_runs0.load(Ordering::SeqCst), 1);
        assert_eq!(b_runs0.load(Ordering::SeqCst), 1);
        assert_eq!(a_runs3.load(Ordering::SeqCst), 0);
        assert_eq!(a_failed3.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn both_idle_ends_negotiation() {
        let (mut a_conn, mut b_conn) = connected_pair(NodeId(1), NodeId(2), 1024, 1024);
        let (pa, _, _) = StubProtocol::new(0, false, true);
        let (pb, _, _) = StubProtocol::new(0, false, true);
        let mut a = Negotiator::new(vec![pa], CancellationToken::new()).unwrap();
        let mut b = Negotiator::new(vec![pb], CancellationToken::new()).unwrap();
        let (ra, rb) = tokio::join!(a.negotiate(&mut a_conn), b.negotiate(&mut b_conn));
        assert_eq!(ra.unwrap(), Negotiated::Idle);
        assert_eq!(rb.unwrap(), Negotiated::Idle);
    }

    #[tokio::test]
    async fn unknown_protocol_id_is_an_error() {
        let (mut a_conn, mut b_conn) = connected_pair(NodeId(1), NodeId(2), 1024, 1024);
        let (pa, _, _) = StubProtocol::new(7, true, true);
        let (pb, _, _) = StubProtocol::new(0, false, true);
        let mut a = Negotiator::new(vec![pa], CancellationToken::new()).unwrap();
        let mut b = Negotiator::new(vec![pb], CancellationToken::new()).unwrap();
        let rb = tokio::select! {
            rb = b.negotiate(&mut b_conn) => rb,
            _ = a.negotiate(&mut a_conn) => panic!("initiator cannot finish without a reply"),
        };
        assert!(matches!(rb, Err(NetworkError::Negotiation(_))));
    }

    #[tokio::test]
    async fn cancellation_aborts_a_blocked_exchange() {
        let (mut a_conn, _b_conn) = connected_pair(NodeId(1), NodeId(2), 1024, 1024);
        let cancel = CancellationToken::new();
        let (pa, _, _) = StubProtocol::new(0, true, true);
        let mut a = Negotiator::new(vec![pa], cancel.clone()).unwrap();
        cancel.cancel();
        assert!(matches!(a.negotiate(&mut a_conn).await, Err(NetworkError::Cancelled)));
    }

    #[test]
    fn rejects_ids_in_control_range() {
        let (p, _, _) = StubProtocol::new(KEEPALIVE, true, true);
        assert!(Negotiator::new(vec![p], CancellationToken::new()).is_err());
    }
}
