//! Periodic heartbeat measuring the round trip time to a peer.

use crate::error::{NetworkError, Result};
use crate::health::HealthMonitor;
use crate::negotiator::Protocol;
use crate::wire::Connection;
use async_trait::async_trait;
use hashweave_types::{NodeId, Timestamp};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::trace;

pub const HEARTBEAT_PROTOCOL_ID: u8 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeartbeatMessage {
    Ping { sent: Timestamp, nonce: u64 },
    Pong { nonce: u64 },
}

pub struct HeartbeatProtocol {
    peer: NodeId,
    period: Duration,
    health: Arc<HealthMonitor>,
    last_beat: Option<Instant>,
    nonce: u64,
}

impl HeartbeatProtocol {
    pub fn new(peer: NodeId, period: Duration, health: Arc<HealthMonitor>) -> Self {
        Self {
            peer,
            period,
            health,
            last_beat: None,
            nonce: 0,
        }
    }

    fn due(&self) -> bool {
        self.last_beat.map_or(true, |at| at.elapsed() >= self.period)
    }

    async fn beat(&mut self, connection: &mut Connection) -> Result<Duration> {
        self.nonce = self.nonce.wrapping_add(1);
        let started = Instant::now();
        let ping = HeartbeatMessage::Ping {
            sent: Timestamp::now(),
            nonce: self.nonce,
        };
        let their_nonce = match connection.exchange(&ping).await? {
            HeartbeatMessage::Ping { sent, nonce } => {
                trace!(target = "heartbeat", peer = %self.peer, %sent, "ping");
                nonce
            }
            other => return Err(NetworkError::unexpected("ping", other)),
        };
        match connection.exchange(&HeartbeatMessage::Pong { nonce: their_nonce }).await? {
            HeartbeatMessage::Pong { nonce } if nonce == self.nonce => Ok(started.elapsed()),
            other => Err(NetworkError::unexpected("pong for our ping", other)),
        }
    }
}

#[async_trait]
impl Protocol for HeartbeatProtocol {
    fn id(&self) -> u8 {
        HEARTBEAT_PROTOCOL_ID
    }

    fn name(&self) -> &'static str {
        "heartbeat"
    }

    fn should_initiate(&mut self) -> bool {
        self.due()
    }

    fn should_accept(&mut self) -> bool {
        true
    }

    fn accept_on_simultaneous_initiate(&self) -> bool {
        true
    }

    async fn run_protocol(&mut self, connection: &mut Connection) -> Result<()> {
        let round_trip = self.beat(connection).await?;
        self.last_beat = Some(Instant::now());
        trace!(target = "heartbeat", peer = %self.peer, rtt_us = round_trip.as_micros() as u64, "heartbeat");
        self.health.record_success(self.peer, Some(round_trip));
        Ok(())
    }
}
