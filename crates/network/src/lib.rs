//! Peer connections for hashweave: framing, protocol negotiation, gossip
//! sync, heartbeats and reconnect.

pub mod config;
pub mod deduplication;
pub mod error;
pub mod health;
pub mod heartbeat;
pub mod negotiator;
pub mod peers;
pub mod permits;
pub mod reconnect;
pub mod resubmit;
pub mod sync;
pub mod wire;

pub use config::{NegotiatorConfig, ReconnectConfig, SyncConfig};
pub use deduplication::PeerEventMemory;
pub use error::{NetworkError, Result, SyncAbort};
pub use health::{HealthCheckConfig, HealthMonitor, PeerHealth, PeerHealthStats};
pub use heartbeat::{HeartbeatMessage, HeartbeatProtocol, HEARTBEAT_PROTOCOL_ID};
pub use negotiator::{maintain_connection, Negotiated, Negotiator, Protocol, ACCEPT, KEEPALIVE, REJECT};
pub use peers::{Peer, PeerDirectory};
pub use permits::{SyncPermit, SyncPermits};
pub use reconnect::{
    FallenBehindMonitor, ReconnectContext, ReconnectMessage, ReconnectProtocol, StateTransfer, RECONNECT_PROTOCOL_ID,
};
pub use resubmit::StateSignatureResubmitter;
pub use sync::{ShadowgraphSynchronizer, SyncMessage, SyncOutcome, SyncProtocol, SYNC_PROTOCOL_ID};
pub use wire::{connected_pair, AsyncStream, BoxedStream, Connection, FrameReader, FrameWriter};
