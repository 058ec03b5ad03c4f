use hashweave_types::NodeId;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Health status for a peer connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerHealth {
    /// Heartbeats and syncs succeed
    Healthy,
    /// Some recent attempts failed
    Degraded,
    /// Too many consecutive failures, or nothing heard for too long
    Unhealthy,
}

/// Health check configuration
#[derive(Debug, Clone)]
pub struct HealthCheckConfig {
    /// Number of consecutive failures before marking unhealthy
    pub failure_threshold: u32,
    /// Time without a success before marking as stale
    pub stale_threshold: Duration,
    /// How long an unhealthy peer is skipped before it is tried again
    pub unavailable_backoff: Duration,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            stale_threshold: Duration::from_secs(60),
            unavailable_backoff: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
struct PeerHealthStatus {
    health: PeerHealth,
    consecutive_failures: u32,
    last_success: Instant,
    last_failure: Option<Instant>,
    last_round_trip: Option<Duration>,
    total_checks: u64,
    successful_checks: u64,
}

impl PeerHealthStatus {
    fn new(now: Instant) -> Self {
        Self {
            health: PeerHealth::Healthy,
            consecutive_failures: 0,
            last_success: now,
            last_failure: None,
            last_round_trip: None,
            total_checks: 0,
            successful_checks: 0,
        }
    }

    fn record_success(&mut self, round_trip: Option<Duration>, now: Instant) {
        self.consecutive_failures = 0;
        self.last_success = now;
        self.total_checks += 1;
        self.successful_checks += 1;
        self.health = PeerHealth::Healthy;
        if round_trip.is_some() {
            self.last_round_trip = round_trip;
        }
    }

    fn record_failure(&mut self, failure_threshold: u32, now: Instant) {
        self.consecutive_failures += 1;
        self.last_failure = Some(now);
        self.total_checks += 1;

        if self.consecutive_failures >= failure_threshold {
            self.health = PeerHealth::Unhealthy;
        } else if self.consecutive_failures >= failure_threshold.div_ceil(2) {
            self.health = PeerHealth::Degraded;
        }
    }

    fn is_stale(&self, stale_threshold: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.last_success) >= stale_threshold
    }

    fn success_rate(&self) -> f64 {
        if self.total_checks == 0 {
            return 1.0;
        }
        self.successful_checks as f64 / self.total_checks as f64
    }
}

/// Tracks connection health and heartbeat round trips per peer.
#[derive(Debug)]
pub struct HealthMonitor {
    config: HealthCheckConfig,
    peer_health: RwLock<HashMap<NodeId, PeerHealthStatus>>,
}

impl HealthMonitor {
    pub fn new(config: HealthCheckConfig) -> Self {
        Self {
            config,
            peer_health: RwLock::new(HashMap::new()),
        }
    }

    /// Record a successful exchange, optionally with its round trip time.
    pub fn record_success(&self, peer: NodeId, round_trip: Option<Duration>) {
        let now = Instant::now();
        let mut health = self.peer_health.write();
        health
            .entry(peer)
            .or_insert_with(|| PeerHealthStatus::new(now))
            .record_success(round_trip, now);
        debug!(target = "health", %peer, ?round_trip, "peer healthy");
    }

    pub fn record_failure(&self, peer: NodeId) {
        let now = Instant::now();
        let mut health = self.peer_health.write();
        let status = health.entry(peer).or_insert_with(|| PeerHealthStatus::new(now));
        status.record_failure(self.config.failure_threshold, now);

        match status.health {
            PeerHealth::Unhealthy => {
                warn!(
                    target = "health",
                    %peer,
                    failures = status.consecutive_failures,
                    "peer is unhealthy"
                );
            }
            PeerHealth::Degraded => {
                debug!(target = "health", %peer, "peer connection is degraded");
            }
            PeerHealth::Healthy => {}
        }
    }

    pub fn get_health(&self, peer: NodeId) -> PeerHealth {
        let now = Instant::now();
        self.peer_health
            .read()
            .get(&peer)
            .map(|status| {
                if status.is_stale(self.config.stale_threshold, now) {
                    PeerHealth::Unhealthy
                } else {
                    status.health
                }
            })
            .unwrap_or(PeerHealth::Healthy)
    }

    /// An unhealthy peer is unavailable until the backoff after its last
    /// failure has passed.
    pub fn is_available(&self, peer: NodeId) -> bool {
        let now = Instant::now();
        let health = self.peer_health.read();
        let Some(status) = health.get(&peer) else {
            return true;
        };
        match (status.health, status.last_failure) {
            (PeerHealth::Unhealthy, Some(failed)) => {
                now.saturating_duration_since(failed) >= self.config.unavailable_backoff
            }
            _ => true,
        }
    }

    pub fn round_trip(&self, peer: NodeId) -> Option<Duration> {
        self.peer_health.read().get(&peer).and_then(|s| s.last_round_trip)
    }

    pub fn get_stats(&self, peer: NodeId) -> Option<PeerHealthStats> {
        let health = self.peer_health.read();
        health.get(&peer).map(|status| PeerHealthStats {
            health: status.health,
            consecutive_failures: status.consecutive_failures,
            success_rate: status.success_rate(),
            total_checks: status.total_checks,
            last_round_trip: status.last_round_trip,
        })
    }

    pub fn unhealthy_peers(&self) -> Vec<NodeId> {
        let now = Instant::now();
        let mut peers: Vec<NodeId> = self
            .peer_health
            .read()
            .iter()
            .filter(|(_, status)| {
                status.health == PeerHealth::Unhealthy || status.is_stale(self.config.stale_threshold, now)
            })
            .map(|(peer, _)| *peer)
            .collect();
        peers.sort();
        peers
    }
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new(HealthCheckConfig::default())
    }
}

#[derive(Debug, Clone)]
pub struct PeerHealthStats {
    pub health: PeerHealth,
    pub consecutive_failures: u32,
    pub success_rate: f64,
    pub total_checks: u64,
    pub last_round_trip: Option<Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_degrade_then_mark_unhealthy() {
        let monitor = HealthMonitor::default();
        let peer = NodeId(3);
        assert_eq!(monitor.get_health(peer), PeerHealth::Healthy);

        monitor.record_success(peer, Some(Duration::from_millis(4)));
        monitor.record_failure(peer);
        monitor.record_failure(peer);
        assert_eq!(monitor.get_health(peer), PeerHealth::Degraded);
        assert!(monitor.is_available(peer));

        monitor.record_failure(peer);
        assert_eq!(monitor.get_health(peer), PeerHealth::Unhealthy);
        assert!(!monitor.is_available(peer));
        assert_eq!(monitor.unhealthy_peers(), vec![peer]);
        assert_eq!(monitor.round_trip(peer), Some(Duration::from_millis(4)));
    }

    #[test]
    fn success_restores_health() {
        let monitor = HealthMonitor::new(HealthCheckConfig {
            failure_threshold: 1,
            ..HealthCheckConfig::default()
        });
        let peer = NodeId(1);
        monitor.record_failure(peer);
        assert!(!monitor.is_available(peer));
        monitor.record_success(peer, None);
        assert!(monitor.is_available(peer));

        let stats = monitor.get_stats(peer).unwrap();
        assert_eq!(stats.total_checks, 2);
        assert!((stats.success_rate - 0.5).abs() < f64::EPSILON);
    }
}
