//! Peer table and flood-routing decisions.
//!
//! The routing table exclusively owns every [`Peer`] record and drives
//! TTL-bounded flood forwarding: a relayed frame goes to every currently
//! healthy, non-blacklisted peer except the one it arrived from, with
//! multi-path peers preferred in fan-out order. Uses `DashMap` for
//! lock-free per-key access on the hot path.
//!
//! Heartbeat cadence is adaptive: the interval shortens while a partition
//! is suspected (most peers silent) and stretches back out while the mesh
//! is stable, trading liveness detection against bandwidth.

use crate::frame::PeerId;
use crate::peer::{Peer, PeerSnapshot};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Routing and liveness policy.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Minimum health score for relay eligibility
    pub health_floor: f64,
    /// Remove peers silent for this long
    pub silence_timeout: Duration,
    /// Tightest adaptive heartbeat interval
    pub heartbeat_min: Duration,
    /// Widest adaptive heartbeat interval
    pub heartbeat_max: Duration,
    /// Fraction of peers silent beyond twice the current heartbeat
    /// interval that counts as a suspected partition
    pub partition_threshold: f64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            health_floor: 0.15,
            silence_timeout: Duration::from_secs(180),
            heartbeat_min: Duration::from_secs(5),
            heartbeat_max: Duration::from_secs(60),
            partition_threshold: 0.5,
        }
    }
}

/// Peer table plus flood fan-out selection.
pub struct RoutingTable {
    config: RouterConfig,
    peers: DashMap<PeerId, Peer>,
    frames_relayed: AtomicU64,
    frames_delivered: AtomicU64,
}

impl RoutingTable {
    /// Create an empty table.
    #[must_use]
    pub fn new(config: RouterConfig) -> Self {
        Self {
            config,
            peers: DashMap::new(),
            frames_relayed: AtomicU64::new(0),
            frames_delivered: AtomicU64::new(0),
        }
    }

    /// Ensure a record exists for the peer, creating it on first contact.
    pub fn upsert(&self, id: PeerId) {
        self.peers.entry(id).or_insert_with(|| {
            tracing::debug!(peer = %id, "peer discovered");
            Peer::new(id)
        });
    }

    /// Whether the peer is known.
    #[must_use]
    pub fn contains(&self, id: &PeerId) -> bool {
        self.peers.contains_key(id)
    }

    /// Number of known peers.
    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Run a mutation against one peer record, creating it if absent.
    pub fn with_peer<R>(&self, id: PeerId, f: impl FnOnce(&mut Peer) -> R) -> R {
        let mut entry = self.peers.entry(id).or_insert_with(|| Peer::new(id));
        f(entry.value_mut())
    }

    /// Run a read against one peer record, if present.
    pub fn read_peer<R>(&self, id: &PeerId, f: impl FnOnce(&Peer) -> R) -> Option<R> {
        self.peers.get(id).map(|entry| f(entry.value()))
    }

    /// Health score for the peer, if known.
    #[must_use]
    pub fn peer_health(&self, id: &PeerId) -> Option<f64> {
        self.read_peer(id, Peer::health)
    }

    /// Flood fan-out: every healthy, non-blacklisted, non-stale peer except
    /// the one the frame arrived from, ordered by relay preference
    /// (peers with more live transport paths first, then by health).
    #[must_use]
    pub fn relay_targets(&self, exclude: Option<&PeerId>) -> Vec<PeerId> {
        let mut candidates: Vec<(PeerId, usize, f64)> = self
            .peers
            .iter()
            .filter(|entry| {
                let peer = entry.value();
                Some(entry.key()) != exclude
                    && !peer.is_blacklisted()
                    && peer.health() >= self.config.health_floor
                    && !peer.is_stale(self.config.silence_timeout)
            })
            .map(|entry| {
                let peer = entry.value();
                (*entry.key(), peer.path_count(), peer.health())
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.1.cmp(&a.1)
                .then(b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal))
        });
        candidates.into_iter().map(|(id, _, _)| id).collect()
    }

    /// Count a relayed frame against the originating peer's reputation.
    pub fn note_relayed_for(&self, origin: &PeerId) {
        self.frames_relayed.fetch_add(1, Ordering::Relaxed);
        if let Some(mut entry) = self.peers.get_mut(origin) {
            entry.value_mut().record_relayed();
        }
    }

    /// Count a locally delivered frame.
    pub fn note_delivered(&self) {
        self.frames_delivered.fetch_add(1, Ordering::Relaxed);
    }

    /// Total frames relayed since construction.
    #[must_use]
    pub fn relayed_count(&self) -> u64 {
        self.frames_relayed.load(Ordering::Relaxed)
    }

    /// Total frames delivered locally since construction.
    #[must_use]
    pub fn delivered_count(&self) -> u64 {
        self.frames_delivered.load(Ordering::Relaxed)
    }

    /// Drop peers that have been silent past the configured timeout.
    /// Returns the removed ids so session state can be torn down with them.
    pub fn remove_stale(&self) -> Vec<PeerId> {
        let timeout = self.config.silence_timeout;
        let stale: Vec<PeerId> = self
            .peers
            .iter()
            .filter(|entry| entry.value().is_stale(timeout) && !entry.value().is_blacklisted())
            .map(|entry| *entry.key())
            .collect();
        for id in &stale {
            self.peers.remove(id);
            tracing::debug!(peer = %id, "removing stale peer");
        }
        stale
    }

    /// Clear expired blacklist entries (automatic rehabilitation).
    pub fn expire_blacklists(&self) {
        for mut entry in self.peers.iter_mut() {
            if entry.value_mut().expire_blacklist() {
                tracing::info!(peer = %entry.key(), "blacklist expired, peer rehabilitated");
            }
        }
    }

    /// Fraction of known peers silent beyond `window` (heartbeat-based
    /// partition signal). Returns 0.0 with no peers.
    #[must_use]
    pub fn silent_fraction(&self, window: Duration) -> f64 {
        let total = self.peers.len();
        if total == 0 {
            return 0.0;
        }
        let silent = self
            .peers
            .iter()
            .filter(|entry| entry.value().is_stale(window))
            .count();
        silent as f64 / total as f64
    }

    /// Whether the silent fraction crosses the partition threshold for the
    /// given observation window.
    #[must_use]
    pub fn partition_suspected(&self, window: Duration) -> bool {
        self.peer_count() > 0 && self.silent_fraction(window) >= self.config.partition_threshold
    }

    /// Snapshots of every known peer.
    #[must_use]
    pub fn snapshots(&self) -> Vec<PeerSnapshot> {
        self.peers.iter().map(|entry| entry.value().snapshot()).collect()
    }

    /// The configured policy.
    #[must_use]
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }
}

/// Adaptive heartbeat cadence.
///
/// Starts at the widest interval; every observation either tightens it
/// (suspected partition, halve toward the minimum) or relaxes it (stable
/// mesh, stretch by half toward the maximum).
#[derive(Debug, Clone)]
pub struct HeartbeatSchedule {
    current: Duration,
    min: Duration,
    max: Duration,
}

impl HeartbeatSchedule {
    /// Build from router policy, starting wide.
    #[must_use]
    pub fn new(config: &RouterConfig) -> Self {
        Self {
            current: config.heartbeat_max,
            min: config.heartbeat_min,
            max: config.heartbeat_max,
        }
    }

    /// The interval to sleep until the next heartbeat.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.current
    }

    /// Tighten the cadence under suspected partition.
    pub fn on_partition_suspected(&mut self) {
        self.current = (self.current / 2).max(self.min);
    }

    /// Relax the cadence while peers are stable.
    pub fn on_stable(&mut self) {
        self.current = (self.current + self.current / 2).min(self.max);
    }
}
