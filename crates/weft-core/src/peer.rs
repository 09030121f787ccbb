//! Peer records: health, reputation, and blacklist state.
//!
//! A peer is created on first valid handshake or route advertisement and
//! mutated by every send/receive outcome. The health score is a bounded
//! exponential moving average in `[0.0, 1.0]`: successes pull it up
//! (weighted by observed RTT), timeouts and errors pull it down. The score
//! drives relay eligibility and staleness removal; the violation counter
//! feeds abuse control.

use crate::frame::{now_millis, PeerId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::{Duration, Instant};

/// EMA weight for a single interaction outcome.
const HEALTH_ALPHA: f64 = 0.2;

/// Health score assigned on first contact.
const INITIAL_HEALTH: f64 = 0.5;

/// RTT at or above this contributes the weakest success quality.
const RTT_CEILING_MS: f64 = 2_000.0;

/// A known mesh participant.
#[derive(Debug, Clone)]
pub struct Peer {
    /// Peer identifier (Ed25519 public key bytes)
    pub id: PeerId,
    /// Reachable transport addresses (transport-specific opaque strings)
    pub addresses: BTreeSet<String>,
    health: f64,
    /// Smoothed round-trip estimate from ACKs
    rtt_ms: Option<f64>,
    /// Frames relayed on this peer's behalf
    pub relayed: u64,
    /// Protocol violations observed (signature failures, malformed frames)
    pub violations: u64,
    blacklisted_until: Option<Instant>,
    last_seen: Instant,
    last_heartbeat: Option<Instant>,
    first_seen_at_ms: u64,
}

impl Peer {
    /// Create a record for a newly discovered peer.
    #[must_use]
    pub fn new(id: PeerId) -> Self {
        Self {
            id,
            addresses: BTreeSet::new(),
            health: INITIAL_HEALTH,
            rtt_ms: None,
            relayed: 0,
            violations: 0,
            blacklisted_until: None,
            last_seen: Instant::now(),
            last_heartbeat: None,
            first_seen_at_ms: now_millis(),
        }
    }

    /// Current health score in `[0.0, 1.0]`.
    #[must_use]
    pub fn health(&self) -> f64 {
        self.health
    }

    /// Smoothed RTT estimate, if any ACK has been observed.
    #[must_use]
    pub fn rtt_ms(&self) -> Option<f64> {
        self.rtt_ms
    }

    /// Record a successful interaction, optionally with a measured RTT.
    ///
    /// Success quality is 1.0 for instantaneous round trips, decaying
    /// linearly toward 0.5 at [`RTT_CEILING_MS`]; a success never lowers
    /// the score below where a failure would put it.
    pub fn record_success(&mut self, rtt: Option<Duration>) {
        let quality = match rtt {
            Some(rtt) => {
                let ms = rtt.as_secs_f64() * 1000.0;
                self.rtt_ms = Some(match self.rtt_ms {
                    Some(prev) => prev * 0.8 + ms * 0.2,
                    None => ms,
                });
                1.0 - 0.5 * (ms / RTT_CEILING_MS).min(1.0)
            }
            None => 1.0,
        };
        self.health = (self.health * (1.0 - HEALTH_ALPHA) + quality * HEALTH_ALPHA).clamp(0.0, 1.0);
        self.last_seen = Instant::now();
    }

    /// Record a failed interaction (send error, timeout).
    pub fn record_failure(&mut self) {
        self.health = (self.health * (1.0 - HEALTH_ALPHA)).clamp(0.0, 1.0);
    }

    /// Record receipt of a heartbeat.
    pub fn record_heartbeat(&mut self) {
        let now = Instant::now();
        self.last_heartbeat = Some(now);
        self.last_seen = now;
    }

    /// Record any frame arrival from this peer.
    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    /// Record a protocol violation.
    pub fn record_violation(&mut self) {
        self.violations += 1;
        self.record_failure();
    }

    /// Record a frame relayed on this peer's behalf.
    pub fn record_relayed(&mut self) {
        self.relayed += 1;
    }

    /// Merge a transport address into the reachable set.
    pub fn add_address(&mut self, address: impl Into<String>) {
        self.addresses.insert(address.into());
    }

    /// Number of live transport paths known for this peer.
    #[must_use]
    pub fn path_count(&self) -> usize {
        self.addresses.len()
    }

    /// Whether the blacklist is currently in force.
    #[must_use]
    pub fn is_blacklisted(&self) -> bool {
        self.blacklisted_until
            .is_some_and(|until| Instant::now() < until)
    }

    /// Impose a time-bounded blacklist.
    pub fn blacklist_for(&mut self, duration: Duration) {
        self.blacklisted_until = Some(Instant::now() + duration);
    }

    /// Clear an expired blacklist entry; returns true if one was cleared.
    pub fn expire_blacklist(&mut self) -> bool {
        match self.blacklisted_until {
            Some(until) if Instant::now() >= until => {
                self.blacklisted_until = None;
                true
            }
            _ => false,
        }
    }

    /// Whether nothing has been heard from the peer within `timeout`.
    #[must_use]
    pub fn is_stale(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() >= timeout
    }

    /// Time since the last heartbeat, if any was seen.
    #[must_use]
    pub fn heartbeat_age(&self) -> Option<Duration> {
        self.last_heartbeat.map(|t| t.elapsed())
    }

    /// Snapshot for the upward API and persistence.
    #[must_use]
    pub fn snapshot(&self) -> PeerSnapshot {
        PeerSnapshot {
            id: self.id,
            addresses: self.addresses.iter().cloned().collect(),
            health: self.health,
            rtt_ms: self.rtt_ms,
            relayed: self.relayed,
            violations: self.violations,
            blacklisted: self.is_blacklisted(),
            first_seen_at_ms: self.first_seen_at_ms,
        }
    }
}

/// Immutable view of a peer, safe to hand to upper layers and to persist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerSnapshot {
    /// Peer identifier
    pub id: PeerId,
    /// Known transport addresses
    pub addresses: Vec<String>,
    /// Health score in `[0.0, 1.0]`
    pub health: f64,
    /// Smoothed RTT estimate in milliseconds
    pub rtt_ms: Option<f64>,
    /// Frames relayed on this peer's behalf
    pub relayed: u64,
    /// Violations observed
    pub violations: u64,
    /// Whether a blacklist was in force at snapshot time
    pub blacklisted: bool,
    /// Wall-clock first-contact time (ms since epoch)
    pub first_seen_at_ms: u64,
}
