//! Abuse control: rate limiting, flood detection, and blacklisting.
//!
//! Every inbound frame passes admission before any further processing.
//! Per-peer sliding windows count received frames and observed violations
//! (signature failures, malformed frames, excessive identical-content
//! bursts, route-advert floods). Crossing the violation threshold imposes
//! a blacklist whose duration doubles on each repeat offense, capped, and
//! expires automatically so a peer that was briefly unreachable and
//! retried heavily is not excluded forever.
//!
//! Flood detection distinguishes benign retry storms from amplification:
//! a duplicate the dedup cache suppresses is free until one peer resends
//! the *same* fingerprint past the burst threshold inside the window.

use crate::frame::{FrameType, PeerId};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Admission verdict for one inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Process the frame
    Admitted,
    /// Over the rate budget; drop silently, no violation
    RateLimited,
    /// Sender is blacklisted; drop silently
    Blacklisted,
}

/// Abuse-control policy.
#[derive(Debug, Clone)]
pub struct AbuseConfig {
    /// Frames admitted per peer per window
    pub max_frames_per_window: u32,
    /// Sliding window for the frame counter
    pub frame_window: Duration,
    /// Violations inside the window that trigger a blacklist
    pub violation_threshold: u32,
    /// Sliding window for the violation counter
    pub violation_window: Duration,
    /// First-offense blacklist duration; doubles per repeat offense
    pub base_blacklist: Duration,
    /// Ceiling for the exponential blacklist duration
    pub max_blacklist: Duration,
    /// Identical dedup-key resends from one peer per window that count
    /// as a violation (amplification, not a benign retry)
    pub identical_burst_threshold: u32,
    /// Route advertisements per peer per window before the excess counts
    /// as a violation
    pub advert_burst_threshold: u32,
}

impl Default for AbuseConfig {
    fn default() -> Self {
        Self {
            max_frames_per_window: 1000,
            frame_window: Duration::from_secs(1),
            violation_threshold: 5,
            violation_window: Duration::from_secs(60),
            base_blacklist: Duration::from_secs(30),
            max_blacklist: Duration::from_secs(3600),
            identical_burst_threshold: 10,
            advert_burst_threshold: 20,
        }
    }
}

/// Abuse-control metrics.
#[derive(Debug, Default, Clone)]
pub struct AbuseMetrics {
    /// Frames admitted
    pub admitted: u64,
    /// Frames dropped at the rate limit
    pub rate_limited: u64,
    /// Frames dropped because the sender was blacklisted
    pub blacklisted_drops: u64,
    /// Violations recorded
    pub violations: u64,
    /// Blacklists imposed
    pub blacklists_imposed: u64,
}

#[derive(Default)]
struct PeerAbuseState {
    frames: VecDeque<Instant>,
    violations: VecDeque<Instant>,
    adverts: VecDeque<Instant>,
    identical: HashMap<[u8; 32], (u32, Instant)>,
    offenses: u32,
    blacklisted_until: Option<Instant>,
}

impl PeerAbuseState {
    fn trim(window: Duration, series: &mut VecDeque<Instant>, now: Instant) {
        while let Some(front) = series.front() {
            if now.duration_since(*front) >= window {
                series.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Per-peer sliding-window admission control.
pub struct AbuseControl {
    config: AbuseConfig,
    peers: RwLock<HashMap<PeerId, PeerAbuseState>>,
    metrics: RwLock<AbuseMetrics>,
}

impl AbuseControl {
    /// Create with the given policy.
    #[must_use]
    pub fn new(config: AbuseConfig) -> Self {
        Self {
            config,
            peers: RwLock::new(HashMap::new()),
            metrics: RwLock::new(AbuseMetrics::default()),
        }
    }

    /// Admit or reject one inbound frame from `peer`.
    ///
    /// Route adverts are additionally counted against the advert burst
    /// budget; the excess registers as violations and may blacklist the
    /// peer on the spot. Returns the verdict together with a blacklist
    /// duration when this very frame tipped the peer over the threshold
    /// (so the caller can mirror the ban into the peer table).
    pub async fn admit(&self, peer: &PeerId, kind: FrameType) -> (Admission, Option<Duration>) {
        let now = Instant::now();
        let mut peers = self.peers.write().await;
        let state = peers.entry(*peer).or_default();

        if let Some(until) = state.blacklisted_until {
            if now < until {
                self.metrics.write().await.blacklisted_drops += 1;
                return (Admission::Blacklisted, None);
            }
            state.blacklisted_until = None;
        }

        PeerAbuseState::trim(self.config.frame_window, &mut state.frames, now);
        if state.frames.len() as u32 >= self.config.max_frames_per_window {
            self.metrics.write().await.rate_limited += 1;
            tracing::debug!(peer = %peer, "rate limited");
            return (Admission::RateLimited, None);
        }
        state.frames.push_back(now);

        let mut imposed = None;
        if kind == FrameType::RouteAdvert {
            PeerAbuseState::trim(self.config.violation_window, &mut state.adverts, now);
            state.adverts.push_back(now);
            if state.adverts.len() as u32 > self.config.advert_burst_threshold {
                tracing::warn!(peer = %peer, "route advertisement flood");
                imposed = self.record_violation_locked(state, now).await;
            }
        }

        match imposed {
            Some(duration) => (Admission::Blacklisted, Some(duration)),
            None => {
                self.metrics.write().await.admitted += 1;
                (Admission::Admitted, None)
            }
        }
    }

    /// Record a violation (signature failure, malformed frame, hostile
    /// decrypt) against the peer. Returns the blacklist duration if this
    /// violation crossed the threshold.
    pub async fn record_violation(&self, peer: &PeerId) -> Option<Duration> {
        let now = Instant::now();
        let mut peers = self.peers.write().await;
        let state = peers.entry(*peer).or_default();
        self.record_violation_locked(state, now).await
    }

    async fn record_violation_locked(
        &self,
        state: &mut PeerAbuseState,
        now: Instant,
    ) -> Option<Duration> {
        PeerAbuseState::trim(self.config.violation_window, &mut state.violations, now);
        state.violations.push_back(now);
        self.metrics.write().await.violations += 1;

        if (state.violations.len() as u32) < self.config.violation_threshold {
            return None;
        }

        state.offenses += 1;
        state.violations.clear();
        // base * 2^(offense-1), capped
        let exponent = (state.offenses - 1).min(10);
        let duration = self
            .config
            .base_blacklist
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.config.max_blacklist);
        state.blacklisted_until = Some(now + duration);
        self.metrics.write().await.blacklists_imposed += 1;
        Some(duration)
    }

    /// Note that `peer` resent content the dedup cache already holds.
    ///
    /// Returns a blacklist duration when the resend pattern crossed the
    /// burst threshold; below the threshold duplicates are free (benign
    /// retry storm).
    pub async fn note_duplicate(&self, peer: &PeerId, dedup_key: [u8; 32]) -> Option<Duration> {
        let now = Instant::now();
        let mut peers = self.peers.write().await;
        let state = peers.entry(*peer).or_default();

        let entry = state.identical.entry(dedup_key).or_insert((0, now));
        if now.duration_since(entry.1) >= self.config.violation_window {
            *entry = (0, now);
        }
        entry.0 += 1;

        if entry.0 > self.config.identical_burst_threshold {
            tracing::warn!(peer = %peer, "identical-content flood");
            state.identical.remove(&dedup_key);
            return self.record_violation_locked(state, now).await;
        }
        None
    }

    /// Whether the peer is currently blacklisted here.
    pub async fn is_blacklisted(&self, peer: &PeerId) -> bool {
        let peers = self.peers.read().await;
        peers
            .get(peer)
            .and_then(|s| s.blacklisted_until)
            .is_some_and(|until| Instant::now() < until)
    }

    /// Drop per-peer state that has gone fully quiet (no frames in the
    /// violation window, no active blacklist).
    pub async fn cleanup(&self) {
        let now = Instant::now();
        let violation_window = self.config.violation_window;
        let mut peers = self.peers.write().await;
        peers.retain(|_, state| {
            let banned = state
                .blacklisted_until
                .is_some_and(|until| now < until);
            let recent = state
                .frames
                .back()
                .is_some_and(|t| now.duration_since(*t) < violation_window);
            banned || recent
        });
        for state in peers.values_mut() {
            let window = self.config.violation_window;
            state
                .identical
                .retain(|_, (_, started)| now.duration_since(*started) < window);
        }
    }

    /// Current metrics snapshot.
    pub async fn metrics(&self) -> AbuseMetrics {
        self.metrics.read().await.clone()
    }

    /// Number of peers with live abuse state.
    pub async fn tracked_peers(&self) -> usize {
        self.peers.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(byte: u8) -> PeerId {
        PeerId::from_bytes([byte; 32])
    }

    fn control(config: AbuseConfig) -> AbuseControl {
        AbuseControl::new(config)
    }

    #[tokio::test]
    async fn test_admit_within_budget() {
        let c = control(AbuseConfig::default());
        for _ in 0..10 {
            let (verdict, _) = c.admit(&id(1), FrameType::Data).await;
            assert_eq!(verdict, Admission::Admitted);
        }
        assert_eq!(c.metrics().await.admitted, 10);
    }

    #[tokio::test]
    async fn test_rate_limit_over_budget() {
        let c = control(AbuseConfig {
            max_frames_per_window: 3,
            ..Default::default()
        });

        for _ in 0..3 {
            assert_eq!(c.admit(&id(1), FrameType::Data).await.0, Admission::Admitted);
        }
        assert_eq!(c.admit(&id(1), FrameType::Data).await.0, Admission::RateLimited);

        // Another peer is unaffected.
        assert_eq!(c.admit(&id(2), FrameType::Data).await.0, Admission::Admitted);
    }

    #[tokio::test]
    async fn test_rate_window_slides() {
        let c = control(AbuseConfig {
            max_frames_per_window: 2,
            frame_window: Duration::from_millis(20),
            ..Default::default()
        });

        assert_eq!(c.admit(&id(1), FrameType::Data).await.0, Admission::Admitted);
        assert_eq!(c.admit(&id(1), FrameType::Data).await.0, Admission::Admitted);
        assert_eq!(c.admit(&id(1), FrameType::Data).await.0, Admission::RateLimited);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(c.admit(&id(1), FrameType::Data).await.0, Admission::Admitted);
    }

    #[tokio::test]
    async fn test_violations_trigger_blacklist() {
        let c = control(AbuseConfig {
            violation_threshold: 3,
            ..Default::default()
        });

        assert!(c.record_violation(&id(1)).await.is_none());
        assert!(c.record_violation(&id(1)).await.is_none());
        let imposed = c.record_violation(&id(1)).await;
        assert_eq!(imposed, Some(Duration::from_secs(30)));

        assert!(c.is_blacklisted(&id(1)).await);
        assert_eq!(c.admit(&id(1), FrameType::Data).await.0, Admission::Blacklisted);
    }

    #[tokio::test]
    async fn test_blacklist_duration_doubles_per_offense() {
        let c = control(AbuseConfig {
            violation_threshold: 1,
            base_blacklist: Duration::from_secs(10),
            max_blacklist: Duration::from_secs(25),
            ..Default::default()
        });

        assert_eq!(c.record_violation(&id(1)).await, Some(Duration::from_secs(10)));
        assert_eq!(c.record_violation(&id(1)).await, Some(Duration::from_secs(20)));
        // Capped at the ceiling.
        assert_eq!(c.record_violation(&id(1)).await, Some(Duration::from_secs(25)));
    }

    #[tokio::test]
    async fn test_blacklist_expires_and_readmits() {
        let c = control(AbuseConfig {
            violation_threshold: 1,
            base_blacklist: Duration::from_millis(20),
            ..Default::default()
        });

        c.record_violation(&id(1)).await.unwrap();
        assert_eq!(c.admit(&id(1), FrameType::Data).await.0, Admission::Blacklisted);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!c.is_blacklisted(&id(1)).await);
        assert_eq!(c.admit(&id(1), FrameType::Data).await.0, Admission::Admitted);
    }

    #[tokio::test]
    async fn test_benign_duplicates_free_flood_punished() {
        let c = control(AbuseConfig {
            identical_burst_threshold: 3,
            violation_threshold: 1,
            ..Default::default()
        });
        let key = [9u8; 32];

        // Up to the threshold: suppressed but not a violation.
        for _ in 0..3 {
            assert!(c.note_duplicate(&id(1), key).await.is_none());
        }
        // Crossing it: violation, and with threshold 1, immediate blacklist.
        assert!(c.note_duplicate(&id(1), key).await.is_some());
    }

    #[tokio::test]
    async fn test_distinct_duplicate_keys_do_not_accumulate() {
        let c = control(AbuseConfig {
            identical_burst_threshold: 3,
            violation_threshold: 1,
            ..Default::default()
        });

        for i in 0u8..10 {
            assert!(c.note_duplicate(&id(1), [i; 32]).await.is_none());
        }
    }

    #[tokio::test]
    async fn test_advert_flood_blacklists() {
        let c = control(AbuseConfig {
            advert_burst_threshold: 2,
            violation_threshold: 1,
            ..Default::default()
        });

        assert_eq!(c.admit(&id(1), FrameType::RouteAdvert).await.0, Admission::Admitted);
        assert_eq!(c.admit(&id(1), FrameType::RouteAdvert).await.0, Admission::Admitted);
        let (verdict, imposed) = c.admit(&id(1), FrameType::RouteAdvert).await;
        assert_eq!(verdict, Admission::Blacklisted);
        assert!(imposed.is_some());
    }

    #[tokio::test]
    async fn test_cleanup_drops_quiet_peers() {
        let c = control(AbuseConfig {
            violation_window: Duration::from_millis(10),
            ..Default::default()
        });

        c.admit(&id(1), FrameType::Data).await;
        assert_eq!(c.tracked_peers().await, 1);

        tokio::time::sleep(Duration::from_millis(20)).await;
        c.cleanup().await;
        assert_eq!(c.tracked_peers().await, 0);
    }

    #[tokio::test]
    async fn test_cleanup_keeps_banned_peers() {
        let c = control(AbuseConfig {
            violation_threshold: 1,
            violation_window: Duration::from_millis(10),
            base_blacklist: Duration::from_secs(60),
            ..Default::default()
        });

        c.record_violation(&id(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        c.cleanup().await;
        assert!(c.is_blacklisted(&id(1)).await, "ban must survive cleanup");
    }
}
