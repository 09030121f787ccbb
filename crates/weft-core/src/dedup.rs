//! Content-addressed deduplication cache.
//!
//! Primary loop-prevention and flood-amplification defense alongside TTL.
//! Keys are `SHA-256(message_id || SHA-256(payload))`, so a replayed
//! message id with different bytes still registers as new content. Entries
//! expire after a time window; a hard capacity cap evicts the
//! earliest-inserted entries first so the cache never outgrows its budget.
//! Lookup and insert are O(1) amortized.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use weft_crypto::hash::dedup_key;

/// Dedup cache tuning.
#[derive(Debug, Clone)]
pub struct DedupConfig {
    /// How long a fingerprint suppresses duplicates
    pub window: Duration,
    /// Hard cap on retained fingerprints
    pub capacity: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(300),
            capacity: 50_000,
        }
    }
}

struct DedupState {
    entries: HashMap<[u8; 32], Instant>,
    // Insertion order for FIFO eviction. A slot is live only while the
    // entry still carries the same stamp (re-insertion supersedes it).
    order: VecDeque<([u8; 32], Instant)>,
}

/// Bounded recently-seen set consulted before any frame is processed or
/// relayed.
pub struct DedupCache {
    config: DedupConfig,
    state: Mutex<DedupState>,
}

impl DedupCache {
    /// Create a cache with the given policy.
    #[must_use]
    pub fn new(config: DedupConfig) -> Self {
        Self {
            config,
            state: Mutex::new(DedupState {
                entries: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    /// Returns `true` exactly when the (message id, payload) pair has not
    /// been seen within the window, inserting it as a side effect. `false`
    /// means drop: already seen and unexpired.
    pub async fn check_and_insert(&self, message_id: &[u8; 16], payload: &[u8]) -> bool {
        let key = dedup_key(message_id, payload);
        let now = Instant::now();
        let mut state = self.state.lock().await;

        if let Some(first_seen) = state.entries.get(&key) {
            if now.duration_since(*first_seen) < self.config.window {
                return false;
            }
            // Expired entry: fall through and re-insert with a fresh stamp.
        }

        state.entries.insert(key, now);
        state.order.push_back((key, now));

        self.evict(&mut state);
        true
    }

    /// Whether the pair is currently suppressed, without inserting.
    pub async fn contains(&self, message_id: &[u8; 16], payload: &[u8]) -> bool {
        let key = dedup_key(message_id, payload);
        let state = self.state.lock().await;
        state
            .entries
            .get(&key)
            .is_some_and(|t| t.elapsed() < self.config.window)
    }

    /// Drop expired entries. Called from the engine's maintenance timer;
    /// capacity eviction happens inline on insert regardless.
    pub async fn purge_expired(&self) {
        let mut state = self.state.lock().await;
        let window = self.config.window;
        let DedupState { entries, order } = &mut *state;
        entries.retain(|_, first_seen| first_seen.elapsed() < window);
        order.retain(|(key, stamp)| entries.get(key) == Some(stamp));
    }

    /// Number of retained fingerprints.
    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    /// Whether the cache is empty.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn evict(&self, state: &mut DedupState) {
        while state.entries.len() > self.config.capacity {
            let Some((key, stamp)) = state.order.pop_front() else {
                break;
            };
            // Skip stale slots left behind by expiry re-insertion.
            if state.entries.get(&key) == Some(&stamp) {
                state.entries.remove(&key);
            }
        }
    }
}
