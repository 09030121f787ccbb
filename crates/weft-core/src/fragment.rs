//! Fragmentation and reassembly of oversized logical messages.
//!
//! A payload larger than the per-fragment budget is split into indexed
//! chunks sharing one message id. Each chunk travels in a FRAGMENT frame
//! whose payload region starts with a fixed 4-byte extension header:
//! `index(u16) || total(u16)`, big-endian. Reassembly tolerates arbitrary
//! reordering and duplication; a set completes exactly once, when every
//! index `0..total` is present. Sets that stay incomplete past the timeout
//! are purged to bound memory under partial or adversarial fragmentation;
//! a late fragment for a purged set simply opens a fresh set.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::frame::MessageId;

/// Size of the per-fragment extension header inside the payload region.
pub const FRAGMENT_HEADER_SIZE: usize = 4;

/// Fragmentation policy.
#[derive(Debug, Clone)]
pub struct FragmentConfig {
    /// Largest plaintext chunk per fragment (extension header excluded)
    pub max_fragment_payload: usize,
    /// Purge incomplete sets older than this
    pub reassembly_timeout: Duration,
    /// Cap on simultaneously pending sets
    pub max_pending_sets: usize,
}

impl Default for FragmentConfig {
    fn default() -> Self {
        Self {
            max_fragment_payload: 1024,
            reassembly_timeout: Duration::from_secs(30),
            max_pending_sets: 256,
        }
    }
}

/// One outbound fragment: extension header already prepended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentChunk {
    /// Fragment index, 0-based
    pub index: u16,
    /// Total fragments in the logical message
    pub total: u16,
    /// `index || total || chunk bytes`, ready for the crypto envelope
    pub bytes: Vec<u8>,
}

/// A partially reassembled inbound message.
struct FragmentSet {
    total: u16,
    received: HashMap<u16, Vec<u8>>,
    first_seen: Instant,
}

/// Errors specific to fragment handling.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FragmentError {
    /// Payload would need more than `u16::MAX` fragments
    #[error("payload too large to fragment: {0} bytes")]
    TooManyFragments(usize),

    /// Fragment payload shorter than its extension header
    #[error("fragment payload too short")]
    TruncatedFragment,

    /// Extension header fields are inconsistent (index >= total, zero total)
    #[error("invalid fragment header: index {index}, total {total}")]
    InvalidHeader {
        /// Claimed index
        index: u16,
        /// Claimed total
        total: u16,
    },

    /// Fragment disagrees with the set it belongs to
    #[error("fragment total mismatch: set expects {expected}, got {got}")]
    TotalMismatch {
        /// Total recorded when the set was created
        expected: u16,
        /// Total claimed by this fragment
        got: u16,
    },

    /// Too many concurrent pending sets
    #[error("pending reassembly limit reached")]
    PendingLimit,
}

/// Splits oversized payloads and reassembles inbound fragments.
pub struct Fragmenter {
    config: FragmentConfig,
    pending: Mutex<HashMap<MessageId, FragmentSet>>,
}

impl Fragmenter {
    /// Create a fragmenter with the given policy.
    #[must_use]
    pub fn new(config: FragmentConfig) -> Self {
        Self {
            config,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Whether a payload fits a single DATA frame under this policy.
    #[must_use]
    pub fn fits_single_frame(&self, payload: &[u8]) -> bool {
        payload.len() <= self.config.max_fragment_payload
    }

    /// Split a payload into ordered, indexed chunks.
    ///
    /// # Errors
    ///
    /// [`FragmentError::TooManyFragments`] if more than `u16::MAX` chunks
    /// would be needed.
    pub fn split(&self, payload: &[u8]) -> Result<Vec<FragmentChunk>, FragmentError> {
        let chunk_size = self.config.max_fragment_payload;
        let total = payload.len().div_ceil(chunk_size).max(1);
        if total > u16::MAX as usize {
            return Err(FragmentError::TooManyFragments(payload.len()));
        }
        let total = total as u16;

        let mut chunks = Vec::with_capacity(total as usize);
        for (i, chunk) in payload.chunks(chunk_size).enumerate() {
            let index = i as u16;
            let mut bytes = Vec::with_capacity(FRAGMENT_HEADER_SIZE + chunk.len());
            bytes.extend_from_slice(&index.to_be_bytes());
            bytes.extend_from_slice(&total.to_be_bytes());
            bytes.extend_from_slice(chunk);
            chunks.push(FragmentChunk {
                index,
                total,
                bytes,
            });
        }
        Ok(chunks)
    }

    /// Ingest one decrypted fragment payload (extension header included).
    ///
    /// Returns the reassembled payload exactly once, when the set
    /// completes. Duplicates for an already-filled index are ignored.
    ///
    /// # Errors
    ///
    /// Returns a [`FragmentError`] for truncated or inconsistent fragment
    /// headers, or when the pending-set cap is reached.
    pub async fn ingest(
        &self,
        message_id: MessageId,
        fragment_payload: &[u8],
    ) -> Result<Option<Vec<u8>>, FragmentError> {
        if fragment_payload.len() < FRAGMENT_HEADER_SIZE {
            return Err(FragmentError::TruncatedFragment);
        }
        let index = u16::from_be_bytes([fragment_payload[0], fragment_payload[1]]);
        let total = u16::from_be_bytes([fragment_payload[2], fragment_payload[3]]);
        if total == 0 || index >= total {
            return Err(FragmentError::InvalidHeader { index, total });
        }
        let chunk = &fragment_payload[FRAGMENT_HEADER_SIZE..];

        let mut pending = self.pending.lock().await;

        if !pending.contains_key(&message_id) {
            if pending.len() >= self.config.max_pending_sets {
                return Err(FragmentError::PendingLimit);
            }
            pending.insert(
                message_id,
                FragmentSet {
                    total,
                    received: HashMap::new(),
                    first_seen: Instant::now(),
                },
            );
        }
        let Some(set) = pending.get_mut(&message_id) else {
            return Ok(None);
        };

        if set.total != total {
            return Err(FragmentError::TotalMismatch {
                expected: set.total,
                got: total,
            });
        }

        // Idempotent: a refilled index changes nothing.
        set.received.entry(index).or_insert_with(|| chunk.to_vec());

        if set.received.len() < set.total as usize {
            return Ok(None);
        }

        let Some(set) = pending.remove(&message_id) else {
            return Ok(None);
        };
        let mut payload = Vec::new();
        for i in 0..set.total {
            // Complete by construction: every index 0..total is present.
            payload.extend_from_slice(&set.received[&i]);
        }
        tracing::debug!(
            message_id = ?message_id,
            fragments = set.total,
            bytes = payload.len(),
            "reassembled message"
        );
        Ok(Some(payload))
    }

    /// Purge incomplete sets older than the reassembly timeout.
    ///
    /// Returns how many sets were dropped. The original sender learns
    /// nothing; retry logic lives outside this core.
    pub async fn purge_stale(&self) -> usize {
        let mut pending = self.pending.lock().await;
        let timeout = self.config.reassembly_timeout;
        let before = pending.len();
        pending.retain(|message_id, set| {
            let keep = set.first_seen.elapsed() < timeout;
            if !keep {
                tracing::debug!(
                    message_id = ?message_id,
                    have = set.received.len(),
                    want = set.total,
                    "purging incomplete fragment set"
                );
            }
            keep
        });
        before - pending.len()
    }

    /// Number of sets awaiting completion.
    pub async fn pending_sets(&self) -> usize {
        self.pending.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragmenter(chunk: usize) -> Fragmenter {
        Fragmenter::new(FragmentConfig {
            max_fragment_payload: chunk,
            reassembly_timeout: Duration::from_secs(30),
            max_pending_sets: 16,
        })
    }

    #[tokio::test]
    async fn test_split_then_ingest_in_order() {
        let f = fragmenter(4);
        let payload = b"0123456789";
        let chunks = f.split(payload).unwrap();
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.total == 3));

        let id = MessageId::random();
        assert_eq!(f.ingest(id, &chunks[0].bytes).await.unwrap(), None);
        assert_eq!(f.ingest(id, &chunks[1].bytes).await.unwrap(), None);
        assert_eq!(
            f.ingest(id, &chunks[2].bytes).await.unwrap(),
            Some(payload.to_vec())
        );
    }

    #[tokio::test]
    async fn test_ingest_out_of_order_and_duplicated() {
        let f = fragmenter(3);
        let payload: Vec<u8> = (0u8..32).collect();
        let chunks = f.split(&payload).unwrap();

        let id = MessageId::random();
        // Deterministic shuffle: odds first, then evens, duplicating as we go.
        let mut completed = None;
        for pass in [1usize, 0] {
            for (i, chunk) in chunks.iter().enumerate() {
                if i % 2 == pass {
                    continue;
                }
                if let Some(done) = f.ingest(id, &chunk.bytes).await.unwrap() {
                    completed = Some(done);
                }
                // Duplicate delivery of the same fragment.
                if completed.is_none() {
                    assert_eq!(f.ingest(id, &chunk.bytes).await.unwrap(), None);
                }
            }
        }
        assert_eq!(completed, Some(payload));

        // The set is gone: exactly-once completion.
        assert_eq!(f.pending_sets().await, 0);
    }

    #[tokio::test]
    async fn test_single_chunk_payload() {
        let f = fragmenter(64);
        let chunks = f.split(b"small").unwrap();
        assert_eq!(chunks.len(), 1);

        let id = MessageId::random();
        assert_eq!(
            f.ingest(id, &chunks[0].bytes).await.unwrap(),
            Some(b"small".to_vec())
        );
    }

    #[tokio::test]
    async fn test_truncated_fragment_rejected() {
        let f = fragmenter(4);
        assert_eq!(
            f.ingest(MessageId::random(), &[0u8; 3]).await,
            Err(FragmentError::TruncatedFragment)
        );
    }

    #[tokio::test]
    async fn test_invalid_header_rejected() {
        let f = fragmenter(4);

        // index >= total
        let mut bad = Vec::new();
        bad.extend_from_slice(&5u16.to_be_bytes());
        bad.extend_from_slice(&2u16.to_be_bytes());
        bad.extend_from_slice(b"x");
        assert!(matches!(
            f.ingest(MessageId::random(), &bad).await,
            Err(FragmentError::InvalidHeader { index: 5, total: 2 })
        ));

        // zero total
        let mut zero = Vec::new();
        zero.extend_from_slice(&0u16.to_be_bytes());
        zero.extend_from_slice(&0u16.to_be_bytes());
        assert!(matches!(
            f.ingest(MessageId::random(), &zero).await,
            Err(FragmentError::InvalidHeader { .. })
        ));
    }

    #[tokio::test]
    async fn test_total_mismatch_rejected() {
        let f = fragmenter(4);
        let id = MessageId::random();

        let chunks = f.split(b"0123456789").unwrap(); // total = 3
        f.ingest(id, &chunks[0].bytes).await.unwrap();

        let mut forged = Vec::new();
        forged.extend_from_slice(&1u16.to_be_bytes());
        forged.extend_from_slice(&7u16.to_be_bytes());
        forged.extend_from_slice(b"zzzz");
        assert!(matches!(
            f.ingest(id, &forged).await,
            Err(FragmentError::TotalMismatch { expected: 3, got: 7 })
        ));
    }

    #[tokio::test]
    async fn test_stale_set_purged_and_late_fragment_restarts() {
        let f = Fragmenter::new(FragmentConfig {
            max_fragment_payload: 4,
            reassembly_timeout: Duration::from_millis(10),
            max_pending_sets: 16,
        });
        let id = MessageId::random();
        let chunks = f.split(b"0123456789").unwrap();

        f.ingest(id, &chunks[0].bytes).await.unwrap();
        assert_eq!(f.pending_sets().await, 1);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(f.purge_stale().await, 1);
        assert_eq!(f.pending_sets().await, 0);

        // A late fragment is a fresh (incomplete) set, not an error.
        assert_eq!(f.ingest(id, &chunks[1].bytes).await.unwrap(), None);
        assert_eq!(f.pending_sets().await, 1);

        // The restarted set still completes once the rest arrive.
        assert_eq!(f.ingest(id, &chunks[0].bytes).await.unwrap(), None);
        assert_eq!(
            f.ingest(id, &chunks[2].bytes).await.unwrap(),
            Some(b"0123456789".to_vec())
        );
    }

    #[tokio::test]
    async fn test_pending_set_cap() {
        let f = Fragmenter::new(FragmentConfig {
            max_fragment_payload: 4,
            reassembly_timeout: Duration::from_secs(30),
            max_pending_sets: 2,
        });
        let chunks = f.split(b"0123456789").unwrap();

        f.ingest(MessageId::random(), &chunks[0].bytes).await.unwrap();
        f.ingest(MessageId::random(), &chunks[0].bytes).await.unwrap();
        assert_eq!(
            f.ingest(MessageId::random(), &chunks[0].bytes).await,
            Err(FragmentError::PendingLimit)
        );
    }

    #[test]
    fn test_split_chunk_sizes() {
        let f = fragmenter(4);
        let chunks = f.split(&[7u8; 9]).unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].bytes.len(), FRAGMENT_HEADER_SIZE + 4);
        assert_eq!(chunks[2].bytes.len(), FRAGMENT_HEADER_SIZE + 1);
    }
}
