//! Forward-secret pairwise session management.
//!
//! A session holds the current symmetric key for a (local, peer) pair,
//! derived from an X25519 exchange and bound to a key generation counter.
//! Rotation (time- or message-count-triggered) performs a fresh exchange
//! under `generation + 1`; the outgoing key is retained only long enough to
//! decrypt in-flight frames from the previous generation, then dropped and
//! zeroized. Compromise of a later key therefore never exposes earlier
//! traffic.

use crate::aead::{AeadKey, Nonce};
use crate::hash::Kdf;
use crate::x25519::{PrivateKey, PublicKey};
use crate::CryptoError;
use rand_core::OsRng;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// KDF context for session key derivation.
const SESSION_KDF_CONTEXT: &str = "weft-session-key-v1";

/// Sealed payloads carry the sender's nonce counter ahead of the ciphertext.
const COUNTER_PREFIX_SIZE: usize = 8;

/// Session rotation and retention policy.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Rotate after this much time on one key generation
    pub rotation_interval: Duration,
    /// Rotate after this many messages sealed under one generation
    pub rotation_message_limit: u64,
    /// How long a superseded key may still decrypt in-flight frames
    pub previous_key_retention: Duration,
    /// Abandon a handshake that has not completed within this window
    pub handshake_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            rotation_interval: Duration::from_secs(600),
            rotation_message_limit: 10_000,
            previous_key_retention: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

/// One key generation of a session.
struct KeyGeneration {
    generation: u64,
    key: AeadKey,
    created_at: Instant,
    sealed_count: u64,
}

/// Active session with a peer: current generation plus an optional
/// retained predecessor.
struct Session {
    current: KeyGeneration,
    previous: Option<(KeyGeneration, Instant)>,
    send_counter: u64,
}

/// In-flight handshake: our ephemeral secret and the generation it targets.
struct PendingHandshake {
    private: PrivateKey,
    generation: u64,
    started_at: Instant,
}

/// Handshake payload carried in HANDSHAKE frames: the ephemeral X25519
/// public key and the key generation it proposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeOffer {
    /// Ephemeral X25519 public key
    pub public_key: PublicKey,
    /// Proposed key generation
    pub generation: u64,
}

impl HandshakeOffer {
    /// Fixed wire size: 32-byte public key plus 8-byte generation.
    pub const WIRE_SIZE: usize = 40;

    /// Encode to the fixed 40-byte wire form (big-endian generation).
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::WIRE_SIZE] {
        let mut out = [0u8; Self::WIRE_SIZE];
        out[..32].copy_from_slice(self.public_key.as_bytes());
        out[32..].copy_from_slice(&self.generation.to_be_bytes());
        out
    }

    /// Decode from the wire form.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::MalformedHandshake`] on any length mismatch.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != Self::WIRE_SIZE {
            return Err(CryptoError::MalformedHandshake);
        }
        let mut pk = [0u8; 32];
        pk.copy_from_slice(&bytes[..32]);
        let mut generation = [0u8; 8];
        generation.copy_from_slice(&bytes[32..]);
        Ok(Self {
            public_key: PublicKey::from_bytes(pk),
            generation: u64::from_be_bytes(generation),
        })
    }
}

/// Owns every pairwise session and in-flight handshake for one node.
///
/// Keys are `[u8; 32]` peer identifiers. All state is behind a single
/// `RwLock`; mutation is per-peer and short-lived.
pub struct SessionManager {
    config: SessionConfig,
    kdf: Kdf,
    sessions: RwLock<HashMap<[u8; 32], Session>>,
    pending: RwLock<HashMap<[u8; 32], PendingHandshake>>,
}

impl SessionManager {
    /// Create a session manager with the given policy.
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            kdf: Kdf::new(SESSION_KDF_CONTEXT),
            sessions: RwLock::new(HashMap::new()),
            pending: RwLock::new(HashMap::new()),
        }
    }

    /// Whether an established session exists for the peer.
    pub async fn has_session(&self, peer: &[u8; 32]) -> bool {
        self.sessions.read().await.contains_key(peer)
    }

    /// Current key generation for the peer, if a session exists.
    pub async fn current_generation(&self, peer: &[u8; 32]) -> Option<u64> {
        self.sessions.read().await.get(peer).map(|s| s.current.generation)
    }

    /// Whether a handshake with the peer is already in flight.
    pub async fn has_pending(&self, peer: &[u8; 32]) -> bool {
        self.pending.read().await.contains_key(peer)
    }

    /// Start (or restart) a handshake toward a peer.
    ///
    /// Chooses generation 0 for first contact, `current + 1` when an
    /// established session is being rotated. Returns the offer to carry in
    /// a HANDSHAKE frame. Calling again before completion replaces the
    /// pending ephemeral.
    pub async fn initiate(&self, peer: &[u8; 32]) -> HandshakeOffer {
        let generation = self
            .current_generation(peer)
            .await
            .map_or(0, |g| g + 1);
        self.initiate_at(peer, generation).await
    }

    async fn initiate_at(&self, peer: &[u8; 32], generation: u64) -> HandshakeOffer {
        let private = PrivateKey::generate(&mut OsRng);
        let public_key = private.public_key();

        self.pending.write().await.insert(
            *peer,
            PendingHandshake {
                private,
                generation,
                started_at: Instant::now(),
            },
        );

        tracing::debug!(
            peer = %hex::encode(&peer[..8]),
            generation,
            "handshake initiated"
        );

        HandshakeOffer {
            public_key,
            generation,
        }
    }

    /// Process an inbound handshake offer.
    ///
    /// If we have a handshake in flight with this peer the offer is treated
    /// as the response (this also resolves simultaneous opens: X25519 is
    /// symmetric, so both sides derive the same secret from their own
    /// ephemeral). Otherwise we are the responder: a fresh ephemeral is
    /// generated, the session installed, and our answering offer returned
    /// for the caller to send back.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::LowOrderPoint`] if the offered public key is
    /// degenerate.
    pub async fn on_offer(
        &self,
        peer: &[u8; 32],
        offer: &HandshakeOffer,
    ) -> Result<Option<HandshakeOffer>, CryptoError> {
        let pending = self.pending.write().await.remove(peer);

        if let Some(pending) = pending {
            let shared = pending.private.exchange(&offer.public_key)?;
            self.install(peer, shared.as_bytes(), pending.generation).await;
            return Ok(None);
        }

        let private = PrivateKey::generate(&mut OsRng);
        let public_key = private.public_key();
        let shared = private.exchange(&offer.public_key)?;
        self.install(peer, shared.as_bytes(), offer.generation).await;

        Ok(Some(HandshakeOffer {
            public_key,
            generation: offer.generation,
        }))
    }

    /// Install a derived session key, demoting any existing generation to
    /// the bounded retention slot.
    async fn install(&self, peer: &[u8; 32], shared: &[u8; 32], generation: u64) {
        let key = AeadKey::new(self.kdf.derive_generation_key(shared, generation));
        let fresh = KeyGeneration {
            generation,
            key,
            created_at: Instant::now(),
            sealed_count: 0,
        };

        let mut sessions = self.sessions.write().await;
        let session = match sessions.remove(peer) {
            Some(mut session) => {
                let old = std::mem::replace(&mut session.current, fresh);
                session.previous = Some((old, Instant::now()));
                session.send_counter = 0;
                session
            }
            None => Session {
                current: fresh,
                previous: None,
                send_counter: 0,
            },
        };
        sessions.insert(*peer, session);

        tracing::debug!(
            peer = %hex::encode(&peer[..8]),
            generation,
            "session key installed"
        );
    }

    /// Encrypt a payload for the peer under the current session key.
    ///
    /// Output layout: `counter(8, big-endian) || ciphertext+tag`. The
    /// counter feeds the receiver's nonce reconstruction.
    ///
    /// # Errors
    ///
    /// [`CryptoError::NoSession`] without an established session,
    /// [`CryptoError::NonceOverflow`] when the counter space is exhausted.
    pub async fn seal(
        &self,
        peer: &[u8; 32],
        message_id: &[u8; 16],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(peer).ok_or(CryptoError::NoSession)?;

        if session.send_counter == u64::MAX {
            return Err(CryptoError::NonceOverflow);
        }
        let counter = session.send_counter;
        session.send_counter += 1;
        session.current.sealed_count += 1;

        let nonce = Nonce::from_parts(message_id, counter);
        let ciphertext = session.current.key.encrypt(&nonce, plaintext, b"")?;

        let mut out = Vec::with_capacity(COUNTER_PREFIX_SIZE + ciphertext.len());
        out.extend_from_slice(&counter.to_be_bytes());
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt a sealed payload from the peer.
    ///
    /// Tries the current generation first, then the retained previous
    /// generation if it is still within its retention window. A tag
    /// mismatch against every candidate key is a hostile or corrupt frame.
    ///
    /// # Errors
    ///
    /// [`CryptoError::NoSession`], [`CryptoError::CiphertextTooShort`], or
    /// [`CryptoError::DecryptionFailed`].
    pub async fn open(
        &self,
        peer: &[u8; 32],
        message_id: &[u8; 16],
        sealed: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        if sealed.len() < COUNTER_PREFIX_SIZE {
            return Err(CryptoError::CiphertextTooShort);
        }
        let mut counter_bytes = [0u8; COUNTER_PREFIX_SIZE];
        counter_bytes.copy_from_slice(&sealed[..COUNTER_PREFIX_SIZE]);
        let counter = u64::from_be_bytes(counter_bytes);
        let ciphertext = &sealed[COUNTER_PREFIX_SIZE..];

        let nonce = Nonce::from_parts(message_id, counter);

        let sessions = self.sessions.read().await;
        let session = sessions.get(peer).ok_or(CryptoError::NoSession)?;

        match session.current.key.decrypt(&nonce, ciphertext, b"") {
            Ok(plaintext) => Ok(plaintext),
            Err(CryptoError::DecryptionFailed) => {
                if let Some((prev, retired_at)) = &session.previous {
                    if retired_at.elapsed() < self.config.previous_key_retention {
                        return prev.key.decrypt(&nonce, ciphertext, b"");
                    }
                }
                Err(CryptoError::DecryptionFailed)
            }
            Err(e) => Err(e),
        }
    }

    /// Whether the session with the peer has hit a rotation trigger
    /// (elapsed time or sealed-message count).
    pub async fn needs_rotation(&self, peer: &[u8; 32]) -> bool {
        let sessions = self.sessions.read().await;
        let Some(session) = sessions.get(peer) else {
            return false;
        };
        session.current.created_at.elapsed() >= self.config.rotation_interval
            || session.current.sealed_count >= self.config.rotation_message_limit
    }

    /// Drop retired keys past their retention window and abandon stale
    /// handshakes. Dropped key material is zeroized.
    pub async fn purge(&self) {
        {
            let mut sessions = self.sessions.write().await;
            for session in sessions.values_mut() {
                if let Some((_, retired_at)) = &session.previous {
                    if retired_at.elapsed() >= self.config.previous_key_retention {
                        session.previous = None;
                    }
                }
            }
        }
        {
            let mut pending = self.pending.write().await;
            pending.retain(|peer, hs| {
                let keep = hs.started_at.elapsed() < self.config.handshake_timeout;
                if !keep {
                    tracing::debug!(
                        peer = %hex::encode(&peer[..8]),
                        "abandoning stale handshake"
                    );
                }
                keep
            });
        }
    }

    /// Remove all session state for a peer (departure or blacklist).
    pub async fn remove(&self, peer: &[u8; 32]) {
        self.sessions.write().await.remove(peer);
        self.pending.write().await.remove(peer);
    }

    /// Number of established sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE: [u8; 32] = [0xAA; 32];
    const BOB: [u8; 32] = [0xBB; 32];

    /// Run a full handshake between two managers and return them.
    async fn establish_pair() -> (SessionManager, SessionManager) {
        let alice = SessionManager::new(SessionConfig::default());
        let bob = SessionManager::new(SessionConfig::default());

        let offer = alice.initiate(&BOB).await;
        let reply = bob.on_offer(&ALICE, &offer).await.unwrap().unwrap();
        assert!(alice.on_offer(&BOB, &reply).await.unwrap().is_none());

        (alice, bob)
    }

    #[tokio::test]
    async fn test_handshake_establishes_both_sides() {
        let (alice, bob) = establish_pair().await;

        assert!(alice.has_session(&BOB).await);
        assert!(bob.has_session(&ALICE).await);
        assert_eq!(alice.current_generation(&BOB).await, Some(0));
        assert_eq!(bob.current_generation(&ALICE).await, Some(0));
    }

    #[tokio::test]
    async fn test_seal_open_roundtrip() {
        let (alice, bob) = establish_pair().await;

        let message_id = [9u8; 16];
        let sealed = alice.seal(&BOB, &message_id, b"over the mesh").await.unwrap();
        assert_ne!(&sealed[8..], b"over the mesh".as_slice());

        let opened = bob.open(&ALICE, &message_id, &sealed).await.unwrap();
        assert_eq!(opened, b"over the mesh");
    }

    #[tokio::test]
    async fn test_seal_without_session_fails() {
        let manager = SessionManager::new(SessionConfig::default());
        assert!(matches!(
            manager.seal(&BOB, &[0u8; 16], b"x").await,
            Err(CryptoError::NoSession)
        ));
    }

    #[tokio::test]
    async fn test_open_with_wrong_message_id_fails() {
        let (alice, bob) = establish_pair().await;

        let sealed = alice.seal(&BOB, &[1u8; 16], b"payload").await.unwrap();
        assert!(matches!(
            bob.open(&ALICE, &[2u8; 16], &sealed).await,
            Err(CryptoError::DecryptionFailed)
        ));
    }

    #[tokio::test]
    async fn test_simultaneous_open_converges() {
        let alice = SessionManager::new(SessionConfig::default());
        let bob = SessionManager::new(SessionConfig::default());

        let offer_a = alice.initiate(&BOB).await;
        let offer_b = bob.initiate(&ALICE).await;

        // Each side sees the other's offer as the response to its own.
        assert!(alice.on_offer(&BOB, &offer_b).await.unwrap().is_none());
        assert!(bob.on_offer(&ALICE, &offer_a).await.unwrap().is_none());

        let message_id = [3u8; 16];
        let sealed = alice.seal(&BOB, &message_id, b"converged").await.unwrap();
        assert_eq!(bob.open(&ALICE, &message_id, &sealed).await.unwrap(), b"converged");
    }

    #[tokio::test]
    async fn test_rotation_discards_old_generation() {
        let mut config = SessionConfig::default();
        config.previous_key_retention = Duration::ZERO;
        let alice = SessionManager::new(config.clone());
        let bob = SessionManager::new(config);

        let offer = alice.initiate(&BOB).await;
        let reply = bob.on_offer(&ALICE, &offer).await.unwrap().unwrap();
        alice.on_offer(&BOB, &reply).await.unwrap();

        // Seal under generation 0, then rotate to generation 1.
        let message_id = [4u8; 16];
        let sealed_gen0 = alice.seal(&BOB, &message_id, b"old traffic").await.unwrap();

        let offer = alice.initiate(&BOB).await;
        assert_eq!(offer.generation, 1);
        let reply = bob.on_offer(&ALICE, &offer).await.unwrap().unwrap();
        alice.on_offer(&BOB, &reply).await.unwrap();
        assert_eq!(bob.current_generation(&ALICE).await, Some(1));

        bob.purge().await;

        // Old-generation ciphertext is unreadable under the new keys.
        assert!(bob.open(&ALICE, &message_id, &sealed_gen0).await.is_err());

        // New-generation traffic flows.
        let sealed_gen1 = alice.seal(&BOB, &[5u8; 16], b"new traffic").await.unwrap();
        assert_eq!(
            bob.open(&ALICE, &[5u8; 16], &sealed_gen1).await.unwrap(),
            b"new traffic"
        );
    }

    #[tokio::test]
    async fn test_previous_generation_retained_briefly() {
        let (alice, bob) = establish_pair().await;

        let message_id = [6u8; 16];
        let in_flight = alice.seal(&BOB, &message_id, b"in flight").await.unwrap();

        // Bob rotates underneath the in-flight frame.
        let offer = bob.initiate(&ALICE).await;
        let reply = alice.on_offer(&BOB, &offer).await.unwrap().unwrap();
        bob.on_offer(&ALICE, &reply).await.unwrap();

        // Default retention window still covers the old generation.
        assert_eq!(
            bob.open(&ALICE, &message_id, &in_flight).await.unwrap(),
            b"in flight"
        );
    }

    #[tokio::test]
    async fn test_needs_rotation_message_limit() {
        let mut config = SessionConfig::default();
        config.rotation_message_limit = 3;
        let alice = SessionManager::new(config);
        let bob = SessionManager::new(SessionConfig::default());

        let offer = alice.initiate(&BOB).await;
        let reply = bob.on_offer(&ALICE, &offer).await.unwrap().unwrap();
        alice.on_offer(&BOB, &reply).await.unwrap();

        assert!(!alice.needs_rotation(&BOB).await);
        for i in 0..3 {
            let mut id = [0u8; 16];
            id[0] = i;
            alice.seal(&BOB, &id, b"msg").await.unwrap();
        }
        assert!(alice.needs_rotation(&BOB).await);
    }

    #[tokio::test]
    async fn test_stale_handshake_purged() {
        let mut config = SessionConfig::default();
        config.handshake_timeout = Duration::ZERO;
        let manager = SessionManager::new(config);

        manager.initiate(&BOB).await;
        assert!(manager.has_pending(&BOB).await);

        manager.purge().await;
        assert!(!manager.has_pending(&BOB).await);
    }

    #[tokio::test]
    async fn test_handshake_offer_wire_roundtrip() {
        let manager = SessionManager::new(SessionConfig::default());
        let offer = manager.initiate(&BOB).await;

        let decoded = HandshakeOffer::from_bytes(&offer.to_bytes()).unwrap();
        assert_eq!(decoded, offer);

        assert!(HandshakeOffer::from_bytes(&[0u8; 39]).is_err());
        assert!(HandshakeOffer::from_bytes(&[0u8; 41]).is_err());
    }

    #[tokio::test]
    async fn test_remove_clears_state() {
        let (alice, _bob) = establish_pair().await;

        alice.remove(&BOB).await;
        assert!(!alice.has_session(&BOB).await);
        assert_eq!(alice.session_count().await, 0);
    }
}
