//! Node identity.
//!
//! A WEFT node is identified by its Ed25519 public key; the 32 key bytes
//! are the node id carried in frame headers. The signing key authenticates
//! every outbound frame. Session establishment uses per-handshake X25519
//! ephemerals managed by the crypto envelope, so no static exchange key
//! lives here.

use crate::frame::PeerId;
use weft_crypto::signatures::SigningKey;

/// Node identity: the Ed25519 keypair and the id derived from it.
pub struct Identity {
    id: PeerId,
    signing: SigningKey,
}

impl Identity {
    /// Generate a random identity.
    #[must_use]
    pub fn generate() -> Self {
        use rand_core::OsRng;

        let signing = SigningKey::generate(&mut OsRng);
        let id = PeerId::from_bytes(signing.verifying_key().to_bytes());
        Self { id, signing }
    }

    /// Restore an identity from a 32-byte signing-key seed.
    #[must_use]
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let signing = SigningKey::from_bytes(seed);
        let id = PeerId::from_bytes(signing.verifying_key().to_bytes());
        Self { id, signing }
    }

    /// The node id (Ed25519 public key bytes).
    #[must_use]
    pub fn id(&self) -> PeerId {
        self.id
    }

    /// The signing key for outbound frames.
    #[must_use]
    pub fn signing_key(&self) -> &SigningKey {
        &self.signing
    }

    /// Export the signing-key seed for persistence.
    ///
    /// # Security
    ///
    /// The seed is the raw private key. Hand it only to the persistence
    /// capability.
    #[must_use]
    pub fn to_seed(&self) -> [u8; 32] {
        self.signing.to_bytes()
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity").field("id", &self.id).finish()
    }
}
