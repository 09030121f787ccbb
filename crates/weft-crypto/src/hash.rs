//! Hashing and key derivation.
//!
//! BLAKE3 backs the session KDF; SHA-256 backs the content digests the
//! dedup cache keys on (fixed by the wire contract for cross-platform
//! interoperability).

use sha2::{Digest, Sha256};

/// 32-byte hash output.
pub type HashOutput = [u8; 32];

/// Compute BLAKE3 hash of input data.
#[must_use]
pub fn hash(data: &[u8]) -> HashOutput {
    *blake3::hash(data).as_bytes()
}

/// Compute SHA-256 digest of input data.
#[must_use]
pub fn sha256(data: &[u8]) -> HashOutput {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Sha256::digest(data));
    out
}

/// Content fingerprint for dedup keying: SHA-256(message_id || SHA-256(payload)).
#[must_use]
pub fn dedup_key(message_id: &[u8; 16], payload: &[u8]) -> HashOutput {
    let payload_digest = sha256(payload);
    let mut hasher = Sha256::new();
    hasher.update(message_id);
    hasher.update(payload_digest);
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// BLAKE3 Key Derivation Function with context.
pub struct Kdf {
    context: &'static str,
}

impl Kdf {
    /// Create a KDF with a specific context string.
    #[must_use]
    pub fn new(context: &'static str) -> Self {
        Self { context }
    }

    /// Derive output from input key material.
    pub fn derive(&self, ikm: &[u8], output: &mut [u8]) {
        let key_hash = hash(ikm);
        let mut hasher = blake3::Hasher::new_keyed(&key_hash);
        hasher.update(self.context.as_bytes());

        let mut reader = hasher.finalize_xof();
        reader.fill(output);
    }

    /// Derive a 32-byte key.
    #[must_use]
    pub fn derive_key(&self, ikm: &[u8]) -> [u8; 32] {
        let mut output = [0u8; 32];
        self.derive(ikm, &mut output);
        output
    }

    /// Derive a 32-byte key bound to a key generation counter.
    ///
    /// Successive generations from the same shared secret are unrelated,
    /// which is what lets the rotation policy discard old generations.
    #[must_use]
    pub fn derive_generation_key(&self, ikm: &[u8], generation: u64) -> [u8; 32] {
        let mut material = Vec::with_capacity(ikm.len() + 8);
        material.extend_from_slice(ikm);
        material.extend_from_slice(&generation.to_be_bytes());
        self.derive_key(&material)
    }
}
