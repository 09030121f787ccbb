//! Cryptographic error types.

use thiserror::Error;

/// Cryptographic errors
#[derive(Debug, Error)]
pub enum CryptoError {
    /// AEAD encryption failed
    #[error("encryption failed")]
    EncryptionFailed,

    /// AEAD decryption failed (authentication failure)
    #[error("decryption failed: authentication failure")]
    DecryptionFailed,

    /// Invalid signature
    #[error("invalid signature")]
    InvalidSignature,

    /// Invalid public key
    #[error("invalid public key")]
    InvalidPublicKey,

    /// Peer public key is a low-order point
    #[error("key exchange rejected: low-order point")]
    LowOrderPoint,

    /// No session established with the peer
    #[error("no session established with peer")]
    NoSession,

    /// Ciphertext shorter than the authentication tag
    #[error("ciphertext too short")]
    CiphertextTooShort,

    /// Nonce counter exhausted for the current key generation
    #[error("nonce counter exhausted, rotation required")]
    NonceOverflow,

    /// Handshake message malformed
    #[error("malformed handshake payload")]
    MalformedHandshake,

    /// Stale key generation (retention window elapsed)
    #[error("key generation {0} no longer retained")]
    StaleGeneration(u64),
}
