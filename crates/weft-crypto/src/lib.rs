//! # WEFT Crypto
//!
//! Cryptographic envelope for the WEFT (Woven Ephemeral Frame Transport)
//! mesh protocol.
//!
//! This crate provides:
//! - Ed25519 frame signatures (64 bytes, padded to 65 on the wire)
//! - X25519 pairwise session establishment
//! - `XChaCha20-Poly1305` AEAD payload encryption
//! - Forward-secret session rotation with bounded old-key retention
//! - BLAKE3 key derivation and SHA-256 content digests
//!
//! ## Cryptographic Suite
//!
//! | Function | Algorithm | Security Level |
//! |----------|-----------|----------------|
//! | Key Exchange | X25519 | 128-bit |
//! | AEAD | XChaCha20-Poly1305 | 256-bit key |
//! | KDF | BLAKE3 (context-keyed) | 128-bit |
//! | Signatures | Ed25519 | 128-bit |
//! | Content Digest | SHA-256 | 128-bit collision |

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod aead;
pub mod error;
pub mod hash;
pub mod session;
pub mod signatures;
pub mod x25519;

pub use error::CryptoError;

/// X25519 public key size
pub const X25519_PUBLIC_KEY_SIZE: usize = 32;

/// XChaCha20-Poly1305 key size
pub const XCHACHA_KEY_SIZE: usize = 32;

/// XChaCha20-Poly1305 nonce size
pub const XCHACHA_NONCE_SIZE: usize = 24;

/// XChaCha20-Poly1305 authentication tag size
pub const XCHACHA_TAG_SIZE: usize = 16;

/// Ed25519 public key size
pub const ED25519_PUBLIC_KEY_SIZE: usize = 32;

/// Ed25519 signature size
pub const ED25519_SIGNATURE_SIZE: usize = 64;

/// On-wire signature field size: 64 signature bytes plus one reserved
/// placeholder byte (zero on write, ignored on read)
pub const WIRE_SIGNATURE_SIZE: usize = 65;
