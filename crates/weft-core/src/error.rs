//! Error types for the WEFT core protocol.
//!
//! Every error here is contained to the frame it arose from: the pipeline
//! drops the frame, records the outcome, and keeps going. Nothing in this
//! taxonomy aborts other in-flight frames or the engine itself.

use thiserror::Error;

/// Frame-level (codec) errors. Always fatal for the frame: it is dropped
/// and never relayed.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Buffer too short to hold the fixed header
    #[error("frame too short: expected at least {expected}, got {actual}")]
    TooShort {
        /// Expected minimum size
        expected: usize,
        /// Actual size received
        actual: usize,
    },

    /// Unknown protocol version
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// Invalid frame type byte
    #[error("invalid frame type: 0x{0:02X}")]
    InvalidFrameType(u8),

    /// Reserved frame type used
    #[error("reserved frame type used")]
    ReservedFrameType,

    /// TTL exhausted on arrival (loop prevention)
    #[error("frame arrived with ttl 0")]
    ExpiredTtl,

    /// Declared payload length disagrees with the trailing bytes
    #[error("payload length mismatch: declared {declared}, got {actual}")]
    PayloadLengthMismatch {
        /// Length declared in the header
        declared: usize,
        /// Bytes actually present after the header
        actual: usize,
    },

    /// Payload exceeds the u16 length field
    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(usize),
}

/// Engine-level errors covering the full inbound/outbound pipeline.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Codec rejected the frame
    #[error("malformed frame: {0}")]
    Frame(#[from] FrameError),

    /// Fragment extension header rejected
    #[error("malformed fragment: {0}")]
    Fragment(#[from] crate::fragment::FragmentError),

    /// Control payload (advert, handshake) failed to parse
    #[error("malformed control payload")]
    MalformedPayload,

    /// Signature verification failed; counts as a sender violation
    #[error("signature verification failed")]
    SignatureVerification,

    /// AEAD tag mismatch; frame treated as hostile or corrupt
    #[error("payload decryption failed")]
    Decryption,

    /// No session with the peer yet; recoverable, triggers a handshake
    /// while the outbound message queues
    #[error("session not established with peer")]
    SessionNotEstablished,

    /// Sender is over its rate budget; frame silently dropped
    #[error("peer rate limited")]
    RateLimited,

    /// Sender is blacklisted; frame silently dropped
    #[error("peer blacklisted")]
    Blacklisted,

    /// Fragment set purged before completion; nothing surfaces to the
    /// original sender
    #[error("reassembly timed out")]
    ReassemblyTimeout,

    /// Transport send failed
    #[error("transport error: {0}")]
    Transport(#[from] crate::transport::TransportError),

    /// Cryptographic failure outside signature/decrypt classification
    #[error("crypto error: {0}")]
    Crypto(#[from] weft_crypto::CryptoError),
}
