//! Frame encoding and decoding for the WEFT wire protocol.
//!
//! The header is fixed-offset and fixed-width; all multi-byte fields are
//! big-endian (network byte order). Decoding is pure and allocation-bounded
//! by input size; it performs no cryptographic work. Parsing is total: every
//! input produces either a valid `Frame` or a specific `FrameError`.
//!
//! Layout (offsets in bytes):
//!
//! ```text
//! 0        version (1)
//! 1        type (1)
//! 2        ttl (1)
//! 3..35    sender_id (32)
//! 35..67   recipient_id (32)
//! 67..83   message_id (16)
//! 83..91   timestamp (8, ms since epoch, sender clock)
//! 91..93   payload_len (2)
//! 93..158  signature (64 + 1 reserved placeholder byte)
//! 158..    payload[payload_len]
//! ```

use crate::error::FrameError;
use crate::{FRAME_HEADER_SIZE, MAX_PAYLOAD_SIZE, PROTOCOL_VERSION};
use serde::{Deserialize, Serialize};
use weft_crypto::signatures::{Signature, SigningKey, VerifyingKey};
use weft_crypto::{CryptoError, WIRE_SIGNATURE_SIZE};

const SENDER_OFFSET: usize = 3;
const RECIPIENT_OFFSET: usize = 35;
const MESSAGE_ID_OFFSET: usize = 67;
const TIMESTAMP_OFFSET: usize = 83;
const PAYLOAD_LEN_OFFSET: usize = 91;
const SIGNATURE_OFFSET: usize = 93;

/// Frame types as defined in the protocol specification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    /// Application payload (encrypted when directed)
    Data = 0x01,
    /// Delivery acknowledgment carrying the acked message id
    Ack = 0x02,
    /// Liveness beacon
    Heartbeat = 0x03,
    /// Piece of an oversized logical message
    Fragment = 0x04,
    /// Peer address advertisement
    RouteAdvert = 0x05,
    /// X25519 session offer
    Handshake = 0x06,
}

impl TryFrom<u8> for FrameType {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Err(FrameError::ReservedFrameType),
            0x01 => Ok(Self::Data),
            0x02 => Ok(Self::Ack),
            0x03 => Ok(Self::Heartbeat),
            0x04 => Ok(Self::Fragment),
            0x05 => Ok(Self::RouteAdvert),
            0x06 => Ok(Self::Handshake),
            _ => Err(FrameError::InvalidFrameType(value)),
        }
    }
}

/// 32-byte peer identifier, derived from the peer's Ed25519 public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerId([u8; 32]);

impl PeerId {
    /// Broadcast sentinel: a frame addressed here is for every node.
    pub const BROADCAST: Self = Self([0xFF; 32]);

    /// Create from raw bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Copy out the raw bytes.
    #[must_use]
    pub fn to_bytes(self) -> [u8; 32] {
        self.0
    }

    /// Whether this is the broadcast sentinel.
    #[must_use]
    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }
}

impl std::fmt::Debug for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PeerId({})", hex::encode(&self.0[..8]))
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

/// 16-byte random message identifier; keys dedup jointly with the payload
/// digest and seeds the AEAD nonce.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId([u8; 16]);

impl MessageId {
    /// Generate a fresh random id from the system CSPRNG.
    #[must_use]
    pub fn random() -> Self {
        let mut bytes = [0u8; 16];
        getrandom::getrandom(&mut bytes).expect("CSPRNG failure");
        Self(bytes)
    }

    /// Create from raw bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl std::fmt::Debug for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MessageId({})", hex::encode(self.0))
    }
}

/// Milliseconds since the Unix epoch on the local clock.
#[must_use]
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// One wire-format protocol message: fixed header plus opaque payload.
///
/// The payload is ciphertext once the crypto envelope has sealed it; the
/// codec never looks inside.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Protocol version
    pub version: u8,
    /// Frame type tag
    pub frame_type: FrameType,
    /// Remaining hop budget; decremented before relay, never relayed at 0
    pub ttl: u8,
    /// Sender identifier (Ed25519 public key bytes)
    pub sender_id: PeerId,
    /// Recipient identifier, possibly [`PeerId::BROADCAST`]
    pub recipient_id: PeerId,
    /// Random message identifier
    pub message_id: MessageId,
    /// Sender-clock timestamp (ms since epoch)
    pub timestamp: u64,
    /// On-wire signature field: 64 signature bytes + 1 reserved byte
    pub signature: [u8; WIRE_SIGNATURE_SIZE],
    /// Opaque payload bytes
    pub payload: Vec<u8>,
}

impl Frame {
    /// Create an unsigned frame with a fresh message id and the current
    /// timestamp. The signature field is zeroed until [`Frame::sign`].
    #[must_use]
    pub fn new(
        frame_type: FrameType,
        sender_id: PeerId,
        recipient_id: PeerId,
        ttl: u8,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            frame_type,
            ttl,
            sender_id,
            recipient_id,
            message_id: MessageId::random(),
            timestamp: now_millis(),
            signature: [0u8; WIRE_SIGNATURE_SIZE],
            payload,
        }
    }

    /// Canonical bytes covered by the signature: the header with the `ttl`
    /// byte zeroed (relays decrement TTL without re-signing) and the
    /// signature field excluded, followed by the payload.
    #[must_use]
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(SIGNATURE_OFFSET + self.payload.len());
        bytes.push(self.version);
        bytes.push(self.frame_type as u8);
        bytes.push(0); // ttl is hop-mutable, excluded from the signature
        bytes.extend_from_slice(self.sender_id.as_bytes());
        bytes.extend_from_slice(self.recipient_id.as_bytes());
        bytes.extend_from_slice(self.message_id.as_bytes());
        bytes.extend_from_slice(&self.timestamp.to_be_bytes());
        bytes.extend_from_slice(&(self.payload.len() as u16).to_be_bytes());
        bytes.extend_from_slice(&self.payload);
        bytes
    }

    /// Sign the frame, filling the wire signature field (placeholder byte
    /// zero).
    pub fn sign(&mut self, key: &SigningKey) {
        let signature = key.sign(&self.signing_bytes());
        self.signature = signature.to_wire();
    }

    /// Verify the frame signature against the sender id.
    ///
    /// The sender id doubles as the Ed25519 public key, so no key lookup is
    /// needed. The reserved placeholder byte is ignored.
    ///
    /// # Errors
    ///
    /// [`CryptoError::InvalidPublicKey`] if the sender id is not a valid
    /// curve point, [`CryptoError::InvalidSignature`] if verification fails.
    pub fn verify(&self) -> Result<(), CryptoError> {
        let key = VerifyingKey::from_bytes(self.sender_id.as_bytes())?;
        let signature = Signature::from_wire(&self.signature)?;
        key.verify(&self.signing_bytes(), &signature)
    }

    /// Serialize to wire bytes.
    ///
    /// # Errors
    ///
    /// [`FrameError::PayloadTooLarge`] if the payload exceeds the u16
    /// length field, [`FrameError::ExpiredTtl`] if the ttl is zero (such a
    /// frame must never be emitted).
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        if self.payload.len() > MAX_PAYLOAD_SIZE {
            return Err(FrameError::PayloadTooLarge(self.payload.len()));
        }
        if self.ttl == 0 {
            return Err(FrameError::ExpiredTtl);
        }
        if self.version != PROTOCOL_VERSION {
            return Err(FrameError::UnsupportedVersion(self.version));
        }

        let mut buf = Vec::with_capacity(FRAME_HEADER_SIZE + self.payload.len());
        buf.push(self.version);
        buf.push(self.frame_type as u8);
        buf.push(self.ttl);
        buf.extend_from_slice(self.sender_id.as_bytes());
        buf.extend_from_slice(self.recipient_id.as_bytes());
        buf.extend_from_slice(self.message_id.as_bytes());
        buf.extend_from_slice(&self.timestamp.to_be_bytes());
        buf.extend_from_slice(&(self.payload.len() as u16).to_be_bytes());
        buf.extend_from_slice(&self.signature);
        buf.extend_from_slice(&self.payload);
        Ok(buf)
    }

    /// Parse wire bytes into a frame.
    ///
    /// # Errors
    ///
    /// Returns the specific [`FrameError`] for a short buffer, unsupported
    /// version, unknown type byte, zero TTL, or a payload length that does
    /// not match the remaining buffer exactly.
    pub fn decode(data: &[u8]) -> Result<Self, FrameError> {
        if data.len() < FRAME_HEADER_SIZE {
            return Err(FrameError::TooShort {
                expected: FRAME_HEADER_SIZE,
                actual: data.len(),
            });
        }

        let version = data[0];
        if version != PROTOCOL_VERSION {
            return Err(FrameError::UnsupportedVersion(version));
        }

        let frame_type = FrameType::try_from(data[1])?;

        let ttl = data[2];
        if ttl == 0 {
            return Err(FrameError::ExpiredTtl);
        }

        let mut sender = [0u8; 32];
        sender.copy_from_slice(&data[SENDER_OFFSET..RECIPIENT_OFFSET]);
        let mut recipient = [0u8; 32];
        recipient.copy_from_slice(&data[RECIPIENT_OFFSET..MESSAGE_ID_OFFSET]);
        let mut message_id = [0u8; 16];
        message_id.copy_from_slice(&data[MESSAGE_ID_OFFSET..TIMESTAMP_OFFSET]);

        let mut timestamp = [0u8; 8];
        timestamp.copy_from_slice(&data[TIMESTAMP_OFFSET..PAYLOAD_LEN_OFFSET]);
        let timestamp = u64::from_be_bytes(timestamp);

        let declared =
            u16::from_be_bytes([data[PAYLOAD_LEN_OFFSET], data[PAYLOAD_LEN_OFFSET + 1]]) as usize;
        let actual = data.len() - FRAME_HEADER_SIZE;
        if declared != actual {
            return Err(FrameError::PayloadLengthMismatch { declared, actual });
        }

        let mut signature = [0u8; WIRE_SIGNATURE_SIZE];
        signature.copy_from_slice(&data[SIGNATURE_OFFSET..FRAME_HEADER_SIZE]);

        Ok(Self {
            version,
            frame_type,
            ttl,
            sender_id: PeerId::from_bytes(sender),
            recipient_id: PeerId::from_bytes(recipient),
            message_id: MessageId::from_bytes(message_id),
            timestamp,
            signature,
            payload: data[FRAME_HEADER_SIZE..].to_vec(),
        })
    }

    /// A relayed copy with the TTL decremented, or `None` when the hop
    /// budget is spent (a frame arriving with ttl 1 is delivered but never
    /// relayed).
    #[must_use]
    pub fn for_relay(&self) -> Option<Self> {
        if self.ttl <= 1 {
            return None;
        }
        let mut relayed = self.clone();
        relayed.ttl -= 1;
        Some(relayed)
    }
}
