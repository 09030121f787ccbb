//! `XChaCha20-Poly1305` authenticated payload encryption.
//!
//! Every nonce is derived from the frame's 16-byte message id and an 8-byte
//! per-session send counter, so nonces are unique per message without any
//! coordination beyond the counter. Tag mismatch on decrypt means the frame
//! is hostile or corrupt; the payload is never partially recovered.

use crate::{CryptoError, XCHACHA_NONCE_SIZE, XCHACHA_TAG_SIZE};
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// 192-bit XChaCha20 nonce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Nonce([u8; XCHACHA_NONCE_SIZE]);

impl Nonce {
    /// Derive a nonce from a message id and a per-session counter.
    ///
    /// Layout: `message_id(16) || counter(8, big-endian)`.
    #[must_use]
    pub fn from_parts(message_id: &[u8; 16], counter: u64) -> Self {
        let mut bytes = [0u8; XCHACHA_NONCE_SIZE];
        bytes[..16].copy_from_slice(message_id);
        bytes[16..].copy_from_slice(&counter.to_be_bytes());
        Self(bytes)
    }

    /// Get the raw nonce bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; XCHACHA_NONCE_SIZE] {
        &self.0
    }
}

/// Symmetric AEAD key (32 bytes), zeroized on drop.
#[derive(ZeroizeOnDrop, Zeroize)]
pub struct AeadKey([u8; 32]);

impl AeadKey {
    /// Wrap raw key bytes.
    #[must_use]
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Encrypt `plaintext` with associated data `aad`.
    ///
    /// Returns ciphertext with the 16-byte authentication tag appended.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::EncryptionFailed`] on AEAD failure.
    pub fn encrypt(
        &self,
        nonce: &Nonce,
        plaintext: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let cipher = XChaCha20Poly1305::new((&self.0).into());
        cipher
            .encrypt(
                XNonce::from_slice(nonce.as_bytes()),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|_| CryptoError::EncryptionFailed)
    }

    /// Decrypt `ciphertext` (tag included) with associated data `aad`.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::CiphertextTooShort`] if the input cannot even
    /// hold a tag, [`CryptoError::DecryptionFailed`] on authentication
    /// failure.
    pub fn decrypt(
        &self,
        nonce: &Nonce,
        ciphertext: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        if ciphertext.len() < XCHACHA_TAG_SIZE {
            return Err(CryptoError::CiphertextTooShort);
        }
        let cipher = XChaCha20Poly1305::new((&self.0).into());
        cipher
            .decrypt(
                XNonce::from_slice(nonce.as_bytes()),
                Payload {
                    msg: ciphertext,
                    aad,
                },
            )
            .map_err(|_| CryptoError::DecryptionFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> AeadKey {
        AeadKey::new([0x42u8; 32])
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = test_key();
        let nonce = Nonce::from_parts(&[1u8; 16], 7);

        let ciphertext = key.encrypt(&nonce, b"mesh payload", b"aad").unwrap();
        assert_ne!(&ciphertext[..12], b"mesh payload");

        let plaintext = key.decrypt(&nonce, &ciphertext, b"aad").unwrap();
        assert_eq!(plaintext, b"mesh payload");
    }

    #[test]
    fn test_tampered_ciphertext_rejected() {
        let key = test_key();
        let nonce = Nonce::from_parts(&[2u8; 16], 0);

        let mut ciphertext = key.encrypt(&nonce, b"payload", b"").unwrap();
        ciphertext[0] ^= 0xFF;

        assert!(matches!(
            key.decrypt(&nonce, &ciphertext, b""),
            Err(CryptoError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_wrong_aad_rejected() {
        let key = test_key();
        let nonce = Nonce::from_parts(&[3u8; 16], 1);

        let ciphertext = key.encrypt(&nonce, b"payload", b"header-a").unwrap();
        assert!(key.decrypt(&nonce, &ciphertext, b"header-b").is_err());
    }

    #[test]
    fn test_wrong_key_rejected() {
        let nonce = Nonce::from_parts(&[4u8; 16], 2);
        let ciphertext = test_key().encrypt(&nonce, b"payload", b"").unwrap();

        let other = AeadKey::new([0x43u8; 32]);
        assert!(other.decrypt(&nonce, &ciphertext, b"").is_err());
    }

    #[test]
    fn test_nonce_derivation_unique_per_counter() {
        let id = [5u8; 16];
        assert_ne!(Nonce::from_parts(&id, 0), Nonce::from_parts(&id, 1));
        assert_eq!(Nonce::from_parts(&id, 9), Nonce::from_parts(&id, 9));
    }

    #[test]
    fn test_short_ciphertext_rejected() {
        let key = test_key();
        let nonce = Nonce::from_parts(&[6u8; 16], 0);

        assert!(matches!(
            key.decrypt(&nonce, &[0u8; 8], b""),
            Err(CryptoError::CiphertextTooShort)
        ));
    }
}
