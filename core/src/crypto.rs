//! Chat message confidentiality.
//!
//! Message text is sealed with XChaCha20-Poly1305 before it reaches the
//! database and opened again after retrieval. Every message gets a fresh
//! random 24-byte nonce, prepended to the ciphertext, and the whole blob is
//! base64-encoded so it can live in a TEXT column. The key is supplied by
//! the caller at construction time, either as raw bytes or derived from a
//! secret string.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit},
};
use rand::RngCore;
use thiserror::Error;

pub const KEY_SIZE: usize = 32;
pub const NONCE_SIZE: usize = 24;

const CHAT_KEY_CONTEXT: &str = "nourish 2025-01 chat message key";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CipherError {
    #[error("message encryption failed")]
    Encrypt,
    /// Covers truncated input, bad base64, a wrong key, and tampering;
    /// the AEAD tag rejects all of them identically.
    #[error("message decryption failed")]
    Decrypt,
}

/// Symmetric cipher for chat message text.
#[derive(Clone)]
pub struct MessageCipher {
    key: [u8; KEY_SIZE],
}

impl MessageCipher {
    #[must_use]
    pub fn new(key: [u8; KEY_SIZE]) -> Self {
        Self { key }
    }

    /// Derive the message key from a provisioned secret string.
    #[must_use]
    pub fn from_secret(secret: &str) -> Self {
        Self {
            key: blake3::derive_key(CHAT_KEY_CONTEXT, secret.as_bytes()),
        }
    }

    /// Seal `plaintext`, returning base64(nonce || ciphertext).
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CipherError> {
        let cipher = XChaCha20Poly1305::new((&self.key).into());

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = XNonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| CipherError::Encrypt)?;

        let mut data = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        data.extend_from_slice(&nonce_bytes);
        data.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(data))
    }

    /// Open a blob produced by [`encrypt`](Self::encrypt).
    pub fn decrypt(&self, encoded: &str) -> Result<String, CipherError> {
        let data = BASE64.decode(encoded).map_err(|_| CipherError::Decrypt)?;
        if data.len() < NONCE_SIZE {
            return Err(CipherError::Decrypt);
        }

        let (nonce_bytes, ciphertext) = data.split_at(NONCE_SIZE);
        let cipher = XChaCha20Poly1305::new((&self.key).into());
        let plaintext = cipher
            .decrypt(XNonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| CipherError::Decrypt)?;

        String::from_utf8(plaintext).map_err(|_| CipherError::Decrypt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> MessageCipher {
        MessageCipher::new([0x42; KEY_SIZE])
    }

    #[test]
    fn test_round_trip() {
        let c = cipher();
        for msg in [
            "How is the new meal plan going?",
            "",
            "café com pão integral às 8h ☕",
            "多吃蔬菜",
        ] {
            let sealed = c.encrypt(msg).unwrap();
            assert_eq!(c.decrypt(&sealed).unwrap(), msg);
        }
    }

    #[test]
    fn test_same_plaintext_yields_different_ciphertexts() {
        let c = cipher();
        let a = c.encrypt("hello").unwrap();
        let b = c.encrypt("hello").unwrap();
        assert_ne!(a, b);
        assert_eq!(c.decrypt(&a).unwrap(), "hello");
        assert_eq!(c.decrypt(&b).unwrap(), "hello");
    }

    #[test]
    fn test_tampered_ciphertext_rejected() {
        let c = cipher();
        let sealed = c.encrypt("hello").unwrap();
        let mut data = BASE64.decode(&sealed).unwrap();
        let last = data.len() - 1;
        data[last] ^= 0x01;
        let tampered = BASE64.encode(data);
        assert_eq!(c.decrypt(&tampered), Err(CipherError::Decrypt));
    }

    #[test]
    fn test_wrong_key_rejected() {
        let sealed = cipher().encrypt("hello").unwrap();
        let other = MessageCipher::new([0x43; KEY_SIZE]);
        assert_eq!(other.decrypt(&sealed), Err(CipherError::Decrypt));
    }

    #[test]
    fn test_garbage_input_rejected() {
        let c = cipher();
        assert_eq!(c.decrypt("not base64 at all!!"), Err(CipherError::Decrypt));
        assert_eq!(c.decrypt("YWJj"), Err(CipherError::Decrypt)); // shorter than a nonce
    }

    #[test]
    fn test_derived_keys_are_stable() {
        let a = MessageCipher::from_secret("install-secret");
        let b = MessageCipher::from_secret("install-secret");
        let sealed = a.encrypt("hello").unwrap();
        assert_eq!(b.decrypt(&sealed).unwrap(), "hello");

        let c = MessageCipher::from_secret("another-secret");
        assert_eq!(c.decrypt(&sealed), Err(CipherError::Decrypt));
    }
}
