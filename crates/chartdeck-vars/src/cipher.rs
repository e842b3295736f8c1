//! Symmetric encryption for secret variable values.
//!
//! Values are stored as hex(nonce ‖ ciphertext) under ChaCha20-Poly1305 with a
//! key derived from the operator's passkey via SHA-256.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use sha2::{Digest, Sha256};

use crate::error::CipherError;

const NONCE_LEN: usize = 12;

/// Passkey-derived cipher for secret variables.
#[derive(Clone)]
pub struct SecretCipher {
    key: [u8; 32],
}

impl std::fmt::Debug for SecretCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretCipher").finish_non_exhaustive()
    }
}

impl SecretCipher {
    pub fn from_passkey(passkey: &str) -> Self {
        Self {
            key: Sha256::digest(passkey.as_bytes()).into(),
        }
    }

    fn aead(&self) -> ChaCha20Poly1305 {
        ChaCha20Poly1305::new(Key::from_slice(&self.key))
    }

    /// Encrypt a plaintext into its hex storage form.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CipherError> {
        let mut nonce = [0u8; NONCE_LEN];
        getrandom::getrandom(&mut nonce).map_err(|e| CipherError::Nonce(e.to_string()))?;
        let ciphertext = self
            .aead()
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|_| CipherError::Encrypt)?;

        let mut payload = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        payload.extend_from_slice(&nonce);
        payload.extend_from_slice(&ciphertext);
        Ok(hex::encode(payload))
    }

    /// Decrypt a hex storage value.
    pub fn decrypt(&self, stored: &str) -> Result<String, CipherError> {
        let payload = hex::decode(stored.trim()).map_err(|e| CipherError::Hex(e.to_string()))?;
        // A valid payload carries the nonce plus at least the 16-byte tag.
        if payload.len() < NONCE_LEN + 16 {
            return Err(CipherError::Truncated(payload.len()));
        }
        let (nonce, ciphertext) = payload.split_at(NONCE_LEN);
        let plaintext = self
            .aead()
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CipherError::Authentication)?;
        String::from_utf8(plaintext).map_err(|_| CipherError::Utf8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decrypts_what_it_encrypted() {
        let cipher = SecretCipher::from_passkey("correct horse");
        let stored = cipher.encrypt("s3cr3t").unwrap();

        assert_ne!(stored, "s3cr3t");
        assert!(stored.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(cipher.decrypt(&stored).unwrap(), "s3cr3t");
    }

    #[test]
    fn nonces_differ_between_encryptions() {
        let cipher = SecretCipher::from_passkey("k");
        assert_ne!(cipher.encrypt("same").unwrap(), cipher.encrypt("same").unwrap());
    }

    #[test]
    fn wrong_passkey_fails_authentication() {
        let stored = SecretCipher::from_passkey("one").encrypt("value").unwrap();
        let err = SecretCipher::from_passkey("two").decrypt(&stored).unwrap_err();
        assert_eq!(err, CipherError::Authentication);
    }

    #[test]
    fn malformed_payloads_are_typed_errors() {
        let cipher = SecretCipher::from_passkey("k");
        assert!(matches!(cipher.decrypt("zz"), Err(CipherError::Hex(_))));
        assert_eq!(cipher.decrypt("abcd"), Err(CipherError::Truncated(2)));
    }
}
