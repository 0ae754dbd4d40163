//! AES-256-GCM encryption for values passed through `Settings.connection_secrets`
//! (§3 "Settings", §4.J). Grounded on the teacher's credential encryption: a
//! random 12-byte nonce per call, base64-encoded ciphertext and nonce stored
//! side by side.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;

use crate::errors::{AppError, AppResult};

const NONCE_SIZE: usize = 12;
const KEY_SIZE: usize = 32;

/// Encrypts and decrypts connection secret values with a single process-wide key.
pub struct SecretsCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for SecretsCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretsCipher").field("cipher", &"<redacted>").finish()
    }
}

impl SecretsCipher {
    /// Builds a cipher from raw key bytes, zero-padding or truncating to
    /// `KEY_SIZE` so a shorter operator-supplied key still works.
    pub fn new(key: &[u8]) -> Self {
        let mut padded = [0u8; KEY_SIZE];
        let n = key.len().min(KEY_SIZE);
        padded[..n].copy_from_slice(&key[..n]);
        let key = Key::<Aes256Gcm>::from_slice(&padded);
        Self { cipher: Aes256Gcm::new(key) }
    }

    /// Builds a cipher from a base64-encoded key, as produced by [`generate_key`].
    pub fn from_base64_key(key_b64: &str) -> AppResult<Self> {
        let bytes = BASE64
            .decode(key_b64)
            .map_err(|e| AppError::Validation(format!("invalid secrets key: {e}")))?;
        Ok(Self::new(&bytes))
    }

    /// Encrypts `plaintext`, returning `(ciphertext_b64, nonce_b64)`.
    pub fn encrypt(&self, plaintext: &str) -> AppResult<(String, String)> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| AppError::Internal(anyhow::anyhow!("secret encryption failed")))?;

        Ok((BASE64.encode(ciphertext), BASE64.encode(nonce_bytes)))
    }

    /// Decrypts a `(ciphertext_b64, nonce_b64)` pair produced by [`encrypt`](Self::encrypt).
    pub fn decrypt(&self, ciphertext_b64: &str, nonce_b64: &str) -> AppResult<String> {
        let ciphertext = BASE64
            .decode(ciphertext_b64)
            .map_err(|e| AppError::Validation(format!("invalid ciphertext encoding: {e}")))?;
        let nonce_bytes = BASE64
            .decode(nonce_b64)
            .map_err(|e| AppError::Validation(format!("invalid nonce encoding: {e}")))?;
        if nonce_bytes.len() != NONCE_SIZE {
            return Err(AppError::Validation("invalid nonce length".to_string()));
        }
        let nonce = Nonce::from_slice(&nonce_bytes);

        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext.as_slice())
            .map_err(|_| AppError::Internal(anyhow::anyhow!("secret decryption failed")))?;

        String::from_utf8(plaintext)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("decrypted secret is not utf-8: {e}")))
    }
}

/// Generates a fresh base64-encoded 256-bit key, for operators provisioning
/// `SECRETS_ENCRYPTION_KEY`.
pub fn generate_key() -> String {
    let mut key = [0u8; KEY_SIZE];
    rand::thread_rng().fill_bytes(&mut key);
    BASE64.encode(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_then_decrypt_round_trips() {
        let cipher = SecretsCipher::new(b"a-test-key-that-is-not-32-bytes");
        let (ciphertext, nonce) = cipher.encrypt("radarr-api-key-123").unwrap();
        let plaintext = cipher.decrypt(&ciphertext, &nonce).unwrap();
        assert_eq!(plaintext, "radarr-api-key-123");
    }

    #[test]
    fn each_call_uses_a_fresh_nonce() {
        let cipher = SecretsCipher::new(b"key");
        let (_, nonce_a) = cipher.encrypt("value").unwrap();
        let (_, nonce_b) = cipher.encrypt("value").unwrap();
        assert_ne!(nonce_a, nonce_b);
    }

    #[test]
    fn generated_key_round_trips_via_base64_constructor() {
        let key = generate_key();
        let cipher = SecretsCipher::from_base64_key(&key).unwrap();
        let (ciphertext, nonce) = cipher.encrypt("sonarr-key").unwrap();
        assert_eq!(cipher.decrypt(&ciphertext, &nonce).unwrap(), "sonarr-key");
    }

    #[test]
    fn tampered_nonce_fails_to_decrypt() {
        let cipher = SecretsCipher::new(b"key");
        let (ciphertext, _) = cipher.encrypt("value").unwrap();
        let bogus_nonce = BASE64.encode([0u8; NONCE_SIZE]);
        assert!(cipher.decrypt(&ciphertext, &bogus_nonce).is_err());
    }
}
