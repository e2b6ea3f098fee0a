//! At-rest symmetric encryption for account credential fields, keyed from the
//! OS keyring. Falls back to a key file colocated with
//! the store when no keyring backend is available (headless CI, containers
//! without a secret service) — the fallback is logged, not silent.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::{engine::general_purpose::STANDARD, Engine};
use rand::RngCore;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum CipherError {
    #[error("encrypt: {0}")]
    Encrypt(String),
    #[error("decrypt: {0}")]
    Decrypt(String),
    #[error("key storage: {0}")]
    Key(String),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum KeyBackend {
    Keyring,
    PlaintextFallback,
}

const SERVICE: &str = "chat-gateway";
const ACCOUNT: &str = "credential-encryption-key";

pub struct Cipher {
    key: [u8; 32],
    backend: KeyBackend,
}

impl Cipher {
    /// Loads the key from the OS keyring, generating and storing one on
    /// first use. Falls back to `fallback_key_path` when the keyring is
    /// unavailable; callers should check [`Cipher::backend`] and log when it
    /// reports [`KeyBackend::PlaintextFallback`].
    pub fn open(fallback_key_path: &Path) -> Result<Self, CipherError> {
        match Self::load_or_create_keyring_key() {
            Ok(key) => Ok(Self {
                key,
                backend: KeyBackend::Keyring,
            }),
            Err(_) => {
                let key = Self::load_or_create_file_key(fallback_key_path)?;
                Ok(Self {
                    key,
                    backend: KeyBackend::PlaintextFallback,
                })
            }
        }
    }

    pub fn backend(&self) -> KeyBackend {
        self.backend
    }

    fn load_or_create_keyring_key() -> Result<[u8; 32], CipherError> {
        let entry =
            keyring::Entry::new(SERVICE, ACCOUNT).map_err(|e| CipherError::Key(e.to_string()))?;
        match entry.get_password() {
            Ok(existing) => {
                let bytes = STANDARD
                    .decode(existing)
                    .map_err(|e| CipherError::Key(e.to_string()))?;
                if bytes.len() != 32 {
                    return Err(CipherError::Key("stored key has wrong length".into()));
                }
                let mut key = [0u8; 32];
                key.copy_from_slice(&bytes);
                Ok(key)
            }
            Err(keyring::Error::NoEntry) => {
                let mut key = [0u8; 32];
                OsRng.fill_bytes(&mut key);
                entry
                    .set_password(&STANDARD.encode(key))
                    .map_err(|e| CipherError::Key(e.to_string()))?;
                Ok(key)
            }
            Err(e) => Err(CipherError::Key(e.to_string())),
        }
    }

    fn load_or_create_file_key(path: &Path) -> Result<[u8; 32], CipherError> {
        if let Ok(contents) = std::fs::read(path) {
            if contents.len() == 32 {
                let mut key = [0u8; 32];
                key.copy_from_slice(&contents);
                return Ok(key);
            }
        }
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        std::fs::write(path, key).map_err(|e| CipherError::Key(e.to_string()))?;
        Ok(key)
    }

    /// Encrypts `plaintext`, returning `base64(nonce || ciphertext)`.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CipherError> {
        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| CipherError::Encrypt(e.to_string()))?;
        let mut nonce_bytes = [0u8; 12];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| CipherError::Encrypt(e.to_string()))?;
        let mut out = Vec::with_capacity(12 + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(out))
    }

    /// Decrypts a value produced by [`Cipher::encrypt`].
    pub fn decrypt(&self, encoded: &str) -> Result<String, CipherError> {
        let raw = STANDARD
            .decode(encoded)
            .map_err(|e| CipherError::Decrypt(e.to_string()))?;
        if raw.len() < 12 {
            return Err(CipherError::Decrypt("ciphertext too short".into()));
        }
        let (nonce_bytes, ciphertext) = raw.split_at(12);
        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| CipherError::Decrypt(e.to_string()))?;
        let nonce = Nonce::from_slice(nonce_bytes);
        let plaintext = cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| CipherError::Decrypt(e.to_string()))?;
        String::from_utf8(plaintext).map_err(|e| CipherError::Decrypt(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_backed_key_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let key_path = dir.path().join("key.bin");
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        std::fs::write(&key_path, key).unwrap();
        let cipher = Cipher {
            key,
            backend: KeyBackend::PlaintextFallback,
        };
        let encrypted = cipher.encrypt("sk-super-secret").unwrap();
        assert_ne!(encrypted, "sk-super-secret");
        assert_eq!(cipher.decrypt(&encrypted).unwrap(), "sk-super-secret");
    }

    #[test]
    fn each_encryption_uses_a_fresh_nonce() {
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        let cipher = Cipher {
            key,
            backend: KeyBackend::PlaintextFallback,
        };
        let a = cipher.encrypt("same input").unwrap();
        let b = cipher.encrypt("same input").unwrap();
        assert_ne!(a, b);
    }
}
