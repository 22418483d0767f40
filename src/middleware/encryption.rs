//! Encryption middleware: AES-256-GCM over the serialized value.
//!
//! Only `value` is encrypted. `fresh_until`/`stale_until` stay in clear so
//! any tier can compute staleness without the key. The stored value is
//! `base64(nonce || ciphertext)`, and the composite key is bound in as
//! associated data so a ciphertext cannot be replayed under another key.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::{CacheError, Result};
use crate::store::{composite_key, SharedStore, Store, StoredEntry};

const TIER_NAME: &str = "encryption";
const NONCE_SIZE: usize = 12;

// == Encrypted Store ==
pub struct EncryptedStore {
    inner: SharedStore,
    cipher: Aes256Gcm,
}

impl EncryptedStore {
    // == Constructor ==
    /// Wraps `inner` with a base64-encoded 256-bit key.
    pub fn from_base64_key(inner: SharedStore, key: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(key.trim())
            .map_err(|e| CacheError::new(TIER_NAME, "", format!("key is not base64: {}", e)))?;
        let cipher = Aes256Gcm::new_from_slice(&bytes).map_err(|_| {
            CacheError::new(
                TIER_NAME,
                "",
                format!("key must be 32 bytes, got {}", bytes.len()),
            )
        })?;
        Ok(Self { inner, cipher })
    }

    /// Generates a fresh random key in the format `from_base64_key` expects.
    pub fn generate_key() -> String {
        STANDARD.encode(Aes256Gcm::generate_key(OsRng))
    }

    fn encrypt(&self, id: &str, plaintext: &str) -> Result<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let payload = Payload {
            msg: plaintext.as_bytes(),
            aad: id.as_bytes(),
        };
        let ciphertext = self
            .cipher
            .encrypt(&nonce, payload)
            .map_err(|e| CacheError::new(TIER_NAME, id, format!("encryption failed: {}", e)))?;

        let mut sealed = nonce.to_vec();
        sealed.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(sealed))
    }

    fn decrypt(&self, id: &str, sealed: &str) -> Result<String> {
        let bytes = STANDARD
            .decode(sealed)
            .map_err(|e| CacheError::new(TIER_NAME, id, format!("ciphertext is not base64: {}", e)))?;
        if bytes.len() < NONCE_SIZE {
            return Err(CacheError::new(TIER_NAME, id, "ciphertext too short"));
        }

        let (nonce, ciphertext) = bytes.split_at(NONCE_SIZE);
        let payload = Payload {
            msg: ciphertext,
            aad: id.as_bytes(),
        };
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), payload)
            .map_err(|_| {
                CacheError::new(TIER_NAME, id, "decryption failed: wrong key or tampered value")
            })?;

        String::from_utf8(plaintext)
            .map_err(|e| CacheError::new(TIER_NAME, id, format!("plaintext is not utf-8: {}", e)))
    }
}

#[async_trait]
impl Store for EncryptedStore {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn get(&self, namespace: &str, key: &str) -> Result<Option<StoredEntry>> {
        let id = composite_key(namespace, key);
        match self.inner.get(namespace, key).await? {
            None => Ok(None),
            Some(entry) => entry.try_map(|sealed| self.decrypt(&id, &sealed)).map(Some),
        }
    }

    async fn set(&self, namespace: &str, key: &str, entry: StoredEntry) -> Result<()> {
        let id = composite_key(namespace, key);
        let sealed = entry.try_map(|plain| self.encrypt(&id, &plain))?;
        self.inner.set(namespace, key, sealed).await
    }

    async fn remove(&self, namespace: &str, key: &str) -> Result<()> {
        self.inner.remove(namespace, key).await
    }
}
