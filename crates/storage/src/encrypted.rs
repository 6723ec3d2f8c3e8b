//! At-rest encryption for blob payloads.
//!
//! [`EncryptedBlobStore`] wraps any [`BlobStore`] and seals each payload with
//! AES-256-GCM under a configured master key before it reaches either tier.
//! The stored payload layout is `nonce (12 bytes) || ciphertext || tag`. The
//! blob key is bound as associated data, so a payload copied to another key
//! fails to open.
//!
//! A payload that cannot be opened surfaces as
//! [`StorageError::Decryption`], never as absence: it means corruption or a
//! master key that differs between instances, and callers should alert on it.

use std::{sync::Arc, time::Duration};

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit, Payload},
};
use async_trait::async_trait;
use bytes::Bytes;
use rand_core::{OsRng, RngCore};
use zeroize::Zeroizing;

use crate::{
    blob::{Blob, BlobStore},
    error::{StorageError, StorageResult},
};

/// Size of the AES-256 master key in bytes.
pub const MASTER_KEY_LEN: usize = 32;

/// Size of the AES-GCM nonce prefixed to every sealed payload.
const NONCE_LEN: usize = 12;

/// A [`BlobStore`] that encrypts payloads on `put` and decrypts on `get`
/// and `list`.
///
/// `list` fails on the first payload that does not open. `list_entries`
/// opens each payload independently, for callers that can skip a bad blob.
#[derive(Clone)]
pub struct EncryptedBlobStore {
    inner: Arc<dyn BlobStore>,
    master_key: Arc<Zeroizing<[u8; MASTER_KEY_LEN]>>,
}

impl EncryptedBlobStore {
    /// Wraps `inner`, sealing payloads with `master_key`.
    pub fn new(inner: Arc<dyn BlobStore>, master_key: Zeroizing<[u8; MASTER_KEY_LEN]>) -> Self {
        Self { inner, master_key: Arc::new(master_key) }
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(self.master_key.as_slice()))
    }

    fn seal(&self, key: &str, plaintext: &[u8]) -> StorageResult<Bytes> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);

        let payload = Payload { msg: plaintext, aad: key.as_bytes() };
        let ciphertext = self
            .cipher()
            .encrypt(Nonce::from_slice(&nonce_bytes), payload)
            .map_err(|_| StorageError::internal("payload encryption failed"))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(Bytes::from(sealed))
    }

    fn open(&self, key: &str, sealed: &[u8]) -> StorageResult<Bytes> {
        if sealed.len() < NONCE_LEN {
            return Err(StorageError::decryption(format!(
                "payload for {key} is {} bytes, shorter than the nonce",
                sealed.len()
            )));
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);

        let plaintext = self
            .cipher()
            .decrypt(Nonce::from_slice(nonce), Payload { msg: ciphertext, aad: key.as_bytes() })
            .map_err(|_| StorageError::decryption(format!("payload for {key} failed to open")))?;
        Ok(Bytes::from(plaintext))
    }
}

#[async_trait]
impl BlobStore for EncryptedBlobStore {
    async fn put(&self, key: &str, payload: Bytes, ttl: Duration) -> StorageResult<()> {
        let sealed = self.seal(key, &payload)?;
        self.inner.put(key, sealed, ttl).await
    }

    async fn get(&self, key: &str) -> StorageResult<Option<Bytes>> {
        match self.inner.get(key).await? {
            Some(sealed) => self.open(key, &sealed).map(Some),
            None => Ok(None),
        }
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<Blob>> {
        self.list_entries(prefix).await?.into_iter().collect()
    }

    async fn list_entries(&self, prefix: &str) -> StorageResult<Vec<StorageResult<Blob>>> {
        let entries = self.inner.list_entries(prefix).await?;
        Ok(entries
            .into_iter()
            .map(|entry| {
                let blob = entry?;
                let payload = self.open(&blob.key, &blob.payload)?;
                Ok(Blob { payload, ..blob })
            })
            .collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::{blob::TieredBlobStore, memory::MemoryBackend};

    fn key(byte: u8) -> Zeroizing<[u8; MASTER_KEY_LEN]> {
        Zeroizing::new([byte; MASTER_KEY_LEN])
    }

    fn plain_store() -> Arc<dyn BlobStore> {
        Arc::new(TieredBlobStore::new(Arc::new(MemoryBackend::new()), None))
    }

    #[tokio::test]
    async fn test_round_trip() {
        let store = EncryptedBlobStore::new(plain_store(), key(7));

        store.put("k", Bytes::from("secret"), Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(Bytes::from("secret")));
    }

    #[tokio::test]
    async fn test_payload_is_not_stored_in_clear() {
        let inner = plain_store();
        let store = EncryptedBlobStore::new(inner.clone(), key(7));

        store.put("k", Bytes::from("secret"), Duration::from_secs(60)).await.unwrap();

        let raw = inner.get("k").await.unwrap().unwrap();
        assert_eq!(raw.len(), NONCE_LEN + "secret".len() + 16);
        assert!(!raw.windows(6).any(|w| w == b"secret"));
    }

    #[tokio::test]
    async fn test_same_plaintext_seals_differently() {
        let inner = plain_store();
        let store = EncryptedBlobStore::new(inner.clone(), key(7));

        store.put("a", Bytes::from("same"), Duration::from_secs(60)).await.unwrap();
        store.put("b", Bytes::from("same"), Duration::from_secs(60)).await.unwrap();

        assert_ne!(inner.get("a").await.unwrap(), inner.get("b").await.unwrap());
    }

    #[tokio::test]
    async fn test_wrong_master_key_is_decryption_error() {
        let inner = plain_store();
        let writer = EncryptedBlobStore::new(inner.clone(), key(1));
        let reader = EncryptedBlobStore::new(inner, key(2));

        writer.put("k", Bytes::from("secret"), Duration::from_secs(60)).await.unwrap();

        let err = reader.get("k").await.unwrap_err();
        assert!(matches!(err, StorageError::Decryption { .. }), "got {err:?}");
        let err = reader.list("").await.unwrap_err();
        assert!(matches!(err, StorageError::Decryption { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn test_payload_moved_to_other_key_fails_to_open() {
        let inner = plain_store();
        let store = EncryptedBlobStore::new(inner.clone(), key(3));

        store.put("a", Bytes::from("secret"), Duration::from_secs(60)).await.unwrap();
        let sealed = inner.get("a").await.unwrap().unwrap();
        inner.put("b", sealed, Duration::from_secs(60)).await.unwrap();

        assert!(matches!(store.get("b").await, Err(StorageError::Decryption { .. })));
    }

    #[tokio::test]
    async fn test_truncated_payload_is_decryption_error() {
        let inner = plain_store();
        let store = EncryptedBlobStore::new(inner.clone(), key(3));

        inner.put("k", Bytes::from_static(b"short"), Duration::from_secs(60)).await.unwrap();
        assert!(matches!(store.get("k").await, Err(StorageError::Decryption { .. })));
    }

    #[tokio::test]
    async fn test_missing_key_is_none_not_error() {
        let store = EncryptedBlobStore::new(plain_store(), key(3));
        assert_eq!(store.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_list_entries_isolates_unreadable_blob() {
        let inner = plain_store();
        let store = EncryptedBlobStore::new(inner.clone(), key(9));

        store.put("p/1", Bytes::from("one"), Duration::from_secs(60)).await.unwrap();
        inner
            .put("p/2", Bytes::from_static(b"not sealed by us"), Duration::from_secs(60))
            .await
            .unwrap();
        store.put("p/3", Bytes::from("three"), Duration::from_secs(60)).await.unwrap();

        let entries = store.list_entries("p/").await.unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].as_ref().unwrap().payload, Bytes::from("one"));
        assert!(matches!(entries[1], Err(StorageError::Decryption { .. })));
        assert_eq!(entries[2].as_ref().unwrap().payload, Bytes::from("three"));

        assert!(matches!(store.list("p/").await, Err(StorageError::Decryption { .. })));
        assert!(matches!(store.get("p/2").await, Err(StorageError::Decryption { .. })));
    }

    #[tokio::test]
    async fn test_list_decrypts_every_blob() {
        let store = EncryptedBlobStore::new(plain_store(), key(9));

        store.put("p/1", Bytes::from("one"), Duration::from_secs(60)).await.unwrap();
        store.put("p/2", Bytes::from("two"), Duration::from_secs(60)).await.unwrap();

        let payloads: Vec<Bytes> =
            store.list("p/").await.unwrap().into_iter().map(|b| b.payload).collect();
        assert_eq!(payloads, vec![Bytes::from("one"), Bytes::from("two")]);
    }
}
