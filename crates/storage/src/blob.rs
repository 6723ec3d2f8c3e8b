//! TTL-bound blob storage over a durable tier and an optional cache tier.
//!
//! A blob is an opaque payload stored under a string key until its TTL
//! elapses. [`TieredBlobStore`] writes through the durable tier first and
//! treats the cache tier as a best-effort accelerator:
//!
//! | Operation | Durable tier | Cache tier |
//! |-----------|--------------|------------|
//! | `put` | written first, failure fails the call | written after, failure reported |
//! | `get` | consulted on cache miss or cache failure | consulted first, repopulated on durable hit |
//! | `list` | authoritative source | not consulted |
//!
//! Both tiers store the same JSON envelope, `{"payload": <base64>,
//! "expires_at": <RFC 3339>}`, and both are written with a native TTL so an
//! expired blob disappears on its own. Reads also compare `expires_at`
//! against the clock, so a blob is never returned past its deadline even if
//! a tier sweeps lazily.
//!
//! # Example
//!
//! ```
//! use std::{sync::Arc, time::Duration};
//!
//! use bytes::Bytes;
//! use keyward_storage::{BlobStore, MemoryBackend, TieredBlobStore};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let durable = Arc::new(MemoryBackend::new());
//! let cache = Arc::new(MemoryBackend::new());
//! let store = TieredBlobStore::new(durable, Some(cache));
//!
//! store.put("signing-keys/a", Bytes::from("secret"), Duration::from_secs(60)).await.unwrap();
//! assert_eq!(store.get("signing-keys/a").await.unwrap(), Some(Bytes::from("secret")));
//! # });
//! ```

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    backend::StorageBackend,
    error::{StorageError, StorageResult},
    report::{ErrorReporter, default_reporter},
};

/// Key namespace for blobs inside a shared backend.
const BLOB_NAMESPACE: &str = "blobs/";

/// A stored blob together with its expiration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    /// Key the blob was stored under.
    pub key: String,
    /// Opaque payload bytes.
    pub payload: Bytes,
    /// Instant after which the blob is no longer returned.
    pub expires_at: DateTime<Utc>,
}

/// TTL-keyed byte storage.
///
/// Absence is not an error: `get` returns `Ok(None)` for a key that was never
/// written and for one whose TTL has elapsed.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores `payload` under `key`, overwriting any previous value. The blob
    /// is retrievable until `ttl` elapses.
    ///
    /// # Errors
    ///
    /// Returns the durable tier's error if the authoritative write fails.
    async fn put(&self, key: &str, payload: Bytes, ttl: Duration) -> StorageResult<()>;

    /// Returns the payload stored under `key`, if it is still live.
    ///
    /// # Errors
    ///
    /// Returns an error only when the durable tier had to be consulted and
    /// failed, or when a stored payload is unreadable.
    async fn get(&self, key: &str) -> StorageResult<Option<Bytes>>;

    /// Returns every live blob whose key starts with `prefix`, in ascending
    /// key order.
    ///
    /// # Errors
    ///
    /// Returns the durable tier's error on failure.
    async fn list(&self, prefix: &str) -> StorageResult<Vec<Blob>>;

    /// Like [`list`](Self::list), but a blob that cannot be read is returned
    /// as its own `Err` entry instead of failing the whole listing.
    ///
    /// Stores that transform payloads on the way out (decryption) override
    /// this so one bad blob cannot hide every other blob under the prefix.
    ///
    /// # Errors
    ///
    /// The outer result carries the durable tier's error on failure.
    async fn list_entries(&self, prefix: &str) -> StorageResult<Vec<StorageResult<Blob>>> {
        Ok(self.list(prefix).await?.into_iter().map(Ok).collect())
    }
}

/// On-the-wire representation shared by both tiers.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    payload: String,
    expires_at: DateTime<Utc>,
}

impl Envelope {
    fn encode(payload: &[u8], expires_at: DateTime<Utc>) -> StorageResult<Vec<u8>> {
        let envelope = Self { payload: STANDARD.encode(payload), expires_at };
        serde_json::to_vec(&envelope)
            .map_err(|e| StorageError::serialization_with_source("encode blob envelope", e))
    }

    fn decode(raw: &[u8]) -> StorageResult<(Bytes, DateTime<Utc>)> {
        let envelope: Self = serde_json::from_slice(raw)
            .map_err(|e| StorageError::serialization_with_source("decode blob envelope", e))?;
        let payload = STANDARD
            .decode(envelope.payload.as_bytes())
            .map_err(|e| StorageError::serialization_with_source("decode blob payload", e))?;
        Ok((Bytes::from(payload), envelope.expires_at))
    }
}

/// Time left until `expires_at`, or `None` if it has already passed.
pub(crate) fn remaining_ttl(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> Option<Duration> {
    (expires_at - now).to_std().ok().filter(|ttl| !ttl.is_zero())
}

/// Converts a TTL into an absolute deadline, saturating on overflow.
pub(crate) fn deadline(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn storage_key(key: &str) -> Vec<u8> {
    format!("{BLOB_NAMESPACE}{key}").into_bytes()
}

/// Dual-tier [`BlobStore`]: durable tier required, cache tier optional.
#[derive(Clone)]
pub struct TieredBlobStore {
    durable: Arc<dyn StorageBackend>,
    cache: Option<Arc<dyn StorageBackend>>,
    reporter: Arc<dyn ErrorReporter>,
}

impl TieredBlobStore {
    /// Creates a store over `durable`, accelerated by `cache` when present.
    /// Swallowed cache failures go to the default tracing reporter.
    pub fn new(durable: Arc<dyn StorageBackend>, cache: Option<Arc<dyn StorageBackend>>) -> Self {
        Self { durable, cache, reporter: default_reporter() }
    }

    /// Replaces the sink that receives swallowed cache failures.
    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Reports and logs a cache failure that is not allowed to fail the call.
    fn swallow(&self, operation: &'static str, key: &str, err: &StorageError) {
        warn!(operation, key, error = %err, "cache tier failure, continuing with durable tier");
        self.reporter.report(err);
    }

    async fn read_cache(&self, cache: &dyn StorageBackend, key: &str) -> Option<Bytes> {
        match cache.get(&storage_key(key)).await {
            Ok(Some(raw)) => match Envelope::decode(&raw) {
                Ok((payload, expires_at)) if expires_at > Utc::now() => {
                    debug!(key, "blob cache hit");
                    Some(payload)
                },
                Ok(_) => {
                    debug!(key, "blob cache entry expired");
                    None
                },
                Err(err) => {
                    self.swallow("get", key, &err);
                    None
                },
            },
            Ok(None) => {
                debug!(key, "blob cache miss");
                None
            },
            Err(err) => {
                self.swallow("get", key, &err);
                None
            },
        }
    }
}

#[async_trait]
impl BlobStore for TieredBlobStore {
    #[tracing::instrument(skip(self, payload), fields(payload_len = payload.len()))]
    async fn put(&self, key: &str, payload: Bytes, ttl: Duration) -> StorageResult<()> {
        let expires_at = deadline(Utc::now(), ttl);
        let raw = Envelope::encode(&payload, expires_at)?;

        self.durable.set_with_ttl(storage_key(key), raw.clone(), ttl).await?;

        if let Some(cache) = &self.cache
            && let Err(err) = cache.set_with_ttl(storage_key(key), raw, ttl).await
        {
            self.swallow("put", key, &err);
        }
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn get(&self, key: &str) -> StorageResult<Option<Bytes>> {
        if let Some(cache) = &self.cache
            && let Some(payload) = self.read_cache(cache.as_ref(), key).await
        {
            return Ok(Some(payload));
        }

        let Some(raw) = self.durable.get(&storage_key(key)).await? else {
            return Ok(None);
        };
        let (payload, expires_at) = Envelope::decode(&raw)?;
        let Some(remaining) = remaining_ttl(expires_at, Utc::now()) else {
            return Ok(None);
        };

        if let Some(cache) = &self.cache
            && let Err(err) = cache.set_with_ttl(storage_key(key), raw.to_vec(), remaining).await
        {
            self.swallow("repopulate", key, &err);
        }
        Ok(Some(payload))
    }

    #[tracing::instrument(skip(self))]
    async fn list(&self, prefix: &str) -> StorageResult<Vec<Blob>> {
        let now = Utc::now();
        let entries = self.durable.get_prefix(&storage_key(prefix)).await?;

        let mut blobs = Vec::with_capacity(entries.len());
        for entry in entries {
            let (payload, expires_at) = Envelope::decode(&entry.value)?;
            if expires_at <= now {
                continue;
            }
            let raw_key = std::str::from_utf8(&entry.key)
                .map_err(|e| StorageError::serialization_with_source("blob key is not UTF-8", e))?;
            let key = raw_key.strip_prefix(BLOB_NAMESPACE).unwrap_or(raw_key).to_owned();
            blobs.push(Blob { key, payload, expires_at });
        }
        Ok(blobs)
    }
}
