//! Opaque, revocable refresh tokens.
//!
//! A refresh token is 256 bits of OS randomness rendered as 64 hex characters.
//! [`TieredRefreshTokenStore`] keeps one record per token plus a per-account
//! index so that every session of an account can be revoked at once:
//!
//! ```text
//! refresh-tokens/{token}                               -> {"account_id", "created_at", "expires_at"}
//! refresh-tokens-by-account/{account_segment}/{token}  -> token
//! ```
//!
//! `account_segment` is the fixed-width [`AccountId::storage_segment`].
//! Records and index entries live in the durable tier with a native TTL equal
//! to the refresh-token lifetime. Records are mirrored into the cache tier
//! under the same policy as [`TieredBlobStore`](crate::TieredBlobStore):
//! durable first, cache best-effort, cache failures reported and swallowed.
//! The index is durable only. The durable tier decides whether a token
//! exists: a cached record whose durable copy is gone is treated as revoked.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    backend::StorageBackend,
    blob::{deadline, remaining_ttl},
    error::{StorageError, StorageResult},
    report::{ErrorReporter, default_reporter},
    types::AccountId,
};

/// Number of random bytes in a token.
const TOKEN_BYTES: usize = 32;

/// Key prefix for token records.
pub const REFRESH_TOKEN_PREFIX: &str = "refresh-tokens/";

/// Key prefix for the per-account token index.
pub const REFRESH_TOKEN_INDEX_PREFIX: &str = "refresh-tokens-by-account/";

/// A persisted refresh token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshToken {
    /// The opaque token value.
    #[serde(skip)]
    pub token: String,
    /// Account the token continues a session for.
    pub account_id: AccountId,
    /// When the token was issued.
    pub created_at: DateTime<Utc>,
    /// When the token stops being accepted.
    pub expires_at: DateTime<Utc>,
}

impl RefreshToken {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// Persistence for refresh tokens.
///
/// Lookups of unknown, expired, or revoked tokens return `Ok(None)`.
#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    /// Issues a new token for `account_id` and returns its value.
    async fn create(&self, account_id: AccountId) -> StorageResult<String>;

    /// Returns the account a live token belongs to.
    async fn find(&self, token: &str) -> StorageResult<Option<AccountId>>;

    /// Restarts the lifetime of a live token. Returns `false` when the token
    /// is unknown or expired.
    async fn touch(&self, token: &str) -> StorageResult<bool>;

    /// Returns every live token issued to `account_id`.
    async fn find_all(&self, account_id: AccountId) -> StorageResult<Vec<String>>;

    /// Revokes a token. Revoking an unknown token is not an error.
    async fn revoke(&self, token: &str) -> StorageResult<()>;

    /// Revokes every token issued to `account_id`.
    async fn revoke_all(&self, account_id: AccountId) -> StorageResult<()>;
}

fn record_key(token: &str) -> Vec<u8> {
    format!("{REFRESH_TOKEN_PREFIX}{token}").into_bytes()
}

fn index_prefix(account_id: AccountId) -> Vec<u8> {
    format!("{REFRESH_TOKEN_INDEX_PREFIX}{}/", account_id.storage_segment()).into_bytes()
}

fn index_key(account_id: AccountId, token: &str) -> Vec<u8> {
    let mut key = index_prefix(account_id);
    key.extend_from_slice(token.as_bytes());
    key
}

fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn encode_record(record: &RefreshToken) -> StorageResult<Vec<u8>> {
    serde_json::to_vec(record)
        .map_err(|e| StorageError::serialization_with_source("encode refresh token", e))
}

fn decode_record(token: &str, raw: &[u8]) -> StorageResult<RefreshToken> {
    let mut record: RefreshToken = serde_json::from_slice(raw)
        .map_err(|e| StorageError::serialization_with_source("decode refresh token", e))?;
    record.token = token.to_owned();
    Ok(record)
}

/// Dual-tier [`RefreshTokenStore`].
#[derive(Clone)]
pub struct TieredRefreshTokenStore {
    durable: Arc<dyn StorageBackend>,
    cache: Option<Arc<dyn StorageBackend>>,
    ttl: Duration,
    reporter: Arc<dyn ErrorReporter>,
}

impl TieredRefreshTokenStore {
    /// Creates a store issuing tokens that live for `ttl`.
    pub fn new(
        durable: Arc<dyn StorageBackend>,
        cache: Option<Arc<dyn StorageBackend>>,
        ttl: Duration,
    ) -> Self {
        Self { durable, cache, ttl, reporter: default_reporter() }
    }

    /// Replaces the sink that receives swallowed cache failures.
    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Token lifetime applied by `create` and `touch`.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn swallow(&self, operation: &'static str, err: &StorageError) {
        warn!(operation, error = %err, "refresh token cache failure, continuing with durable tier");
        self.reporter.report(err);
    }

    async fn cache_write(&self, operation: &'static str, token: &str, raw: Vec<u8>, ttl: Duration) {
        if let Some(cache) = &self.cache
            && let Err(err) = cache.set_with_ttl(record_key(token), raw, ttl).await
        {
            self.swallow(operation, &err);
        }
    }

    async fn cache_delete(&self, token: &str) {
        if let Some(cache) = &self.cache
            && let Err(err) = cache.delete(&record_key(token)).await
        {
            self.swallow("invalidate", &err);
        }
    }

    async fn cached_record(&self, token: &str) -> Option<RefreshToken> {
        let cache = self.cache.as_ref()?;
        match cache.get(&record_key(token)).await {
            Ok(Some(raw)) => match decode_record(token, &raw) {
                Ok(record) => {
                    debug!(account_id = %record.account_id, "refresh token cache hit");
                    Some(record)
                },
                Err(err) => {
                    self.swallow("find", &err);
                    None
                },
            },
            Ok(None) => {
                debug!("refresh token cache miss");
                None
            },
            Err(err) => {
                self.swallow("find", &err);
                None
            },
        }
    }

    async fn durable_record(&self, token: &str) -> StorageResult<Option<(RefreshToken, Bytes)>> {
        match self.durable.get(&record_key(token)).await? {
            Some(raw) => Ok(Some((decode_record(token, &raw)?, raw))),
            None => Ok(None),
        }
    }

    /// Loads a live record, cache first.
    ///
    /// A cache hit is only trusted while the durable record still exists. A
    /// revoke whose cache invalidation failed leaves a stale entry behind;
    /// it is evicted here instead of resolving the revoked token.
    async fn load(&self, token: &str) -> StorageResult<Option<RefreshToken>> {
        let now = Utc::now();
        if let Some(record) = self.cached_record(token).await
            && record.is_live(now)
        {
            if self.durable.get(&record_key(token)).await?.is_some() {
                return Ok(Some(record));
            }
            warn!(
                account_id = %record.account_id,
                "evicting cached refresh token missing from durable tier"
            );
            self.cache_delete(token).await;
            return Ok(None);
        }

        let Some((record, raw)) = self.durable_record(token).await? else {
            return Ok(None);
        };
        let Some(remaining) = remaining_ttl(record.expires_at, now) else {
            return Ok(None);
        };
        self.cache_write("repopulate", token, raw.to_vec(), remaining).await;
        Ok(Some(record))
    }

    async fn write(&self, record: &RefreshToken) -> StorageResult<()> {
        let raw = encode_record(record)?;
        self.durable.set_with_ttl(record_key(&record.token), raw.clone(), self.ttl).await?;
        self.durable
            .set_with_ttl(
                index_key(record.account_id, &record.token),
                record.token.clone().into_bytes(),
                self.ttl,
            )
            .await?;
        self.cache_write("write", &record.token, raw, self.ttl).await;
        Ok(())
    }
}

#[async_trait]
impl RefreshTokenStore for TieredRefreshTokenStore {
    #[tracing::instrument(skip(self), fields(account_id = %account_id))]
    async fn create(&self, account_id: AccountId) -> StorageResult<String> {
        let now = Utc::now();
        let record = RefreshToken {
            token: generate_token(),
            account_id,
            created_at: now,
            expires_at: deadline(now, self.ttl),
        };
        self.write(&record).await?;
        debug!("refresh token issued");
        Ok(record.token)
    }

    #[tracing::instrument(skip_all)]
    async fn find(&self, token: &str) -> StorageResult<Option<AccountId>> {
        Ok(self.load(token).await?.map(|record| record.account_id))
    }

    #[tracing::instrument(skip_all)]
    async fn touch(&self, token: &str) -> StorageResult<bool> {
        let Some(mut record) = self.load(token).await? else {
            return Ok(false);
        };
        record.expires_at = deadline(Utc::now(), self.ttl);
        self.write(&record).await?;
        Ok(true)
    }

    #[tracing::instrument(skip(self), fields(account_id = %account_id))]
    async fn find_all(&self, account_id: AccountId) -> StorageResult<Vec<String>> {
        let entries = self.durable.get_prefix(&index_prefix(account_id)).await?;
        entries
            .into_iter()
            .map(|entry| {
                String::from_utf8(entry.value.to_vec()).map_err(|e| {
                    StorageError::serialization_with_source("refresh token index entry", e)
                })
            })
            .collect()
    }

    #[tracing::instrument(skip_all)]
    async fn revoke(&self, token: &str) -> StorageResult<()> {
        if let Some((record, _)) = self.durable_record(token).await? {
            self.durable.delete(&index_key(record.account_id, token)).await?;
            info!(account_id = %record.account_id, "refresh token revoked");
        }
        self.durable.delete(&record_key(token)).await?;
        self.cache_delete(token).await;
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(account_id = %account_id))]
    async fn revoke_all(&self, account_id: AccountId) -> StorageResult<()> {
        let tokens = self.find_all(account_id).await?;
        for token in &tokens {
            self.durable.delete(&record_key(token)).await?;
        }
        self.durable.clear_prefix(&index_prefix(account_id)).await?;
        for token in &tokens {
            self.cache_delete(token).await;
        }
        info!(revoked = tokens.len(), "all refresh tokens revoked");
        Ok(())
    }
}
