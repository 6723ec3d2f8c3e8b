//! Fleet-wide signing key rotation.
//!
//! Every process runs its own [`KeyStoreRotater`]. Processes do not talk to
//! each other; they coordinate only through the shared blob store.
//!
//! # Tick
//!
//! ```text
//! list signing-keys/*  ──►  newest created < interval/2 ago?
//!                              │ yes                 │ no
//!                              ▼                     ▼
//!                        load live set        generate key
//!                                                    │
//!                                             persist (ttl = depth × interval)
//!                                                    │
//!                                             reload live set
//! ```
//!
//! Two processes ticking at the same moment may both generate a key. Both
//! keys are persisted under distinct kids and every process loads every live
//! key, so tokens signed by either verify everywhere.

use std::{sync::Arc, time::Duration};

use chrono::{TimeDelta, Utc};
use fail::fail_point;
use keyward_storage::{BlobStore, ErrorReporter, default_reporter};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::{
    error::Result,
    key_store::RotatingKeyStore,
    signing_key::SigningKey,
};

/// Blob key prefix under which signing keys are persisted.
pub const SIGNING_KEY_PREFIX: &str = "signing-keys/";

/// What a tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// A recent key already existed; the live set was loaded.
    Loaded {
        /// Number of live keys loaded.
        keys: usize,
    },
    /// A new key was generated and persisted.
    Rotated {
        /// Id of the new key.
        kid: String,
    },
}

#[derive(Clone)]
struct RotaterState {
    blobs: Arc<dyn BlobStore>,
    key_store: Arc<RotatingKeyStore>,
    interval: Duration,
    reporter: Arc<dyn ErrorReporter>,
}

impl RotaterState {
    fn key_ttl(&self) -> Duration {
        let depth = u32::try_from(self.key_store.depth()).unwrap_or(u32::MAX);
        self.interval.saturating_mul(depth)
    }

    async fn load_live(&self) -> Result<Vec<SigningKey>> {
        let entries = self.blobs.list_entries(SIGNING_KEY_PREFIX).await?;
        let mut keys = Vec::with_capacity(entries.len());
        for entry in entries {
            let blob = match entry {
                Ok(blob) => blob,
                Err(err) => {
                    tracing::warn!(error = %err, "skipping undecryptable signing key");
                    self.reporter.report(&err);
                    continue;
                },
            };
            match SigningKey::from_blob(&blob.payload) {
                Ok(key) => keys.push(key),
                Err(err) => {
                    tracing::warn!(
                        blob = %blob.key,
                        error = %err,
                        "skipping unreadable signing key"
                    );
                    self.reporter.report(&err);
                },
            }
        }
        keys.sort_by(|a, b| b.kid().cmp(a.kid()));
        Ok(keys)
    }

    async fn tick(&self) -> Result<TickOutcome> {
        let now = Utc::now();
        let live = self.load_live().await?;

        let fresh_window = TimeDelta::from_std(self.interval / 2).unwrap_or(TimeDelta::MAX);
        if let Some(newest) = live.first()
            && now.signed_duration_since(newest.created_at()) < fresh_window
        {
            let keys = live.len();
            tracing::debug!(kid = %newest.kid(), keys, "recent signing key found");
            self.key_store.replace(live);
            return Ok(TickOutcome::Loaded { keys });
        }

        let key = SigningKey::generate_at(now)?;
        let kid = key.kid().to_owned();

        fail_point!("rotater-before-persist", |_| {
            Err(crate::error::AuthError::from(keyward_storage::StorageError::connection(
                "injected failure before key persist",
            )))
        });
        let blob_key = format!("{SIGNING_KEY_PREFIX}{kid}");
        self.blobs.put(&blob_key, key.to_blob()?, self.key_ttl()).await?;

        let mut live = self.load_live().await?;
        if !live.iter().any(|k| k.kid() == kid) {
            live.push(key);
        }
        let keys = live.len();
        self.key_store.replace(live);
        tracing::info!(kid = %kid, keys, "generated signing key");
        Ok(TickOutcome::Rotated { kid })
    }
}

/// Periodically rotates the keys held by a [`RotatingKeyStore`].
pub struct KeyStoreRotater {
    state: Arc<RotaterState>,
    /// Cancellation token for the background task.
    cancel_token: CancellationToken,
    /// Handle for the background task, used during shutdown.
    handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl KeyStoreRotater {
    /// Creates a rotater that persists keys in `blobs` and loads them into
    /// `key_store` every `interval`.
    #[must_use]
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        key_store: Arc<RotatingKeyStore>,
        interval: Duration,
    ) -> Self {
        Self {
            state: Arc::new(RotaterState {
                blobs,
                key_store,
                interval,
                reporter: default_reporter(),
            }),
            cancel_token: CancellationToken::new(),
            handle: Mutex::new(None),
        }
    }

    /// Sets the sink for tick failures and unreadable keys.
    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        let mut state = (*self.state).clone();
        state.reporter = reporter;
        self.state = Arc::new(state);
        self
    }

    /// Time between ticks.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.state.interval
    }

    /// TTL given to persisted keys: retention depth × interval.
    #[must_use]
    pub fn key_ttl(&self) -> Duration {
        self.state.key_ttl()
    }

    /// The key store this rotater feeds.
    #[must_use]
    pub fn key_store(&self) -> &Arc<RotatingKeyStore> {
        &self.state.key_store
    }

    /// Runs one tick now.
    ///
    /// # Errors
    ///
    /// Returns the blob store's error, or a key generation error. The key
    /// store is left unchanged on error.
    #[tracing::instrument(skip(self))]
    pub async fn tick(&self) -> Result<TickOutcome> {
        self.state.tick().await
    }

    /// Runs a bootstrap tick, then ticks every interval in the background.
    ///
    /// Background tick failures are logged and reported; the key store keeps
    /// its previous set. The task stops on [`shutdown`](Self::shutdown) or
    /// when the rotater is dropped.
    ///
    /// # Errors
    ///
    /// Returns the bootstrap tick's error. No background task is started in
    /// that case.
    ///
    /// # Panics
    ///
    /// Must be called within a Tokio runtime context.
    pub async fn maintain(&self) -> Result<()> {
        let outcome = self.tick().await?;
        tracing::info!(?outcome, interval = ?self.state.interval, "signing key store bootstrapped");

        let state = Arc::clone(&self.state);
        let token = self.cancel_token.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(state.interval);
            // The first tick fires immediately; the bootstrap tick already ran.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        tracing::info!("key rotation task shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(err) = state.tick().await {
                            tracing::warn!(error = %err, "signing key rotation tick failed");
                            state.reporter.report(&err);
                        }
                    }
                }
            }
        });

        if let Some(previous) = self.handle.lock().replace(handle) {
            previous.abort();
        }
        Ok(())
    }

    /// Stops the background task and waits for it to exit.
    pub async fn shutdown(&self) {
        self.cancel_token.cancel();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle
            && let Err(err) = handle.await
        {
            tracing::warn!(error = %err, "key rotation task panicked");
        }
    }
}

impl Drop for KeyStoreRotater {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use bytes::Bytes;
    use keyward_storage::{
        EncryptedBlobStore, MemoryBackend, TieredBlobStore, Zeroizing, testutil::RecordingReporter,
    };

    use super::*;

    fn blobs() -> Arc<dyn BlobStore> {
        Arc::new(TieredBlobStore::new(Arc::new(MemoryBackend::new()), None))
    }

    fn rotater(blobs: Arc<dyn BlobStore>, interval: Duration) -> KeyStoreRotater {
        KeyStoreRotater::new(blobs, Arc::new(RotatingKeyStore::new(3)), interval)
    }

    #[tokio::test]
    async fn test_first_tick_generates_and_persists() {
        let blobs = blobs();
        let rotater = rotater(Arc::clone(&blobs), Duration::from_secs(60));

        let TickOutcome::Rotated { kid } = rotater.tick().await.unwrap() else {
            panic!("expected a rotation on an empty store");
        };

        assert_eq!(rotater.key_store().current().unwrap().kid(), kid);
        let stored = blobs.list(SIGNING_KEY_PREFIX).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].key, format!("{SIGNING_KEY_PREFIX}{kid}"));
    }

    #[tokio::test]
    async fn test_recent_key_is_loaded_not_regenerated() {
        let blobs = blobs();
        let first = rotater(Arc::clone(&blobs), Duration::from_secs(60));
        let second = rotater(Arc::clone(&blobs), Duration::from_secs(60));

        first.tick().await.unwrap();
        assert_eq!(second.tick().await.unwrap(), TickOutcome::Loaded { keys: 1 });

        assert_eq!(
            first.key_store().current().unwrap().kid(),
            second.key_store().current().unwrap().kid()
        );
    }

    #[tokio::test]
    async fn test_stale_key_triggers_rotation() {
        let blobs = blobs();
        let rotater = rotater(Arc::clone(&blobs), Duration::from_millis(100));

        rotater.tick().await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(matches!(rotater.tick().await.unwrap(), TickOutcome::Rotated { .. }));
        assert_eq!(rotater.key_store().all().len(), 2);
    }

    #[tokio::test]
    async fn test_key_ttl_is_depth_times_interval() {
        let rotater = rotater(blobs(), Duration::from_secs(10));
        assert_eq!(rotater.key_ttl(), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_unreadable_blob_is_reported_and_skipped() {
        let blobs = blobs();
        blobs
            .put(
                &format!("{SIGNING_KEY_PREFIX}9999999999999-00000000"),
                Bytes::from_static(b"garbage"),
                Duration::from_secs(60),
            )
            .await
            .unwrap();
        let reporter = Arc::new(RecordingReporter::new());
        let rotater = rotater(Arc::clone(&blobs), Duration::from_secs(60))
            .with_reporter(Arc::clone(&reporter) as Arc<dyn ErrorReporter>);

        assert!(matches!(rotater.tick().await.unwrap(), TickOutcome::Rotated { .. }));
        assert_eq!(rotater.key_store().all().len(), 1);
        assert!(reporter.count() >= 1);
    }

    #[tokio::test]
    async fn test_undecryptable_blob_is_reported_and_skipped() {
        let plain = blobs();
        let corrupt_key = format!("{SIGNING_KEY_PREFIX}0000000000001-deadbeef");
        plain
            .put(&corrupt_key, Bytes::from_static(b"corrupt-payload"), Duration::from_secs(60))
            .await
            .unwrap();
        let encrypted: Arc<dyn BlobStore> =
            Arc::new(EncryptedBlobStore::new(Arc::clone(&plain), Zeroizing::new([5u8; 32])));
        let reporter = Arc::new(RecordingReporter::new());
        let first = rotater(Arc::clone(&encrypted), Duration::from_secs(60))
            .with_reporter(Arc::clone(&reporter) as Arc<dyn ErrorReporter>);

        let TickOutcome::Rotated { kid } = first.tick().await.unwrap() else {
            panic!("expected a rotation past the corrupt blob");
        };
        assert_eq!(first.key_store().all().kids(), vec![kid]);
        assert!(reporter.count() >= 1);

        // A second instance bootstraps over the same blobs.
        let late = rotater(encrypted, Duration::from_secs(60));
        assert_eq!(late.tick().await.unwrap(), TickOutcome::Loaded { keys: 1 });
    }

    #[tokio::test]
    async fn test_background_task_stops_on_shutdown() {
        let rotater = rotater(blobs(), Duration::from_millis(40));
        rotater.maintain().await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        rotater.shutdown().await;

        let len = rotater.key_store().all().len();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(rotater.key_store().all().len(), len);
        assert!(len >= 2, "background ticks should have rotated, got {len} keys");
    }
}
