//! In-memory storage backend implementation.
//!
//! This module provides [`MemoryBackend`], an in-memory implementation of
//! [`StorageBackend`] used for tests, development, and single-process
//! deployments. It can stand in for either tier: two independent
//! `MemoryBackend`s make a complete durable + cache pair.
//!
//! # Features
//!
//! - **Thread-safe**: Uses [`parking_lot::RwLock`] for concurrent access
//! - **Ordered storage**: Keys are stored in a [`BTreeMap`] for prefix scans
//! - **TTL support**: Expired keys are invisible to reads immediately and are
//!   physically removed by a background task
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//!
//! use keyward_storage::{MemoryBackend, StorageBackend};
//!
//! #[tokio::main]
//! async fn main() {
//!     let backend = MemoryBackend::new();
//!
//!     let ttl = Duration::from_secs(60);
//!     backend.set_with_ttl(b"greeting".to_vec(), b"hello".to_vec(), ttl).await.unwrap();
//!     let value = backend.get(b"greeting").await.unwrap();
//!
//!     assert_eq!(value.unwrap().as_ref(), b"hello");
//! }
//! ```
//!
//! # Limitations
//!
//! - Data is not persisted; all data is lost when the process exits
//! - Not shared between processes
//! - Physical cleanup runs every second; logical expiry is exact

use std::{
    collections::BTreeMap,
    ops::Bound,
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use tokio::{select, sync::watch, time::sleep};

use crate::{
    backend::{StorageBackend, prefix_upper_bound},
    error::StorageResult,
    health::{HealthProbe, HealthStatus},
    types::KeyValue,
};

/// Interval between physical sweeps of expired keys.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(1);

/// Holds the shutdown signal sender. When dropped, the watch channel
/// closes and the cleanup task exits.
struct ShutdownGuard {
    shutdown_tx: watch::Sender<()>,
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        // Sending is a best-effort signal; the receiver may already be gone.
        let _ = self.shutdown_tx.send(());
    }
}

#[derive(Clone)]
struct Entry {
    value: Bytes,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|expiry| expiry > now)
    }
}

/// In-memory storage backend using [`BTreeMap`].
///
/// # Cloning
///
/// `MemoryBackend` is cheaply cloneable via [`Arc`]. All clones share the
/// same underlying data, which is how tests model several server processes
/// talking to one shared store.
///
/// # Shutdown
///
/// The background TTL cleanup task stops automatically when all clones of
/// the `MemoryBackend` are dropped (via the internal `ShutdownGuard`).
#[derive(Clone)]
pub struct MemoryBackend {
    data: Arc<RwLock<BTreeMap<Vec<u8>, Entry>>>,
    shutdown_guard: Arc<ShutdownGuard>,
}

impl MemoryBackend {
    /// Creates a new in-memory storage backend.
    ///
    /// When called inside a Tokio runtime this also spawns the background
    /// sweep that physically removes expired keys. Outside a runtime the
    /// sweep is skipped; expired keys are still invisible to reads.
    pub fn new() -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let backend = Self {
            data: Arc::new(RwLock::new(BTreeMap::new())),
            shutdown_guard: Arc::new(ShutdownGuard { shutdown_tx }),
        };

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            // The task holds only a weak reference so it never keeps the
            // data alive on its own.
            let data = Arc::downgrade(&backend.data);
            handle.spawn(async move {
                cleanup_expired_keys(data, shutdown_rx).await;
            });
        }

        backend
    }

    /// Explicitly signals the background TTL cleanup task to stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown_guard.shutdown_tx.send(());
    }

    /// Returns the number of physically stored entries, expired or not.
    #[must_use]
    pub fn raw_len(&self) -> usize {
        self.data.read().len()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Background sweep that removes expired entries every [`CLEANUP_INTERVAL`].
///
/// Exits when the shutdown signal fires or when the backend is gone.
async fn cleanup_expired_keys(
    data: std::sync::Weak<RwLock<BTreeMap<Vec<u8>, Entry>>>,
    mut shutdown_rx: watch::Receiver<()>,
) {
    loop {
        select! {
            _ = sleep(CLEANUP_INTERVAL) => {}
            _ = shutdown_rx.changed() => {
                return;
            }
        }

        let Some(data) = data.upgrade() else {
            return;
        };

        let now = Instant::now();
        let expired: Vec<Vec<u8>> = data
            .read()
            .iter()
            .filter(|(_, entry)| !entry.is_live(now))
            .map(|(key, _)| key.clone())
            .collect();

        if !expired.is_empty() {
            let mut guard = data.write();
            for key in expired {
                // Re-check under the write lock: the key may have been
                // rewritten with a fresh TTL since the scan.
                if guard.get(&key).is_some_and(|entry| !entry.is_live(Instant::now())) {
                    guard.remove(&key);
                }
            }
        }
    }
}

fn prefix_bounds(prefix: &[u8]) -> (Bound<Vec<u8>>, Bound<Vec<u8>>) {
    let end = match prefix_upper_bound(prefix) {
        Some(end) => Bound::Excluded(end),
        None => Bound::Unbounded,
    };
    (Bound::Included(prefix.to_vec()), end)
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        let now = Instant::now();
        let data = self.data.read();
        Ok(data.get(key).filter(|entry| entry.is_live(now)).map(|entry| entry.value.clone()))
    }

    async fn set_with_ttl(&self, key: Vec<u8>, value: Vec<u8>, ttl: Duration) -> StorageResult<()> {
        // A TTL too large to represent never expires.
        let expires_at = Instant::now().checked_add(ttl);
        self.data.write().insert(key, Entry { value: Bytes::from(value), expires_at });
        Ok(())
    }

    async fn delete(&self, key: &[u8]) -> StorageResult<()> {
        self.data.write().remove(key);
        Ok(())
    }

    async fn get_prefix(&self, prefix: &[u8]) -> StorageResult<Vec<KeyValue>> {
        let now = Instant::now();
        let data = self.data.read();
        let results = data
            .range(prefix_bounds(prefix))
            .filter(|(_, entry)| entry.is_live(now))
            .map(|(key, entry)| KeyValue::new(Bytes::copy_from_slice(key), entry.value.clone()))
            .collect();
        Ok(results)
    }

    async fn clear_prefix(&self, prefix: &[u8]) -> StorageResult<()> {
        // Collect under the read lock, then remove in a single write section.
        let keys: Vec<Vec<u8>> = {
            let data = self.data.read();
            data.range(prefix_bounds(prefix)).map(|(key, _)| key.clone()).collect()
        };

        if keys.is_empty() {
            return Ok(());
        }

        let mut data = self.data.write();
        for key in &keys {
            data.remove(key);
        }
        Ok(())
    }

    async fn health_check(&self, _probe: HealthProbe) -> StorageResult<HealthStatus> {
        let start = Instant::now();
        // Acquiring the read lock proves the backend is not deadlocked.
        let _unused = self.data.read();
        Ok(HealthStatus::healthy("memory", start.elapsed()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    const LONG: Duration = Duration::from_secs(3600);

    #[tokio::test]
    async fn test_basic_operations() {
        let backend = MemoryBackend::new();

        backend.set_with_ttl(b"key1".to_vec(), b"value1".to_vec(), LONG).await.unwrap();
        let value = backend.get(b"key1").await.unwrap();
        assert_eq!(value, Some(Bytes::from("value1")));

        backend.delete(b"key1").await.unwrap();
        let value = backend.get(b"key1").await.unwrap();
        assert_eq!(value, None);
    }

    #[tokio::test]
    async fn test_delete_missing_key_is_noop() {
        let backend = MemoryBackend::new();
        backend.delete(b"missing").await.unwrap();
    }

    #[tokio::test]
    async fn test_get_prefix_is_ordered_and_scoped() {
        let backend = MemoryBackend::new();

        backend.set_with_ttl(b"signing-keys/002".to_vec(), b"b".to_vec(), LONG).await.unwrap();
        backend.set_with_ttl(b"signing-keys/001".to_vec(), b"a".to_vec(), LONG).await.unwrap();
        backend.set_with_ttl(b"signing-keyz".to_vec(), b"outside".to_vec(), LONG).await.unwrap();
        backend
            .set_with_ttl(b"refresh-tokens/x".to_vec(), b"outside".to_vec(), LONG)
            .await
            .unwrap();

        let results = backend.get_prefix(b"signing-keys/").await.unwrap();
        let keys: Vec<&[u8]> = results.iter().map(|kv| kv.key.as_ref()).collect();
        assert_eq!(keys, vec![&b"signing-keys/001"[..], &b"signing-keys/002"[..]]);
    }

    #[tokio::test]
    async fn test_clear_prefix() {
        let backend = MemoryBackend::new();

        backend.set_with_ttl(b"actives/daily/2026-01-01/1".to_vec(), vec![], LONG).await.unwrap();
        backend.set_with_ttl(b"actives/daily/2026-01-01/2".to_vec(), vec![], LONG).await.unwrap();
        backend.set_with_ttl(b"actives/daily/2026-01-02/1".to_vec(), vec![], LONG).await.unwrap();

        backend.clear_prefix(b"actives/daily/2026-01-01/").await.unwrap();

        let remaining = backend.get_prefix(b"actives/daily/").await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].key, Bytes::from("actives/daily/2026-01-02/1"));
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let backend = MemoryBackend::new();

        backend
            .set_with_ttl(b"ttl_key".to_vec(), b"value".to_vec(), Duration::from_millis(50))
            .await
            .unwrap();
        assert!(backend.get(b"ttl_key").await.unwrap().is_some());

        sleep(Duration::from_millis(80)).await;
        assert!(backend.get(b"ttl_key").await.unwrap().is_none());
        assert!(backend.get_prefix(b"ttl").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_background_sweep_removes_expired_entries() {
        let backend = MemoryBackend::new();

        backend
            .set_with_ttl(b"gone".to_vec(), b"v".to_vec(), Duration::from_millis(10))
            .await
            .unwrap();
        backend.set_with_ttl(b"kept".to_vec(), b"v".to_vec(), LONG).await.unwrap();
        assert_eq!(backend.raw_len(), 2);

        sleep(CLEANUP_INTERVAL + Duration::from_millis(200)).await;
        assert_eq!(backend.raw_len(), 1);
    }

    #[tokio::test]
    async fn test_clones_share_data() {
        let a = MemoryBackend::new();
        let b = a.clone();

        a.set_with_ttl(b"shared".to_vec(), b"yes".to_vec(), LONG).await.unwrap();
        assert_eq!(b.get(b"shared").await.unwrap(), Some(Bytes::from("yes")));
    }

    #[tokio::test]
    async fn test_health_check() {
        let backend = MemoryBackend::new();
        let status = backend.health_check(HealthProbe::Readiness).await.unwrap();
        assert!(status.is_healthy());
    }

    #[test]
    fn test_new_outside_runtime_does_not_panic() {
        let backend = MemoryBackend::new();
        assert_eq!(backend.raw_len(), 0);
    }
}
