//! Storage backend trait definition.
//!
//! This module defines the [`StorageBackend`] trait, the byte-level key-value
//! abstraction underneath every store in this crate. The same trait describes
//! both storage tiers:
//!
//! - **durable**: authoritative, survives restarts (a SQL table in production)
//! - **cache**: volatile accelerator shared by all processes (Redis-like)
//!
//! # Design Philosophy
//!
//! - **Keys and values are bytes**: no assumptions about serialization format
//! - **Async by default**: every operation is a single round-trip to the backend
//! - **TTL-aware**: every write carries a TTL, and expired keys are logically
//!   absent even before cleanup runs
//! - **Object safe**: stores hold tiers as `Arc<dyn StorageBackend>`, so the
//!   cache tier can be absent or swapped without changing store types
//!
//! No operation retries or adds its own timeout. Callers own that policy.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::{
    error::StorageResult,
    health::{HealthProbe, HealthStatus},
    types::KeyValue,
};

/// Abstract storage backend for key-value operations.
///
/// Backends are expected to be thread-safe (`Send + Sync`) and support
/// concurrent operations.
///
/// # Key Operations
///
/// | Method | Description |
/// |--------|-------------|
/// | [`get`](StorageBackend::get) | Retrieve a single value by key |
/// | [`set_with_ttl`](StorageBackend::set_with_ttl) | Store with automatic expiration |
/// | [`delete`](StorageBackend::delete) | Remove a key |
/// | [`get_prefix`](StorageBackend::get_prefix) | Retrieve all live keys under a prefix |
/// | [`clear_prefix`](StorageBackend::clear_prefix) | Delete all keys under a prefix |
/// | [`health_check`](StorageBackend::health_check) | Verify backend availability |
///
/// # Example
///
/// ```
/// use std::time::Duration;
///
/// use bytes::Bytes;
/// use keyward_storage::{MemoryBackend, StorageBackend};
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let backend = MemoryBackend::new();
///
/// let ttl = Duration::from_secs(60);
/// backend.set_with_ttl(b"key".to_vec(), b"value".to_vec(), ttl).await.unwrap();
/// let value = backend.get(b"key").await.unwrap();
/// assert_eq!(value, Some(Bytes::from("value")));
/// # });
/// ```
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Retrieves a value by key.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(bytes))` if the key exists and has not expired
    /// - `Ok(None)` if the key doesn't exist or has expired
    /// - `Err(...)` on storage errors
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>>;

    /// Stores a key-value pair with automatic expiration.
    ///
    /// Overwrites any existing value and replaces its TTL. Once `ttl` elapses
    /// the key is logically absent for every read operation.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn set_with_ttl(&self, key: Vec<u8>, value: Vec<u8>, ttl: Duration) -> StorageResult<()>;

    /// Deletes a key.
    ///
    /// If the key doesn't exist, this is a no-op (returns `Ok(())`).
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn delete(&self, key: &[u8]) -> StorageResult<()>;

    /// Retrieves every live key-value pair whose key starts with `prefix`,
    /// in ascending key order.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn get_prefix(&self, prefix: &[u8]) -> StorageResult<Vec<KeyValue>>;

    /// Deletes every key that starts with `prefix`.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn clear_prefix(&self, prefix: &[u8]) -> StorageResult<()>;

    /// Checks backend health for the given [`HealthProbe`] type.
    ///
    /// # Returns
    ///
    /// - `Ok(HealthStatus::Healthy { .. })`: probe passed
    /// - `Ok(HealthStatus::Unhealthy { .. })`: probe failed
    /// - `Err(...)`: the health check itself could not be performed
    #[must_use = "health check results indicate backend availability and must be inspected"]
    async fn health_check(&self, probe: HealthProbe) -> StorageResult<HealthStatus>;
}

/// Returns the exclusive upper bound of the key range covered by `prefix`.
///
/// The bound is the smallest byte string greater than every string starting
/// with `prefix`, or `None` when no such bound exists (empty prefix or a
/// prefix made only of `0xFF` bytes), meaning the range is unbounded above.
#[must_use]
pub fn prefix_upper_bound(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < u8::MAX {
            end.push(last + 1);
            return Some(end);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_prefix_upper_bound() {
        assert_eq!(prefix_upper_bound(b"abc"), Some(b"abd".to_vec()));
        assert_eq!(prefix_upper_bound(b"a\xff"), Some(b"b".to_vec()));
        assert_eq!(prefix_upper_bound(b"\xff\xff"), None);
        assert_eq!(prefix_upper_bound(b""), None);
    }

    proptest! {
        #[test]
        fn prop_upper_bound_covers_every_extension(
            prefix in proptest::collection::vec(any::<u8>(), 1..8),
            suffix in proptest::collection::vec(any::<u8>(), 0..8),
        ) {
            let mut key = prefix.clone();
            key.extend_from_slice(&suffix);
            if let Some(end) = prefix_upper_bound(&prefix) {
                prop_assert!(key < end);
                prop_assert!(prefix < end);
            }
        }
    }
}
