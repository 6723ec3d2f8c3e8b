//! Shared test utilities for key rotation and token testing.
//!
//! This module provides a trivial password hasher, keys with fixed creation
//! times, a blob store that forces two rotaters to interleave, and a way to
//! craft unsigned JWT strings for attack testing. It is feature-gated behind
//! `testutil` to prevent leaking into production builds.
//!
//! # Usage
//!
//! In integration tests, enable the feature in `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! keyward-authn = { path = "../authn", features = ["testutil"] }
//! ```
//!
//! Then import helpers:
//!
//! ```no_run
//! // Requires the `testutil` feature to be enabled.
//! use keyward_authn::testutil::{PlaintextHasher, craft_raw_jwt};
//! ```

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use keyward_storage::{Blob, BlobStore, StorageResult};
use tokio::sync::Barrier;

use crate::{accounts::PasswordHasher, error::Result, signing_key::SigningKey};

/// "Hashes" by prefixing `hashed:`, so tests can see what was stored.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaintextHasher;

impl PasswordHasher for PlaintextHasher {
    fn hash(&self, password: &str) -> Result<String> {
        Ok(format!("hashed:{password}"))
    }
}

/// Generates a signing key whose kid encodes `created_at`.
///
/// # Panics
///
/// Panics if the OS random source is unavailable.
#[allow(clippy::expect_used)]
pub fn key_created_at(created_at: DateTime<Utc>) -> SigningKey {
    SigningKey::generate_at(created_at).expect("generate test signing key")
}

/// Generates a signing key created `age` ago.
pub fn key_aged(age: Duration) -> SigningKey {
    let age = chrono::TimeDelta::from_std(age).unwrap_or(chrono::TimeDelta::zero());
    key_created_at(Utc::now() - age)
}

/// Creates a raw JWT string from arbitrary header and payload JSON.
///
/// The resulting JWT has the structure `{header_b64}.{payload_b64}.`
/// with an empty signature. This is useful for testing rejection of
/// malformed or attack JWTs (e.g., `alg: "none"`, algorithm confusion).
///
/// # Panics
///
/// Panics if JSON serialization fails.
#[allow(clippy::expect_used)]
pub fn craft_raw_jwt(header_json: &serde_json::Value, payload_json: &serde_json::Value) -> String {
    let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(header_json).expect("header json"));
    let payload_b64 =
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(payload_json).expect("payload json"));
    format!("{header_b64}.{payload_b64}.")
}

/// A [`BlobStore`] whose writes rendezvous with `parties` concurrent writers.
///
/// Every `put` waits for all parties before writing and again after
/// writing. Two rotaters ticking together through this store therefore both
/// list an empty prefix, both persist a key, and both reload only after the
/// other's key is visible.
pub struct GatedBlobStore {
    inner: Arc<dyn BlobStore>,
    barrier: Barrier,
}

impl GatedBlobStore {
    /// Wraps `inner`, gating writes on `parties` writers.
    #[must_use]
    pub fn new(inner: Arc<dyn BlobStore>, parties: usize) -> Self {
        Self { inner, barrier: Barrier::new(parties) }
    }
}

#[async_trait]
impl BlobStore for GatedBlobStore {
    async fn put(&self, key: &str, payload: Bytes, ttl: Duration) -> StorageResult<()> {
        self.barrier.wait().await;
        let result = self.inner.put(key, payload, ttl).await;
        self.barrier.wait().await;
        result
    }

    async fn get(&self, key: &str) -> StorageResult<Option<Bytes>> {
        self.inner.get(key).await
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<Blob>> {
        self.inner.list(prefix).await
    }

    async fn list_entries(&self, prefix: &str) -> StorageResult<Vec<StorageResult<Blob>>> {
        self.inner.list_entries(prefix).await
    }
}

/// Asserts that a [`Result<T, AuthError>`](crate::AuthError) is an `Err`
/// matching the given variant.
///
/// # Examples
///
/// ```no_run
/// // Requires the `testutil` feature to be enabled.
/// use keyward_authn::{AuthError, assert_auth_error};
///
/// let result: Result<(), AuthError> = Err(AuthError::NoSigningKey);
/// assert_auth_error!(result, NoSigningKey);
/// ```
#[macro_export]
macro_rules! assert_auth_error {
    ($result:expr, $variant:ident) => {
        assert!(
            matches!($result, Err($crate::error::AuthError::$variant { .. })),
            "expected AuthError::{}, got: {:?}",
            stringify!($variant),
            $result,
        );
    };
    ($result:expr, $variant:ident, $msg:expr) => {
        assert!(
            matches!($result, Err($crate::error::AuthError::$variant { .. })),
            "{}: expected AuthError::{}, got: {:?}",
            $msg,
            stringify!($variant),
            $result,
        );
    };
}
