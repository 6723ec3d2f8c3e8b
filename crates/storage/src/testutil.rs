//! Shared test utilities for the storage tiers.
//!
//! This module provides backends that fail on demand and an error sink that
//! records what it was given. It is feature-gated behind `testutil` to
//! prevent leaking into production builds.
//!
//! # Usage
//!
//! In integration tests, enable the feature in `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! keyward-storage = { path = "../storage", features = ["testutil"] }
//! ```
//!
//! Then import helpers:
//!
//! ```no_run
//! // Requires the `testutil` feature to be enabled.
//! use keyward_storage::testutil::{FlakyBackend, RecordingReporter};
//! ```

use std::{
    error::Error,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::{
    backend::StorageBackend,
    error::{StorageError, StorageResult},
    health::{HealthProbe, HealthStatus},
    memory::MemoryBackend,
    report::ErrorReporter,
    types::KeyValue,
};

/// A [`MemoryBackend`] that can be switched into a failing state.
///
/// While failing, every operation returns [`StorageError::Connection`] and
/// `health_check` reports unhealthy. Useful for modelling an unreachable
/// cache or durable tier.
#[derive(Default)]
pub struct FlakyBackend {
    inner: MemoryBackend,
    failing: AtomicBool,
    failures: AtomicUsize,
}

impl FlakyBackend {
    /// Creates a healthy backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Switches failure injection on or off.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of operations rejected so far.
    #[must_use]
    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }

    /// Direct access to the wrapped backend, bypassing failure injection.
    #[must_use]
    pub fn inner(&self) -> &MemoryBackend {
        &self.inner
    }

    fn check(&self) -> StorageResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            self.failures.fetch_add(1, Ordering::SeqCst);
            return Err(StorageError::connection("injected failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for FlakyBackend {
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn set_with_ttl(&self, key: Vec<u8>, value: Vec<u8>, ttl: Duration) -> StorageResult<()> {
        self.check()?;
        self.inner.set_with_ttl(key, value, ttl).await
    }

    async fn delete(&self, key: &[u8]) -> StorageResult<()> {
        self.check()?;
        self.inner.delete(key).await
    }

    async fn get_prefix(&self, prefix: &[u8]) -> StorageResult<Vec<KeyValue>> {
        self.check()?;
        self.inner.get_prefix(prefix).await
    }

    async fn clear_prefix(&self, prefix: &[u8]) -> StorageResult<()> {
        self.check()?;
        self.inner.clear_prefix(prefix).await
    }

    async fn health_check(&self, probe: HealthProbe) -> StorageResult<HealthStatus> {
        if self.failing.load(Ordering::SeqCst) {
            return Ok(HealthStatus::unhealthy("flaky", "injected failure"));
        }
        self.inner.health_check(probe).await
    }
}

/// An [`ErrorReporter`] that keeps the display string of every report.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    reports: Mutex<Vec<String>>,
}

impl RecordingReporter {
    /// Creates an empty reporter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of errors reported so far.
    #[must_use]
    pub fn count(&self) -> usize {
        self.reports.lock().len()
    }

    /// Display strings of every reported error, oldest first.
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.reports.lock().clone()
    }
}

impl ErrorReporter for RecordingReporter {
    fn report(&self, err: &(dyn Error + 'static)) {
        self.reports.lock().push(err.to_string());
    }
}
