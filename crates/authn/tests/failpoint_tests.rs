#![allow(clippy::expect_used, clippy::panic)]
//! Integration tests for fail-point injection in the authn crate.
//!
//! These tests require both `failpoints` and `testutil` features:
//! ```bash
//! cargo test -p keyward-authn --features failpoints,testutil --test failpoint_tests
//! ```

use std::{sync::Arc, time::Duration};

use keyward_authn::{
    AuthError, KeyStoreRotater, RotatingKeyStore, SIGNING_KEY_PREFIX, TickOutcome,
};
use keyward_storage::{
    BlobStore, ErrorReporter, MemoryBackend, TieredBlobStore, testutil::RecordingReporter,
};

fn setup(interval: Duration) -> (KeyStoreRotater, Arc<dyn BlobStore>, Arc<RecordingReporter>) {
    let blobs: Arc<dyn BlobStore> =
        Arc::new(TieredBlobStore::new(Arc::new(MemoryBackend::new()), None));
    let reporter = Arc::new(RecordingReporter::new());
    let rotater =
        KeyStoreRotater::new(Arc::clone(&blobs), Arc::new(RotatingKeyStore::new(3)), interval)
            .with_reporter(Arc::clone(&reporter) as Arc<dyn ErrorReporter>);
    (rotater, blobs, reporter)
}

#[tokio::test]
async fn bootstrap_persist_failpoint_is_fatal() {
    let scenario = fail::FailScenario::setup();
    let (rotater, blobs, _) = setup(Duration::from_secs(60));

    fail::cfg("rotater-before-persist", "return").expect("failed to configure fail point");

    let result = rotater.maintain().await;
    assert!(matches!(result, Err(AuthError::Storage(_))), "got: {result:?}");
    assert!(rotater.key_store().current().is_err(), "no key may be loaded");
    assert!(blobs.list(SIGNING_KEY_PREFIX).await.expect("list").is_empty());

    scenario.teardown();
}

#[tokio::test]
async fn later_tick_failure_keeps_previous_key_set() {
    let scenario = fail::FailScenario::setup();
    let (rotater, _, reporter) = setup(Duration::from_millis(100));

    let TickOutcome::Rotated { kid } = rotater.tick().await.expect("bootstrap tick") else {
        panic!("expected a rotation on an empty store");
    };

    fail::cfg("rotater-before-persist", "return").expect("failed to configure fail point");
    tokio::time::sleep(Duration::from_millis(60)).await;

    assert!(rotater.tick().await.is_err(), "stale key forces a persist, which fails");
    assert_eq!(rotater.key_store().current().expect("current").kid(), kid);
    assert_eq!(rotater.key_store().all().len(), 1);

    fail::remove("rotater-before-persist");
    assert!(matches!(rotater.tick().await.expect("recovered tick"), TickOutcome::Rotated { .. }));
    assert_eq!(rotater.key_store().all().len(), 2);
    assert_eq!(reporter.count(), 0, "direct ticks return errors instead of reporting");

    scenario.teardown();
}

#[tokio::test]
async fn background_tick_failure_is_reported() {
    let scenario = fail::FailScenario::setup();
    let (rotater, _, reporter) = setup(Duration::from_millis(40));

    rotater.maintain().await.expect("bootstrap");
    let kid = rotater.key_store().current().expect("current").kid().to_owned();

    fail::cfg("rotater-before-persist", "return").expect("failed to configure fail point");
    tokio::time::sleep(Duration::from_millis(150)).await;
    rotater.shutdown().await;

    assert!(reporter.count() >= 1, "failed background ticks must be reported");
    assert_eq!(rotater.key_store().current().expect("current").kid(), kid);

    scenario.teardown();
}

#[tokio::test]
async fn persist_without_failpoint_succeeds() {
    let scenario = fail::FailScenario::setup();
    let (rotater, blobs, _) = setup(Duration::from_secs(60));

    rotater.maintain().await.expect("bootstrap");
    assert_eq!(blobs.list(SIGNING_KEY_PREFIX).await.expect("list").len(), 1);
    rotater.shutdown().await;

    scenario.teardown();
}
