//! Multi-instance key rotation tests.
//!
//! Each test runs two or more rotaters with private key stores against one
//! shared blob store, the way separate server processes would.
#![allow(clippy::expect_used, clippy::panic)]

use std::{sync::Arc, time::Duration};

use keyward_authn::{
    AuthError, KeyStoreRotater, RotatingKeyStore, SIGNING_KEY_PREFIX, TickOutcome,
    jwt::{IdentityClaims, issue_identity_token, verify_identity_token},
    testutil::GatedBlobStore,
};
use keyward_storage::{
    AccountId, BlobStore, EncryptedBlobStore, MemoryBackend, TieredBlobStore, Zeroizing,
};

const AUD: &str = "https://app.example.com";

fn shared_blobs() -> Arc<dyn BlobStore> {
    let tiered = TieredBlobStore::new(
        Arc::new(MemoryBackend::new()),
        Some(Arc::new(MemoryBackend::new())),
    );
    Arc::new(EncryptedBlobStore::new(Arc::new(tiered), Zeroizing::new([42u8; 32])))
}

fn instance(blobs: &Arc<dyn BlobStore>, depth: usize, interval: Duration) -> KeyStoreRotater {
    KeyStoreRotater::new(Arc::clone(blobs), Arc::new(RotatingKeyStore::new(depth)), interval)
}

fn token(rotater: &KeyStoreRotater) -> String {
    let claims =
        IdentityClaims::new("https://auth.example.com", AccountId(1), AUD, Duration::from_secs(60));
    issue_identity_token(&claims, rotater.key_store()).expect("issue token")
}

#[tokio::test]
async fn racing_instances_both_load_both_keys() {
    let blobs = shared_blobs();
    let gated: Arc<dyn BlobStore> = Arc::new(GatedBlobStore::new(Arc::clone(&blobs), 2));
    let interval = Duration::from_secs(60);
    let a = instance(&gated, 3, interval);
    let b = instance(&gated, 3, interval);

    let (a_outcome, b_outcome) = tokio::join!(a.tick(), b.tick());
    let TickOutcome::Rotated { kid: a_kid } = a_outcome.expect("a tick") else {
        panic!("a should have generated a key");
    };
    let TickOutcome::Rotated { kid: b_kid } = b_outcome.expect("b tick") else {
        panic!("b should have generated a key");
    };
    assert_ne!(a_kid, b_kid, "racing instances must not collide on kid");

    for rotater in [&a, &b] {
        let kids = rotater.key_store().all().kids();
        assert_eq!(kids.len(), 2);
        assert!(kids.contains(&a_kid) && kids.contains(&b_kid));
    }
    assert_eq!(blobs.list(SIGNING_KEY_PREFIX).await.expect("list").len(), 2);

    // Tokens from either instance verify on the other.
    let from_a = token(&a);
    let from_b = token(&b);
    assert!(verify_identity_token(&from_a, b.key_store(), AUD).is_ok());
    assert!(verify_identity_token(&from_b, a.key_store(), AUD).is_ok());

    // One more tick on each finds a fresh key and converges without writing.
    let a_next = instance(&blobs, 3, interval);
    let b_next = instance(&blobs, 3, interval);
    assert_eq!(a_next.tick().await.expect("a next"), TickOutcome::Loaded { keys: 2 });
    assert_eq!(b_next.tick().await.expect("b next"), TickOutcome::Loaded { keys: 2 });
    assert_eq!(a_next.key_store().all().kids(), b_next.key_store().all().kids());
    let newest = a.key_store().all().kids()[0].clone();
    assert_eq!(a_next.key_store().current().expect("current").kid(), newest);
}

#[tokio::test]
async fn late_joiner_adopts_existing_key() {
    let blobs = shared_blobs();
    let interval = Duration::from_secs(60);
    let first = instance(&blobs, 3, interval);
    first.maintain().await.expect("first bootstrap");

    let second = instance(&blobs, 3, interval);
    second.maintain().await.expect("second bootstrap");

    assert_eq!(
        first.key_store().current().expect("first").kid(),
        second.key_store().current().expect("second").kid()
    );
    assert!(verify_identity_token(&token(&first), second.key_store(), AUD).is_ok());

    first.shutdown().await;
    second.shutdown().await;
}

#[tokio::test]
async fn token_from_expired_key_stops_verifying_after_next_tick() {
    let blobs = shared_blobs();
    // Keys live for depth × interval = 900ms and are stale after 150ms.
    let rotater = instance(&blobs, 3, Duration::from_millis(300));

    rotater.tick().await.expect("first tick");
    let old_token = token(&rotater);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(matches!(rotater.tick().await.expect("second tick"), TickOutcome::Rotated { .. }));
    let newer_token = token(&rotater);
    assert!(verify_identity_token(&old_token, rotater.key_store(), AUD).is_ok());

    // The first key has expired; the second has not.
    tokio::time::sleep(Duration::from_millis(800)).await;
    rotater.tick().await.expect("third tick");

    assert!(rotater.key_store().all().len() < 3, "the expired blob must not be reloaded");
    assert!(matches!(
        verify_identity_token(&old_token, rotater.key_store(), AUD),
        Err(AuthError::KeyNotFound { .. })
    ));
    assert!(verify_identity_token(&newer_token, rotater.key_store(), AUD).is_ok());
}
