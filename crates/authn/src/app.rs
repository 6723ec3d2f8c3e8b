//! Service wiring.
//!
//! [`App`] owns every long-lived service object. It is built once at startup
//! from a [`Config`] and the external collaborators in [`AppDeps`], then
//! passed by reference to request handlers. There are no process-wide
//! singletons.

use std::sync::Arc;

use keyward_storage::{
    AccountStore, Actives, BlobStore, EncryptedBlobStore, ErrorReporter, HealthProbe,
    HealthStatus, RefreshTokenStore, StorageBackend, StoreActives, TieredBlobStore,
    TieredRefreshTokenStore, default_reporter,
};

use crate::{
    accounts::{AccountCreator, AccountUnlocker, PasswordHasher},
    config::Config,
    error::Result,
    key_store::RotatingKeyStore,
    reconciler::IdentityReconciler,
    rotater::KeyStoreRotater,
    signing_key::JwkSet,
};

/// External collaborators the service is built on.
#[derive(bon::Builder)]
pub struct AppDeps {
    /// Authoritative store.
    durable: Arc<dyn StorageBackend>,
    /// Optional accelerator tier.
    cache: Option<Arc<dyn StorageBackend>>,
    /// Account persistence.
    accounts: Arc<dyn AccountStore>,
    /// Password hashing.
    hasher: Arc<dyn PasswordHasher>,
    /// Sink for failures that are swallowed rather than returned.
    #[builder(default = default_reporter())]
    reporter: Arc<dyn ErrorReporter>,
}

/// The assembled service.
pub struct App {
    config: Config,
    durable: Arc<dyn StorageBackend>,
    cache: Option<Arc<dyn StorageBackend>>,
    blobs: Arc<dyn BlobStore>,
    key_store: Arc<RotatingKeyStore>,
    rotater: Option<KeyStoreRotater>,
    refresh_tokens: Arc<dyn RefreshTokenStore>,
    actives: Option<Arc<dyn Actives>>,
    reconciler: IdentityReconciler,
    creator: AccountCreator,
    unlocker: AccountUnlocker,
}

impl App {
    /// Builds every service and bootstraps the signing keys.
    ///
    /// With a static identity signing key configured the key store holds only
    /// that key and no rotater runs. Otherwise a rotater is started after a
    /// successful bootstrap tick.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`](crate::AuthError::Config) for an invalid
    /// configuration, and the bootstrap tick's error when no static key is
    /// configured and the blob store cannot supply one.
    #[tracing::instrument(skip_all)]
    pub async fn new(config: Config, deps: AppDeps) -> Result<Self> {
        config.validate()?;
        let AppDeps { durable, cache, accounts, hasher, reporter } = deps;

        let tiered = TieredBlobStore::new(Arc::clone(&durable), cache.clone())
            .with_reporter(Arc::clone(&reporter));
        let blobs: Arc<dyn BlobStore> = match config.db_encryption_key() {
            Some(key) => Arc::new(EncryptedBlobStore::new(Arc::new(tiered), key.clone())),
            None => {
                tracing::warn!("no blob encryption key configured, signing keys stored in clear");
                Arc::new(tiered)
            },
        };

        let (key_store, rotater) = match config.identity_signing_key() {
            Some(key) => {
                tracing::info!(kid = %key.kid(), "using static identity signing key");
                (Arc::new(RotatingKeyStore::with_static_key(key.clone())), None)
            },
            None => {
                let key_store = Arc::new(RotatingKeyStore::new(config.key_retention_depth()));
                let rotater = KeyStoreRotater::new(
                    Arc::clone(&blobs),
                    Arc::clone(&key_store),
                    config.rotation_interval(),
                )
                .with_reporter(Arc::clone(&reporter));
                rotater.maintain().await?;
                (key_store, Some(rotater))
            },
        };

        let refresh_tokens: Arc<dyn RefreshTokenStore> = Arc::new(
            TieredRefreshTokenStore::new(
                Arc::clone(&durable),
                cache.clone(),
                config.refresh_token_ttl(),
            )
            .with_reporter(Arc::clone(&reporter)),
        );

        let actives = cache.as_ref().map(|cache| {
            Arc::new(StoreActives::new(
                Arc::clone(cache),
                config.time_zone(),
                config.actives_retention(),
            )) as Arc<dyn Actives>
        });
        if actives.is_none() {
            tracing::info!("no cache tier configured, activity tracking disabled");
        }

        let creator = AccountCreator::new(Arc::clone(&accounts), hasher);
        let reconciler = IdentityReconciler::new(Arc::clone(&accounts), creator.clone())
            .with_reporter(reporter);
        let unlocker = AccountUnlocker::new(accounts);

        Ok(Self {
            config,
            durable,
            cache,
            blobs,
            key_store,
            rotater,
            refresh_tokens,
            actives,
            reconciler,
            creator,
            unlocker,
        })
    }

    /// The validated configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Blob store holding signing keys, encrypted when a key is configured.
    #[must_use]
    pub fn blobs(&self) -> &Arc<dyn BlobStore> {
        &self.blobs
    }

    /// Signing keys for issuing and verifying identity tokens.
    #[must_use]
    pub fn key_store(&self) -> &Arc<RotatingKeyStore> {
        &self.key_store
    }

    /// Whether keys rotate, i.e. no static key is configured.
    #[must_use]
    pub fn rotates_keys(&self) -> bool {
        self.rotater.is_some()
    }

    /// Public keys of every retained signing key.
    #[must_use]
    pub fn jwks(&self) -> JwkSet {
        crate::jwt::jwks(&self.key_store)
    }

    /// Refresh token persistence.
    #[must_use]
    pub fn refresh_tokens(&self) -> &Arc<dyn RefreshTokenStore> {
        &self.refresh_tokens
    }

    /// Activity counters, present only with a cache tier.
    #[must_use]
    pub fn actives(&self) -> Option<&Arc<dyn Actives>> {
        self.actives.as_ref()
    }

    /// Federated identity reconciliation.
    #[must_use]
    pub fn reconciler(&self) -> &IdentityReconciler {
        &self.reconciler
    }

    /// Password sign-up.
    #[must_use]
    pub fn account_creator(&self) -> &AccountCreator {
        &self.creator
    }

    /// Account unlocking.
    #[must_use]
    pub fn account_unlocker(&self) -> &AccountUnlocker {
        &self.unlocker
    }

    /// Liveness of the process: the durable tier handle still answers.
    ///
    /// Unlike [`durable_check`](Self::durable_check) this does not require
    /// the backend to be able to serve traffic, and the cache is ignored.
    pub async fn liveness_check(&self) -> HealthStatus {
        probe("durable", self.durable.as_ref(), HealthProbe::Liveness).await
    }

    /// Readiness of the durable tier.
    pub async fn durable_check(&self) -> HealthStatus {
        probe("durable", self.durable.as_ref(), HealthProbe::Readiness).await
    }

    /// Readiness of the cache tier. Unhealthy when no cache is configured.
    pub async fn cache_check(&self) -> HealthStatus {
        match &self.cache {
            Some(cache) => probe("cache", cache.as_ref(), HealthProbe::Readiness).await,
            None => HealthStatus::unhealthy("cache", "not configured"),
        }
    }

    /// Stops background key rotation.
    pub async fn shutdown(&self) {
        if let Some(rotater) = &self.rotater {
            rotater.shutdown().await;
        }
    }
}

async fn probe(tier: &str, backend: &dyn StorageBackend, kind: HealthProbe) -> HealthStatus {
    match backend.health_check(kind).await {
        Ok(status) => status,
        Err(err) => {
            tracing::warn!(tier, probe = %kind, error = %err, "health check failed");
            HealthStatus::unhealthy(tier, err.to_string())
        },
    }
}
