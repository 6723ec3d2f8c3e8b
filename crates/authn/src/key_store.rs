//! In-process set of signing keys.
//!
//! [`RotatingKeyStore`] holds an immutable [`KeySet`] behind an
//! [`ArcSwap`]. Readers load a snapshot without locking; writers build a new
//! set and swap it in. The head of the set issues tokens and every key in it
//! verifies them.

use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::{
    error::{AuthError, Result},
    signing_key::{JwkSet, SigningKey},
};

/// Immutable, newest-first sequence of signing keys.
#[derive(Debug, Clone, Default)]
pub struct KeySet {
    keys: Vec<Arc<SigningKey>>,
}

impl KeySet {
    fn from_sorted(keys: Vec<Arc<SigningKey>>) -> Self {
        Self { keys }
    }

    /// The newest key, if any.
    #[must_use]
    pub fn current(&self) -> Option<&Arc<SigningKey>> {
        self.keys.first()
    }

    /// Looks up a key by id.
    #[must_use]
    pub fn find(&self, kid: &str) -> Option<&Arc<SigningKey>> {
        self.keys.iter().find(|key| key.kid() == kid)
    }

    /// Keys, newest first.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<SigningKey>> {
        self.keys.iter()
    }

    /// Number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns `true` if the set holds no key.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Kids, newest first.
    #[must_use]
    pub fn kids(&self) -> Vec<String> {
        self.keys.iter().map(|key| key.kid().to_owned()).collect()
    }

    /// Public keys as a JWK set.
    #[must_use]
    pub fn jwks(&self) -> JwkSet {
        JwkSet { keys: self.keys.iter().map(|key| key.public_jwk()).collect() }
    }
}

/// Lock-free holder of the current [`KeySet`].
pub struct RotatingKeyStore {
    keys: ArcSwap<KeySet>,
    depth: usize,
}

impl std::fmt::Debug for RotatingKeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RotatingKeyStore")
            .field("kids", &self.keys.load().kids())
            .field("depth", &self.depth)
            .finish()
    }
}

impl RotatingKeyStore {
    /// Creates an empty store retaining at most `depth` keys (at least one).
    #[must_use]
    pub fn new(depth: usize) -> Self {
        Self { keys: ArcSwap::from_pointee(KeySet::default()), depth: depth.max(1) }
    }

    /// Creates a store holding only `key`, for deployments with a static key.
    #[must_use]
    pub fn with_static_key(key: SigningKey) -> Self {
        let store = Self::new(1);
        store.rotate(key);
        store
    }

    /// Maximum number of retained keys.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// The key that signs new tokens.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::NoSigningKey`] before the first key is loaded.
    pub fn current(&self) -> Result<Arc<SigningKey>> {
        self.keys.load().current().cloned().ok_or(AuthError::NoSigningKey)
    }

    /// Snapshot of every retained key.
    #[must_use]
    pub fn all(&self) -> Arc<KeySet> {
        self.keys.load_full()
    }

    /// Looks up a retained key by id.
    #[must_use]
    pub fn find(&self, kid: &str) -> Option<Arc<SigningKey>> {
        self.keys.load().find(kid).cloned()
    }

    /// Makes `key` current, dropping the oldest keys beyond the depth.
    pub fn rotate(&self, key: SigningKey) {
        let key = Arc::new(key);
        self.keys.rcu(|set| {
            let mut keys = Vec::with_capacity(self.depth);
            keys.push(Arc::clone(&key));
            keys.extend(set.iter().filter(|k| k.kid() != key.kid()).cloned());
            keys.truncate(self.depth);
            KeySet::from_sorted(keys)
        });
        tracing::info!(kid = %key.kid(), "signing key rotated in");
    }

    /// Replaces the whole set with `keys`, sorted newest first, deduplicated
    /// by kid and trimmed to the depth.
    pub fn replace(&self, keys: impl IntoIterator<Item = SigningKey>) {
        let mut keys: Vec<Arc<SigningKey>> = keys.into_iter().map(Arc::new).collect();
        keys.sort_by(|a, b| b.kid().cmp(a.kid()));
        keys.dedup_by(|a, b| a.kid() == b.kid());
        keys.truncate(self.depth);
        self.keys.store(Arc::new(KeySet::from_sorted(keys)));
    }
}
