//! Account services.
//!
//! Thin policies over the [`AccountStore`] collaborator that turn store
//! outcomes into field-level errors a client can act on.

use std::sync::Arc;

use keyward_storage::{Account, AccountId, AccountStore, StorageError};

use crate::error::{AuthError, ErrorCode, FieldErrors, Result};

/// Password hashing collaborator.
///
/// Only the contract is consumed here: given a plaintext, return an opaque
/// hash the account store can persist.
pub trait PasswordHasher: Send + Sync {
    /// Hashes `password`.
    ///
    /// # Errors
    ///
    /// Returns whatever the hashing backend reports.
    fn hash(&self, password: &str) -> Result<String>;
}

/// Creates accounts from a username and password.
#[derive(Clone)]
pub struct AccountCreator {
    store: Arc<dyn AccountStore>,
    hasher: Arc<dyn PasswordHasher>,
}

impl AccountCreator {
    /// Creates the service.
    #[must_use]
    pub fn new(store: Arc<dyn AccountStore>, hasher: Arc<dyn PasswordHasher>) -> Self {
        Self { store, hasher }
    }

    /// Validates, hashes, and persists a new account.
    ///
    /// # Errors
    ///
    /// - `username: MISSING` / `password: MISSING` for blank input
    /// - `username: TAKEN` if the username is already registered
    /// - [`AuthError::Storage`] for any other store failure
    #[tracing::instrument(skip(self, password))]
    pub async fn create(&self, username: &str, password: &str) -> Result<Account> {
        let username = username.trim();

        let mut fields = FieldErrors::new();
        if username.is_empty() {
            fields.push("username", ErrorCode::Missing);
        }
        if password.is_empty() {
            fields.push("password", ErrorCode::Missing);
        }
        fields.into_result()?;

        let hash = self.hasher.hash(password)?;
        match self.store.create(username, &hash).await {
            Ok(account) => {
                tracing::info!(account_id = %account.id, "account created");
                Ok(account)
            },
            Err(StorageError::Uniqueness { .. }) => {
                Err(AuthError::field("username", ErrorCode::Taken))
            },
            Err(err) => Err(err.into()),
        }
    }
}

/// Clears the lock flag on an account.
#[derive(Clone)]
pub struct AccountUnlocker {
    store: Arc<dyn AccountStore>,
}

impl AccountUnlocker {
    /// Creates the service.
    #[must_use]
    pub fn new(store: Arc<dyn AccountStore>) -> Self {
        Self { store }
    }

    /// Unlocks `account_id`.
    ///
    /// # Errors
    ///
    /// Returns `account: NOT_FOUND` if no such account exists.
    #[tracing::instrument(skip(self))]
    pub async fn unlock(&self, account_id: AccountId) -> Result<()> {
        match self.store.unlock(account_id).await {
            Ok(()) => {
                tracing::info!(account_id = %account_id, "account unlocked");
                Ok(())
            },
            Err(StorageError::NotFound { .. }) => {
                Err(AuthError::field("account", ErrorCode::NotFound))
            },
            Err(err) => Err(err.into()),
        }
    }
}
