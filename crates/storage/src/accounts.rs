//! Account-store collaborator contract.
//!
//! Account persistence is owned by another component; this crate only
//! consumes it. [`AccountStore`] names the primitives the identity
//! reconciler and account services rely on, and [`MemoryAccountStore`] is
//! the in-process implementation used in tests and development.
//!
//! Three uniqueness rules are enforced by every implementation and surface as
//! [`StorageError::Uniqueness`]:
//!
//! - `username` is unique across accounts (constraint `"username"`)
//! - a `(provider, provider_id)` pair links to at most one account
//!   (constraint `"oauth_account"`)
//! - an account holds at most one link per provider
//!   (constraint `"oauth_account_provider"`)

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::{
    error::{StorageError, StorageResult},
    types::AccountId,
};

/// Uniqueness constraint on account usernames.
pub const USERNAME_CONSTRAINT: &str = "username";

/// Uniqueness constraint on federated identity pairs.
pub const OAUTH_ACCOUNT_CONSTRAINT: &str = "oauth_account";

/// Uniqueness constraint on one link per provider per account.
pub const OAUTH_PROVIDER_CONSTRAINT: &str = "oauth_account_provider";

/// A local account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Primary key.
    pub id: AccountId,
    /// Login name; an email address for federated sign-ups.
    pub username: String,
    /// Password hash as produced by the hashing collaborator.
    #[serde(skip_serializing, default)]
    pub password: String,
    /// Locked accounts may not sign in.
    pub locked: bool,
    /// The account must choose a new password at next sign-in.
    pub require_new_password: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

/// A federated identity linked to a local account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OauthAccount {
    /// Identity provider name (e.g. `"google"`).
    pub provider: String,
    /// The provider's stable user identifier.
    pub provider_id: String,
    /// Linked local account.
    pub account_id: AccountId,
    /// Provider access token captured at link time.
    pub access_token: Zeroizing<String>,
    /// When the link was created.
    pub created_at: DateTime<Utc>,
}

/// Persistence primitives consumed from the account store.
///
/// Lookups return `Ok(None)` for unknown records. Mutations of a record that
/// must exist return [`StorageError::NotFound`].
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Finds an account by id.
    async fn find(&self, id: AccountId) -> StorageResult<Option<Account>>;

    /// Finds an account by username.
    async fn find_by_username(&self, username: &str) -> StorageResult<Option<Account>>;

    /// Finds the account linked to a federated identity.
    async fn find_by_oauth_account(
        &self,
        provider: &str,
        provider_id: &str,
    ) -> StorageResult<Option<Account>>;

    /// Links a federated identity to `account_id`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Uniqueness`] if the pair is already linked or
    /// the account already holds a link for `provider`, and
    /// [`StorageError::NotFound`] if the account does not exist.
    async fn add_oauth_account(
        &self,
        account_id: AccountId,
        provider: &str,
        provider_id: &str,
        access_token: &str,
    ) -> StorageResult<()>;

    /// Lists the federated identities linked to `account_id`.
    async fn get_oauth_accounts(&self, account_id: AccountId) -> StorageResult<Vec<OauthAccount>>;

    /// Creates an account.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Uniqueness`] if the username is taken.
    async fn create(&self, username: &str, password_hash: &str) -> StorageResult<Account>;

    /// Locks an account.
    async fn lock(&self, id: AccountId) -> StorageResult<()>;

    /// Unlocks an account.
    async fn unlock(&self, id: AccountId) -> StorageResult<()>;
}

#[derive(Default)]
struct Inner {
    next_id: i64,
    accounts: HashMap<AccountId, Account>,
    usernames: HashMap<String, AccountId>,
    oauth: HashMap<(String, String), OauthAccount>,
}

impl Inner {
    fn account_mut(&mut self, id: AccountId) -> StorageResult<&mut Account> {
        self.accounts.get_mut(&id).ok_or_else(|| StorageError::not_found(format!("account/{id}")))
    }
}

/// In-memory [`AccountStore`].
///
/// Clones share state.
#[derive(Clone, Default)]
pub struct MemoryAccountStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryAccountStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of accounts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().accounts.len()
    }

    /// Returns `true` if no account exists.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn set_locked(&self, id: AccountId, locked: bool) -> StorageResult<()> {
        let mut inner = self.inner.write();
        let account = inner.account_mut(id)?;
        account.locked = locked;
        account.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn find(&self, id: AccountId) -> StorageResult<Option<Account>> {
        Ok(self.inner.read().accounts.get(&id).cloned())
    }

    async fn find_by_username(&self, username: &str) -> StorageResult<Option<Account>> {
        let inner = self.inner.read();
        Ok(inner.usernames.get(username).and_then(|id| inner.accounts.get(id)).cloned())
    }

    async fn find_by_oauth_account(
        &self,
        provider: &str,
        provider_id: &str,
    ) -> StorageResult<Option<Account>> {
        let inner = self.inner.read();
        Ok(inner
            .oauth
            .get(&(provider.to_owned(), provider_id.to_owned()))
            .and_then(|link| inner.accounts.get(&link.account_id))
            .cloned())
    }

    async fn add_oauth_account(
        &self,
        account_id: AccountId,
        provider: &str,
        provider_id: &str,
        access_token: &str,
    ) -> StorageResult<()> {
        let mut inner = self.inner.write();
        if !inner.accounts.contains_key(&account_id) {
            return Err(StorageError::not_found(format!("account/{account_id}")));
        }
        let pair = (provider.to_owned(), provider_id.to_owned());
        if inner.oauth.contains_key(&pair) {
            return Err(StorageError::uniqueness(OAUTH_ACCOUNT_CONSTRAINT));
        }
        if inner
            .oauth
            .values()
            .any(|link| link.account_id == account_id && link.provider == provider)
        {
            return Err(StorageError::uniqueness(OAUTH_PROVIDER_CONSTRAINT));
        }
        inner.oauth.insert(
            pair,
            OauthAccount {
                provider: provider.to_owned(),
                provider_id: provider_id.to_owned(),
                account_id,
                access_token: Zeroizing::new(access_token.to_owned()),
                created_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn get_oauth_accounts(&self, account_id: AccountId) -> StorageResult<Vec<OauthAccount>> {
        let inner = self.inner.read();
        let mut links: Vec<OauthAccount> =
            inner.oauth.values().filter(|link| link.account_id == account_id).cloned().collect();
        links.sort_by(|a, b| (&a.provider, &a.provider_id).cmp(&(&b.provider, &b.provider_id)));
        Ok(links)
    }

    async fn create(&self, username: &str, password_hash: &str) -> StorageResult<Account> {
        let mut inner = self.inner.write();
        if inner.usernames.contains_key(username) {
            return Err(StorageError::uniqueness(USERNAME_CONSTRAINT));
        }
        inner.next_id += 1;
        let now = Utc::now();
        let account = Account {
            id: AccountId(inner.next_id),
            username: username.to_owned(),
            password: password_hash.to_owned(),
            locked: false,
            require_new_password: false,
            created_at: now,
            updated_at: now,
        };
        inner.usernames.insert(account.username.clone(), account.id);
        inner.accounts.insert(account.id, account.clone());
        Ok(account)
    }

    async fn lock(&self, id: AccountId) -> StorageResult<()> {
        self.set_locked(id, true)
    }

    async fn unlock(&self, id: AccountId) -> StorageResult<()> {
        self.set_locked(id, false)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_and_find() {
        let store = MemoryAccountStore::new();
        let account = store.create("ada@example.com", "hash").await.unwrap();

        assert_eq!(store.find(account.id).await.unwrap(), Some(account.clone()));
        assert_eq!(store.find_by_username("ada@example.com").await.unwrap(), Some(account));
        assert_eq!(store.find(AccountId(999)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_duplicate_username_is_uniqueness_error() {
        let store = MemoryAccountStore::new();
        store.create("ada@example.com", "hash").await.unwrap();

        let err = store.create("ada@example.com", "other").await.unwrap_err();
        assert!(
            matches!(err, StorageError::Uniqueness { ref constraint } if constraint == "username")
        );
    }

    #[tokio::test]
    async fn test_oauth_pair_links_once() {
        let store = MemoryAccountStore::new();
        let a = store.create("a@example.com", "hash").await.unwrap();
        let b = store.create("b@example.com", "hash").await.unwrap();

        store.add_oauth_account(a.id, "google", "123", "tok").await.unwrap();
        let err = store.add_oauth_account(b.id, "google", "123", "tok").await.unwrap_err();
        assert!(matches!(err, StorageError::Uniqueness { .. }));

        let found = store.find_by_oauth_account("google", "123").await.unwrap();
        assert_eq!(found.map(|acc| acc.id), Some(a.id));
        assert!(store.get_oauth_accounts(b.id).await.unwrap().is_empty());
        assert_eq!(store.get_oauth_accounts(a.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_one_link_per_provider_per_account() {
        let store = MemoryAccountStore::new();
        let a = store.create("a@example.com", "hash").await.unwrap();

        store.add_oauth_account(a.id, "google", "123", "tok").await.unwrap();
        let err = store.add_oauth_account(a.id, "google", "456", "tok").await.unwrap_err();
        let StorageError::Uniqueness { constraint } = err else {
            panic!("expected a uniqueness error, got {err:?}");
        };
        assert_eq!(constraint, OAUTH_PROVIDER_CONSTRAINT);
        store.add_oauth_account(a.id, "github", "456", "tok").await.unwrap();
    }

    #[tokio::test]
    async fn test_link_to_unknown_account_is_not_found() {
        let store = MemoryAccountStore::new();
        let err = store.add_oauth_account(AccountId(5), "google", "1", "tok").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_lock_and_unlock() {
        let store = MemoryAccountStore::new();
        let account = store.create("ada@example.com", "hash").await.unwrap();

        store.lock(account.id).await.unwrap();
        assert!(store.find(account.id).await.unwrap().unwrap().locked);

        store.unlock(account.id).await.unwrap();
        assert!(!store.find(account.id).await.unwrap().unwrap().locked);

        assert!(matches!(store.unlock(AccountId(404)).await, Err(StorageError::NotFound { .. })));
    }
}
