//! Federated identity reconciliation.
//!
//! Maps an identity asserted by an external provider to exactly one local
//! account. Branches are evaluated in a fixed order so an identity that is
//! already linked is never duplicated into a second account:
//!
//! 1. [`ReconcilePath::LinkedFound`]: the `(provider, provider_id)` pair is
//!    linked; return that account unless it is locked.
//! 2. [`ReconcilePath::ExplicitLink`]: the caller named a target account;
//!    attach the identity to it.
//! 3. [`ReconcilePath::CreateNew`]: create an account from the identity's
//!    email and attach the identity to it.
//!
//! Account creation and link attachment are two separate store calls. If the
//! link fails after the account was created, the failure is reported and the
//! account is kept.

use std::{fmt, sync::Arc};

use keyward_storage::{
    Account, AccountId, AccountStore, ErrorReporter, StorageError, Zeroizing, default_reporter,
};
use rand_core::{OsRng, RngCore};

use crate::{
    accounts::AccountCreator,
    error::{AuthError, ErrorCode, Result},
};

/// Length of the placeholder password generated for federated sign-ups.
const PLACEHOLDER_CREDENTIAL_BYTES: usize = 32;

/// An identity asserted by an external provider.
#[derive(Clone)]
pub struct ProviderIdentity {
    /// The provider's stable user identifier.
    pub id: String,
    /// Email reported by the provider; becomes the username of new accounts.
    pub email: String,
    /// Provider access token, stored with the link.
    pub access_token: Zeroizing<String>,
}

impl ProviderIdentity {
    /// Creates an identity.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        email: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
            access_token: Zeroizing::new(access_token.into()),
        }
    }
}

impl fmt::Debug for ProviderIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderIdentity")
            .field("id", &self.id)
            .field("email", &self.email)
            .field("access_token", &"<redacted>")
            .finish()
    }
}

/// Which branch resolved an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcilePath {
    /// The identity was already linked.
    LinkedFound,
    /// The identity was attached to a caller-supplied account.
    ExplicitLink,
    /// A new account was created for the identity.
    CreateNew,
}

impl ReconcilePath {
    /// Lowercase name used in logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LinkedFound => "linked_found",
            Self::ExplicitLink => "explicit_link",
            Self::CreateNew => "create_new",
        }
    }
}

impl fmt::Display for ReconcilePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    /// The resolved account.
    pub account: Account,
    /// The branch that resolved it.
    pub path: ReconcilePath,
}

/// Resolves federated identities to local accounts.
#[derive(Clone)]
pub struct IdentityReconciler {
    store: Arc<dyn AccountStore>,
    creator: AccountCreator,
    reporter: Arc<dyn ErrorReporter>,
}

impl IdentityReconciler {
    /// Creates a reconciler over `store`, creating accounts through `creator`.
    #[must_use]
    pub fn new(store: Arc<dyn AccountStore>, creator: AccountCreator) -> Self {
        Self { store, creator, reporter: default_reporter() }
    }

    /// Sets the sink for link failures after account creation.
    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Resolves `identity` from `provider`, optionally linking it to
    /// `link_to`.
    ///
    /// # Errors
    ///
    /// - [`AuthError::AccountLocked`] if the linked account is locked
    /// - [`AuthError::SessionConflict`] if the identity cannot be attached to
    ///   `link_to` because of an existing link
    /// - `account: NOT_FOUND` if `link_to` does not exist
    /// - `username: TAKEN` if a new account's email is already registered
    /// - [`AuthError::Storage`] for store failures
    #[tracing::instrument(
        skip(self, identity),
        fields(provider_id = %identity.id, path = tracing::field::Empty)
    )]
    pub async fn reconcile(
        &self,
        provider: &str,
        identity: &ProviderIdentity,
        link_to: Option<AccountId>,
    ) -> Result<Reconciliation> {
        let reconciliation = if let Some(account) =
            self.store.find_by_oauth_account(provider, &identity.id).await?
        {
            if account.locked {
                tracing::info!(account_id = %account.id, "federated sign-in to locked account");
                return Err(AuthError::account_locked(account.id));
            }
            Reconciliation { account, path: ReconcilePath::LinkedFound }
        } else if let Some(target) = link_to {
            let account = self.link_existing(provider, identity, target).await?;
            Reconciliation { account, path: ReconcilePath::ExplicitLink }
        } else {
            let account = self.create_linked(provider, identity).await?;
            Reconciliation { account, path: ReconcilePath::CreateNew }
        };

        tracing::Span::current().record("path", reconciliation.path.as_str());
        tracing::debug!(account_id = %reconciliation.account.id, "identity reconciled");
        Ok(reconciliation)
    }

    async fn link_existing(
        &self,
        provider: &str,
        identity: &ProviderIdentity,
        target: AccountId,
    ) -> Result<Account> {
        let linked = self
            .store
            .add_oauth_account(target, provider, &identity.id, &identity.access_token)
            .await;
        match linked {
            Ok(()) => {},
            Err(StorageError::Uniqueness { .. }) => {
                return Err(AuthError::session_conflict(provider));
            },
            Err(StorageError::NotFound { .. }) => {
                return Err(AuthError::field("account", ErrorCode::NotFound));
            },
            Err(err) => return Err(err.into()),
        }
        tracing::info!(account_id = %target, provider, "federated identity linked");

        self.store.find(target).await?.ok_or_else(|| {
            AuthError::from(StorageError::not_found(format!("account/{target}")))
        })
    }

    async fn create_linked(&self, provider: &str, identity: &ProviderIdentity) -> Result<Account> {
        let mut secret = Zeroizing::new([0u8; PLACEHOLDER_CREDENTIAL_BYTES]);
        OsRng.fill_bytes(&mut secret[..]);
        let placeholder = Zeroizing::new(hex::encode(&secret[..]));

        let account = self.creator.create(&identity.email, &placeholder).await?;

        if let Err(err) = self
            .store
            .add_oauth_account(account.id, provider, &identity.id, &identity.access_token)
            .await
        {
            tracing::warn!(
                account_id = %account.id,
                provider,
                error = %err,
                "account created but federated identity link failed"
            );
            self.reporter.report(&err);
        } else {
            tracing::info!(account_id = %account.id, provider, "federated account created");
        }
        Ok(account)
    }
}
