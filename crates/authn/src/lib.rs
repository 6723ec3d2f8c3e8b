//! # Keyward Authentication
//!
//! Credential lifecycle for keyward services.
//!
//! This crate provides:
//! - **Signing keys**: Ed25519 keys whose ids sort by creation time
//! - **Key rotation**: fleet-wide rotation coordinated only through a shared blob store
//! - **Identity tokens**: EdDSA JWT issuance, verification, and JWKS
//! - **Identity reconciliation**: mapping federated identities to local accounts
//! - **Account services**: sign-up and unlock with field-level errors
//! - **Wiring**: [`App`] assembles every service from a [`Config`]
//!
//! ## Features
//!
//! - Only EdDSA is accepted; `none` and symmetric algorithms are explicitly rejected
//! - Readers of the key set never block behind a rotation
//! - Racing rotations across processes converge without a distributed lock
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use keyward_authn::{App, AppDeps, Config, PasswordHasher};
//! use keyward_storage::{MemoryAccountStore, MemoryBackend};
//!
//! struct ExternalHasher;
//!
//! impl PasswordHasher for ExternalHasher {
//!     fn hash(&self, password: &str) -> keyward_authn::Result<String> {
//!         // Delegate to the real hashing backend here.
//!         Ok(password.chars().rev().collect())
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::from_env()?;
//! let deps = AppDeps::builder()
//!     .durable(Arc::new(MemoryBackend::new()))
//!     .cache(Arc::new(MemoryBackend::new()))
//!     .accounts(Arc::new(MemoryAccountStore::new()))
//!     .hasher(Arc::new(ExternalHasher))
//!     .build();
//!
//! let app = App::new(config, deps).await?;
//! println!("serving {} signing keys", app.jwks().keys.len());
//! app.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Account creation and unlocking.
pub mod accounts;
/// Service wiring.
pub mod app;
/// Service configuration.
pub mod config;
/// Authentication error types.
pub mod error;
/// Identity tokens.
pub mod jwt;
/// In-process signing key set.
pub mod key_store;
/// Federated identity reconciliation.
pub mod reconciler;
/// Fleet-wide key rotation.
pub mod rotater;
/// Ed25519 signing keys.
pub mod signing_key;
/// Shared test utilities.
#[cfg(any(test, feature = "testutil"))]
pub mod testutil;
/// Algorithm validation.
pub mod validation;

// Re-export key types for convenience
pub use accounts::{AccountCreator, AccountUnlocker, PasswordHasher};
pub use app::{App, AppDeps};
pub use config::Config;
pub use error::{AuthError, ErrorCode, ErrorKind, FieldError, FieldErrors, Result};
pub use jwt::IdentityClaims;
pub use key_store::{KeySet, RotatingKeyStore};
pub use reconciler::{IdentityReconciler, ProviderIdentity, ReconcilePath, Reconciliation};
pub use rotater::{KeyStoreRotater, SIGNING_KEY_PREFIX, TickOutcome};
pub use signing_key::{Jwk, JwkSet, SigningKey};
pub use validation::{ACCEPTED_ALGORITHMS, FORBIDDEN_ALGORITHMS, validate_algorithm};
