//! Dual-tier storage for the keyward credential service.
//!
//! This crate provides the [`StorageBackend`] trait and the stores layered on
//! top of it. Every store follows the same tiering policy: an authoritative
//! durable tier that every write must reach, and an optional cache tier that
//! accelerates reads and is allowed to fail.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    keyward-authn                            │
//! │    key rotation │ identity reconciliation │ app wiring      │
//! ├─────────────────────────────────────────────────────────────┤
//! │                    Store Layer                              │
//! │  EncryptedBlobStore │ TieredRefreshTokenStore │ StoreActives │
//! │  TieredBlobStore    │ AccountStore (collaborator)           │
//! ├─────────────────────────────────────────────────────────────┤
//! │                StorageBackend trait                         │
//! │  (get, set, set_with_ttl, delete, get_prefix, clear_prefix) │
//! ├──────────────────────────────┬──────────────────────────────┤
//! │        durable tier          │     cache tier (optional)    │
//! └──────────────────────────────┴──────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```
//! use std::{sync::Arc, time::Duration};
//!
//! use keyward_storage::{
//!     AccountId, MemoryBackend, RefreshTokenStore, TieredRefreshTokenStore,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let durable = Arc::new(MemoryBackend::new());
//!     let cache = Arc::new(MemoryBackend::new());
//!     let tokens =
//!         TieredRefreshTokenStore::new(durable, Some(cache), Duration::from_secs(3600));
//!
//!     let token = tokens.create(AccountId::from(42)).await?;
//!     assert_eq!(tokens.find(&token).await?, Some(AccountId::from(42)));
//!
//!     tokens.revoke(&token).await?;
//!     assert_eq!(tokens.find(&token).await?, None);
//!     Ok(())
//! }
//! ```
//!
//! # Error Handling
//!
//! All operations return [`StorageResult<T>`]. Absence is `Ok(None)`, not an
//! error. Cache-tier failures never reach the caller; they are logged and
//! handed to an [`ErrorReporter`].
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables the `testutil` module with shared test helpers (a failure-injecting
//!   backend and a recording error reporter). Enable this in `[dev-dependencies]` for integration
//!   tests.

#![deny(unsafe_code)]

pub mod accounts;
pub mod actives;
pub mod backend;
pub mod blob;
pub mod encrypted;
pub mod error;
pub mod health;
pub mod memory;
pub mod refresh_token;
pub mod report;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used)]
pub mod testutil;
pub mod types;

// Re-export primary types at crate root for convenience
pub use accounts::{
    Account, AccountStore, MemoryAccountStore, OAUTH_ACCOUNT_CONSTRAINT, OAUTH_PROVIDER_CONSTRAINT,
    OauthAccount, USERNAME_CONSTRAINT,
};
pub use actives::{Actives, ActivesRetention, BucketKind, StoreActives};
pub use backend::StorageBackend;
pub use blob::{Blob, BlobStore, TieredBlobStore};
pub use encrypted::{EncryptedBlobStore, MASTER_KEY_LEN};
pub use error::{BoxError, ConfigError, StorageError, StorageResult};
pub use health::{HealthProbe, HealthStatus};
pub use memory::MemoryBackend;
pub use refresh_token::{RefreshToken, RefreshTokenStore, TieredRefreshTokenStore};
pub use report::{ErrorReporter, TracingReporter, default_reporter};
pub use types::{AccountId, KeyValue};
pub use zeroize::Zeroizing;
