//! Authentication error types.
//!
//! [`AuthError`] is the single error type returned by this crate. Callers that
//! only need to decide how to respond (retry, ask the user to fix a field,
//! page someone) branch on [`AuthError::kind`] instead of matching variants.

use std::fmt;

use keyward_storage::{ConfigError, StorageError};
use thiserror::Error;

/// Machine-readable code attached to a [`FieldError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// A required field was empty.
    Missing,
    /// The value is already used by another record.
    Taken,
    /// The field references a record that does not exist.
    NotFound,
    /// The value is malformed.
    FormatInvalid,
}

impl ErrorCode {
    /// Wire representation, e.g. `"TAKEN"`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Missing => "MISSING",
            Self::Taken => "TAKEN",
            Self::NotFound => "NOT_FOUND",
            Self::FormatInvalid => "FORMAT_INVALID",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single rejected input field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    /// Name of the input field (e.g. `"username"`).
    pub field: String,
    /// What is wrong with it.
    pub code: ErrorCode,
}

impl FieldError {
    /// Creates a field error.
    #[must_use]
    pub fn new(field: impl Into<String>, code: ErrorCode) -> Self {
        Self { field: field.into(), code }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.code)
    }
}

/// One or more rejected input fields, in the order they were checked.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldErrors(pub Vec<FieldError>);

impl FieldErrors {
    /// Creates an empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a rejected field.
    pub fn push(&mut self, field: impl Into<String>, code: ErrorCode) {
        self.0.push(FieldError::new(field, code));
    }

    /// Returns `true` if no field was rejected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns `true` if any field carries `code`.
    #[must_use]
    pub fn has_code(&self, code: ErrorCode) -> bool {
        self.0.iter().any(|err| err.code == code)
    }

    /// Iterates over the rejected fields.
    pub fn iter(&self) -> impl Iterator<Item = &FieldError> {
        self.0.iter()
    }

    /// `Ok(())` when empty, otherwise [`AuthError::Fields`].
    pub fn into_result(self) -> Result<()> {
        if self.is_empty() { Ok(()) } else { Err(AuthError::Fields(self)) }
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}

/// Coarse classification of an [`AuthError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A referenced record or key does not exist.
    NotFound,
    /// A token or record outlived its TTL.
    Expired,
    /// The request collides with existing state.
    Conflict,
    /// The account is locked.
    Locked,
    /// Stored data could not be decrypted.
    Decryption,
    /// A dependency is unreachable or no signing key is loaded yet.
    Unavailable,
    /// The caller's input or token is invalid.
    Invalid,
    /// Anything else.
    Internal,
}

/// Authentication, key-management, and reconciliation errors.
///
/// # Non-exhaustive
///
/// This enum is marked `#[non_exhaustive]`; new variants may be added in
/// future minor releases without a semver-breaking change. Downstream match
/// expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuthError {
    /// The account linked to a federated identity is locked.
    #[error("Account is locked: {account_id}")]
    AccountLocked {
        /// The locked account.
        account_id: keyward_storage::AccountId,
    },

    /// The federated identity is already linked elsewhere, or the target
    /// account already has a link for this provider.
    #[error("Session conflict for provider {provider}")]
    SessionConflict {
        /// Identity provider name.
        provider: String,
    },

    /// Input validation failed on one or more fields.
    #[error("Invalid fields: {0}")]
    Fields(FieldErrors),

    /// No retained signing key matches the token's `kid`.
    #[error("Signing key not found: {kid}")]
    KeyNotFound {
        /// Key ID that was not found.
        kid: String,
    },

    /// The key store is empty.
    #[error("No signing key available")]
    NoSigningKey,

    /// Malformed JWT - cannot be decoded.
    #[error("Invalid token format: {0}")]
    InvalidTokenFormat(String),

    /// Token has expired.
    #[error("Token expired")]
    TokenExpired,

    /// Token not yet valid (nbf claim in future).
    #[error("Token not yet valid")]
    TokenNotYetValid,

    /// Signature verification failed.
    #[error("Invalid signature")]
    InvalidSignature,

    /// Audience doesn't match expected value.
    #[error("Invalid audience: {0}")]
    InvalidAudience(String),

    /// Unknown or invalid issuer.
    #[error("Invalid issuer: {0}")]
    InvalidIssuer(String),

    /// Required claim is missing.
    #[error("Missing claim: {0}")]
    MissingClaim(String),

    /// Algorithm not in allowed list.
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Key material could not be parsed.
    #[error("Invalid key material: {0}")]
    InvalidKeyMaterial(String),

    /// Configuration was rejected.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Storage tier error.
    ///
    /// Wraps the original [`StorageError`] to preserve the full error source
    /// chain for debugging and structured logging.
    #[error("Storage error: {0}")]
    Storage(
        /// The underlying storage error.
        #[source]
        StorageError,
    ),
}

impl AuthError {
    /// Creates an `AccountLocked` error.
    #[must_use]
    pub fn account_locked(account_id: keyward_storage::AccountId) -> Self {
        Self::AccountLocked { account_id }
    }

    /// Creates a `SessionConflict` error.
    #[must_use]
    pub fn session_conflict(provider: impl Into<String>) -> Self {
        Self::SessionConflict { provider: provider.into() }
    }

    /// Creates a `Fields` error holding a single field.
    #[must_use]
    pub fn field(field: impl Into<String>, code: ErrorCode) -> Self {
        Self::Fields(FieldErrors(vec![FieldError::new(field, code)]))
    }

    /// Creates a `KeyNotFound` error.
    #[must_use]
    pub fn key_not_found(kid: impl Into<String>) -> Self {
        Self::KeyNotFound { kid: kid.into() }
    }

    /// Creates an `InvalidTokenFormat` error.
    #[must_use]
    pub fn invalid_token_format(message: impl Into<String>) -> Self {
        Self::InvalidTokenFormat(message.into())
    }

    /// Creates a `MissingClaim` error.
    #[must_use]
    pub fn missing_claim(claim: impl Into<String>) -> Self {
        Self::MissingClaim(claim.into())
    }

    /// Creates an `UnsupportedAlgorithm` error.
    #[must_use]
    pub fn unsupported_algorithm(message: impl Into<String>) -> Self {
        Self::UnsupportedAlgorithm(message.into())
    }

    /// Creates an `InvalidKeyMaterial` error.
    #[must_use]
    pub fn invalid_key_material(message: impl Into<String>) -> Self {
        Self::InvalidKeyMaterial(message.into())
    }

    /// Classifies the error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AccountLocked { .. } => ErrorKind::Locked,
            Self::SessionConflict { .. } => ErrorKind::Conflict,
            Self::Fields(fields) => {
                if fields.has_code(ErrorCode::Taken) {
                    ErrorKind::Conflict
                } else if fields.has_code(ErrorCode::NotFound) {
                    ErrorKind::NotFound
                } else {
                    ErrorKind::Invalid
                }
            },
            Self::KeyNotFound { .. } => ErrorKind::NotFound,
            Self::NoSigningKey => ErrorKind::Unavailable,
            Self::TokenExpired => ErrorKind::Expired,
            Self::InvalidTokenFormat(_)
            | Self::TokenNotYetValid
            | Self::InvalidSignature
            | Self::InvalidAudience(_)
            | Self::InvalidIssuer(_)
            | Self::MissingClaim(_)
            | Self::UnsupportedAlgorithm(_) => ErrorKind::Invalid,
            Self::InvalidKeyMaterial(_) | Self::Config(_) => ErrorKind::Internal,
            Self::Storage(err) => match err {
                StorageError::NotFound { .. } => ErrorKind::NotFound,
                StorageError::Uniqueness { .. } => ErrorKind::Conflict,
                StorageError::Decryption { .. } => ErrorKind::Decryption,
                other if other.is_transient() => ErrorKind::Unavailable,
                _ => ErrorKind::Internal,
            },
        }
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::InvalidToken => {
                AuthError::InvalidTokenFormat("Invalid JWT structure".into())
            },
            ErrorKind::InvalidSignature => AuthError::InvalidSignature,
            ErrorKind::ExpiredSignature => AuthError::TokenExpired,
            ErrorKind::ImmatureSignature => AuthError::TokenNotYetValid,
            ErrorKind::InvalidAudience => {
                AuthError::InvalidAudience("Audience validation failed".into())
            },
            ErrorKind::InvalidIssuer => AuthError::InvalidIssuer("Issuer validation failed".into()),
            ErrorKind::InvalidAlgorithm => {
                AuthError::UnsupportedAlgorithm("Algorithm not supported".into())
            },
            ErrorKind::MissingRequiredClaim(claim) => AuthError::MissingClaim(claim.clone()),
            _ => AuthError::InvalidTokenFormat(format!("JWT error: {}", err)),
        }
    }
}

impl From<StorageError> for AuthError {
    fn from(err: StorageError) -> Self {
        AuthError::Storage(err)
    }
}

/// Result type alias for authentication operations.
pub type Result<T> = std::result::Result<T, AuthError>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use keyward_storage::AccountId;
    use rstest::rstest;

    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(AuthError::TokenExpired.to_string(), "Token expired");
        assert_eq!(AuthError::key_not_found("k1").to_string(), "Signing key not found: k1");
        assert_eq!(
            AuthError::session_conflict("google").to_string(),
            "Session conflict for provider google"
        );
        assert_eq!(AuthError::account_locked(AccountId(7)).to_string(), "Account is locked: 7");
    }

    #[test]
    fn test_field_errors_display() {
        let mut fields = FieldErrors::new();
        fields.push("username", ErrorCode::Missing);
        fields.push("password", ErrorCode::Missing);

        assert_eq!(fields.to_string(), "username: MISSING, password: MISSING");
        assert_eq!(
            AuthError::Fields(fields).to_string(),
            "Invalid fields: username: MISSING, password: MISSING"
        );
    }

    #[test]
    fn test_empty_field_errors_is_ok() {
        assert!(FieldErrors::new().into_result().is_ok());

        let mut fields = FieldErrors::new();
        fields.push("username", ErrorCode::Taken);
        assert!(matches!(fields.into_result(), Err(AuthError::Fields(_))));
    }

    #[rstest]
    #[case(AuthError::account_locked(AccountId(1)), ErrorKind::Locked)]
    #[case(AuthError::session_conflict("google"), ErrorKind::Conflict)]
    #[case(AuthError::field("username", ErrorCode::Taken), ErrorKind::Conflict)]
    #[case(AuthError::field("account", ErrorCode::NotFound), ErrorKind::NotFound)]
    #[case(AuthError::field("password", ErrorCode::Missing), ErrorKind::Invalid)]
    #[case(AuthError::key_not_found("k"), ErrorKind::NotFound)]
    #[case(AuthError::NoSigningKey, ErrorKind::Unavailable)]
    #[case(AuthError::TokenExpired, ErrorKind::Expired)]
    #[case(AuthError::InvalidSignature, ErrorKind::Invalid)]
    #[case(StorageError::not_found("k").into(), ErrorKind::NotFound)]
    #[case(StorageError::uniqueness("username").into(), ErrorKind::Conflict)]
    #[case(StorageError::decryption("bad tag").into(), ErrorKind::Decryption)]
    #[case(StorageError::timeout().into(), ErrorKind::Unavailable)]
    #[case(StorageError::connection("refused").into(), ErrorKind::Unavailable)]
    #[case(StorageError::internal("boom").into(), ErrorKind::Internal)]
    fn test_kind(#[case] err: AuthError, #[case] expected: ErrorKind) {
        assert_eq!(err.kind(), expected);
    }

    #[test]
    fn test_error_from_jsonwebtoken() {
        let jwt_err =
            jsonwebtoken::errors::Error::from(jsonwebtoken::errors::ErrorKind::ExpiredSignature);
        let auth_err: AuthError = jwt_err.into();

        assert!(matches!(auth_err, AuthError::TokenExpired));
    }

    #[test]
    fn test_storage_error_preserves_source_chain() {
        use std::error::Error;

        let auth_err: AuthError = StorageError::connection("connection refused").into();

        let source = auth_err.source().expect("source chain must be preserved");
        assert_eq!(source.to_string(), "Connection error: connection refused");
        assert_eq!(auth_err.to_string(), "Storage error: Connection error: connection refused");
    }
}
