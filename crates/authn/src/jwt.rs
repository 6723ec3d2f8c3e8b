//! Identity tokens.
//!
//! Identity tokens are EdDSA-signed JWTs whose `kid` header names the
//! [`SigningKey`](crate::SigningKey) that produced them. Verification accepts
//! any key the [`RotatingKeyStore`] still retains, so tokens survive a
//! rotation until their key ages out of the set.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//!
//! use keyward_authn::{
//!     RotatingKeyStore, SigningKey,
//!     jwt::{IdentityClaims, issue_identity_token, verify_identity_token},
//! };
//! use keyward_storage::AccountId;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let keys = RotatingKeyStore::new(3);
//! keys.rotate(SigningKey::generate()?);
//!
//! let claims = IdentityClaims::new(
//!     "https://auth.example.com",
//!     AccountId::from(42),
//!     "https://app.example.com",
//!     Duration::from_secs(3600),
//! );
//! let token = issue_identity_token(&claims, &keys)?;
//!
//! let verified = verify_identity_token(&token, &keys, "https://app.example.com")?;
//! assert_eq!(verified.sub, "42");
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::{Algorithm, Header, Validation, decode, decode_header, encode};
use keyward_storage::AccountId;
use serde::{Deserialize, Serialize};

use crate::{
    error::{AuthError, Result},
    key_store::RotatingKeyStore,
    signing_key::JwkSet,
    validation::{validate_algorithm, validate_kid},
};

/// Claims carried by an identity token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityClaims {
    /// Issuer, the base URL of this service.
    pub iss: String,
    /// Subject, the account id as a decimal string.
    pub sub: String,
    /// Audience, the application the token is meant for.
    pub aud: String,
    /// Expiration time (seconds since epoch).
    pub exp: u64,
    /// Issued at (seconds since epoch).
    pub iat: u64,
    /// When the account last authenticated (seconds since epoch).
    pub auth_time: u64,
}

impl IdentityClaims {
    /// Claims for `account_id` issued now, authenticated now, valid for `ttl`.
    #[must_use]
    pub fn new(
        issuer: impl Into<String>,
        account_id: AccountId,
        audience: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        let now = u64::try_from(Utc::now().timestamp()).unwrap_or(0);
        Self {
            iss: issuer.into(),
            sub: account_id.to_string(),
            aud: audience.into(),
            exp: now.saturating_add(ttl.as_secs()),
            iat: now,
            auth_time: now,
        }
    }

    /// Overrides the authentication time, e.g. when refreshing a session.
    #[must_use]
    pub fn with_auth_time(mut self, auth_time: u64) -> Self {
        self.auth_time = auth_time;
        self
    }

    /// Parses `sub` back into an account id.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidTokenFormat`] if `sub` is not an integer.
    pub fn account_id(&self) -> Result<AccountId> {
        self.sub.parse::<i64>().map(AccountId::from).map_err(|_| {
            AuthError::invalid_token_format(format!("sub '{}' is not an account id", self.sub))
        })
    }
}

/// Decode JWT header without verification.
///
/// # Errors
///
/// Returns an error if the JWT header cannot be decoded.
pub fn decode_jwt_header(token: &str) -> Result<Header> {
    decode_header(token)
        .map_err(|e| AuthError::invalid_token_format(format!("Failed to decode JWT header: {}", e)))
}

/// Signs `claims` with the current key.
///
/// # Errors
///
/// Returns [`AuthError::NoSigningKey`] if the store is empty.
#[tracing::instrument(skip(claims, key_store), fields(sub = %claims.sub))]
pub fn issue_identity_token(
    claims: &IdentityClaims,
    key_store: &RotatingKeyStore,
) -> Result<String> {
    let key = key_store.current()?;

    let mut header = Header::new(Algorithm::EdDSA);
    header.kid = Some(key.kid().to_owned());

    Ok(encode(&header, claims, key.encoding_key())?)
}

/// Verifies an identity token against every retained key.
///
/// Checks, in order: header shape, `kid` shape, algorithm allow-list, key
/// lookup, signature, `exp`, and `aud`.
///
/// # Errors
///
/// Returns [`AuthError::KeyNotFound`] when the `kid` is not retained (the key
/// rotated out or never existed), and the matching token error otherwise.
#[tracing::instrument(skip(token, key_store))]
pub fn verify_identity_token(
    token: &str,
    key_store: &RotatingKeyStore,
    audience: &str,
) -> Result<IdentityClaims> {
    let header = decode_jwt_header(token)?;

    let kid = header
        .kid
        .ok_or_else(|| AuthError::invalid_token_format("JWT header missing 'kid' field"))?;
    validate_kid(&kid)?;

    let alg_str = format!("{:?}", header.alg);
    validate_algorithm(&alg_str)?;

    let key = key_store.find(&kid).ok_or_else(|| {
        tracing::debug!(kid = %kid, "identity token signed by unknown key");
        AuthError::key_not_found(&kid)
    })?;

    let mut validation = Validation::new(Algorithm::EdDSA);
    validation.set_audience(&[audience]);
    validation.set_required_spec_claims(&["exp", "aud", "sub", "iss"]);

    let data = decode::<IdentityClaims>(token, key.decoding_key(), &validation)?;
    Ok(data.claims)
}

/// Public keys of every retained signing key, newest first.
#[must_use]
pub fn jwks(key_store: &RotatingKeyStore) -> JwkSet {
    key_store.all().jwks()
}
