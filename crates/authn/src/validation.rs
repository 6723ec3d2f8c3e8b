//! Token header checks run before any key lookup.
//!
//! Identity tokens are only ever signed with Ed25519, and every `kid` this
//! service mints has a fixed shape. Rejecting anything else up front keeps
//! attacker-chosen strings away from the key store.

use crate::error::AuthError;

/// JWT algorithms that are never accepted.
///
/// `none` carries no signature; the HMAC family would let anyone holding the
/// public key forge tokens if it were ever treated as a shared secret.
pub const FORBIDDEN_ALGORITHMS: &[&str] = &["none", "HS256", "HS384", "HS512"];

/// JWT algorithms accepted for identity tokens.
pub const ACCEPTED_ALGORITHMS: &[&str] = &["EdDSA"];

/// Digits in the millisecond timestamp that prefixes a kid.
pub const KID_TIMESTAMP_DIGITS: usize = 13;

/// Hex characters in the random suffix of a kid.
pub const KID_SUFFIX_LEN: usize = 8;

/// Validates a JWT `alg` header value.
///
/// # Errors
///
/// Returns [`AuthError::UnsupportedAlgorithm`] if the algorithm is forbidden
/// or not in [`ACCEPTED_ALGORITHMS`].
///
/// # Examples
///
/// ```
/// use keyward_authn::validation::validate_algorithm;
///
/// assert!(validate_algorithm("EdDSA").is_ok());
/// assert!(validate_algorithm("HS256").is_err());
/// assert!(validate_algorithm("RS256").is_err());
/// ```
pub fn validate_algorithm(alg: &str) -> Result<(), AuthError> {
    if FORBIDDEN_ALGORITHMS.contains(&alg) {
        return Err(AuthError::unsupported_algorithm(format!(
            "Algorithm '{}' is not allowed for security reasons",
            alg
        )));
    }

    if !ACCEPTED_ALGORITHMS.contains(&alg) {
        return Err(AuthError::unsupported_algorithm(format!(
            "Algorithm '{}' is not in accepted list (only EdDSA is supported)",
            alg
        )));
    }

    Ok(())
}

/// Validates the shape of a signing key id.
///
/// A kid is a zero-padded 13-digit creation time in unix milliseconds, a
/// `-`, and 8 lowercase hex characters.
///
/// # Errors
///
/// Returns [`AuthError::InvalidTokenFormat`] if `kid` has any other shape.
///
/// # Examples
///
/// ```
/// use keyward_authn::validation::validate_kid;
///
/// assert!(validate_kid("1700000000000-0a1b2c3d").is_ok());
/// assert!(validate_kid("../../etc/passwd").is_err());
/// ```
pub fn validate_kid(kid: &str) -> Result<(), AuthError> {
    let invalid =
        || AuthError::invalid_token_format(format!("Malformed kid '{}'", kid.escape_debug()));

    let (timestamp, suffix) = kid.split_once('-').ok_or_else(invalid)?;
    if timestamp.len() != KID_TIMESTAMP_DIGITS || !timestamp.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    if suffix.len() != KID_SUFFIX_LEN
        || !suffix.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    {
        return Err(invalid());
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn test_validate_algorithm_eddsa_accepted() {
        assert!(validate_algorithm("EdDSA").is_ok());
    }

    #[test]
    fn test_forbidden_algorithms_each_rejected_with_security_message() {
        for alg in FORBIDDEN_ALGORITHMS {
            let result = validate_algorithm(alg);
            assert!(
                matches!(result, Err(AuthError::UnsupportedAlgorithm(ref msg)) if msg.contains("not allowed for security reasons")),
                "Expected security rejection for forbidden algorithm '{alg}'"
            );
        }
    }

    #[rstest]
    #[case("RS256")]
    #[case("ES256")]
    #[case("eddsa")]
    #[case("")]
    fn test_unlisted_algorithm_rejected(#[case] alg: &str) {
        let result = validate_algorithm(alg);
        assert!(
            matches!(result, Err(AuthError::UnsupportedAlgorithm(ref msg)) if msg.contains("not in accepted list"))
        );
    }

    #[rstest]
    #[case("0000000000000-00000000")]
    #[case("1700000000000-0a1b2c3d")]
    #[case("9999999999999-ffffffff")]
    fn test_valid_kid(#[case] kid: &str) {
        assert!(validate_kid(kid).is_ok());
    }

    #[rstest]
    #[case("")]
    #[case("-")]
    #[case("1700000000000")]
    #[case("1700000000000-")]
    #[case("170000000000-0a1b2c3d")]
    #[case("17000000000000-0a1b2c3d")]
    #[case("1700000000000-0A1B2C3D")]
    #[case("1700000000000-0a1b2c3")]
    #[case("1700000000000-0a1b2c3d4")]
    #[case("1700000000000-0a1b2c3g")]
    #[case("1700000000000-0a1b-c3d")]
    #[case("+700000000000-0a1b2c3d")]
    #[case("../../../../etc/passwd")]
    fn test_malformed_kid_rejected(#[case] kid: &str) {
        assert!(matches!(validate_kid(kid), Err(AuthError::InvalidTokenFormat(_))));
    }
}
