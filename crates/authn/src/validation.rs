//! Credential algorithm validation.
//!
//! Credentials are sealed with a service-held symmetric key, so `HS256` is the
//! only algorithm accepted. Everything else is refused before any key is
//! touched, which closes off algorithm-substitution attacks (RFC 8725 §3.1).

use crate::error::AuthError;

/// Algorithms that are never accepted.
///
/// - `none`: no integrity tag at all
/// - asymmetric algorithms: a verifier holding only a symmetric secret must
///   never be talked into treating that secret as a public key
pub const FORBIDDEN_ALGORITHMS: &[&str] =
    &["none", "RS256", "RS384", "RS512", "PS256", "ES256", "ES384", "EdDSA"];

/// Accepted credential algorithms.
pub const ACCEPTED_ALGORITHMS: &[&str] = &["HS256"];

/// Validates a credential header algorithm.
///
/// # Errors
///
/// Returns [`AuthError::UnsupportedAlgorithm`] if `alg` is forbidden or not in
/// [`ACCEPTED_ALGORITHMS`].
///
/// # Examples
///
/// ```
/// use zerotrust_authn::validation::validate_algorithm;
///
/// assert!(validate_algorithm("HS256").is_ok());
/// assert!(validate_algorithm("none").is_err());
/// assert!(validate_algorithm("HS512").is_err());
/// ```
pub fn validate_algorithm(alg: &str) -> Result<(), AuthError> {
    if FORBIDDEN_ALGORITHMS.iter().any(|forbidden| forbidden.eq_ignore_ascii_case(alg)) {
        return Err(AuthError::UnsupportedAlgorithm(format!(
            "Algorithm '{alg}' is not allowed for security reasons"
        )));
    }

    if !ACCEPTED_ALGORITHMS.contains(&alg) {
        return Err(AuthError::UnsupportedAlgorithm(format!(
            "Algorithm '{alg}' is not in accepted list (only HS256 is supported)"
        )));
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_hs256_accepted() {
        assert!(validate_algorithm("HS256").is_ok());
    }

    #[test]
    fn test_forbidden_algorithms_rejected_with_security_message() {
        for alg in FORBIDDEN_ALGORITHMS {
            let result = validate_algorithm(alg);
            assert!(
                matches!(result, Err(AuthError::UnsupportedAlgorithm(ref msg)) if msg.contains("not allowed for security reasons")),
                "Expected security rejection for forbidden algorithm '{alg}'"
            );
        }
    }

    #[test]
    fn test_none_rejected_in_any_case() {
        assert!(validate_algorithm("NONE").is_err());
        assert!(validate_algorithm("None").is_err());
    }

    #[test]
    fn test_other_hmac_variants_not_in_list() {
        for alg in ["HS384", "HS512", "hs256", ""] {
            let result = validate_algorithm(alg);
            assert!(
                matches!(result, Err(AuthError::UnsupportedAlgorithm(ref msg)) if msg.contains("not in accepted list")),
                "{alg} should be rejected as unlisted"
            );
        }
    }
}
