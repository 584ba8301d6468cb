//! Credential checks shared by the verifiers.
//!
//! Only asymmetric JWT algorithms are accepted; `none` and the HMAC family
//! are always rejected. API keys are compared without early exit.

use crate::error::AuthError;

/// Algorithms that are never accepted.
pub const FORBIDDEN_ALGORITHMS: &[&str] = &["none", "HS256", "HS384", "HS512"];

/// Algorithms a signing key may be configured with.
pub const ACCEPTED_ALGORITHMS: &[&str] = &["EdDSA", "RS256"];

/// Validates a JWT header algorithm.
///
/// # Errors
///
/// Returns [`AuthError::UnsupportedAlgorithm`] for forbidden or unlisted
/// algorithms.
///
/// # Examples
///
/// ```
/// use pointgate_authn::validation::validate_algorithm;
///
/// assert!(validate_algorithm("EdDSA").is_ok());
/// assert!(validate_algorithm("RS256").is_ok());
/// assert!(validate_algorithm("HS256").is_err());
/// ```
pub fn validate_algorithm(alg: &str) -> Result<(), AuthError> {
    if FORBIDDEN_ALGORITHMS.contains(&alg) {
        return Err(AuthError::UnsupportedAlgorithm(format!(
            "Algorithm '{alg}' is not allowed for security reasons"
        )));
    }
    if !ACCEPTED_ALGORITHMS.contains(&alg) {
        return Err(AuthError::UnsupportedAlgorithm(format!(
            "Algorithm '{alg}' is not in accepted list"
        )));
    }
    Ok(())
}

/// Compares two secrets in time independent of where they first differ.
///
/// Length is not hidden.
#[must_use]
pub fn secrets_match(presented: &[u8], expected: &[u8]) -> bool {
    if presented.len() != expected.len() {
        return false;
    }
    presented.iter().zip(expected).fold(0u8, |acc, (a, b)| acc | (a ^ b)) == 0
}
