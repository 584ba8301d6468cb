//! Identity verification contract.

use std::sync::Arc;

use async_trait::async_trait;

use crate::{error::AuthError, principal::Principal};

/// External collaborator that turns a bearer credential into a
/// [`Principal`].
///
/// Implementations perform all cryptographic checks. The resolver only
/// selects the mode and applies field rules.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Verifies `token`.
    ///
    /// # Errors
    ///
    /// Returns an [`AuthError`] classified as unauthenticated when the token
    /// is rejected or the identity provider cannot be reached.
    async fn verify(&self, token: &str) -> Result<Principal, AuthError>;
}

#[async_trait]
impl<V: IdentityVerifier + ?Sized> IdentityVerifier for Arc<V> {
    async fn verify(&self, token: &str) -> Result<Principal, AuthError> {
        (**self).verify(token).await
    }
}
