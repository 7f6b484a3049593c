//! Port for the one-way password hashing primitive.
use async_trait::async_trait;

use crate::domain::{HashedCredential, Password};

use super::define_port_error;

define_port_error! {
    /// Errors raised by credential hashers.
    pub enum CredentialHashError {
        /// Hashing failed or the worker running it was lost.
        Hashing { message: String } => "credential hashing failed: {message}",
        /// The stored hash could not be parsed.
        MalformedHash { message: String } => "stored credential hash is malformed: {message}",
    }
}

/// Hash and verify passwords.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CredentialHasher: Send + Sync {
    /// Produce a salted hash of `password`.
    async fn hash(&self, password: &Password) -> Result<HashedCredential, CredentialHashError>;

    /// Check `candidate` against a stored hash.
    async fn verify(
        &self,
        candidate: &str,
        stored: &HashedCredential,
    ) -> Result<bool, CredentialHashError>;
}
