//! Argon2id implementation of the `CredentialHasher` port.
//!
//! Hashing is CPU-bound, so both operations run on Tokio's blocking pool.
//! Hashes are stored in PHC string format, which carries the algorithm
//! parameters and salt alongside the digest.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{Error as PasswordHashError, SaltString};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use async_trait::async_trait;
use zeroize::Zeroizing;

use crate::domain::ports::{CredentialHashError, CredentialHasher};
use crate::domain::{HashedCredential, Password};

/// Argon2id hasher with the crate's default parameters.
#[derive(Debug, Clone, Copy, Default)]
pub struct Argon2Hasher;

impl Argon2Hasher {
    pub fn new() -> Self {
        Self
    }
}

fn hash_blocking(secret: &str) -> Result<HashedCredential, CredentialHashError> {
    let salt = SaltString::generate(&mut OsRng);
    let encoded = Argon2::default()
        .hash_password(secret.as_bytes(), &salt)
        .map_err(|err| CredentialHashError::hashing(err.to_string()))?
        .to_string();
    Ok(HashedCredential::new(encoded))
}

fn verify_blocking(candidate: &str, stored: &str) -> Result<bool, CredentialHashError> {
    let parsed =
        PasswordHash::new(stored).map_err(|err| CredentialHashError::malformed_hash(err.to_string()))?;
    match Argon2::default().verify_password(candidate.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(PasswordHashError::Password) => Ok(false),
        Err(err) => Err(CredentialHashError::hashing(err.to_string())),
    }
}

#[async_trait]
impl CredentialHasher for Argon2Hasher {
    async fn hash(&self, password: &Password) -> Result<HashedCredential, CredentialHashError> {
        let secret = Zeroizing::new(password.expose().to_owned());
        tokio::task::spawn_blocking(move || hash_blocking(&secret))
            .await
            .map_err(|err| CredentialHashError::hashing(format!("hashing task failed: {err}")))?
    }

    async fn verify(
        &self,
        candidate: &str,
        stored: &HashedCredential,
    ) -> Result<bool, CredentialHashError> {
        let candidate = Zeroizing::new(candidate.to_owned());
        let stored = stored.as_str().to_owned();
        tokio::task::spawn_blocking(move || verify_blocking(&candidate, &stored))
            .await
            .map_err(|err| CredentialHashError::hashing(format!("verification task failed: {err}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[tokio::test]
    async fn hashes_verify_only_the_original_password() {
        let hasher = Argon2Hasher::new();
        let password = Password::new("correct horse battery").expect("valid password");
        let stored = hasher.hash(&password).await.expect("hash");

        assert!(stored.as_str().starts_with("$argon2id$"));
        assert!(hasher
            .verify("correct horse battery", &stored)
            .await
            .expect("verify"));
        assert!(!hasher.verify("wrong horse", &stored).await.expect("verify"));
    }

    #[rstest]
    #[tokio::test]
    async fn salts_differ_between_hashes() {
        let hasher = Argon2Hasher::new();
        let password = Password::new("correct horse battery").expect("valid password");
        let first = hasher.hash(&password).await.expect("hash");
        let second = hasher.hash(&password).await.expect("hash");
        assert_ne!(first.as_str(), second.as_str());
    }

    #[rstest]
    #[tokio::test]
    async fn malformed_hashes_are_reported() {
        let error = Argon2Hasher::new()
            .verify("anything", &HashedCredential::new("not-a-phc-string"))
            .await
            .expect_err("malformed");
        assert!(matches!(error, CredentialHashError::MalformedHash { .. }));
    }
}
