//! Sign-up and log-in.

use tracing::{debug, info};

use super::SocialGraphService;
use super::mapping::{map_hash_error, map_user_error};
use crate::domain::{Error, LoginCredentials, SignUpRequest, User};

/// Message shared by every failed log-in so callers cannot tell an unknown
/// username from a wrong password.
pub(crate) const INVALID_LOGIN: &str = "invalid login";

impl SocialGraphService {
    /// Create an account.
    ///
    /// Username uniqueness is checked against the store, never the cache. A
    /// concurrent sign-up that wins the race surfaces as the store's unique
    /// violation and maps to the same conflict error.
    pub async fn sign_up(&self, request: SignUpRequest) -> Result<User, Error> {
        let profile = request.profile();
        let existing = self
            .users
            .find_by_username(profile.username.as_ref())
            .await
            .map_err(map_user_error)?;
        if existing.is_some() {
            return Err(Error::conflict(format!(
                "username {} is already taken",
                profile.username
            )));
        }

        let credential = self
            .hasher
            .hash(request.password())
            .await
            .map_err(map_hash_error)?;
        let user = self
            .users
            .create(profile, &credential)
            .await
            .map_err(map_user_error)?;

        self.cache_user(&user).await;
        info!(user_id = %user.id(), "user signed up");
        Ok(user)
    }

    /// Authenticate against the store.
    ///
    /// An unknown username fails with `NotFound` and a wrong password with
    /// `InvalidCredentials`; both carry the same message.
    pub async fn log_in(&self, credentials: &LoginCredentials) -> Result<User, Error> {
        let Some(account) = self
            .users
            .find_by_username(credentials.username())
            .await
            .map_err(map_user_error)?
        else {
            debug!("log-in attempted for unknown username");
            return Err(Error::not_found(INVALID_LOGIN));
        };

        let verified = self
            .hasher
            .verify(credentials.password(), &account.credential)
            .await
            .map_err(map_hash_error)?;
        if !verified {
            debug!(user_id = %account.user.id(), "log-in password mismatch");
            return Err(Error::invalid_credentials(INVALID_LOGIN));
        }
        Ok(account.user)
    }
}
