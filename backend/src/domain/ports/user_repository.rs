//! Port abstraction for user persistence adapters and their errors.
use async_trait::async_trait;

use crate::domain::{HashedCredential, User, UserAccount, UserId, UserProfile};

use super::define_port_error;

define_port_error! {
    /// Persistence errors raised by user repository adapters.
    pub enum UserPersistenceError {
        /// Repository connection could not be established.
        Connection { message: String } => "user repository connection failed: {message}",
        /// Query or mutation failed during execution.
        Query { message: String } => "user repository query failed: {message}",
        /// The unique username constraint rejected an insert.
        DuplicateUsername { username: String } =>
            "username {username} is already registered",
    }
}

/// Durable store of user accounts.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Insert a new account and return the stored user with its assigned id.
    async fn create(
        &self,
        profile: &UserProfile,
        credential: &HashedCredential,
    ) -> Result<User, UserPersistenceError>;

    /// Fetch an account, including its credential hash, by username.
    async fn find_by_username(
        &self,
        username: &str,
    ) -> Result<Option<UserAccount>, UserPersistenceError>;

    /// Fetch a user by identifier.
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, UserPersistenceError>;

    /// Fetch every user in `ids` that exists, in no particular order.
    async fn find_by_ids(&self, ids: &[UserId]) -> Result<Vec<User>, UserPersistenceError>;
}
