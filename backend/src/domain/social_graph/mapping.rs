//! Map port failures onto domain errors.

use crate::domain::Error;
use crate::domain::ports::{
    CredentialHashError, FollowPersistenceError, PostPersistenceError, UserPersistenceError,
};

pub(crate) fn map_user_error(error: UserPersistenceError) -> Error {
    match error {
        UserPersistenceError::Connection { message } => {
            Error::storage(format!("user store unavailable: {message}"))
        }
        UserPersistenceError::Query { message } => {
            Error::storage(format!("user store error: {message}"))
        }
        UserPersistenceError::DuplicateUsername { username } => {
            Error::conflict(format!("username {username} is already taken"))
        }
    }
}

pub(crate) fn map_follow_error(error: FollowPersistenceError) -> Error {
    match error {
        FollowPersistenceError::Connection { message } => {
            Error::storage(format!("follow store unavailable: {message}"))
        }
        FollowPersistenceError::Query { message } => {
            Error::storage(format!("follow store error: {message}"))
        }
    }
}

pub(crate) fn map_post_error(error: PostPersistenceError) -> Error {
    match error {
        PostPersistenceError::Connection { message } => {
            Error::storage(format!("post store unavailable: {message}"))
        }
        PostPersistenceError::Query { message } => {
            Error::storage(format!("post store error: {message}"))
        }
    }
}

pub(crate) fn map_hash_error(error: CredentialHashError) -> Error {
    Error::internal(error.to_string())
}
