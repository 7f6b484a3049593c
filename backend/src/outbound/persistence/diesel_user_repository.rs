//! PostgreSQL-backed `UserRepository` implementation using Diesel ORM.
//!
//! Usernames are unique at the database level. A concurrent sign-up that
//! loses the race surfaces as [`UserPersistenceError::DuplicateUsername`]
//! rather than a generic query failure.

use async_trait::async_trait;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use crate::domain::ports::{UserPersistenceError, UserRepository};
use crate::domain::{
    DateOfBirth, DisplayName, Email, HashedCredential, User, UserAccount, UserId, UserProfile,
    UserValidationError, Username,
};

use super::diesel_basic_error_mapping::{
    map_basic_diesel_error, map_basic_pool_error, unique_violation_constraint,
};
use super::models::{NewUserRow, UserRow};
use super::pool::{DbPool, PoolError};
use super::schema::users;

const USERNAME_CONSTRAINT: &str = "users_username_key";

/// Diesel-backed implementation of the `UserRepository` port.
#[derive(Clone)]
pub struct DieselUserRepository {
    pool: DbPool,
}

impl DieselUserRepository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn map_pool_error(error: PoolError) -> UserPersistenceError {
    map_basic_pool_error(error, UserPersistenceError::connection)
}

fn map_diesel_error(error: diesel::result::Error) -> UserPersistenceError {
    map_basic_diesel_error(
        error,
        UserPersistenceError::query,
        UserPersistenceError::connection,
    )
}

fn map_insert_error(error: diesel::result::Error, username: &str) -> UserPersistenceError {
    match unique_violation_constraint(&error) {
        Some(USERNAME_CONSTRAINT) => UserPersistenceError::duplicate_username(username),
        _ => map_diesel_error(error),
    }
}

fn row_to_user(row: &UserRow) -> Result<User, UserPersistenceError> {
    let build = || -> Result<User, UserValidationError> {
        Ok(User::new(
            UserId::new(row.id)?,
            UserProfile {
                username: Username::new(&row.username)?,
                display_name: DisplayName::new(row.display_name.clone())?,
                email: Email::new(&row.email)?,
                date_of_birth: DateOfBirth::from_date(row.date_of_birth)?,
            },
        ))
    };
    build().map_err(|err| {
        UserPersistenceError::query(format!("stored user {} is invalid: {err}", row.id))
    })
}

fn row_to_account(row: UserRow) -> Result<UserAccount, UserPersistenceError> {
    let user = row_to_user(&row)?;
    Ok(UserAccount {
        user,
        credential: HashedCredential::new(row.password_hash),
    })
}

#[async_trait]
impl UserRepository for DieselUserRepository {
    async fn create(
        &self,
        profile: &UserProfile,
        credential: &HashedCredential,
    ) -> Result<User, UserPersistenceError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;

        let new_row = NewUserRow {
            username: profile.username.as_ref(),
            display_name: profile.display_name.as_ref(),
            email: profile.email.as_ref(),
            date_of_birth: profile.date_of_birth.date(),
            password_hash: credential.as_str(),
        };

        let row: UserRow = diesel::insert_into(users::table)
            .values(&new_row)
            .returning(UserRow::as_returning())
            .get_result(&mut conn)
            .await
            .map_err(|err| map_insert_error(err, profile.username.as_ref()))?;

        row_to_user(&row)
    }

    async fn find_by_username(
        &self,
        username: &str,
    ) -> Result<Option<UserAccount>, UserPersistenceError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;

        let row: Option<UserRow> = users::table
            .filter(users::username.eq(username))
            .select(UserRow::as_select())
            .first(&mut conn)
            .await
            .optional()
            .map_err(map_diesel_error)?;

        row.map(row_to_account).transpose()
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, UserPersistenceError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;

        let row: Option<UserRow> = users::table
            .filter(users::id.eq(id.get()))
            .select(UserRow::as_select())
            .first(&mut conn)
            .await
            .optional()
            .map_err(map_diesel_error)?;

        row.as_ref().map(row_to_user).transpose()
    }

    async fn find_by_ids(&self, ids: &[UserId]) -> Result<Vec<User>, UserPersistenceError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let raw_ids: Vec<i64> = ids.iter().map(|id| id.get()).collect();

        let rows: Vec<UserRow> = users::table
            .filter(users::id.eq_any(&raw_ids))
            .select(UserRow::as_select())
            .load(&mut conn)
            .await
            .map_err(map_diesel_error)?;

        rows.iter().map(row_to_user).collect()
    }
}
