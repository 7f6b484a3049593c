//! Internal Diesel row structs for database operations.
//!
//! These types are implementation details of the persistence layer and must
//! never be exposed to the domain. They exist solely to satisfy Diesel's
//! type requirements for queries and mutations.

use chrono::NaiveDate;
use diesel::prelude::*;

use super::schema::{post_events, posts, user_follows, users};

/// Row struct for reading from the users table.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = users)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct UserRow {
    pub id: i64,
    pub username: String,
    pub display_name: String,
    pub email: String,
    pub date_of_birth: NaiveDate,
    pub password_hash: String,
}

/// Insertable struct for creating new user records.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = users)]
pub(crate) struct NewUserRow<'a> {
    pub username: &'a str,
    pub display_name: &'a str,
    pub email: &'a str,
    pub date_of_birth: NaiveDate,
    pub password_hash: &'a str,
}

// ---------------------------------------------------------------------------
// Follow edge models
// ---------------------------------------------------------------------------

/// Row struct for the user_follows table, also returned by raw upserts.
#[derive(Debug, Clone, Copy, Queryable, Selectable, QueryableByName)]
#[diesel(table_name = user_follows)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct FollowEdgeRow {
    pub follower_id: i64,
    pub following_id: i64,
    pub followed_at: i64,
    pub removed: bool,
}

// ---------------------------------------------------------------------------
// Post models
// ---------------------------------------------------------------------------

/// Row struct for reading from the posts table.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = posts)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct PostRow {
    pub id: i64,
    pub author_id: i64,
    pub content: String,
    pub created_at: i64,
}

/// Insertable struct for creating posts.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = posts)]
pub(crate) struct NewPostRow<'a> {
    pub author_id: i64,
    pub content: &'a str,
    pub created_at: i64,
}

// ---------------------------------------------------------------------------
// Post event log models
// ---------------------------------------------------------------------------

/// Event record as read back by consumers.
#[derive(Debug, Clone, Queryable, Selectable, QueryableByName)]
#[diesel(table_name = post_events)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct PostEventRow {
    pub partition_id: i32,
    pub record_offset: i64,
    pub record_key: String,
    pub payload: Vec<u8>,
}

