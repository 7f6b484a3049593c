//! Diesel table definitions for the PostgreSQL schema.
//!
//! These definitions must match the database migrations exactly. They are used
//! by Diesel for compile-time query validation and type-safe SQL generation.
//!
//! # Maintenance
//!
//! When migrations change the schema, this file should be regenerated or
//! manually updated to reflect those changes. The `diesel print-schema`
//! command can generate these definitions from a live database.

diesel::table! {
    /// Registered accounts. `username` carries a unique constraint.
    users (id) {
        id -> Int8,
        username -> Varchar,
        display_name -> Varchar,
        email -> Varchar,
        date_of_birth -> Date,
        /// PHC-encoded credential hash; never leaves the persistence layer
        /// except inside `UserAccount`.
        password_hash -> Text,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    /// Directed follow edges, soft-deleted through `removed`.
    user_follows (follower_id, following_id) {
        follower_id -> Int8,
        following_id -> Int8,
        /// Epoch seconds of the latest (re)activation.
        followed_at -> Int8,
        removed -> Bool,
    }
}

diesel::table! {
    /// Immutable posts.
    posts (id) {
        id -> Int8,
        author_id -> Int8,
        content -> Text,
        /// Epoch seconds.
        created_at -> Int8,
    }
}

diesel::table! {
    /// Offset allocator, one row per log partition.
    post_event_partitions (partition_id) {
        partition_id -> Int4,
        next_offset -> Int8,
    }
}

diesel::table! {
    /// Append-only event records.
    post_events (partition_id, record_offset) {
        partition_id -> Int4,
        record_offset -> Int8,
        record_key -> Text,
        payload -> Bytea,
        appended_at -> Timestamptz,
    }
}

diesel::table! {
    /// Next undelivered offset per consumer group and partition.
    post_event_offsets (group_name, partition_id) {
        group_name -> Text,
        partition_id -> Int4,
        next_offset -> Int8,
    }
}

diesel::table! {
    /// Live consumer group members, kept alive by heartbeats.
    post_event_members (group_name, member_id) {
        group_name -> Text,
        member_id -> Text,
        heartbeat_at -> Timestamptz,
    }
}

diesel::table! {
    /// Leased partition ownership within a consumer group.
    post_event_claims (group_name, partition_id) {
        group_name -> Text,
        partition_id -> Int4,
        member_id -> Text,
        lease_expires_at -> Timestamptz,
    }
}

diesel::joinable!(posts -> users (author_id));

diesel::allow_tables_to_appear_in_same_query!(posts, user_follows, users);
