//! PostgreSQL persistence adapters using Diesel ORM.
//!
//! Concrete implementations of the user, follow, and post repository ports,
//! backed by PostgreSQL via `diesel-async` and `bb8` connection pooling.
//! The PostgreSQL post event log in [`crate::outbound::queue`] shares the
//! same pool and schema module.
//!
//! # Architecture
//!
//! - **Thin adapters**: repositories only translate between Diesel rows and
//!   domain types. Cache-aside and fan-out logic live in the domain.
//! - **Internal models**: row structs (`models.rs`) and table definitions
//!   (`schema.rs`) never leave the crate.
//! - **Strongly typed errors**: Diesel failures map onto each port's error
//!   enum; unique-username violations are recognised by constraint name.
//!
//! # Example
//!
//! ```ignore
//! use newsfeed::outbound::persistence::{DbPool, DieselUserRepository, PoolConfig};
//!
//! let pool = DbPool::new(PoolConfig::new("postgres://localhost/newsfeed")).await?;
//! let users = DieselUserRepository::new(pool.clone());
//! ```

mod diesel_basic_error_mapping;
mod diesel_follow_repository;
mod diesel_post_repository;
mod diesel_user_repository;
mod migrations;
pub(crate) mod models;
mod pool;
pub(crate) mod schema;

pub use diesel_follow_repository::DieselFollowRepository;
pub use diesel_post_repository::DieselPostRepository;
pub use diesel_user_repository::DieselUserRepository;
pub use migrations::{MigrationError, run_pending_migrations};
pub use pool::{DbPool, PoolConfig, PoolError};
