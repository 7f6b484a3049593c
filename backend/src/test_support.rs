//! Test utilities for the backend crate.
//!
//! This module provides shared helpers for both unit tests (in `src/`) and
//! integration tests (in `tests/`). It is compiled for unit tests and when
//! the `test-support` feature is enabled.

pub mod clock;
pub mod memory;
pub mod retry;
