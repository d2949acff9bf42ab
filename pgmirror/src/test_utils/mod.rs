//! Utilities for testing replication runs against real Postgres databases.
//!
//! The [`database`] module creates isolated databases with random names which are dropped
//! again once their [`database::PgDatabase`] handle goes out of scope. In-memory doubles for
//! tests that do not need Postgres live in [`crate::memory`].

pub mod database;
