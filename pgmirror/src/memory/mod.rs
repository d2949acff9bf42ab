//! In-memory [`crate::source::Source`], [`crate::destination::Destination`] and
//! [`crate::provider::ConnectionProvider`] implementations for tests and development.
//!
//! Every operation performed through them is appended to a shared [`Operation`] log, and
//! failures can be injected per table to exercise the error paths of a run.

mod connection;
mod database;
mod provider;

pub use connection::{MemoryDestination, MemorySource, Operation};
pub use database::MemoryDatabase;
pub use provider::MemoryConnectionProvider;
