pub mod concurrency;
pub mod conversions;
pub mod destination;
pub mod error;
mod macros;
#[cfg(any(test, feature = "test-utils"))]
pub mod memory;
pub mod postgres;
pub mod provider;
pub mod replication;
pub mod source;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;
