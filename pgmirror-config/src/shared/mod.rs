mod base;
mod connection;
mod job;
mod replication;
mod retry;
mod schedule;

pub use base::*;
pub use connection::*;
pub use job::*;
pub use replication::*;
pub use retry::*;
pub use schedule::*;
