mod base;
mod postgres;

pub use base::ConnectionProvider;
pub use postgres::PgConnectionProvider;
