mod client;
mod stream;

pub use client::PgMirrorClient;
pub use stream::TableRowStream;
