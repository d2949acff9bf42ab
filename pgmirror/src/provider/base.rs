use std::future::Future;

use crate::destination::Destination;
use crate::error::MirrorResult;
use crate::source::Source;

/// Opens the connections a run works with.
///
/// Every call opens a new connection which is owned by the caller and closed by it.
pub trait ConnectionProvider {
    type Source: Source + Send + Sync;
    type Destination: Destination + Send + Sync;

    /// Connects to the database configured under the `source` profile.
    fn connect_source(&self) -> impl Future<Output = MirrorResult<Self::Source>> + Send;

    /// Connects to the database configured under the `destination` profile.
    fn connect_destination(&self) -> impl Future<Output = MirrorResult<Self::Destination>> + Send;
}
