use std::future::Future;

use crate::error::MirrorResult;
use crate::types::{TableName, TableRow};

/// A database whose tables are replaced with the contents of the source.
///
/// Tables are expected to exist with a schema matching the source; a [`Destination`] never
/// creates or alters tables.
pub trait Destination {
    /// Returns whether `table` exists.
    fn table_exists(&self, table: &TableName) -> impl Future<Output = MirrorResult<bool>> + Send;

    /// Deletes every row of `table`, returning the number of deleted rows.
    fn clear_table(&self, table: &TableName) -> impl Future<Output = MirrorResult<u64>> + Send;

    /// Inserts a single row into `columns` of `table`.
    ///
    /// Values are passed as the text the source rendered and are parsed by the destination
    /// according to the column types of `table`. Values of identity columns are kept as they
    /// are in the source.
    fn write_row(
        &self,
        table: &TableName,
        columns: &[String],
        row: TableRow,
    ) -> impl Future<Output = MirrorResult<()>> + Send;

    /// Closes the connection to the destination.
    fn close(self) -> impl Future<Output = MirrorResult<()>> + Send;
}
