use std::future::Future;

use futures::Stream;

use crate::error::MirrorResult;
use crate::types::{TableName, TableRow};

/// A database rows are read from.
///
/// A run enumerates the tables of a [`Source`] once and then reads every table through a
/// pull-based row stream, so a table is never held in memory as a whole.
pub trait Source {
    /// Stream of the rows of one table, in the order the source returns them.
    type RowStream: Stream<Item = MirrorResult<TableRow>> + Send;

    /// Lists the base tables of `schema` in catalog order.
    fn list_tables(
        &self,
        schema: &str,
    ) -> impl Future<Output = MirrorResult<Vec<TableName>>> + Send;

    /// Lists the columns of `table` holding stored values, in column order.
    ///
    /// Generated columns are left out, since the destination computes them itself.
    fn table_columns(
        &self,
        table: &TableName,
    ) -> impl Future<Output = MirrorResult<Vec<String>>> + Send;

    /// Opens a streaming read over every row of `table`, yielding the values of `columns` in
    /// the given order.
    ///
    /// Errors raised while opening the stream are reported by the returned future, errors raised
    /// while reading rows by the stream itself.
    fn table_rows(
        &self,
        table: &TableName,
        columns: &[String],
    ) -> impl Future<Output = MirrorResult<Self::RowStream>> + Send;

    /// Closes the connection to the source.
    fn close(self) -> impl Future<Output = MirrorResult<()>> + Send;
}
