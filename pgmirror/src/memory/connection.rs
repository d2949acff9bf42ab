use std::future::pending;
use std::sync::Arc;

use futures::StreamExt;
use futures::stream::{self, BoxStream};
use pgmirror_config::shared::Profile;
use tokio::sync::Mutex;

use crate::bail;
use crate::destination::Destination;
use crate::error::{ErrorKind, MirrorResult};
use crate::memory::database::MemoryDatabase;
use crate::mirror_error;
use crate::source::Source;
use crate::types::{TableName, TableRow};

/// An operation performed against a memory database, in the order it was issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Connect(Profile),
    ListTables(String),
    TableExists(TableName),
    Clear(TableName),
    ListColumns(TableName),
    OpenStream(TableName),
    Write(TableName),
    Close(Profile),
}

pub(super) type OperationLog = Arc<Mutex<Vec<Operation>>>;

/// A connection to a [`MemoryDatabase`] used as the source of a run.
#[derive(Debug)]
pub struct MemorySource {
    database: MemoryDatabase,
    log: OperationLog,
}

impl MemorySource {
    pub(super) fn new(database: MemoryDatabase, log: OperationLog) -> Self {
        Self { database, log }
    }
}

impl Source for MemorySource {
    type RowStream = BoxStream<'static, MirrorResult<TableRow>>;

    async fn list_tables(&self, schema: &str) -> MirrorResult<Vec<TableName>> {
        self.log
            .lock()
            .await
            .push(Operation::ListTables(schema.to_string()));

        let inner = self.database.inner.lock().await;
        if inner.faults.list_tables {
            bail!(
                ErrorKind::SourceQueryFailed,
                "Failed to list source tables",
                "injected catalog query failure"
            );
        }

        Ok(inner
            .tables
            .iter()
            .filter(|memory_table| memory_table.name.schema == schema)
            .map(|memory_table| memory_table.name.clone())
            .collect())
    }

    async fn table_columns(&self, table: &TableName) -> MirrorResult<Vec<String>> {
        self.log
            .lock()
            .await
            .push(Operation::ListColumns(table.clone()));

        let inner = self.database.inner.lock().await;
        let Some(memory_table) = inner.table(table) else {
            bail!(
                ErrorKind::SourceQueryFailed,
                "PostgreSQL table not found",
                format!("table `{table}` does not exist in the source")
            );
        };

        Ok(memory_table.columns.clone())
    }

    async fn table_rows(
        &self,
        table: &TableName,
        _columns: &[String],
    ) -> MirrorResult<Self::RowStream> {
        self.log
            .lock()
            .await
            .push(Operation::OpenStream(table.clone()));

        let inner = self.database.inner.lock().await;
        if inner.faults.open_stream.contains(table) {
            bail!(
                ErrorKind::SourceQueryFailed,
                "Failed to open table stream",
                format!("injected stream failure for table `{table}`")
            );
        }

        let Some(memory_table) = inner.table(table) else {
            bail!(
                ErrorKind::SourceQueryFailed,
                "PostgreSQL table not found",
                format!("table `{table}` does not exist in the source")
            );
        };

        let mut items: Vec<MirrorResult<TableRow>> =
            memory_table.rows.iter().cloned().map(Ok).collect();
        if let Some(&fail_after) = inner.faults.stream_after.get(table) {
            items.truncate(fail_after);
            items.push(Err(mirror_error!(
                ErrorKind::SourceQueryFailed,
                "Failed to read table rows",
                format!("injected read failure for table `{table}` after {fail_after} rows")
            )));
        }

        let rows = stream::iter(items);
        match inner.faults.stalls.get(table).cloned() {
            Some(notify) => {
                let stall = stream::once(async move {
                    notify.notify_one();
                    pending::<MirrorResult<TableRow>>().await
                });

                Ok(rows.chain(stall).boxed())
            }
            None => Ok(rows.boxed()),
        }
    }

    async fn close(self) -> MirrorResult<()> {
        self.log.lock().await.push(Operation::Close(Profile::Source));

        Ok(())
    }
}

/// A connection to a [`MemoryDatabase`] used as the destination of a run.
#[derive(Debug)]
pub struct MemoryDestination {
    database: MemoryDatabase,
    log: OperationLog,
}

impl MemoryDestination {
    pub(super) fn new(database: MemoryDatabase, log: OperationLog) -> Self {
        Self { database, log }
    }
}

impl Destination for MemoryDestination {
    async fn table_exists(&self, table: &TableName) -> MirrorResult<bool> {
        self.log
            .lock()
            .await
            .push(Operation::TableExists(table.clone()));

        let inner = self.database.inner.lock().await;

        Ok(inner.table(table).is_some())
    }

    async fn clear_table(&self, table: &TableName) -> MirrorResult<u64> {
        self.log.lock().await.push(Operation::Clear(table.clone()));

        let mut inner = self.database.inner.lock().await;
        if inner.faults.clear.contains(table) {
            bail!(
                ErrorKind::DestinationQueryFailed,
                "Failed to clear destination table",
                format!("injected clear failure for table `{table}`")
            );
        }

        let Some(memory_table) = inner.table_mut(table) else {
            bail!(
                ErrorKind::DestinationTableMissing,
                "Destination table does not exist",
                format!("table `{table}` does not exist in the destination")
            );
        };

        let deleted_rows = memory_table.rows.len() as u64;
        memory_table.rows.clear();

        Ok(deleted_rows)
    }

    async fn write_row(
        &self,
        table: &TableName,
        columns: &[String],
        row: TableRow,
    ) -> MirrorResult<()> {
        self.log.lock().await.push(Operation::Write(table.clone()));

        let mut inner = self.database.inner.lock().await;
        if let Some(rejected) = inner.faults.rejected_values.get(table)
            && row
                .values()
                .iter()
                .flatten()
                .any(|value| rejected.contains(value))
        {
            bail!(
                ErrorKind::ConstraintViolation,
                "PostgreSQL constraint violation",
                format!("row rejected by table `{table}`")
            );
        }

        let Some(memory_table) = inner.table_mut(table) else {
            bail!(
                ErrorKind::DestinationTableMissing,
                "Destination table does not exist",
                format!("table `{table}` does not exist in the destination")
            );
        };

        if !memory_table.columns.is_empty()
            && let Some(unknown) = columns
                .iter()
                .find(|column| !memory_table.columns.contains(column))
        {
            bail!(
                ErrorKind::DestinationQueryFailed,
                "PostgreSQL query failed",
                format!("column `{unknown}` of table `{table}` does not exist")
            );
        }
        memory_table.rows.push(row);

        Ok(())
    }

    async fn close(self) -> MirrorResult<()> {
        self.log
            .lock()
            .await
            .push(Operation::Close(Profile::Destination));

        Ok(())
    }
}
