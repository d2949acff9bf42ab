use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};

use crate::error::ErrorKind;
use crate::types::{TableName, TableRow};

#[derive(Debug, Default)]
pub(super) struct Faults {
    pub(super) connect_failures: u32,
    pub(super) connect_error_kind: Option<ErrorKind>,
    pub(super) list_tables: bool,
    pub(super) clear: HashSet<TableName>,
    pub(super) open_stream: HashSet<TableName>,
    pub(super) stream_after: HashMap<TableName, usize>,
    pub(super) rejected_values: HashMap<TableName, HashSet<String>>,
    pub(super) stalls: HashMap<TableName, Arc<Notify>>,
    pub(super) connect_stall: Option<ConnectStall>,
}

/// A connection attempt held back until released by the test.
#[derive(Debug, Clone)]
pub(super) struct ConnectStall {
    pub(super) reached: Arc<Notify>,
    pub(super) release: Arc<Notify>,
}

#[derive(Debug)]
pub(super) struct MemoryTable {
    pub(super) name: TableName,
    /// Empty for tables created without declared columns, which accept rows of any width.
    pub(super) columns: Vec<String>,
    pub(super) rows: Vec<TableRow>,
}

#[derive(Debug, Default)]
pub(super) struct Inner {
    /// Tables in creation order, which is the order they are listed in.
    pub(super) tables: Vec<MemoryTable>,
    pub(super) faults: Faults,
}

impl Inner {
    pub(super) fn table(&self, table: &TableName) -> Option<&MemoryTable> {
        self.tables.iter().find(|memory_table| &memory_table.name == table)
    }

    pub(super) fn table_mut(&mut self, table: &TableName) -> Option<&mut MemoryTable> {
        self.tables
            .iter_mut()
            .find(|memory_table| &memory_table.name == table)
    }
}

/// An in-memory database holding tables of text rows.
///
/// Clones share the same tables, so a test can keep a handle to inspect the database while a
/// run works on it.
#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    pub(super) inner: Arc<Mutex<Inner>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates `table` with `rows`, replacing its rows if it already exists.
    ///
    /// The table declares no columns and accepts rows of any width.
    pub async fn create_table(&self, table: &TableName, rows: Vec<TableRow>) {
        self.create_table_with_columns(table, &[], rows).await;
    }

    /// Creates `table` with the given stored `columns` and `rows`, replacing an existing table.
    ///
    /// Writes to the table must name a subset of `columns`.
    pub async fn create_table_with_columns(
        &self,
        table: &TableName,
        columns: &[&str],
        rows: Vec<TableRow>,
    ) {
        let columns: Vec<String> = columns.iter().map(|column| column.to_string()).collect();

        let mut inner = self.inner.lock().await;
        match inner.table_mut(table) {
            Some(existing) => {
                existing.columns = columns;
                existing.rows = rows;
            }
            None => inner.tables.push(MemoryTable {
                name: table.clone(),
                columns,
                rows,
            }),
        }
    }

    /// Returns a copy of the rows of `table`, or [`None`] if it does not exist.
    pub async fn table_rows(&self, table: &TableName) -> Option<Vec<TableRow>> {
        let inner = self.inner.lock().await;
        inner.table(table).map(|memory_table| memory_table.rows.clone())
    }

    /// Returns the names of all tables in creation order.
    pub async fn table_names(&self) -> Vec<TableName> {
        let inner = self.inner.lock().await;
        inner
            .tables
            .iter()
            .map(|memory_table| memory_table.name.clone())
            .collect()
    }

    /// Makes the next `times` connection attempts fail with `kind`.
    pub async fn fail_connections(&self, times: u32, kind: ErrorKind) {
        let mut inner = self.inner.lock().await;
        inner.faults.connect_failures = times;
        inner.faults.connect_error_kind = Some(kind);
    }

    /// Makes table enumeration fail.
    pub async fn fail_list_tables(&self) {
        self.inner.lock().await.faults.list_tables = true;
    }

    /// Makes clearing `table` fail.
    pub async fn fail_clear(&self, table: &TableName) {
        self.inner.lock().await.faults.clear.insert(table.clone());
    }

    /// Makes opening a row stream over `table` fail.
    pub async fn fail_open_stream(&self, table: &TableName) {
        self.inner
            .lock()
            .await
            .faults
            .open_stream
            .insert(table.clone());
    }

    /// Makes the row stream over `table` fail after yielding `rows` rows.
    pub async fn fail_stream_after(&self, table: &TableName, rows: usize) {
        self.inner
            .lock()
            .await
            .faults
            .stream_after
            .insert(table.clone(), rows);
    }

    /// Rejects writes to `table` of rows containing `value` in any column.
    pub async fn reject_value(&self, table: &TableName, value: &str) {
        self.inner
            .lock()
            .await
            .faults
            .rejected_values
            .entry(table.clone())
            .or_default()
            .insert(value.to_string());
    }

    /// Makes the row stream over `table` stop making progress after its last row.
    ///
    /// The returned [`Notify`] is notified once the stream reached that point.
    pub async fn stall_stream(&self, table: &TableName) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        self.inner
            .lock()
            .await
            .faults
            .stalls
            .insert(table.clone(), notify.clone());

        notify
    }

    /// Holds back the next connection attempt until the second returned [`Notify`] is notified.
    ///
    /// The first returned [`Notify`] is notified once the attempt is held back.
    pub async fn stall_connect(&self) -> (Arc<Notify>, Arc<Notify>) {
        let stall = ConnectStall {
            reached: Arc::new(Notify::new()),
            release: Arc::new(Notify::new()),
        };
        self.inner.lock().await.faults.connect_stall = Some(stall.clone());

        (stall.reached, stall.release)
    }

    /// Takes the injected connection stall, if any.
    pub(super) async fn take_connect_stall(&self) -> Option<ConnectStall> {
        self.inner.lock().await.faults.connect_stall.take()
    }

    /// Consumes one injected connection failure, if any is left.
    pub(super) async fn take_connect_failure(&self) -> Option<ErrorKind> {
        let mut inner = self.inner.lock().await;
        if inner.faults.connect_failures == 0 {
            return None;
        }

        inner.faults.connect_failures -= 1;
        inner.faults.connect_error_kind
    }
}
