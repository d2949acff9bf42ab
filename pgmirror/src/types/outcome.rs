use std::fmt;
use std::time::Duration;

use crate::error::{ErrorKind, MirrorError};
use crate::mirror_error;
use crate::types::TableName;

/// Step of a table copy during which a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyPhase {
    /// Checking that the destination table exists.
    Verify,
    /// Deleting the previous contents of the destination table.
    Clear,
    /// Starting the streaming read of the source table.
    OpenStream,
    /// Reading the next row from the source.
    Stream,
    /// Inserting a row into the destination.
    Write,
}

impl CopyPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            CopyPhase::Verify => "verify",
            CopyPhase::Clear => "clear",
            CopyPhase::OpenStream => "open_stream",
            CopyPhase::Stream => "stream",
            CopyPhase::Write => "write",
        }
    }
}

impl fmt::Display for CopyPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of copying one table.
#[derive(Debug)]
pub enum TableCopyOutcome {
    /// Every source row was read and every row not skipped was written.
    Copied {
        table: TableName,
        rows: u64,
        skipped_rows: u64,
    },
    /// The copy stopped at `phase`; the destination table may be empty or partially filled.
    Failed {
        table: TableName,
        phase: CopyPhase,
        error: MirrorError,
    },
}

impl TableCopyOutcome {
    pub fn table(&self) -> &TableName {
        match self {
            TableCopyOutcome::Copied { table, .. } | TableCopyOutcome::Failed { table, .. } => {
                table
            }
        }
    }

    /// Converts the outcome into a result, wrapping failures in an
    /// [`ErrorKind::TableCopyFailed`] error that names the table and phase.
    pub fn into_result(self) -> Result<TableReport, MirrorError> {
        match self {
            TableCopyOutcome::Copied {
                table,
                rows,
                skipped_rows,
            } => Ok(TableReport {
                table,
                rows,
                skipped_rows,
            }),
            TableCopyOutcome::Failed {
                table,
                phase,
                error,
            } => {
                let detail = format!(
                    "table `{table}` failed during the `{phase}` phase: {}",
                    error.description().unwrap_or("unknown error")
                );

                Err(mirror_error!(
                    ErrorKind::TableCopyFailed,
                    "Table copy failed",
                    detail = detail,
                    source: error
                ))
            }
        }
    }
}

/// Summary of one successfully copied table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableReport {
    pub table: TableName,
    pub rows: u64,
    pub skipped_rows: u64,
}

/// Summary of a successful run.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Copied tables in processing order.
    pub tables: Vec<TableReport>,
    pub duration: Duration,
}

impl RunReport {
    pub fn total_rows(&self) -> u64 {
        self.tables.iter().map(|table| table.rows).sum()
    }

    pub fn total_skipped_rows(&self) -> u64 {
        self.tables.iter().map(|table| table.skipped_rows).sum()
    }
}
