use futures::StreamExt;
use pgmirror_config::shared::{ReplicationConfig, RowErrorPolicy};
use tracing::{debug, error, info, warn};

use crate::concurrency::cancel::RunCancellation;
use crate::destination::Destination;
use crate::error::{ErrorKind, MirrorError, MirrorResult};
use crate::mirror_error;
use crate::source::Source;
use crate::types::{CopyPhase, TableCopyOutcome, TableName};

/// Per-table behavior of a copy.
#[derive(Debug, Clone, Copy)]
pub struct TableCopySettings {
    /// Fails the table in the `verify` phase when it is missing from the destination.
    pub verify_destination_table: bool,
    pub row_error_policy: RowErrorPolicy,
}

impl From<&ReplicationConfig> for TableCopySettings {
    fn from(config: &ReplicationConfig) -> Self {
        Self {
            verify_destination_table: config.verify_destination_tables,
            row_error_policy: config.row_error_policy,
        }
    }
}

impl Default for TableCopySettings {
    fn default() -> Self {
        Self::from(&ReplicationConfig::default())
    }
}

/// Replaces the contents of `table` in the destination with its contents in the source.
///
/// The destination table is cleared, then source rows are streamed and inserted one at a time
/// in the order the source returns them. Table failures are reported as
/// [`TableCopyOutcome::Failed`]; the returned error is reserved for cancellation of the run,
/// which must stop the run regardless of the table error policy.
pub async fn copy_table<S, D>(
    source: &S,
    destination: &D,
    table: &TableName,
    settings: TableCopySettings,
    cancel: &RunCancellation,
) -> MirrorResult<TableCopyOutcome>
where
    S: Source,
    D: Destination,
{
    info!(table = %table, "starting table copy");

    match copy_rows(source, destination, table, settings, cancel).await {
        Ok((rows, skipped_rows)) => {
            info!(table = %table, rows, skipped_rows, "data migration completed for table");

            Ok(TableCopyOutcome::Copied {
                table: table.clone(),
                rows,
                skipped_rows,
            })
        }
        Err((phase, error)) if is_run_interruption(&error) => {
            info!(table = %table, %phase, "table copy interrupted");

            Err(error)
        }
        Err((phase, error)) => {
            error!(table = %table, %phase, error = %error, "table copy failed");

            Ok(TableCopyOutcome::Failed {
                table: table.clone(),
                phase,
                error,
            })
        }
    }
}

/// Returns `true` for errors which end the whole run instead of a single table.
fn is_run_interruption(error: &MirrorError) -> bool {
    matches!(
        error.kind(),
        ErrorKind::RunCanceled | ErrorKind::RunDeadlineExceeded
    )
}

/// Runs the phases of a table copy, returning the copied and skipped row counts.
async fn copy_rows<S, D>(
    source: &S,
    destination: &D,
    table: &TableName,
    settings: TableCopySettings,
    cancel: &RunCancellation,
) -> Result<(u64, u64), (CopyPhase, MirrorError)>
where
    S: Source,
    D: Destination,
{
    let at = |phase: CopyPhase| move |error: MirrorError| (phase, error);

    if settings.verify_destination_table {
        let exists = cancel
            .guard(destination.table_exists(table))
            .await
            .map_err(at(CopyPhase::Verify))?;

        if !exists {
            return Err((
                CopyPhase::Verify,
                mirror_error!(
                    ErrorKind::DestinationTableMissing,
                    "Destination table does not exist",
                    format!("table `{table}` was found in the source but not in the destination")
                ),
            ));
        }
    }

    let deleted_rows = cancel
        .guard(destination.clear_table(table))
        .await
        .map_err(at(CopyPhase::Clear))?;
    debug!(table = %table, deleted_rows, "cleared destination table");

    let columns = cancel
        .guard(source.table_columns(table))
        .await
        .map_err(at(CopyPhase::OpenStream))?;
    let rows = cancel
        .guard(source.table_rows(table, &columns))
        .await
        .map_err(at(CopyPhase::OpenStream))?;
    tokio::pin!(rows);

    let mut copied_rows: u64 = 0;
    let mut skipped_rows: u64 = 0;

    loop {
        let next = cancel
            .guard(async { rows.next().await.transpose() })
            .await
            .map_err(at(CopyPhase::Stream))?;
        let Some(row) = next else {
            break;
        };

        match cancel.guard(destination.write_row(table, &columns, row)).await {
            Ok(()) => copied_rows += 1,
            Err(error) if is_run_interruption(&error) => return Err((CopyPhase::Write, error)),
            Err(error) => match settings.row_error_policy {
                RowErrorPolicy::AbortTable => return Err((CopyPhase::Write, error)),
                RowErrorPolicy::SkipRow => {
                    skipped_rows += 1;
                    warn!(
                        table = %table,
                        error = %error,
                        skipped_rows,
                        "destination rejected row, skipping it"
                    );
                }
            },
        }
    }

    Ok((copied_rows, skipped_rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concurrency::shutdown::create_shutdown_channel;
    use crate::memory::{MemoryConnectionProvider, MemoryDatabase, Operation};
    use crate::provider::ConnectionProvider;
    use crate::types::TableRow;

    fn users() -> TableName {
        TableName::new("public", "users").unwrap()
    }

    fn row(id: u32, name: &str) -> TableRow {
        TableRow::new(vec![Some(id.to_string()), Some(name.to_string())])
    }

    fn rows(count: u32, prefix: &str) -> Vec<TableRow> {
        (1..=count).map(|i| row(i, &format!("{prefix}{i}"))).collect()
    }

    async fn databases(
        source_rows: Vec<TableRow>,
        destination_rows: Vec<TableRow>,
    ) -> (MemoryDatabase, MemoryDatabase) {
        let source = MemoryDatabase::new();
        source.create_table(&users(), source_rows).await;
        let destination = MemoryDatabase::new();
        destination.create_table(&users(), destination_rows).await;

        (source, destination)
    }

    async fn copy_users(
        provider: &MemoryConnectionProvider,
        settings: TableCopySettings,
    ) -> MirrorResult<TableCopyOutcome> {
        let (_tx, rx) = create_shutdown_channel();
        let cancel = RunCancellation::new(rx, None);
        let source = provider.connect_source().await.unwrap();
        let destination = provider.connect_destination().await.unwrap();

        copy_table(&source, &destination, &users(), settings, &cancel).await
    }

    fn expect_failed(outcome: TableCopyOutcome) -> (CopyPhase, MirrorError) {
        match outcome {
            TableCopyOutcome::Failed { phase, error, .. } => (phase, error),
            TableCopyOutcome::Copied { .. } => panic!("expected the table copy to fail"),
        }
    }

    #[tokio::test]
    async fn copy_replaces_destination_contents() {
        let (source, destination) = databases(rows(3, "user"), rows(100, "stale")).await;
        let provider = MemoryConnectionProvider::new(source, destination.clone());

        let outcome = copy_users(&provider, TableCopySettings::default())
            .await
            .unwrap();

        match outcome {
            TableCopyOutcome::Copied {
                table,
                rows: copied,
                skipped_rows,
            } => {
                assert_eq!(table, users());
                assert_eq!(copied, 3);
                assert_eq!(skipped_rows, 0);
            }
            TableCopyOutcome::Failed { error, .. } => panic!("table copy failed: {error}"),
        }
        assert_eq!(destination.table_rows(&users()).await.unwrap(), rows(3, "user"));
    }

    #[tokio::test]
    async fn copy_of_empty_source_table_empties_destination() {
        let (source, destination) = databases(vec![], rows(10, "stale")).await;
        let provider = MemoryConnectionProvider::new(source, destination.clone());

        let outcome = copy_users(&provider, TableCopySettings::default())
            .await
            .unwrap();

        assert!(matches!(outcome, TableCopyOutcome::Copied { rows: 0, .. }));
        assert!(destination.table_rows(&users()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn copy_preserves_nulls_and_values_exactly() {
        let source_rows = vec![
            TableRow::new(vec![Some("1".to_string()), None]),
            TableRow::new(vec![Some("2".to_string()), Some(" tab\there ".to_string())]),
        ];
        let (source, destination) = databases(source_rows.clone(), vec![]).await;
        let provider = MemoryConnectionProvider::new(source, destination.clone());

        copy_users(&provider, TableCopySettings::default())
            .await
            .unwrap();

        assert_eq!(destination.table_rows(&users()).await.unwrap(), source_rows);
    }

    #[tokio::test]
    async fn copy_issues_phases_in_order() {
        let (source, destination) = databases(rows(2, "user"), vec![]).await;
        let provider = MemoryConnectionProvider::new(source, destination);

        copy_users(&provider, TableCopySettings::default())
            .await
            .unwrap();

        let operations = provider.operations().await;
        let table_operations: Vec<_> = operations
            .into_iter()
            .filter(|operation| !matches!(operation, Operation::Connect(_)))
            .collect();
        assert_eq!(
            table_operations,
            vec![
                Operation::TableExists(users()),
                Operation::Clear(users()),
                Operation::ListColumns(users()),
                Operation::OpenStream(users()),
                Operation::Write(users()),
                Operation::Write(users()),
            ]
        );
    }

    #[tokio::test]
    async fn copy_writes_stored_source_columns_only() {
        let source = MemoryDatabase::new();
        source
            .create_table_with_columns(&users(), &["id", "name"], rows(2, "user"))
            .await;
        let destination = MemoryDatabase::new();
        destination
            .create_table_with_columns(
                &users(),
                &["id", "name", "name_length"],
                rows(4, "stale"),
            )
            .await;
        let provider = MemoryConnectionProvider::new(source, destination.clone());

        let outcome = copy_users(&provider, TableCopySettings::default())
            .await
            .unwrap();

        assert!(matches!(outcome, TableCopyOutcome::Copied { rows: 2, .. }));
        assert_eq!(destination.table_rows(&users()).await.unwrap(), rows(2, "user"));
    }

    #[tokio::test]
    async fn source_column_missing_in_destination_fails_write() {
        let source = MemoryDatabase::new();
        source
            .create_table_with_columns(&users(), &["id", "name", "nickname"], rows(2, "user"))
            .await;
        let destination = MemoryDatabase::new();
        destination
            .create_table_with_columns(&users(), &["id", "name"], vec![])
            .await;
        let provider = MemoryConnectionProvider::new(source, destination.clone());

        let outcome = copy_users(&provider, TableCopySettings::default())
            .await
            .unwrap();

        let (phase, error) = expect_failed(outcome);
        assert_eq!(phase, CopyPhase::Write);
        assert_eq!(error.kind(), ErrorKind::DestinationQueryFailed);
        assert!(destination.table_rows(&users()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_destination_table_fails_verification_without_clearing() {
        let source = MemoryDatabase::new();
        source.create_table(&users(), rows(3, "user")).await;
        let provider = MemoryConnectionProvider::new(source, MemoryDatabase::new());

        let outcome = copy_users(&provider, TableCopySettings::default())
            .await
            .unwrap();

        let (phase, error) = expect_failed(outcome);
        assert_eq!(phase, CopyPhase::Verify);
        assert_eq!(error.kind(), ErrorKind::DestinationTableMissing);
        assert!(
            !provider
                .operations()
                .await
                .contains(&Operation::Clear(users()))
        );
    }

    #[tokio::test]
    async fn missing_destination_table_fails_clear_when_verification_is_disabled() {
        let source = MemoryDatabase::new();
        source.create_table(&users(), rows(3, "user")).await;
        let provider = MemoryConnectionProvider::new(source, MemoryDatabase::new());
        let settings = TableCopySettings {
            verify_destination_table: false,
            ..TableCopySettings::default()
        };

        let outcome = copy_users(&provider, settings).await.unwrap();

        let (phase, error) = expect_failed(outcome);
        assert_eq!(phase, CopyPhase::Clear);
        assert_eq!(error.kind(), ErrorKind::DestinationTableMissing);
        assert!(
            !provider
                .operations()
                .await
                .contains(&Operation::TableExists(users()))
        );
    }

    #[tokio::test]
    async fn clear_failure_leaves_destination_untouched() {
        let (source, destination) = databases(rows(3, "user"), rows(5, "stale")).await;
        destination.fail_clear(&users()).await;
        let provider = MemoryConnectionProvider::new(source, destination.clone());

        let outcome = copy_users(&provider, TableCopySettings::default())
            .await
            .unwrap();

        let (phase, error) = expect_failed(outcome);
        assert_eq!(phase, CopyPhase::Clear);
        assert_eq!(error.kind(), ErrorKind::DestinationQueryFailed);
        assert_eq!(destination.table_rows(&users()).await.unwrap(), rows(5, "stale"));
    }

    #[tokio::test]
    async fn open_stream_failure_leaves_destination_cleared() {
        let (source, destination) = databases(rows(3, "user"), rows(5, "stale")).await;
        source.fail_open_stream(&users()).await;
        let provider = MemoryConnectionProvider::new(source, destination.clone());

        let outcome = copy_users(&provider, TableCopySettings::default())
            .await
            .unwrap();

        let (phase, error) = expect_failed(outcome);
        assert_eq!(phase, CopyPhase::OpenStream);
        assert_eq!(error.kind(), ErrorKind::SourceQueryFailed);
        assert!(destination.table_rows(&users()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn stream_failure_keeps_rows_written_before_it() {
        let (source, destination) = databases(rows(5, "user"), vec![]).await;
        source.fail_stream_after(&users(), 2).await;
        let provider = MemoryConnectionProvider::new(source, destination.clone());

        let outcome = copy_users(&provider, TableCopySettings::default())
            .await
            .unwrap();

        let (phase, error) = expect_failed(outcome);
        assert_eq!(phase, CopyPhase::Stream);
        assert_eq!(error.kind(), ErrorKind::SourceQueryFailed);
        assert_eq!(destination.table_rows(&users()).await.unwrap(), rows(2, "user"));
    }

    #[tokio::test]
    async fn rejected_row_aborts_table_by_default() {
        let (source, destination) = databases(rows(4, "user"), vec![]).await;
        destination.reject_value(&users(), "user3").await;
        let provider = MemoryConnectionProvider::new(source, destination.clone());

        let outcome = copy_users(&provider, TableCopySettings::default())
            .await
            .unwrap();

        let (phase, error) = expect_failed(outcome);
        assert_eq!(phase, CopyPhase::Write);
        assert_eq!(error.kind(), ErrorKind::ConstraintViolation);
        assert_eq!(destination.table_rows(&users()).await.unwrap(), rows(2, "user"));
    }

    #[tokio::test]
    async fn rejected_rows_are_counted_with_skip_row_policy() {
        let (source, destination) = databases(rows(4, "user"), vec![]).await;
        destination.reject_value(&users(), "user2").await;
        destination.reject_value(&users(), "user4").await;
        let provider = MemoryConnectionProvider::new(source, destination.clone());
        let settings = TableCopySettings {
            row_error_policy: RowErrorPolicy::SkipRow,
            ..TableCopySettings::default()
        };

        let outcome = copy_users(&provider, settings).await.unwrap();

        assert!(matches!(
            outcome,
            TableCopyOutcome::Copied {
                rows: 2,
                skipped_rows: 2,
                ..
            }
        ));
        assert_eq!(
            destination.table_rows(&users()).await.unwrap(),
            vec![row(1, "user1"), row(3, "user3")]
        );
    }

    #[tokio::test]
    async fn canceled_copy_returns_run_error() {
        let (source, destination) = databases(rows(3, "user"), rows(5, "stale")).await;
        let provider = MemoryConnectionProvider::new(source, destination.clone());
        let (tx, rx) = create_shutdown_channel();
        let cancel = RunCancellation::new(rx, None);
        let source = provider.connect_source().await.unwrap();
        let destination_conn = provider.connect_destination().await.unwrap();
        tx.shutdown().unwrap();

        let err = copy_table(
            &source,
            &destination_conn,
            &users(),
            TableCopySettings::default(),
            &cancel,
        )
        .await
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::RunCanceled);
        assert_eq!(destination.table_rows(&users()).await.unwrap(), rows(5, "stale"));
    }
}
