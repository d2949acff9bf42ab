use pgmirror::concurrency::shutdown::create_shutdown_channel;
use pgmirror::error::ErrorKind;
use pgmirror::provider::PgConnectionProvider;
use pgmirror::replication::run::ReplicationJob;
use pgmirror::test_utils::database::{
    PgDatabase, TEST_DATABASE_SCHEMA, spawn_database, test_table_name,
};
use pgmirror::types::{TableName, TableReport};
use pgmirror_config::shared::{ReplicationConfig, RetryConfig};
use pgmirror_telemetry::tracing::init_test_tracing;

fn test_replication_config() -> ReplicationConfig {
    ReplicationConfig {
        schema: TEST_DATABASE_SCHEMA.to_string(),
        connect_retry: RetryConfig {
            max_attempts: 1,
            ..RetryConfig::default()
        },
        ..ReplicationConfig::default()
    }
}

fn create_job(
    source: &PgDatabase,
    destination: &PgDatabase,
) -> ReplicationJob<PgConnectionProvider> {
    let provider = PgConnectionProvider::new(source.config.clone(), destination.config.clone());
    let (_tx, rx) = create_shutdown_channel();

    ReplicationJob::new(provider, test_replication_config(), rx)
}

async fn create_users_table(database: &PgDatabase) -> TableName {
    let users = test_table_name("users");
    database
        .create_table(
            &users,
            &[("id", "integer primary key"), ("name", "text"), ("note", "text")],
        )
        .await
        .unwrap();

    users
}

async fn create_orders_table(database: &PgDatabase) -> TableName {
    let orders = test_table_name("orders");
    database
        .create_table(
            &orders,
            &[
                ("id", "bigint primary key"),
                ("amount", "numeric(10, 2)"),
                ("placed_at", "timestamptz"),
                ("tags", "text[]"),
                ("payload", "bytea"),
            ],
        )
        .await
        .unwrap();

    orders
}

#[tokio::test(flavor = "multi_thread")]
async fn run_replaces_destination_tables_with_source_contents() {
    init_test_tracing();

    let source = spawn_database().await;
    let destination = spawn_database().await;

    let users = create_users_table(&source).await;
    create_users_table(&destination).await;
    let orders = create_orders_table(&source).await;
    create_orders_table(&destination).await;

    for (id, name, note) in [
        (1, "alice", Some("first line\nsecond line")),
        (2, "bob", None),
        (3, "čeněk", Some("tab\there and a \\ backslash")),
    ] {
        source
            .insert_values(&users, &["id", "name", "note"], &[&id, &name, &note])
            .await
            .unwrap();
    }
    source
        .run_sql(
            r#"insert into test.orders values
                (1, 10.50, '2024-01-02 03:04:05+00', '{a,"b c"}', '\x00ff'),
                (2, 0, null, '{}', null),
                (3, 99999.99, '2024-12-31 23:59:59+00', null, '\x5c'),
                (4, -1.25, '1999-01-01 00:00:00+00', '{NULL}', ''),
                (5, 7, '2000-02-29 12:00:00+00', '{x}', '\xdeadbeef')"#,
        )
        .await
        .unwrap();

    destination
        .insert_generate_series(&users, "id", 100)
        .await
        .unwrap();
    destination
        .insert_generate_series(&orders, "id", 100)
        .await
        .unwrap();

    let job = create_job(&source, &destination);
    let mut report = job.run().await.unwrap();

    report.tables.sort_by(|a, b| a.table.cmp(&b.table));
    assert_eq!(
        report.tables,
        vec![
            TableReport {
                table: orders.clone(),
                rows: 5,
                skipped_rows: 0,
            },
            TableReport {
                table: users.clone(),
                rows: 3,
                skipped_rows: 0,
            },
        ]
    );

    assert_eq!(
        destination.query_text_rows(&users, "id").await.unwrap(),
        source.query_text_rows(&users, "id").await.unwrap()
    );
    assert_eq!(
        destination.query_text_rows(&orders, "id").await.unwrap(),
        source.query_text_rows(&orders, "id").await.unwrap()
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn run_copies_tables_with_identity_and_generated_columns() {
    init_test_tracing();

    let source = spawn_database().await;
    let destination = spawn_database().await;

    let accounts = test_table_name("accounts");
    let prices = test_table_name("prices");
    for database in [&source, &destination] {
        database
            .create_table(
                &accounts,
                &[
                    ("id", "bigint generated always as identity primary key"),
                    ("name", "text not null"),
                ],
            )
            .await
            .unwrap();
        database
            .create_table(
                &prices,
                &[
                    ("id", "integer primary key"),
                    ("amount", "integer not null"),
                    ("doubled", "integer generated always as (amount * 2) stored"),
                ],
            )
            .await
            .unwrap();
    }

    source
        .run_sql("insert into test.accounts (name) values ('alice'), ('bob'), ('carol')")
        .await
        .unwrap();
    // Leaves a gap in the identity values, which must survive the copy.
    source
        .run_sql("delete from test.accounts where name = 'alice'")
        .await
        .unwrap();
    source
        .run_sql("insert into test.prices (id, amount) values (1, 10), (2, 21)")
        .await
        .unwrap();
    destination
        .run_sql("insert into test.accounts (name) values ('stale')")
        .await
        .unwrap();
    destination
        .run_sql("insert into test.prices (id, amount) values (7, 70)")
        .await
        .unwrap();

    let job = create_job(&source, &destination);
    let report = job.run().await.unwrap();

    assert_eq!(report.total_rows(), 4);
    assert_eq!(
        destination.query_text_rows(&accounts, "id").await.unwrap(),
        vec![
            vec![Some("2".to_string()), Some("bob".to_string())],
            vec![Some("3".to_string()), Some("carol".to_string())],
        ]
    );
    assert_eq!(
        destination.query_text_rows(&prices, "id").await.unwrap(),
        source.query_text_rows(&prices, "id").await.unwrap()
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn repeated_runs_leave_destination_unchanged() {
    init_test_tracing();

    let source = spawn_database().await;
    let destination = spawn_database().await;

    let users = create_users_table(&source).await;
    create_users_table(&destination).await;
    source
        .insert_values(&users, &["id", "name"], &[&1, &"alice"])
        .await
        .unwrap();

    let job = create_job(&source, &destination);
    job.run().await.unwrap();
    let after_first = destination.query_text_rows(&users, "id").await.unwrap();
    job.run().await.unwrap();
    let after_second = destination.query_text_rows(&users, "id").await.unwrap();

    assert_eq!(after_first, after_second);
    assert_eq!(destination.count_rows(&users).await.unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_destination_table_fails_run() {
    init_test_tracing();

    let source = spawn_database().await;
    let destination = spawn_database().await;

    let users = create_users_table(&source).await;
    source
        .insert_values(&users, &["id", "name"], &[&1, &"alice"])
        .await
        .unwrap();

    let job = create_job(&source, &destination);
    let err = job.run().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::TableCopyFailed);
}

#[tokio::test(flavor = "multi_thread")]
async fn constraint_violation_in_destination_fails_table() {
    init_test_tracing();

    let source = spawn_database().await;
    let destination = spawn_database().await;

    let users = create_users_table(&source).await;
    destination
        .create_table(
            &users,
            &[
                ("id", "integer primary key"),
                ("name", "text not null"),
                ("note", "text"),
            ],
        )
        .await
        .unwrap();
    source
        .insert_values(&users, &["id", "name"], &[&1, &"alice"])
        .await
        .unwrap();
    source.run_sql("insert into test.users (id) values (2)").await.unwrap();

    let job = create_job(&source, &destination);
    let err = job.run().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::TableCopyFailed);
    assert_eq!(destination.count_rows(&users).await.unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn unreachable_destination_fails_with_connection_error() {
    init_test_tracing();

    let source = spawn_database().await;
    let mut destination_config = source.config.clone();
    destination_config.port = 1;

    let provider = PgConnectionProvider::new(source.config.clone(), destination_config);
    let (_tx, rx) = create_shutdown_channel();
    let job = ReplicationJob::new(provider, test_replication_config(), rx);

    let err = job.run().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::DestinationConnectionFailed);
}
