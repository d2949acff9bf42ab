use pgmirror_config::shared::{IntoConnectOptions, PgConnectionConfig, TlsConfig};
use tokio::runtime::Handle;
use tokio_postgres::{Client, NoTls, SimpleQueryMessage};
use tracing::info;
use uuid::Uuid;

use crate::types::TableName;

/// The schema name used for organizing test tables.
pub const TEST_DATABASE_SCHEMA: &str = "test";

/// Creates a [`TableName`] in the test schema.
pub fn test_table_name(name: &str) -> TableName {
    TableName {
        schema: TEST_DATABASE_SCHEMA.to_owned(),
        name: name.to_owned(),
    }
}

/// Generates Postgres connection configuration for an isolated test database.
///
/// Each invocation picks a unique database name. Configuration is read from environment
/// variables:
/// - `TESTS_DATABASE_HOST`: Postgres server hostname (required)
/// - `TESTS_DATABASE_PORT`: Postgres server port (required)
/// - `TESTS_DATABASE_USERNAME`: Database user (required)
/// - `TESTS_DATABASE_PASSWORD`: Database password (optional)
pub fn local_pg_connection_config() -> PgConnectionConfig {
    PgConnectionConfig {
        host: std::env::var("TESTS_DATABASE_HOST").expect("TESTS_DATABASE_HOST must be set"),
        port: std::env::var("TESTS_DATABASE_PORT")
            .expect("TESTS_DATABASE_PORT must be set")
            .parse()
            .expect("TESTS_DATABASE_PORT must be a valid port number"),
        name: Uuid::new_v4().to_string(),
        username: std::env::var("TESTS_DATABASE_USERNAME")
            .expect("TESTS_DATABASE_USERNAME must be set"),
        password: std::env::var("TESTS_DATABASE_PASSWORD")
            .ok()
            .map(Into::into),
        tls: TlsConfig {
            trusted_root_certs: String::new(),
            enabled: false,
        },
    }
}

/// Creates a new test database with the test schema.
///
/// # Panics
///
/// Panics if the database or the test schema cannot be created.
pub async fn spawn_database() -> PgDatabase {
    let database = PgDatabase::new(local_pg_connection_config()).await;
    database
        .run_sql(&format!("create schema {TEST_DATABASE_SCHEMA}"))
        .await
        .expect("Failed to create test schema");

    database
}

/// Postgres database created for a single test and dropped when the handle is dropped.
///
/// Dropping blocks on the cleanup, so tests holding a [`PgDatabase`] must run on the
/// multi-threaded runtime.
pub struct PgDatabase {
    pub config: PgConnectionConfig,
    pub client: Client,
}

impl PgDatabase {
    /// Creates a new database named after `config.name` and connects to it.
    pub async fn new(config: PgConnectionConfig) -> Self {
        let client = create_pg_database(&config).await;

        Self { config, client }
    }

    /// Creates a table with the given `(name, type)` columns.
    pub async fn create_table(
        &self,
        table_name: &TableName,
        columns: &[(&str, &str)],
    ) -> Result<(), tokio_postgres::Error> {
        let columns = columns
            .iter()
            .map(|(name, typ)| format!("{name} {typ}"))
            .collect::<Vec<_>>()
            .join(", ");

        let query = format!(
            "create table {} ({columns})",
            table_name.as_quoted_identifier()
        );
        self.client.execute(&query, &[]).await?;

        Ok(())
    }

    /// Inserts one row of parameters into the given columns of a table.
    pub async fn insert_values(
        &self,
        table_name: &TableName,
        columns: &[&str],
        values: &[&(dyn tokio_postgres::types::ToSql + Sync)],
    ) -> Result<u64, tokio_postgres::Error> {
        let placeholders = (1..=values.len())
            .map(|i| format!("${i}"))
            .collect::<Vec<_>>()
            .join(", ");

        let query = format!(
            "insert into {} ({}) values ({placeholders})",
            table_name.as_quoted_identifier(),
            columns.join(", ")
        );

        self.client.execute(&query, values).await
    }

    /// Inserts `count` rows numbered from 1 into a single integer column.
    pub async fn insert_generate_series(
        &self,
        table_name: &TableName,
        column: &str,
        count: i64,
    ) -> Result<u64, tokio_postgres::Error> {
        let query = format!(
            "insert into {} ({column}) select generate_series(1, {count})",
            table_name.as_quoted_identifier()
        );

        self.client.execute(&query, &[]).await
    }

    /// Returns every row of a table as text, ordered by `order_by`.
    pub async fn query_text_rows(
        &self,
        table_name: &TableName,
        order_by: &str,
    ) -> Result<Vec<Vec<Option<String>>>, tokio_postgres::Error> {
        let query = format!(
            "select * from {} order by {order_by}",
            table_name.as_quoted_identifier()
        );
        let messages = self.client.simple_query(&query).await?;

        Ok(messages
            .iter()
            .filter_map(|message| match message {
                SimpleQueryMessage::Row(row) => Some(
                    (0..row.len())
                        .map(|i| row.get(i).map(str::to_owned))
                        .collect(),
                ),
                _ => None,
            })
            .collect())
    }

    /// Returns the number of rows in a table.
    pub async fn count_rows(&self, table_name: &TableName) -> Result<i64, tokio_postgres::Error> {
        let query = format!(
            "select count(*) from {}",
            table_name.as_quoted_identifier()
        );
        let row = self.client.query_one(&query, &[]).await?;

        Ok(row.get(0))
    }

    /// Executes arbitrary SQL on the database.
    pub async fn run_sql(&self, sql: &str) -> Result<u64, tokio_postgres::Error> {
        self.client.execute(sql, &[]).await
    }
}

impl Drop for PgDatabase {
    fn drop(&mut self) {
        // `block_in_place` needs a multi-threaded runtime to move other tasks off this worker.
        tokio::task::block_in_place(move || {
            Handle::current().block_on(async move { drop_pg_database(&self.config).await });
        });
    }
}

async fn connect(config: tokio_postgres::Config) -> Client {
    let (client, connection) = config
        .connect(NoTls)
        .await
        .expect("Failed to connect to Postgres");

    tokio::spawn(async move {
        if let Err(e) = connection.await {
            info!("connection error: {e}");
        }
    });

    client
}

/// Creates a new Postgres database and returns a client connected to it.
///
/// # Panics
/// Panics if connection or database creation fails.
pub async fn create_pg_database(config: &PgConnectionConfig) -> Client {
    let client = connect(config.without_db()).await;
    client
        .execute(&*format!(r#"create database "{}";"#, config.name), &[])
        .await
        .expect("Failed to create database");

    connect(config.with_db()).await
}

/// Terminates every connection to the database of `config` and drops it.
///
/// # Panics
/// Panics if any database operation fails.
pub async fn drop_pg_database(config: &PgConnectionConfig) {
    let client = connect(config.without_db()).await;

    client
        .execute(
            &format!(
                r#"
                select pg_terminate_backend(pg_stat_activity.pid)
                from pg_stat_activity
                where pg_stat_activity.datname = '{}'
                and pid <> pg_backend_pid();"#,
                config.name
            ),
            &[],
        )
        .await
        .expect("Failed to terminate database connections");

    client
        .execute(&*format!(r#"drop database if exists "{}";"#, config.name), &[])
        .await
        .expect("Failed to destroy database");
}
