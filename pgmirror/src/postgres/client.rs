use std::io::BufReader;

use pg_escape::{quote_identifier, quote_literal};
use pgmirror_config::shared::{IntoConnectOptions, PgConnectionConfig, Profile};
use rustls::ClientConfig;
use tokio_postgres::tls::MakeTlsConnect;
use tokio_postgres::{Client, Config, Connection, NoTls, SimpleQueryMessage, Socket};
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{Instrument, debug, error, info};

use crate::destination::Destination;
use crate::error::{ErrorKind, MirrorError, MirrorResult};
use crate::postgres::TableRowStream;
use crate::source::Source;
use crate::types::{TableName, TableRow};
use crate::{bail, mirror_error};

/// Spawns a background task driving a Postgres connection until it terminates.
fn spawn_postgres_connection<T>(connection: Connection<Socket, T::Stream>, profile: Profile)
where
    T: MakeTlsConnect<Socket>,
    T::Stream: Send + 'static,
{
    let span = tracing::Span::current();
    let task = async move {
        match connection.await {
            Err(err) => error!(%profile, "an error occurred during the postgres connection: {}", err),
            Ok(()) => debug!(%profile, "postgres connection terminated successfully"),
        }
    }
    .instrument(span);

    // The task ends on its own once the `Client` is dropped.
    tokio::spawn(task);
}

/// A connection to one of the two databases of a run.
///
/// The same client type serves as [`Source`] and as [`Destination`]; errors are attributed to
/// the profile the client was opened for.
#[derive(Debug)]
pub struct PgMirrorClient {
    client: Client,
    profile: Profile,
}

impl PgMirrorClient {
    /// Establishes a connection to Postgres, using TLS if enabled in `pg_connection_config`.
    pub async fn connect(
        pg_connection_config: &PgConnectionConfig,
        profile: Profile,
    ) -> MirrorResult<Self> {
        let result = match pg_connection_config.tls.enabled {
            true => Self::connect_tls(pg_connection_config, profile).await,
            false => Self::connect_no_tls(pg_connection_config, profile).await,
        };

        result.map_err(|err| {
            // Keep authentication and TLS kinds, everything else is a connection failure of
            // this profile.
            match err.kind() {
                ErrorKind::AuthenticationError
                | ErrorKind::EncryptionError
                | ErrorKind::ConfigError
                | ErrorKind::SourceConnectionFailed
                | ErrorKind::DestinationConnectionFailed => err,
                _ => mirror_error!(
                    ErrorKind::connection_failed(profile),
                    "PostgreSQL connection failed",
                    format!(
                        "could not connect to the {profile} database at {}:{}",
                        pg_connection_config.host, pg_connection_config.port
                    ),
                    source: err
                ),
            }
        })
    }

    async fn connect_no_tls(
        pg_connection_config: &PgConnectionConfig,
        profile: Profile,
    ) -> MirrorResult<Self> {
        let config: Config = pg_connection_config.with_db();

        let (client, connection) = config
            .connect(NoTls)
            .await
            .map_err(|err| MirrorError::postgres(profile, err))?;
        spawn_postgres_connection::<NoTls>(connection, profile);

        info!(%profile, host = %pg_connection_config.host, "connected to postgres without tls");

        Ok(Self { client, profile })
    }

    async fn connect_tls(
        pg_connection_config: &PgConnectionConfig,
        profile: Profile,
    ) -> MirrorResult<Self> {
        let config: Config = pg_connection_config.with_db();

        let mut root_store = rustls::RootCertStore::empty();
        let mut root_certs_reader =
            BufReader::new(pg_connection_config.tls.trusted_root_certs.as_bytes());
        for cert in rustls_pemfile::certs(&mut root_certs_reader) {
            let cert = cert.map_err(|err| {
                mirror_error!(
                    ErrorKind::ConfigError,
                    "Trusted root certificates are not valid PEM",
                    source: err
                )
            })?;
            root_store.add(cert)?;
        }

        if root_store.is_empty() {
            bail!(
                ErrorKind::ConfigError,
                "No trusted root certificate found",
                format!("`{profile}.tls.trusted_root_certs` contains no PEM certificate")
            );
        }

        let tls_config = ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        let (client, connection) = config
            .connect(MakeRustlsConnect::new(tls_config))
            .await
            .map_err(|err| MirrorError::postgres(profile, err))?;
        spawn_postgres_connection::<MakeRustlsConnect>(connection, profile);

        info!(%profile, host = %pg_connection_config.host, "connected to postgres with tls");

        Ok(Self { client, profile })
    }

    /// Runs `query` through the simple query protocol and returns its messages.
    async fn simple_query(&self, query: &str) -> MirrorResult<Vec<SimpleQueryMessage>> {
        self.client
            .simple_query(query)
            .await
            .map_err(|err| MirrorError::postgres(self.profile, err))
    }

    /// Returns the number of rows reported by the command completion of a simple query.
    fn affected_rows(messages: &[SimpleQueryMessage]) -> u64 {
        messages
            .iter()
            .find_map(|message| match message {
                SimpleQueryMessage::CommandComplete(rows) => Some(*rows),
                _ => None,
            })
            .unwrap_or(0)
    }

    /// Builds the `insert` statement writing `row` into `columns` of `table`.
    ///
    /// Literals are untyped, so Postgres parses each of them with the input function of the
    /// target column, the same way it would accept them from `copy ... from`. Identity columns
    /// receive the source values through `overriding system value`.
    fn insert_statement(table: &TableName, columns: &[String], row: &TableRow) -> String {
        if columns.is_empty() {
            return format!("insert into {} default values;", table.as_quoted_identifier());
        }

        let values = row
            .values()
            .iter()
            .map(|value| match value {
                Some(value) => quote_literal(value).to_string(),
                None => "null".to_string(),
            })
            .collect::<Vec<_>>()
            .join(", ");

        format!(
            "insert into {} ({}) overriding system value values ({values});",
            table.as_quoted_identifier(),
            Self::column_list(columns)
        )
    }

    /// Renders `columns` as a comma-separated list of quoted identifiers.
    fn column_list(columns: &[String]) -> String {
        columns
            .iter()
            .map(|column| quote_identifier(column).to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl Source for PgMirrorClient {
    type RowStream = TableRowStream;

    async fn list_tables(&self, schema: &str) -> MirrorResult<Vec<TableName>> {
        let query = format!(
            "select table_name from information_schema.tables where table_schema = {} and table_type = 'BASE TABLE';",
            quote_literal(schema)
        );

        let mut tables = Vec::new();
        for message in self.simple_query(&query).await? {
            if let SimpleQueryMessage::Row(row) = message {
                let name = row
                    .try_get("table_name")
                    .map_err(|err| MirrorError::postgres(self.profile, err))?
                    .ok_or_else(|| {
                        mirror_error!(
                            ErrorKind::SourceQueryFailed,
                            "Catalog returned a table without name",
                            format!("schema `{schema}`")
                        )
                    })?;

                tables.push(TableName::new(schema, name)?);
            }
        }

        Ok(tables)
    }

    async fn table_columns(&self, table: &TableName) -> MirrorResult<Vec<String>> {
        // Generated columns cannot be written and dropped ones still have attributes.
        let query = format!(
            "select a.attname
            from pg_attribute a
            where a.attrelid = {}::regclass
            and a.attnum > 0::int2
            and not a.attisdropped
            and a.attgenerated = ''
            order by a.attnum;",
            quote_literal(&table.as_quoted_identifier())
        );

        let mut columns = Vec::new();
        for message in self.simple_query(&query).await? {
            if let SimpleQueryMessage::Row(row) = message {
                let name = row
                    .try_get("attname")
                    .map_err(|err| MirrorError::postgres(self.profile, err))?
                    .ok_or_else(|| {
                        mirror_error!(
                            ErrorKind::SourceQueryFailed,
                            "Catalog returned a column without name",
                            format!("table `{table}`")
                        )
                    })?;

                columns.push(name.to_string());
            }
        }

        Ok(columns)
    }

    async fn table_rows(
        &self,
        table: &TableName,
        columns: &[String],
    ) -> MirrorResult<TableRowStream> {
        let query = format!(
            "copy (select {} from {}) to stdout with (format text);",
            Self::column_list(columns),
            table.as_quoted_identifier()
        );

        let stream = self
            .client
            .copy_out(query.as_str())
            .await
            .map_err(|err| MirrorError::postgres(self.profile, err))?;

        Ok(TableRowStream::wrap(stream, self.profile))
    }

    async fn close(self) -> MirrorResult<()> {
        // Dropping the client terminates the session and ends the connection task.
        drop(self.client);
        debug!(profile = %self.profile, "closed postgres connection");

        Ok(())
    }
}

impl Destination for PgMirrorClient {
    async fn table_exists(&self, table: &TableName) -> MirrorResult<bool> {
        let query = format!(
            "select 1 from information_schema.tables where table_schema = {} and table_name = {};",
            quote_literal(&table.schema),
            quote_literal(&table.name)
        );

        let messages = self.simple_query(&query).await?;

        Ok(messages
            .iter()
            .any(|message| matches!(message, SimpleQueryMessage::Row(_))))
    }

    async fn clear_table(&self, table: &TableName) -> MirrorResult<u64> {
        let query = format!("delete from {};", table.as_quoted_identifier());
        let messages = self.simple_query(&query).await?;

        Ok(Self::affected_rows(&messages))
    }

    async fn write_row(
        &self,
        table: &TableName,
        columns: &[String],
        row: TableRow,
    ) -> MirrorResult<()> {
        let query = Self::insert_statement(table, columns, &row);
        self.simple_query(&query).await?;

        Ok(())
    }

    async fn close(self) -> MirrorResult<()> {
        drop(self.client);
        debug!(profile = %self.profile, "closed postgres connection");

        Ok(())
    }
}
