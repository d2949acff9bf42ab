use std::fmt;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio_postgres::{Config as TokioPgConnectOptions, config::SslMode as TokioPgSslMode};

use crate::shared::ValidationError;

/// Static PostgreSQL connection options applied to every connection.
///
/// Both ends of a run use the same settings so that values rendered by the source in text
/// form are parsed identically by the destination.
pub struct DefaultPgConnectionOptions;

impl DefaultPgConnectionOptions {
    /// Returns the options as a space-separated list of `-c key=value` pairs.
    pub fn to_options_string() -> String {
        Self::to_key_value_pairs()
            .iter()
            .map(|(key, value)| format!("-c {key}={value}"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Returns the options as key-value pairs.
    pub fn to_key_value_pairs() -> Vec<(String, String)> {
        vec![
            ("datestyle".to_string(), "ISO".to_string()),
            ("intervalstyle".to_string(), "postgres".to_string()),
            ("extra_float_digits".to_string(), "3".to_string()),
            ("client_encoding".to_string(), "UTF8".to_string()),
            ("bytea_output".to_string(), "hex".to_string()),
        ]
    }
}

/// Role a connection plays during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    /// The database rows are read from.
    Source,
    /// The database rows are written to.
    Destination,
}

impl Profile {
    pub fn as_str(&self) -> &'static str {
        match self {
            Profile::Source => "source",
            Profile::Destination => "destination",
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for connecting to a Postgres database.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PgConnectionConfig {
    /// Hostname or IP address of the Postgres server.
    pub host: String,
    /// Port number on which the Postgres server is listening.
    pub port: u16,
    /// Name of the Postgres database to connect to.
    pub name: String,
    /// Username for authenticating with the Postgres server.
    pub username: String,
    /// Password for the specified user. Redacted in debug output.
    #[serde(default)]
    pub password: Option<SecretString>,
    /// TLS configuration for secure connections.
    #[serde(default)]
    pub tls: TlsConfig,
}

impl PgConnectionConfig {
    /// Validates the connection settings of the given profile.
    pub fn validate(&self, profile: Profile) -> Result<(), ValidationError> {
        if self.host.is_empty() {
            return Err(ValidationError::InvalidFieldValue {
                field: format!("{profile}.host"),
                constraint: "must not be empty".to_string(),
            });
        }

        if self.name.is_empty() {
            return Err(ValidationError::InvalidFieldValue {
                field: format!("{profile}.name"),
                constraint: "must not be empty".to_string(),
            });
        }

        self.tls.validate(profile)
    }
}

/// TLS settings for secure Postgres connections.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TlsConfig {
    /// PEM-encoded trusted root certificates.
    #[serde(default)]
    pub trusted_root_certs: String,
    /// Whether TLS is enabled for the connection.
    #[serde(default)]
    pub enabled: bool,
}

impl TlsConfig {
    /// Returns [`ValidationError::MissingTrustedRootCerts`] if TLS is enabled without certificates.
    pub fn validate(&self, profile: Profile) -> Result<(), ValidationError> {
        if self.enabled && self.trusted_root_certs.trim().is_empty() {
            return Err(ValidationError::MissingTrustedRootCerts(profile.to_string()));
        }

        Ok(())
    }
}

/// A trait which can be used to convert the implementation into connection options.
pub trait IntoConnectOptions<Output> {
    /// Creates connection options for the server without selecting a database.
    ///
    /// Useful for administrative operations such as creating or dropping databases.
    fn without_db(&self) -> Output;

    /// Creates connection options for the configured database.
    fn with_db(&self) -> Output;
}

impl IntoConnectOptions<TokioPgConnectOptions> for PgConnectionConfig {
    fn without_db(&self) -> TokioPgConnectOptions {
        let ssl_mode = if self.tls.enabled {
            TokioPgSslMode::Require
        } else {
            TokioPgSslMode::Prefer
        };
        let mut config = TokioPgConnectOptions::new();
        config
            .host(self.host.clone())
            .port(self.port)
            .user(self.username.clone())
            .options(DefaultPgConnectionOptions::to_options_string())
            // Root certificates are handed to rustls when connecting, tokio-postgres only
            // needs to know whether to negotiate TLS.
            .ssl_mode(ssl_mode);

        if let Some(password) = &self.password {
            config.password(password.expose_secret());
        }

        config
    }

    fn with_db(&self) -> TokioPgConnectOptions {
        let mut options: TokioPgConnectOptions = self.without_db();
        options.dbname(self.name.clone());
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection_config() -> PgConnectionConfig {
        PgConnectionConfig {
            host: "localhost".to_string(),
            port: 5432,
            name: "app".to_string(),
            username: "postgres".to_string(),
            password: Some(SecretString::new("hunter2".to_string())),
            tls: TlsConfig::default(),
        }
    }

    #[test]
    fn test_options_string_format() {
        let options_string = DefaultPgConnectionOptions::to_options_string();

        assert_eq!(
            options_string,
            "-c datestyle=ISO -c intervalstyle=postgres -c extra_float_digits=3 -c client_encoding=UTF8 -c bytea_output=hex"
        );
    }

    #[test]
    fn test_password_is_redacted_in_debug_output() {
        let debug = format!("{:?}", connection_config());

        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_with_db_sets_database_name() {
        let options: TokioPgConnectOptions = connection_config().with_db();

        assert_eq!(options.get_dbname(), Some("app"));
        assert_eq!(options.get_user(), Some("postgres"));
        assert_eq!(options.get_ports(), &[5432]);
    }

    #[test]
    fn test_tls_without_certificates_is_invalid() {
        let mut config = connection_config();
        config.tls.enabled = true;

        let err = config.validate(Profile::Destination).unwrap_err();

        assert!(matches!(err, ValidationError::MissingTrustedRootCerts(profile) if profile == "destination"));
    }
}
