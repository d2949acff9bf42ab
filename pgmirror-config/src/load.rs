use std::{
    borrow::Cow,
    fmt, io,
    path::{Path, PathBuf},
};

use config::builder::{ConfigBuilder, DefaultState};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::environment::Environment;
use crate::shared::ValidationError;

/// Directory containing configuration files relative to the working directory.
const CONFIGURATION_DIR: &str = "configuration";

/// Supported extensions for base and environment configuration files.
const CONFIG_FILE_EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

/// Prefix for environment variable configuration overrides.
const ENV_PREFIX: &str = "APP";

/// Separator between environment variable prefix and key segments.
const ENV_PREFIX_SEPARATOR: &str = "_";

/// Separator for nested configuration keys in environment variables.
const ENV_SEPARATOR: &str = "__";

/// Implemented by top level configuration structures that can be loaded by [`load_config`].
pub trait Config {
    /// Checks invariants that deserialization alone cannot express.
    fn validate(&self) -> Result<(), ValidationError>;
}

/// Identifies which configuration file is currently being loaded.
#[derive(Debug, Clone, Copy)]
enum ConfigFileKind {
    Base,
    Environment(Environment),
}

impl ConfigFileKind {
    fn stem(&self) -> Cow<'static, str> {
        match self {
            ConfigFileKind::Base => Cow::Borrowed("base"),
            ConfigFileKind::Environment(env) => Cow::Borrowed(env.as_str()),
        }
    }
}

impl fmt::Display for ConfigFileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigFileKind::Base => f.write_str("base configuration"),
            ConfigFileKind::Environment(env) => write!(f, "{env} environment configuration"),
        }
    }
}

/// Errors that can occur while loading configuration files and overrides.
#[derive(Debug, Error)]
pub enum LoadConfigError {
    /// Failed to determine the current working directory.
    #[error("failed to determine the current directory: {0}")]
    CurrentDir(#[source] io::Error),

    /// The `configuration` directory does not exist.
    #[error("configuration directory `{0}` does not exist")]
    MissingConfigurationDirectory(PathBuf),

    /// Could not locate one of the required configuration files.
    #[error("could not locate {kind_description} in `{directory}`; attempted: {attempted}")]
    ConfigurationFileMissing {
        kind_description: String,
        directory: PathBuf,
        attempted: String,
    },

    /// A configuration file existed but could not be parsed.
    #[error("failed to load {kind_description} from `{path}`: {source}")]
    ConfigurationFileLoad {
        kind_description: String,
        path: PathBuf,
        source: config::ConfigError,
    },

    /// Failed to determine the runtime environment (`APP_ENVIRONMENT`).
    #[error("failed to determine runtime environment: {0}")]
    Environment(#[source] io::Error),

    /// Failed to merge the configuration sources.
    #[error("failed to build configuration: {0}")]
    Builder(#[source] config::ConfigError),

    /// The merged configuration could not be deserialized.
    #[error("failed to deserialize configuration: {0}")]
    Deserialization(#[source] config::ConfigError),

    /// The configuration was loaded but is not valid.
    #[error("invalid configuration: {0}")]
    Validation(#[from] ValidationError),
}

/// Loads and validates configuration from the `configuration` directory of the working directory.
///
/// Files are layered as `configuration/base.(yaml|yml|json)`, then
/// `configuration/{environment}.(yaml|yml|json)` where the environment comes from
/// `APP_ENVIRONMENT`, and finally `APP_`-prefixed environment variables. Nested keys use double
/// underscores, e.g. `APP_SOURCE__PASSWORD`.
pub fn load_config<T>() -> Result<T, LoadConfigError>
where
    T: Config + DeserializeOwned,
{
    let base_path = std::env::current_dir().map_err(LoadConfigError::CurrentDir)?;
    let environment = Environment::load().map_err(LoadConfigError::Environment)?;

    load_config_from(&base_path.join(CONFIGURATION_DIR), environment)
}

/// Loads and validates configuration from an explicit directory and environment.
pub fn load_config_from<T>(
    configuration_directory: &Path,
    environment: Environment,
) -> Result<T, LoadConfigError>
where
    T: Config + DeserializeOwned,
{
    if !configuration_directory.is_dir() {
        return Err(LoadConfigError::MissingConfigurationDirectory(
            configuration_directory.to_path_buf(),
        ));
    }

    let base_file = find_configuration_file(configuration_directory, ConfigFileKind::Base)?;
    let environment_file = find_configuration_file(
        configuration_directory,
        ConfigFileKind::Environment(environment),
    )?;

    let environment_source = config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator(ENV_PREFIX_SEPARATOR)
        .separator(ENV_SEPARATOR)
        .try_parsing(true);

    let builder = config::Config::builder().add_source(config::File::from(base_file.clone()));
    validate_configuration_source(&builder, ConfigFileKind::Base, &base_file)?;

    let builder = builder.add_source(config::File::from(environment_file.clone()));
    validate_configuration_source(
        &builder,
        ConfigFileKind::Environment(environment),
        &environment_file,
    )?;

    let settings = builder
        .add_source(environment_source)
        .build()
        .map_err(LoadConfigError::Builder)?;

    let config = settings
        .try_deserialize::<T>()
        .map_err(LoadConfigError::Deserialization)?;
    config.validate()?;

    Ok(config)
}

/// Finds the configuration file that matches the requested kind and supported extensions.
fn find_configuration_file(
    directory: &Path,
    kind: ConfigFileKind,
) -> Result<PathBuf, LoadConfigError> {
    let stem = kind.stem();
    let mut attempted_paths = Vec::with_capacity(CONFIG_FILE_EXTENSIONS.len());

    for extension in CONFIG_FILE_EXTENSIONS {
        let path = directory.join(format!("{stem}.{extension}"));
        if path.is_file() {
            return Ok(path);
        }
        attempted_paths.push(path);
    }

    let attempted = attempted_paths
        .iter()
        .map(|path| format!("`{}`", path.display()))
        .collect::<Vec<_>>()
        .join(", ");

    Err(LoadConfigError::ConfigurationFileMissing {
        kind_description: kind.to_string(),
        directory: directory.to_path_buf(),
        attempted,
    })
}

fn validate_configuration_source(
    builder: &ConfigBuilder<DefaultState>,
    kind: ConfigFileKind,
    path: &Path,
) -> Result<(), LoadConfigError> {
    builder
        .clone()
        .build()
        .map(|_| ())
        .map_err(|source| LoadConfigError::ConfigurationFileLoad {
            kind_description: kind.to_string(),
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::shared::{JobConfig, TableErrorPolicy};

    struct ConfigDir(PathBuf);

    impl ConfigDir {
        fn new() -> Self {
            let path = std::env::temp_dir().join(format!("pgmirror-config-{}", uuid::Uuid::new_v4()));
            fs::create_dir_all(&path).unwrap();
            Self(path)
        }

        fn write(&self, file: &str, contents: &str) {
            fs::write(self.0.join(file), contents).unwrap();
        }
    }

    impl Drop for ConfigDir {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.0);
        }
    }

    const BASE: &str = r#"
source:
  host: "staging.internal"
  port: 5432
  name: "app"
  username: "reader"
  tls:
    enabled: false
    trusted_root_certs: ""
destination:
  host: "localhost"
  port: 5433
  name: "app"
  username: "writer"
  password: "secret"
  tls:
    enabled: false
    trusted_root_certs: ""
"#;

    #[test]
    fn environment_file_overrides_base_file() {
        let dir = ConfigDir::new();
        dir.write("base.yaml", BASE);
        dir.write(
            "dev.yaml",
            "job:\n  table_error_policy: continue\nschedule:\n  interval_secs: 60\n",
        );

        let config: JobConfig = load_config_from(&dir.0, Environment::Dev).unwrap();

        assert_eq!(config.source.host, "staging.internal");
        assert_eq!(config.destination.port, 5433);
        assert_eq!(config.job.schema, "public");
        assert_eq!(config.job.table_error_policy, TableErrorPolicy::Continue);
        assert_eq!(config.schedule.interval_secs, 60);
        assert!(config.schedule.run_on_start);
    }

    #[test]
    fn missing_environment_file_is_reported() {
        let dir = ConfigDir::new();
        dir.write("base.yaml", BASE);

        let err = load_config_from::<JobConfig>(&dir.0, Environment::Prod).unwrap_err();

        assert!(matches!(err, LoadConfigError::ConfigurationFileMissing { .. }));
        assert!(err.to_string().contains("prod environment configuration"));
    }

    #[test]
    fn invalid_configuration_is_rejected_after_loading() {
        let dir = ConfigDir::new();
        dir.write("base.yaml", BASE);
        dir.write("dev.json", r#"{"schedule": {"interval_secs": 0}}"#);

        let err = load_config_from::<JobConfig>(&dir.0, Environment::Dev).unwrap_err();

        assert!(matches!(err, LoadConfigError::Validation(_)));
    }

    #[test]
    fn missing_directory_is_reported() {
        let path = std::env::temp_dir().join(format!("pgmirror-missing-{}", uuid::Uuid::new_v4()));

        let err = load_config_from::<JobConfig>(&path, Environment::Dev).unwrap_err();

        assert!(matches!(err, LoadConfigError::MissingConfigurationDirectory(_)));
    }
}
