//! Configuration types and loading for the pgmirror workspace.
//!
//! Configuration is layered: a base file, an environment specific file selected through
//! `APP_ENVIRONMENT`, and finally `APP_`-prefixed environment variable overrides.

mod environment;
mod load;
pub mod shared;

pub use environment::Environment;
pub use load::{Config, LoadConfigError, load_config, load_config_from};
