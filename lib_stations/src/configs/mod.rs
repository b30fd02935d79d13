/// Layered server configuration (defaults, JSON file, environment, CLI).
pub mod config_server;

pub use config_server::{load_config, load_config_from, ConfigError, ServerConfig, ServerSettings};
