use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::core::context::{EngineSettings, DEFAULT_PING_INTERVAL, DEFAULT_TICK_INTERVAL, WELCOME_TEXT};

const DEFAULT_CONFIG_FILE: &str = "server_stations.conf";
const DEFAULT_PORT: u16 = 8080;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid command line or environment: {0}")]
    Cli(#[from] clap::Error),

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{name} must be greater than zero")]
    ZeroInterval { name: &'static str },
}

/// Every knob is optional so layers can be merged; [`ServerConfig::resolve`] turns the
/// merged result into concrete [`ServerSettings`].
#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default, PartialEq, Eq)]
#[clap(about = "Charging station status push server", version)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    #[clap(long, env = "PORT", help = "Port to listen on for HTTP and WebSocket clients.")]
    pub port: Option<u16>,

    #[clap(long, env = "STATIONS_BIND_ADDR", help = "Address to bind, defaults to 0.0.0.0.")]
    pub bind_addr: Option<IpAddr>,

    #[clap(long, env = "STATIONS_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "STATIONS_LOG_DIR", help = "Directory for JSON log files; console only when unset.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "STATIONS_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "STATIONS_TICK_INTERVAL_MS", help = "Milliseconds between two updates of one stream.")]
    pub tick_interval_ms: Option<u64>,

    #[clap(long, env = "STATIONS_PING_INTERVAL_MS", help = "Milliseconds between two liveness probes.")]
    pub ping_interval_ms: Option<u64>,

    #[clap(long, env = "STATIONS_DATASET_PATH", help = "JSON file with the station lists; built-in sample when unset.")]
    pub dataset_path: Option<PathBuf>,

    #[clap(long, env = "STATIONS_STATIC_DIR", help = "Directory served for non-API paths.")]
    pub static_dir: Option<PathBuf>,
}

impl ServerConfig {
    /// Built-in defaults, the lowest layer.
    pub fn defaults() -> Self {
        Self {
            port: Some(DEFAULT_PORT),
            bind_addr: Some(IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
            log_level: Some("info".to_string()),
            tick_interval_ms: Some(DEFAULT_TICK_INTERVAL.as_millis() as u64),
            ping_interval_ms: Some(DEFAULT_PING_INTERVAL.as_millis() as u64),
            static_dir: Some(PathBuf::from("public")),
            ..Default::default()
        }
    }

    // 'other' overrides 'self' for Some values
    pub fn merge(self, other: ServerConfig) -> ServerConfig {
        ServerConfig {
            port: other.port.or(self.port),
            bind_addr: other.bind_addr.or(self.bind_addr),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            tick_interval_ms: other.tick_interval_ms.or(self.tick_interval_ms),
            ping_interval_ms: other.ping_interval_ms.or(self.ping_interval_ms),
            dataset_path: other.dataset_path.or(self.dataset_path),
            static_dir: other.static_dir.or(self.static_dir),
        }
    }

    /// Validates the merged layers into concrete settings.
    pub fn resolve(self) -> Result<ServerSettings, ConfigError> {
        let tick_ms = self.tick_interval_ms.unwrap_or(DEFAULT_TICK_INTERVAL.as_millis() as u64);
        let ping_ms = self.ping_interval_ms.unwrap_or(DEFAULT_PING_INTERVAL.as_millis() as u64);
        if tick_ms == 0 {
            return Err(ConfigError::ZeroInterval { name: "tickIntervalMs" });
        }
        if ping_ms == 0 {
            return Err(ConfigError::ZeroInterval { name: "pingIntervalMs" });
        }

        let ip = self.bind_addr.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        Ok(ServerSettings {
            addr: SocketAddr::new(ip, self.port.unwrap_or(DEFAULT_PORT)),
            log_dir: self.log_dir,
            log_level: self.log_level.unwrap_or_else(|| "info".to_string()),
            dataset_path: self.dataset_path,
            static_dir: self.static_dir,
            engine: EngineSettings {
                tick_interval: Duration::from_millis(tick_ms),
                ping_interval: Duration::from_millis(ping_ms),
                welcome_text: WELCOME_TEXT.to_string(),
            },
        })
    }
}

/// Concrete settings the server runs with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub log_dir: Option<PathBuf>,
    pub log_level: String,
    pub dataset_path: Option<PathBuf>,
    pub static_dir: Option<PathBuf>,
    pub engine: EngineSettings,
}

/// Loads settings from the process arguments and environment.
pub fn load_config() -> Result<ServerSettings, ConfigError> {
    load_config_from(std::env::args_os())
}

/// Layers defaults, the optional JSON config file, then environment and CLI values.
///
/// A `.env` file in the working directory is loaded first so its variables take part
/// in the environment layer. A missing default config file is fine; an explicitly named
/// file that is missing, or any config file that cannot be read or parsed, is an error.
pub fn load_config_from<I, T>(args: I) -> Result<ServerSettings, ConfigError>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let _ = dotenvy::dotenv();

    // CLI and environment are parsed first to find a config_path override.
    let cli = ServerConfig::try_parse_from(args)?;
    let explicit = cli.config_path.is_some();
    let config_file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    let mut current = ServerConfig::defaults();

    if explicit || config_file_path.exists() {
        current = current.merge(read_config_file(&config_file_path)?);
    } else {
        debug!(
            "Config file not found at {}. Using defaults and environment/CLI variables.",
            config_file_path.display()
        );
    }

    current.merge(cli).resolve()
}

fn read_config_file(path: &Path) -> Result<ServerConfig, ConfigError> {
    let config_str = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&config_str).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
