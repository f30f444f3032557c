use std::{fs::read_to_string, path::PathBuf};

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Deserialize, Debug)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl LogLevel {
    pub fn as_level(&self) -> log::Level {
        match *self {
            Self::Error => log::Level::Error,
            Self::Warn => log::Level::Warn,
            Self::Info => log::Level::Info,
            Self::Debug => log::Level::Debug,
            Self::Trace => log::Level::Trace,
        }
    }
}

#[derive(Deserialize, Debug, Default)]
pub struct Log {
    #[serde(default)]
    pub level: LogLevel,
}

/// Address of the Gateway this Agent dials: its data-plane port (`port`) and
/// its Control Plane API port (`web_port`). Distinct from `AgentApi`, which
/// is this Agent's own local Control API bind address.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Server {
    #[serde(default = "Server::host")]
    pub host: String,
    #[serde(default = "Server::port")]
    pub port: u16,
    #[serde(default = "Server::web_port")]
    pub web_port: u16,
}

impl Server {
    fn host() -> String {
        "127.0.0.1".to_string()
    }

    fn port() -> u16 {
        9000
    }

    fn web_port() -> u16 {
        8088
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.web_port)
    }

    pub fn data_plane_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Server {
    fn default() -> Self {
        Self {
            host: Self::host(),
            port: Self::port(),
            web_port: Self::web_port(),
        }
    }
}

/// Bind address for this Agent's own local Control API (mapping CRUD,
/// start/stop). Kept separate from `Server` so an Agent's local management
/// port can never collide with the Gateway address it dials.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AgentApi {
    #[serde(default = "AgentApi::bind_host")]
    pub bind_host: String,
    #[serde(default = "AgentApi::port")]
    pub port: u16,
}

impl AgentApi {
    fn bind_host() -> String {
        "127.0.0.1".to_string()
    }

    fn port() -> u16 {
        8089
    }
}

impl Default for AgentApi {
    fn default() -> Self {
        Self {
            bind_host: Self::bind_host(),
            port: Self::port(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
    Both,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PortMapping {
    pub id: String,
    pub name: String,
    pub local_host: String,
    pub local_port: u16,
    pub protocol: Protocol,
    pub preferred_port: Option<u16>,
    #[serde(default)]
    pub assigned_public_port: Option<u16>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_true")]
    pub auto_reconnect: bool,
    /// Overrides the default UDP flow idle timeout for this Mapping, in
    /// milliseconds. Generalizes the source's hard-coded longer TTL for
    /// particular game-server ports.
    #[serde(default)]
    pub udp_flow_idle_ms: Option<u64>,
}

fn default_true() -> bool {
    true
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Connection {
    #[serde(default = "Connection::min_idle")]
    pub min_idle: usize,
    #[serde(default = "Connection::max_total")]
    pub max_total: usize,
    #[serde(default = "Connection::check_interval_ms")]
    pub check_interval_ms: u64,
    #[serde(default = "Connection::reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
}

impl Connection {
    fn min_idle() -> usize {
        2
    }

    fn max_total() -> usize {
        10
    }

    fn check_interval_ms() -> u64 {
        2_000
    }

    fn reconnect_delay_ms() -> u64 {
        1_000
    }
}

impl Default for Connection {
    fn default() -> Self {
        Self {
            min_idle: Self::min_idle(),
            max_total: Self::max_total(),
            check_interval_ms: Self::check_interval_ms(),
            reconnect_delay_ms: Self::reconnect_delay_ms(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Default, Clone)]
pub struct Config {
    #[serde(default)]
    pub server: Server,
    #[serde(default)]
    pub agent_api: AgentApi,
    #[serde(default)]
    pub port_mappings: Vec<PortMapping>,
    #[serde(default)]
    pub connection: Connection,
    #[serde(default, skip_serializing)]
    pub log: Log,
}

impl Config {
    pub fn load(path: &PathBuf) -> Result<Self, ConfigError> {
        let raw = read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn save(&self, path: &PathBuf) -> Result<(), ConfigError> {
        let raw = serde_json::to_string_pretty(self)?;
        std::fs::write(path, raw).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(())
    }
}

#[derive(Parser, Debug)]
#[command(about = "Private-side tunnel fabric agent", version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[arg(long, short, default_value = "agent.json")]
    pub config: PathBuf,
}

impl Cli {
    pub fn load() -> (Self, Config) {
        let cli = Self::parse();
        let config = if cli.config.exists() {
            Config::load(&cli.config).expect("failed to read configuration file")
        } else {
            Config::default()
        };
        (cli, config)
    }
}
