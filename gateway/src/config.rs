use std::{fs::read_to_string, net::IpAddr, path::PathBuf};

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

/// Listen addresses for the Control Plane API and the data-plane Session
/// acceptor.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Server {
    #[serde(default = "Server::bind_host")]
    pub bind_host: IpAddr,

    /// HTTP port the Control Plane API listens on.
    #[serde(default = "Server::web_port")]
    pub web_port: u16,

    /// TCP port Agents dial to open a Session.
    #[serde(default = "Server::data_plane_port")]
    pub data_plane_port: u16,
}

impl Server {
    fn bind_host() -> IpAddr {
        "0.0.0.0".parse().unwrap()
    }

    fn web_port() -> u16 {
        8088
    }

    fn data_plane_port() -> u16 {
        9000
    }
}

impl Default for Server {
    fn default() -> Self {
        Self {
            bind_host: Self::bind_host(),
            web_port: Self::web_port(),
            data_plane_port: Self::data_plane_port(),
        }
    }
}

/// A contiguous, admin-configured range of public ports available for
/// allocation.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PortRangeSpec {
    pub id: u64,
    pub start: u16,
    pub end: u16,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// A single admin-pinned public port, e.g. for a well-known service port.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SpecificPortSpec {
    pub id: u64,
    pub port: u16,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Serialize, Deserialize, Debug, Default, Clone)]
pub struct Config {
    #[serde(default)]
    pub server: Server,
    #[serde(default)]
    pub port_ranges: Vec<PortRangeSpec>,
    #[serde(default)]
    pub specific_ports: Vec<SpecificPortSpec>,
    #[serde(default, skip_serializing)]
    pub log: Log,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for range in &self.port_ranges {
            if range.start > range.end {
                return Err(ConfigError::InvalidPortRange {
                    start: range.start,
                    end: range.end,
                    reason: "start is greater than end",
                });
            }
        }
        Ok(())
    }

    pub fn load(path: &PathBuf) -> Result<Self, ConfigError> {
        let raw = read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
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
#[command(
    about = "Public-facing relay for the tunnel fabric",
    version = env!("CARGO_PKG_VERSION")
)]
pub struct Cli {
    /// path to the JSON configuration file
    #[arg(long, short, default_value = "gateway.json")]
    pub config: PathBuf,
}

impl Cli {
    /// Load configuration from the path given on the command line, falling
    /// back to defaults if the file does not exist yet.
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
