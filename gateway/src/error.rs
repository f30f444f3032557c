use std::io;

/// Failures raised while handing out or binding a public port.
#[derive(Debug, thiserror::Error)]
pub enum AllocationError {
    #[error("no port available in the configured ranges")]
    NoPortAvailable,
    #[error("local port {0} is already mapped")]
    AlreadyMapped(u16),
    #[error("no mapping bound to local port {0}")]
    NotMapped(u16),
    #[error("failed to bind {protocol} listener on port {port}: {source}")]
    BindFailed {
        port: u16,
        protocol: &'static str,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid port range {start}..{end}: {reason}")]
    InvalidPortRange {
        start: u16,
        end: u16,
        reason: &'static str,
    },
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config as JSON: {0}")]
    Json(#[from] serde_json::Error),
}
