use std::io;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("gateway request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("gateway refused allocation: {0}")]
    Refused(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ForwarderError {
    #[error("failed to dial local service {host}:{port}: {source}")]
    LocalDialFailed {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no mapping with id {0}")]
    UnknownMapping(String),
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config as JSON: {0}")]
    Json(#[from] serde_json::Error),
}
