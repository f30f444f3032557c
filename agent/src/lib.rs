pub mod api;
pub mod config;
pub mod error;
pub mod forwarder;
pub mod gateway_client;
pub mod mapping;
pub mod session;
pub mod state;
pub mod udp_cache;

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use tokio::net::TcpListener;

use crate::{config::Config, state::AgentState};

/// Everything `run` needed to bind before spawning its background tasks.
pub struct RunHandle {
    pub state: Arc<AgentState>,
    pub control_addr: SocketAddr,
}

/// Spawn a manager task per configured Mapping and bring up the Agent's own
/// Control API. Exposed as a function (rather than inlined in `main`) so
/// integration tests can drive a complete Agent without a separate process.
pub async fn run(config: Config, config_path: PathBuf) -> anyhow::Result<RunHandle> {
    let bind_host = config.agent_api.bind_host.clone();
    let api_port = config.agent_api.port;

    let state = AgentState::new(config, config_path)?;
    state.spawn_all();

    let control_listener = TcpListener::bind((bind_host.as_str(), api_port)).await?;
    let control_addr = control_listener.local_addr()?;

    let api_state = state.clone();
    tokio::spawn(async move {
        if let Err(err) = api::run(control_listener, api_state).await {
            log::error!("agent control api exited: {}", err);
        }
    });

    Ok(RunHandle { state, control_addr })
}
