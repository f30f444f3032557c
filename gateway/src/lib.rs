pub mod api;
pub mod config;
pub mod control_acceptor;
pub mod dispatcher;
pub mod error;
pub mod mapping;
pub mod pool;
pub mod registry;
pub mod session;
pub mod state;
pub mod statistics;
pub mod udp_flow;

use std::{net::SocketAddr, sync::Arc};

use tokio::net::TcpListener;

use crate::{config::Config, state::FabricState};

/// Everything `run` needed to bind before spawning its background tasks.
/// Ports are the ones actually bound, useful when the configured port was 0
/// (as in tests).
pub struct RunHandle {
    pub state: Arc<FabricState>,
    pub data_plane_addr: SocketAddr,
    pub control_plane_addr: SocketAddr,
}

/// Bring up the data-plane acceptor and the Control Plane API as background
/// tasks. Exposed as a function (rather than inlined in `main`) so
/// integration tests can drive a complete Gateway without a separate
/// process.
pub async fn run(config: Config, config_path: std::path::PathBuf) -> anyhow::Result<RunHandle> {
    let bind_host = config.server.bind_host;
    let web_port = config.server.web_port;
    let data_plane_port = config.server.data_plane_port;
    let state = FabricState::new(config, config_path);

    let data_plane_listener = TcpListener::bind((bind_host, data_plane_port)).await?;
    let control_plane_listener = TcpListener::bind((bind_host, web_port)).await?;
    let data_plane_addr = data_plane_listener.local_addr()?;
    let control_plane_addr = control_plane_listener.local_addr()?;

    let acceptor_state = state.clone();
    tokio::spawn(async move {
        control_acceptor::run(data_plane_listener, acceptor_state.mappings.clone()).await;
    });

    let api_state = state.clone();
    tokio::spawn(async move {
        if let Err(err) = api::run(control_plane_listener, api_state).await {
            log::error!("control plane api exited: {}", err);
        }
    });

    Ok(RunHandle { state, data_plane_addr, control_plane_addr })
}
