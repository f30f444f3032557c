//! Control Plane API: the HTTP surface an Agent and administrative tooling
//! use to discover available ports, allocate and release Mappings, and read
//! or replace the persisted configuration.
//!
//! Warn: this server carries no authentication of its own. Deploy it behind
//! a network boundary you trust, same as the data-plane acceptor.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

use crate::{config::Config, mapping::Protocol, state::FabricState};

#[derive(Deserialize)]
struct AllocateRequest {
    local_port: u16,
    preferred_port: Option<u16>,
    protocol: Protocol,
    #[serde(default = "default_mapping_id")]
    agent_mapping_id: String,
}

fn default_mapping_id() -> String {
    "unnamed".to_string()
}

#[derive(Serialize)]
struct AllocateResponse {
    success: bool,
    public_port: u16,
    protocol: Protocol,
}

pub async fn run(listener: TcpListener, state: Arc<FabricState>) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/ports/available", get(list_available))
        .route("/ports/active", get(list_active))
        .route("/ports/allocate", post(allocate))
        .route("/ports/mapping/{local_port}", delete(release))
        .route("/config", get(get_config).post(replace_config))
        .route("/statistics", get(get_statistics))
        .with_state(state);

    log::info!("control plane listening on {:?}", listener.local_addr());
    axum::serve(listener, app).await?;
    Ok(())
}

async fn list_available(State(state): State<Arc<FabricState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!(state.list_available()))
}

#[derive(Serialize)]
struct ActiveMapping {
    public_port: u16,
    local_port: u16,
    protocol: Protocol,
    agent_mapping_id: String,
}

async fn list_active(State(state): State<Arc<FabricState>>) -> Json<Vec<ActiveMapping>> {
    let mappings = state
        .list_active()
        .into_iter()
        .map(|binding| ActiveMapping {
            public_port: binding.public_port,
            local_port: binding.local_port,
            protocol: binding.protocol,
            agent_mapping_id: binding.agent_mapping_id.clone(),
        })
        .collect();
    Json(mappings)
}

async fn allocate(
    State(state): State<Arc<FabricState>>,
    Json(request): Json<AllocateRequest>,
) -> Response {
    match state
        .allocate_mapping(
            request.local_port,
            request.preferred_port,
            request.protocol,
            request.agent_mapping_id,
        )
        .await
    {
        Ok(binding) => Json(AllocateResponse {
            success: true,
            public_port: binding.public_port,
            protocol: binding.protocol,
        })
        .into_response(),
        Err(err) => {
            log::warn!("allocation failed for local port {}: {}", request.local_port, err);
            (StatusCode::CONFLICT, err.to_string()).into_response()
        }
    }
}

async fn release(State(state): State<Arc<FabricState>>, Path(local_port): Path<u16>) -> Response {
    match state.release_mapping(local_port) {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => (StatusCode::NOT_FOUND, err.to_string()).into_response(),
    }
}

async fn get_config(State(state): State<Arc<FabricState>>) -> Json<Config> {
    Json(state.config())
}

async fn replace_config(State(state): State<Arc<FabricState>>, Json(config): Json<Config>) -> Response {
    match state.replace_config(config) {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
    }
}

async fn get_statistics(State(state): State<Arc<FabricState>>) -> Json<crate::statistics::StatisticsSnapshot> {
    Json(state.statistics())
}
