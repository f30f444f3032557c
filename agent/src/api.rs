//! The Agent's own Control API: local CRUD over configured Mappings plus
//! start/stop toggles, so operators (or a thin admin UI) can manage the
//! Agent without hand-editing its configuration file.
//!
//! Warn: carries no authentication of its own, same caveat as the Gateway's
//! Control Plane API.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tokio::net::TcpListener;

use crate::{config::PortMapping, state::AgentState};

pub async fn run(listener: TcpListener, state: Arc<AgentState>) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/mappings", get(list_mappings).post(add_mapping))
        .route("/mappings/{id}", axum::routing::delete(remove_mapping))
        .route("/mappings/{id}/enable", post(enable_mapping))
        .route("/mappings/{id}/disable", post(disable_mapping))
        .with_state(state);

    log::info!("agent control api listening on {:?}", listener.local_addr());
    axum::serve(listener, app).await?;
    Ok(())
}

async fn list_mappings(State(state): State<Arc<AgentState>>) -> Json<Vec<crate::state::MappingStatus>> {
    Json(state.list_mappings())
}

async fn add_mapping(State(state): State<Arc<AgentState>>, Json(mapping): Json<PortMapping>) -> Response {
    match state.add_mapping(mapping) {
        Ok(()) => StatusCode::CREATED.into_response(),
        Err(err) => (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
    }
}

async fn remove_mapping(State(state): State<Arc<AgentState>>, Path(id): Path<String>) -> Response {
    match state.remove_mapping(&id) {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => (StatusCode::NOT_FOUND, err.to_string()).into_response(),
    }
}

async fn enable_mapping(State(state): State<Arc<AgentState>>, Path(id): Path<String>) -> Response {
    set_enabled(state, id, true)
}

async fn disable_mapping(State(state): State<Arc<AgentState>>, Path(id): Path<String>) -> Response {
    set_enabled(state, id, false)
}

fn set_enabled(state: Arc<AgentState>, id: String, enabled: bool) -> Response {
    match state.set_enabled(&id, enabled) {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => (StatusCode::NOT_FOUND, err.to_string()).into_response(),
    }
}
