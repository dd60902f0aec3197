use axum::{extract::State, Json};
use std::sync::Arc;
use tracing::info;

use burrow_proto::{
    ConnectionStatusResponse, ErrorResponse, HealthResponse, MessageResponse, NodeInfoRequest,
    NodeInfoResponse,
};

use crate::error::AgentError;
use crate::state::ConnectionState;
use crate::AgentState;

fn status_of(state: ConnectionState) -> ConnectionStatusResponse {
    ConnectionStatusResponse {
        state: state.name().to_string(),
        level: state.level(),
    }
}

/// Service health and version
#[utoipa::path(
    get,
    path = "/api/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    ),
    tag = "system"
)]
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Current node settings and connection state
#[utoipa::path(
    get,
    path = "/node/info",
    responses(
        (status = 200, description = "Stored settings, password withheld", body = NodeInfoResponse)
    ),
    tag = "node"
)]
pub async fn get_node_info(State(state): State<Arc<AgentState>>) -> Json<NodeInfoResponse> {
    Json(state.machine.snapshot())
}

/// Set broker coordinates and node identity
#[utoipa::path(
    post,
    path = "/node/info",
    request_body = NodeInfoRequest,
    responses(
        (status = 200, description = "Settings stored", body = MessageResponse)
    ),
    tag = "node"
)]
pub async fn set_node_info(
    State(state): State<Arc<AgentState>>,
    Json(request): Json<NodeInfoRequest>,
) -> Json<MessageResponse> {
    info!(node = %request.node_name, broker = %request.server_host, "node info updated");
    state.machine.set_info(request);

    Json(MessageResponse {
        message: "node info updated".to_string(),
    })
}

/// Advance the connection one step
#[utoipa::path(
    post,
    path = "/connection/proceed",
    responses(
        (status = 200, description = "State after the step", body = ConnectionStatusResponse),
        (status = 400, description = "Node info not configured", body = ErrorResponse),
        (status = 401, description = "Broker rejected credentials", body = ErrorResponse),
        (status = 502, description = "Broker unreachable or step failed", body = ErrorResponse),
        (status = 503, description = "Broker out of free ports", body = ErrorResponse)
    ),
    tag = "connection"
)]
pub async fn proceed(
    State(state): State<Arc<AgentState>>,
) -> Result<Json<ConnectionStatusResponse>, AgentError> {
    let after = state.machine.proceed().await?;
    Ok(Json(status_of(after)))
}

/// Current connection state
#[utoipa::path(
    get,
    path = "/connection/status",
    responses(
        (status = 200, description = "Current state name and level", body = ConnectionStatusResponse)
    ),
    tag = "connection"
)]
pub async fn connection_status(
    State(state): State<Arc<AgentState>>,
) -> Json<ConnectionStatusResponse> {
    Json(status_of(state.machine.state()))
}

/// Step the connection back one level
#[utoipa::path(
    post,
    path = "/connection/back",
    responses(
        (status = 200, description = "State after the step", body = ConnectionStatusResponse),
        (status = 502, description = "Broker disconnect call failed", body = ErrorResponse)
    ),
    tag = "connection"
)]
pub async fn turn_back(
    State(state): State<Arc<AgentState>>,
) -> Result<Json<ConnectionStatusResponse>, AgentError> {
    let after = state.machine.turn_back().await?;
    Ok(Json(status_of(after)))
}
