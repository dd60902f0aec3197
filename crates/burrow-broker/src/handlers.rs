use axum::{extract::State, Json};
use std::sync::Arc;
use tracing::{debug, info};

use burrow_proto::{
    AccountCheckRequest, AccountCheckResponse, ErrorResponse, HealthResponse, MessageResponse,
    NodeNameRequest, NodeStatusResponse, ProvideProxyRequest, RandomPortResponse,
    RegisterNodeRequest,
};

use crate::error::BrokerError;
use crate::AppState;

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

/// Register a new node account
#[utoipa::path(
    post,
    path = "/node/account",
    request_body = RegisterNodeRequest,
    responses(
        (status = 200, description = "Node registered", body = MessageResponse),
        (status = 409, description = "Node name already taken", body = ErrorResponse)
    ),
    tag = "nodes"
)]
pub async fn register_node(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RegisterNodeRequest>,
) -> Result<Json<MessageResponse>, BrokerError> {
    info!(node = %request.node_name, service_port = request.service_port, "registering node");

    state
        .store
        .create(
            &request.node_name,
            &request.node_password,
            request.service_port,
        )
        .await?;

    Ok(Json(MessageResponse {
        message: format!("node {} registered", request.node_name),
    }))
}

/// Validate a node's credentials
#[utoipa::path(
    get,
    path = "/node/account/check",
    request_body = AccountCheckRequest,
    responses(
        (status = 200, description = "Whether the credentials are valid", body = AccountCheckResponse)
    ),
    tag = "nodes"
)]
pub async fn check_account(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AccountCheckRequest>,
) -> Result<Json<AccountCheckResponse>, BrokerError> {
    let valid = state
        .store
        .credentials_match(&request.node_name, &request.node_password)
        .await?;
    debug!(node = %request.node_name, valid, "account check");

    Ok(Json(AccountCheckResponse { valid }))
}

/// Reserve a free TCP port on this host
#[utoipa::path(
    get,
    path = "/port/random",
    responses(
        (status = 200, description = "A currently free port", body = RandomPortResponse),
        (status = 503, description = "No free port found", body = ErrorResponse)
    ),
    tag = "ports"
)]
pub async fn random_port(
    State(state): State<Arc<AppState>>,
) -> Result<Json<RandomPortResponse>, BrokerError> {
    let port = state.allocator.allocate()?;
    debug!(port, "reserved random port");

    Ok(Json(RandomPortResponse { port }))
}

/// Establish the proxy half of a node's tunnel
#[utoipa::path(
    post,
    path = "/proxy/provide",
    request_body = ProvideProxyRequest,
    responses(
        (status = 200, description = "Proxy establishment started", body = MessageResponse),
        (status = 401, description = "Credentials rejected", body = ErrorResponse)
    ),
    tag = "proxy"
)]
pub async fn provide_proxy(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ProvideProxyRequest>,
) -> Result<Json<MessageResponse>, BrokerError> {
    let valid = state
        .store
        .credentials_match(&request.node_name, &request.node_password)
        .await?;
    if !valid {
        return Err(BrokerError::AuthenticationRejected(request.node_name));
    }

    info!(
        node = %request.node_name,
        remote_ssh_port = request.remote_ssh_port,
        proxy_port = request.proxy_port,
        "provisioning proxy"
    );
    state.provisioner.provision(
        request.node_name.clone(),
        request.remote_ssh_port,
        request.proxy_port,
    );

    Ok(Json(MessageResponse {
        message: format!("provisioning proxy for {}", request.node_name),
    }))
}

/// Mark a node disconnected and collapse its tunnel
#[utoipa::path(
    post,
    path = "/node/disconnect",
    request_body = NodeNameRequest,
    responses(
        (status = 200, description = "Node marked disconnected", body = MessageResponse),
        (status = 404, description = "Unknown node", body = ErrorResponse)
    ),
    tag = "nodes"
)]
pub async fn disconnect_node(
    State(state): State<Arc<AppState>>,
    Json(request): Json<NodeNameRequest>,
) -> Result<Json<MessageResponse>, BrokerError> {
    info!(node = %request.node_name, "disconnect requested");
    state.store.mark_disconnected(&request.node_name).await?;

    Ok(Json(MessageResponse {
        message: format!("node {} disconnected", request.node_name),
    }))
}

/// Report a node's registration and connection status
#[utoipa::path(
    get,
    path = "/node/check",
    request_body = NodeNameRequest,
    responses(
        (status = 200, description = "Node status", body = NodeStatusResponse),
        (status = 404, description = "Unknown node", body = ErrorResponse)
    ),
    tag = "nodes"
)]
pub async fn check_node(
    State(state): State<Arc<AppState>>,
    Json(request): Json<NodeNameRequest>,
) -> Result<Json<NodeStatusResponse>, BrokerError> {
    let node = state.store.get_required(&request.node_name).await?;

    Ok(Json(NodeStatusResponse {
        node_name: node.name,
        service_port: node.service_port as u16,
        connection_valid: node.connection_valid,
        proxy_port: node.proxy_port.map(|port| port as u16),
    }))
}
