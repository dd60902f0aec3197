//! Agent error type and its HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use burrow_proto::ErrorResponse;
use thiserror::Error;
use tracing::{debug, error};

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("broker rejected credentials for node {0}")]
    AuthenticationRejected(String),

    #[error("broker has no free port to offer")]
    ResourceExhausted,

    #[error("tunnel setup failed: {0}")]
    TunnelSetupFailed(String),

    #[error("disconnect call failed: {0}")]
    TeardownFailed(String),

    #[error("node info not configured: missing {0}")]
    MissingInfo(&'static str),

    #[error("control plane request failed: {0}")]
    ControlPlane(#[from] reqwest::Error),
}

impl AgentError {
    fn status(&self) -> StatusCode {
        match self {
            AgentError::AuthenticationRejected(_) => StatusCode::UNAUTHORIZED,
            AgentError::ResourceExhausted => StatusCode::SERVICE_UNAVAILABLE,
            AgentError::TunnelSetupFailed(_)
            | AgentError::TeardownFailed(_)
            | AgentError::ControlPlane(_) => StatusCode::BAD_GATEWAY,
            AgentError::MissingInfo(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            AgentError::AuthenticationRejected(_) => "authentication_rejected",
            AgentError::ResourceExhausted => "resource_exhausted",
            AgentError::TunnelSetupFailed(_) => "tunnel_setup_failed",
            AgentError::TeardownFailed(_) => "teardown_failed",
            AgentError::MissingInfo(_) => "missing_info",
            AgentError::ControlPlane(_) => "control_plane_failed",
        }
    }
}

impl IntoResponse for AgentError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(code = self.code(), "connection call failed: {self}");
        } else {
            debug!(code = self.code(), "connection call rejected: {self}");
        }

        let body = Json(ErrorResponse {
            error: self.to_string(),
            code: Some(self.code().to_string()),
        });
        (status, body).into_response()
    }
}
