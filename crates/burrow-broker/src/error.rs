//! Broker error type and its HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use burrow_proto::ErrorResponse;
use burrow_registry::RegistryError;
use thiserror::Error;
use tracing::{debug, error};

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("credentials rejected for node {0}")]
    AuthenticationRejected(String),

    #[error("no bindable port found within {0} attempts")]
    ResourceExhausted(u32),

    #[error("no route to node {0}")]
    RouteNotFound(String),

    #[error("unknown node: {0}")]
    UnknownNode(String),

    #[error("node already registered: {0}")]
    DuplicateNode(String),

    #[error("backend request failed: {0}")]
    Upstream(#[from] reqwest::Error),

    #[error(transparent)]
    Registry(RegistryError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<RegistryError> for BrokerError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NodeNotFound(name) => BrokerError::UnknownNode(name),
            RegistryError::DuplicateNode(name) => BrokerError::DuplicateNode(name),
            other => BrokerError::Registry(other),
        }
    }
}

impl BrokerError {
    fn status(&self) -> StatusCode {
        match self {
            BrokerError::AuthenticationRejected(_) => StatusCode::UNAUTHORIZED,
            BrokerError::ResourceExhausted(_) => StatusCode::SERVICE_UNAVAILABLE,
            BrokerError::RouteNotFound(_) | BrokerError::UnknownNode(_) => StatusCode::NOT_FOUND,
            BrokerError::DuplicateNode(_) => StatusCode::CONFLICT,
            BrokerError::Upstream(_) => StatusCode::BAD_GATEWAY,
            BrokerError::Registry(_) | BrokerError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn code(&self) -> &'static str {
        match self {
            BrokerError::AuthenticationRejected(_) => "authentication_rejected",
            BrokerError::ResourceExhausted(_) => "resource_exhausted",
            BrokerError::RouteNotFound(_) => "route_not_found",
            BrokerError::UnknownNode(_) => "unknown_node",
            BrokerError::DuplicateNode(_) => "duplicate_node",
            BrokerError::Upstream(_) => "upstream_failed",
            BrokerError::Registry(_) => "registry_error",
            BrokerError::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for BrokerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(code = self.code(), "request failed: {self}");
        } else {
            debug!(code = self.code(), "request rejected: {self}");
        }

        let body = Json(ErrorResponse {
            error: self.to_string(),
            code: Some(self.code().to_string()),
        });
        (status, body).into_response()
    }
}
