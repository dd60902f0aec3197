//! Control-plane message types shared by the broker and the node agent.
//!
//! Everything here crosses the wire as JSON and feeds the broker's OpenAPI
//! document, so each type derives both serde traits and `ToSchema`.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Credentials presented for an account check
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AccountCheckRequest {
    /// Registered node name
    pub node_name: String,
    /// Shared secret for the node
    pub node_password: String,
}

/// Result of an account check
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AccountCheckResponse {
    /// True only for an exact name + password match
    pub valid: bool,
}

/// A freshly probed, currently bindable TCP port
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RandomPortResponse {
    /// Port number in the broker's ephemeral range
    pub port: u16,
}

/// Request to register a new node
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RegisterNodeRequest {
    /// Unique node name, immutable once created
    pub node_name: String,
    /// Shared secret for later account checks
    pub node_password: String,
    /// Port on the node's machine that its service listens on
    pub service_port: u16,
}

/// Request to provision the proxy half of a node's tunnel
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProvideProxyRequest {
    /// Registered node name
    pub node_name: String,
    /// Shared secret for the node
    pub node_password: String,
    /// Broker-side port bound by the node's reverse tunnel
    pub remote_ssh_port: u16,
    /// Broker-side port the SOCKS5 listener should bind
    pub proxy_port: u16,
}

/// Request naming a single node
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NodeNameRequest {
    /// Registered node name
    pub node_name: String,
}

/// Connection status of a registered node
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NodeStatusResponse {
    /// Registered node name
    pub node_name: String,
    /// Port on the node's machine that its service listens on
    pub service_port: u16,
    /// True while a live tunnel backs this node
    pub connection_valid: bool,
    /// SOCKS5 proxy port, set exactly while the connection is valid
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_port: Option<u16>,
}

/// Broker location and identity the agent should connect with
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NodeInfoRequest {
    /// Broker hostname or address
    pub server_host: String,
    /// Broker SSH port for the reverse tunnel
    pub server_ssh_port: u16,
    /// Registered node name
    pub node_name: String,
    /// Shared secret for the node
    pub node_password: String,
}

/// Current agent-side connection settings and state
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NodeInfoResponse {
    /// Broker hostname or address
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_host: Option<String>,
    /// Broker SSH port for the reverse tunnel
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_ssh_port: Option<u16>,
    /// Registered node name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,
    /// Broker port bound by the reverse tunnel, once allocated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_tunnel_port: Option<u16>,
    /// Broker SOCKS5 proxy port, once provisioned
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_port: Option<u16>,
    /// Current connection state name
    pub state: String,
}

/// Agent-side connection state after a lifecycle call
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConnectionStatusResponse {
    /// Current connection state name
    pub state: String,
    /// Numeric level of the state, 0 through 4
    pub level: u8,
}

/// Plain acknowledgement
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    /// Human-readable result
    pub message: String,
}

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Error message
    pub error: String,
    /// Error code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// Service status, always "healthy" while serving
    pub status: String,
    /// Crate version
    pub version: String,
}
