//! The agent's local control surface.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;
use tracing::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use burrow_tunnel::SshCredentials;

use crate::driver::{SshTunnelDriver, TunnelDriver};
use crate::handlers;
use crate::machine::ConnectionMachine;

/// Application state shared across handlers
pub struct AgentState {
    pub machine: ConnectionMachine,
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Burrow Agent API",
        version = "0.1.0",
        description = "Local lifecycle controls for a tunneled node",
        contact(
            name = "Tunnel Team",
            email = "team@tunnel.io"
        )
    ),
    paths(
        handlers::health_check,
        handlers::get_node_info,
        handlers::set_node_info,
        handlers::proceed,
        handlers::connection_status,
        handlers::turn_back,
    ),
    components(
        schemas(
            burrow_proto::NodeInfoRequest,
            burrow_proto::NodeInfoResponse,
            burrow_proto::ConnectionStatusResponse,
            burrow_proto::MessageResponse,
            burrow_proto::HealthResponse,
            burrow_proto::ErrorResponse,
        )
    ),
    tags(
        (name = "node", description = "Node settings endpoints"),
        (name = "connection", description = "Connection lifecycle endpoints"),
        (name = "system", description = "System health and info endpoints")
    )
)]
struct ApiDoc;

/// Agent configuration
pub struct AgentConfig {
    /// Address to bind the control surface
    pub bind_addr: SocketAddr,
    /// Identity the agent presents when dialing the broker's SSH endpoint
    pub ssh: SshCredentials,
    /// This machine's own SSH listener, the reverse tunnel's far end
    pub local_ssh_port: u16,
    /// Port of the broker's control API
    pub control_api_port: u16,
}

/// Agent server: one connection machine behind a small HTTP surface.
pub struct AgentServer {
    config: AgentConfig,
    state: Arc<AgentState>,
}

impl AgentServer {
    /// Create an agent server with the production SSH driver.
    pub fn new(config: AgentConfig) -> Self {
        let driver = Arc::new(SshTunnelDriver::new(
            config.ssh.clone(),
            config.local_ssh_port,
            config.control_api_port,
        ));
        Self::with_driver(config, driver)
    }

    /// Create an agent server around a specific tunnel driver.
    pub fn with_driver(config: AgentConfig, driver: Arc<dyn TunnelDriver>) -> Self {
        let machine = ConnectionMachine::new(driver, config.control_api_port);
        let state = Arc::new(AgentState { machine });
        Self { config, state }
    }

    /// Build the router with all routes
    pub fn build_router(&self) -> Router {
        let api_doc = ApiDoc::openapi();

        let api_router = Router::new()
            .route("/api/health", get(handlers::health_check))
            .route(
                "/node/info",
                get(handlers::get_node_info).post(handlers::set_node_info),
            )
            .route("/connection/proceed", post(handlers::proceed))
            .route("/connection/status", get(handlers::connection_status))
            .route("/connection/back", post(handlers::turn_back))
            .with_state(self.state.clone());

        Router::new()
            .merge(SwaggerUi::new("/swagger-ui").url("/api/openapi.json", api_doc))
            .merge(api_router)
            .layer(TraceLayer::new_for_http())
    }

    /// Start the agent
    pub async fn start(self) -> Result<(), anyhow::Error> {
        let router = self.build_router();

        info!("Starting agent on {}", self.config.bind_addr);
        info!("Swagger UI: http://{}/swagger-ui", self.config.bind_addr);

        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;

        axum::serve(listener, router)
            .await
            .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

        Ok(())
    }
}
