//! Public-side tunnel broker.
//!
//! Keeps the node registry, hands out free ports, establishes the proxy
//! half of each node's tunnel over SSH, and routes HTTP requests through
//! the resulting SOCKS endpoints.

pub mod allocator;
pub mod error;
pub mod handlers;
pub mod router;

mod provision;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    routing::{any, get, post},
    Router,
};
use tower_http::trace::TraceLayer;
use tracing::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use burrow_registry::NodeStore;

pub use allocator::{PortAllocator, DEFAULT_PORT_RANGE};
pub use burrow_tunnel::SshCredentials;
pub use error::BrokerError;

use provision::Provisioner;

/// Application state shared across handlers
pub struct AppState {
    pub store: NodeStore,
    pub allocator: Arc<PortAllocator>,
    pub(crate) provisioner: Provisioner,
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Burrow Broker API",
        version = "0.1.0",
        description = "Control plane and HTTP router for SSH-tunneled nodes",
        contact(
            name = "Tunnel Team",
            email = "team@tunnel.io"
        )
    ),
    paths(
        handlers::health_check,
        handlers::register_node,
        handlers::check_account,
        handlers::random_port,
        handlers::provide_proxy,
        handlers::disconnect_node,
        handlers::check_node,
        router::route_request,
    ),
    components(
        schemas(
            burrow_proto::AccountCheckRequest,
            burrow_proto::AccountCheckResponse,
            burrow_proto::RegisterNodeRequest,
            burrow_proto::RandomPortResponse,
            burrow_proto::ProvideProxyRequest,
            burrow_proto::NodeNameRequest,
            burrow_proto::NodeStatusResponse,
            burrow_proto::MessageResponse,
            burrow_proto::HealthResponse,
            burrow_proto::ErrorResponse,
        )
    ),
    tags(
        (name = "nodes", description = "Node account and status endpoints"),
        (name = "ports", description = "Port reservation endpoints"),
        (name = "proxy", description = "Proxy tunnel establishment endpoints"),
        (name = "routing", description = "HTTP routing through node tunnels"),
        (name = "system", description = "System health and info endpoints")
    )
)]
struct ApiDoc;

/// Broker configuration
pub struct BrokerConfig {
    /// Address to bind the control API and router
    pub bind_addr: SocketAddr,
    /// Registry database URL
    pub database_url: String,
    /// Credentials the broker presents when dialing back through a
    /// node's reverse tunnel
    pub ssh: SshCredentials,
}

/// Broker server: control plane, provisioner, and router in one listener.
pub struct BrokerServer {
    config: BrokerConfig,
    state: Arc<AppState>,
}

impl BrokerServer {
    /// Connect to the registry, run migrations, and assemble the server.
    ///
    /// Any `connection_valid` rows left over from a previous run are
    /// cleared here; a fresh process has no live tunnels.
    pub async fn new(config: BrokerConfig) -> Result<Self, anyhow::Error> {
        let db = burrow_registry::connect(&config.database_url).await?;
        burrow_registry::migrate(&db).await?;

        let store = NodeStore::new(db);
        let swept = store.reset_connections().await?;
        if swept > 0 {
            info!(nodes = swept, "cleared stale connections from previous run");
        }

        let allocator = Arc::new(PortAllocator::default());
        let provisioner = Provisioner::new(store.clone(), allocator.clone(), config.ssh.clone());
        let state = Arc::new(AppState {
            store,
            allocator,
            provisioner,
        });

        Ok(Self { config, state })
    }

    /// Registry handle, mainly for tests that seed nodes directly.
    pub fn store(&self) -> NodeStore {
        self.state.store.clone()
    }

    /// Build the router with all routes
    pub fn build_router(&self) -> Router {
        let api_doc = ApiDoc::openapi();

        let api_router = Router::new()
            .route("/api/health", get(handlers::health_check))
            .route("/node/account", post(handlers::register_node))
            .route(
                "/node/account/check",
                get(handlers::check_account).post(handlers::check_account),
            )
            .route(
                "/node/check",
                get(handlers::check_node).post(handlers::check_node),
            )
            .route("/node/disconnect", post(handlers::disconnect_node))
            .route("/port/random", get(handlers::random_port))
            .route("/proxy/provide", post(handlers::provide_proxy))
            .route("/route/{node_name}/{*path}", any(router::route_request))
            .with_state(self.state.clone());

        Router::new()
            .merge(SwaggerUi::new("/swagger-ui").url("/api/openapi.json", api_doc))
            .merge(api_router)
            .layer(TraceLayer::new_for_http())
    }

    /// Start the broker
    pub async fn start(self) -> Result<(), anyhow::Error> {
        let router = self.build_router();

        info!("Starting broker on {}", self.config.bind_addr);
        info!(
            "OpenAPI spec: http://{}/api/openapi.json",
            self.config.bind_addr
        );
        info!("Swagger UI: http://{}/swagger-ui", self.config.bind_addr);

        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;

        axum::serve(listener, router)
            .await
            .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

        Ok(())
    }
}
