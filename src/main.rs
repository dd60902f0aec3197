//! Burrow CLI - reach services behind NAT through an SSH tunnel broker
//!
//! `burrow serve` runs the public broker; `burrow node` runs the agent on
//! the machine being exposed.

use std::net::SocketAddr;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use burrow_agent::{AgentConfig, AgentServer};
use burrow_broker::{BrokerConfig, BrokerServer, SshCredentials};

/// Burrow - reach services behind NAT through an SSH tunnel broker
#[derive(Parser, Debug)]
#[command(name = "burrow")]
#[command(about = "Burrow - reach services behind NAT through an SSH tunnel broker")]
#[command(version)]
#[command(long_version = concat!(
    env!("CARGO_PKG_VERSION"),
    "\nCommit: ", env!("GIT_HASH"),
    "\nBuilt: ", env!("BUILD_TIME")
))]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the public broker: control plane, tunnel provisioning, and router
    #[command(long_about = r#"
Run the public-side broker. It keeps the node registry, hands out free
ports, dials the proxy half of each tunnel, and routes HTTP requests
addressed to /route/{node}/... into the node's local network.

EXAMPLES:
  # Broker with the registry in a local SQLite file
  burrow serve --listen 0.0.0.0:58000 \
    --ssh-user tunnel --ssh-password $CLIENT_SSH_USER_PASSWORD

ENVIRONMENT VARIABLES:
  BURROW_DATABASE_URL        Registry database URL
  CLIENT_SSH_USER            SSH user on node machines the broker dials into
  CLIENT_SSH_USER_PASSWORD   Password for that user
    "#)]
    Serve {
        /// Address to bind the control API and router
        #[arg(long, default_value = "0.0.0.0:58000")]
        listen: SocketAddr,

        /// Registry database URL
        #[arg(
            long,
            env = "BURROW_DATABASE_URL",
            default_value = "sqlite://burrow.db?mode=rwc"
        )]
        database_url: String,

        /// SSH user on node machines the broker dials into
        #[arg(long, env = "CLIENT_SSH_USER")]
        ssh_user: String,

        /// Password for that user
        #[arg(long, env = "CLIENT_SSH_USER_PASSWORD")]
        ssh_password: String,
    },

    /// Run the node agent on the machine being exposed
    #[command(long_about = r#"
Run the agent next to the service being exposed. It serves the local
lifecycle API; stepping the connection forward registers this machine
with the broker and keeps the reverse tunnel up.

EXAMPLES:
  # Agent on a machine whose sshd listens on the default port
  burrow node --ssh-user tunnel --ssh-password $SERVER_SSH_USER_PASSWORD

ENVIRONMENT VARIABLES:
  SERVER_SSH_USER            SSH user on the broker host the agent dials into
  SERVER_SSH_USER_PASSWORD   Password for that user
  LOCAL_SSH_PORT             This machine's own sshd port
  SERVER_CONTROL_API_PORT    Port of the broker's control API
    "#)]
    Node {
        /// Address to bind the local lifecycle API
        #[arg(long, default_value = "0.0.0.0:58001")]
        listen: SocketAddr,

        /// SSH user on the broker host the agent dials into
        #[arg(long, env = "SERVER_SSH_USER")]
        ssh_user: String,

        /// Password for that user
        #[arg(long, env = "SERVER_SSH_USER_PASSWORD")]
        ssh_password: String,

        /// This machine's own sshd port, the reverse tunnel's far end
        #[arg(long, env = "LOCAL_SSH_PORT", default_value = "22")]
        local_ssh_port: u16,

        /// Port of the broker's control API
        #[arg(long, env = "SERVER_CONTROL_API_PORT", default_value = "58000")]
        control_api_port: u16,
    },
}

/// Setup logging with the specified log level
fn setup_logging(verbose: bool) {
    let log_level = if verbose { "debug" } else { "info" };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let server_task = match cli.command {
        Commands::Serve {
            listen,
            database_url,
            ssh_user,
            ssh_password,
        } => {
            info!("Burrow broker starting...");
            info!("Registry: {}", database_url);

            let config = BrokerConfig {
                bind_addr: listen,
                database_url,
                ssh: SshCredentials {
                    username: ssh_user,
                    password: ssh_password,
                },
            };

            let broker = BrokerServer::new(config).await?;
            tokio::spawn(broker.start())
        }
        Commands::Node {
            listen,
            ssh_user,
            ssh_password,
            local_ssh_port,
            control_api_port,
        } => {
            info!("Burrow agent starting...");
            info!("Local sshd port: {}", local_ssh_port);

            let config = AgentConfig {
                bind_addr: listen,
                ssh: SshCredentials {
                    username: ssh_user,
                    password: ssh_password,
                },
                local_ssh_port,
                control_api_port,
            };

            tokio::spawn(AgentServer::new(config).start())
        }
    };

    tokio::select! {
        _ = &mut ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        }
        result = server_task => {
            match result {
                Ok(Ok(())) => info!("Server stopped normally"),
                Ok(Err(e)) => {
                    error!("Server error: {:#}", e);
                    return Err(e);
                }
                Err(e) => {
                    error!("Server task panicked: {}", e);
                    return Err(e.into());
                }
            }
        }
    }

    info!("Burrow stopped");
    Ok(())
}
