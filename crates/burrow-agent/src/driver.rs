//! Reverse-tunnel establishment behind a trait, so the state machine can
//! be exercised without an SSH peer.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use burrow_tunnel::{run_reverse_forward, ReverseForward, SshCredentials, StopSignal};
use tokio::sync::oneshot;
use tracing::info;

use crate::control::ControlApi;
use crate::error::AgentError;
use crate::state::{ConnectionContext, TargetInfo};

#[async_trait]
pub trait TunnelDriver: Send + Sync {
    /// Bring up the reverse tunnel toward `target`, recording the broker
    /// port it binds in the context. Returns once the tunnel is serving;
    /// the tunnel then lives until the context's level falls to 1 or
    /// below.
    async fn establish(
        &self,
        target: TargetInfo,
        ctx: Arc<RwLock<ConnectionContext>>,
    ) -> Result<(), AgentError>;
}

/// Production driver: SSH reverse port forward into the broker host,
/// exposing this machine's own SSH listener there.
pub struct SshTunnelDriver {
    ssh: SshCredentials,
    local_ssh_port: u16,
    control_api_port: u16,
}

impl SshTunnelDriver {
    pub fn new(ssh: SshCredentials, local_ssh_port: u16, control_api_port: u16) -> Self {
        Self {
            ssh,
            local_ssh_port,
            control_api_port,
        }
    }
}

#[async_trait]
impl TunnelDriver for SshTunnelDriver {
    async fn establish(
        &self,
        target: TargetInfo,
        ctx: Arc<RwLock<ConnectionContext>>,
    ) -> Result<(), AgentError> {
        let control = ControlApi::new(&target.server_host, self.control_api_port);
        let remote_port = control.random_port().await?;
        ctx.write().unwrap().remote_tunnel_port = Some(remote_port);

        let forward = ReverseForward {
            host: target.server_host.clone(),
            port: target.server_ssh_port,
            credentials: self.ssh.clone(),
            remote_port,
            local_port: self.local_ssh_port,
        };

        // The loop answers to the context alone: once the level falls back
        // to 1 or below, the session closes within one poll interval.
        let stop = {
            let ctx = ctx.clone();
            StopSignal::when(move || ctx.read().unwrap().state.level() <= 1)
        };

        // Detached on purpose: the loop answers to the stop signal, not to
        // this handle.
        let (ready_tx, ready_rx) = oneshot::channel();
        let _ = tokio::task::spawn_blocking(move || run_reverse_forward(forward, ready_tx, stop));

        match ready_rx.await {
            Ok(Ok(())) => {
                info!(remote_port, "reverse tunnel serving");
                Ok(())
            }
            Ok(Err(err)) => Err(AgentError::TunnelSetupFailed(err.to_string())),
            Err(_) => Err(AgentError::TunnelSetupFailed(
                "tunnel thread died during setup".to_string(),
            )),
        }
    }
}
