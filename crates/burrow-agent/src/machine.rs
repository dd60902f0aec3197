//! The connection state machine driving the agent's tunnel lifecycle.
//!
//! Transitions run one at a time against the single shared context.
//! Leaving level 0 schedules the reverse-tunnel setup as a background
//! task and returns immediately; the machine advances to level 2 only
//! when that task reports the tunnel serving. Rollback never skips
//! levels, and the tunnel loops discover rollback on their own by
//! polling the context's level.

use std::sync::{Arc, Mutex, RwLock};

use burrow_proto::{NodeInfoRequest, NodeInfoResponse, ProvideProxyRequest};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::control::ControlApi;
use crate::driver::TunnelDriver;
use crate::error::AgentError;
use crate::state::{ConnectionContext, ConnectionState, TargetInfo};

pub struct ConnectionMachine {
    ctx: Arc<RwLock<ConnectionContext>>,
    driver: Arc<dyn TunnelDriver>,
    control_api_port: u16,
    /// Handle on the in-flight reverse-tunnel setup, if any. Only one
    /// setup runs at a time; a finished handle is replaced on relaunch.
    setup: Mutex<Option<JoinHandle<()>>>,
    /// Serializes `proceed`/`turn_back` against each other.
    op_lock: tokio::sync::Mutex<()>,
}

impl ConnectionMachine {
    pub fn new(driver: Arc<dyn TunnelDriver>, control_api_port: u16) -> Self {
        Self {
            ctx: Arc::new(RwLock::new(ConnectionContext::default())),
            driver,
            control_api_port,
            setup: Mutex::new(None),
            op_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.ctx.read().unwrap().state
    }

    /// Store broker coordinates and node identity for later transitions.
    pub fn set_info(&self, request: NodeInfoRequest) {
        let mut ctx = self.ctx.write().unwrap();
        ctx.info = Some(TargetInfo {
            server_host: request.server_host,
            server_ssh_port: request.server_ssh_port,
            node_name: request.node_name,
            node_password: request.node_password,
        });
    }

    /// Current settings and state, with the password withheld.
    pub fn snapshot(&self) -> NodeInfoResponse {
        let ctx = self.ctx.read().unwrap();
        NodeInfoResponse {
            server_host: ctx.info.as_ref().map(|info| info.server_host.clone()),
            server_ssh_port: ctx.info.as_ref().map(|info| info.server_ssh_port),
            node_name: ctx.info.as_ref().map(|info| info.node_name.clone()),
            remote_tunnel_port: ctx.remote_tunnel_port,
            proxy_port: ctx.proxy_port,
            state: ctx.state.name().to_string(),
        }
    }

    /// Advance one level. Safe to repeat at the top; failures leave the
    /// state unchanged and the caller retries.
    pub async fn proceed(&self) -> Result<ConnectionState, AgentError> {
        let _op = self.op_lock.lock().await;

        match self.state() {
            ConnectionState::Disconnected | ConnectionState::AwaitingReverseTunnel => {
                if self.setup_in_flight() {
                    // A dial is already converging; adopt it.
                    self.ctx.write().unwrap().state = ConnectionState::AwaitingReverseTunnel;
                } else {
                    let info = self.require_info()?;
                    let valid = self
                        .control(&info.server_host)
                        .check_account(&info.node_name, &info.node_password)
                        .await?;
                    if !valid {
                        return Err(AgentError::AuthenticationRejected(info.node_name));
                    }
                    self.ctx.write().unwrap().state = ConnectionState::AwaitingReverseTunnel;
                    self.launch(info);
                }
            }
            ConnectionState::ReverseTunnelEstablished => {
                self.ctx.write().unwrap().state = ConnectionState::AwaitingProxy;
            }
            ConnectionState::AwaitingProxy => {
                let info = self.require_info()?;
                let remote_ssh_port = self
                    .ctx
                    .read()
                    .unwrap()
                    .remote_tunnel_port
                    .ok_or(AgentError::MissingInfo("remote tunnel port"))?;

                let control = self.control(&info.server_host);
                let proxy_port = control.random_port().await?;
                control
                    .provide_proxy(&ProvideProxyRequest {
                        node_name: info.node_name.clone(),
                        node_password: info.node_password.clone(),
                        remote_ssh_port,
                        proxy_port,
                    })
                    .await?;

                let mut ctx = self.ctx.write().unwrap();
                ctx.proxy_port = Some(proxy_port);
                ctx.state = ConnectionState::ProxyEstablished;
                info!(proxy_port, "proxy provisioning acknowledged");
            }
            ConnectionState::ProxyEstablished => {}
        }

        Ok(self.state())
    }

    /// Step back exactly one level, or stay at 0. At the top this asks the
    /// broker to disconnect first; if that call fails the state holds at 4
    /// so the caller can retry.
    pub async fn turn_back(&self) -> Result<ConnectionState, AgentError> {
        let _op = self.op_lock.lock().await;

        match self.state() {
            ConnectionState::Disconnected => {}
            ConnectionState::AwaitingReverseTunnel => {
                let mut ctx = self.ctx.write().unwrap();
                ctx.state = ConnectionState::Disconnected;
                ctx.remote_tunnel_port = None;
            }
            ConnectionState::ReverseTunnelEstablished => {
                // The tunnel loop notices the level drop and closes itself.
                let mut ctx = self.ctx.write().unwrap();
                ctx.state = ConnectionState::AwaitingReverseTunnel;
                ctx.remote_tunnel_port = None;
            }
            ConnectionState::AwaitingProxy => {
                self.ctx.write().unwrap().state = ConnectionState::ReverseTunnelEstablished;
            }
            ConnectionState::ProxyEstablished => {
                let info = self.require_info()?;
                self.control(&info.server_host)
                    .disconnect(&info.node_name)
                    .await
                    .map_err(|err| AgentError::TeardownFailed(err.to_string()))?;

                let mut ctx = self.ctx.write().unwrap();
                ctx.state = ConnectionState::AwaitingProxy;
                ctx.proxy_port = None;
            }
        }

        Ok(self.state())
    }

    fn control(&self, server_host: &str) -> ControlApi {
        ControlApi::new(server_host, self.control_api_port)
    }

    fn require_info(&self) -> Result<TargetInfo, AgentError> {
        self.ctx
            .read()
            .unwrap()
            .info
            .clone()
            .ok_or(AgentError::MissingInfo("node info"))
    }

    fn setup_in_flight(&self) -> bool {
        self.setup
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Schedule the reverse-tunnel setup; its completion callback performs
    /// the advance to level 2, unless a rollback got there first.
    fn launch(&self, info: TargetInfo) {
        let driver = self.driver.clone();
        let ctx = self.ctx.clone();
        let node = info.node_name.clone();
        info!(node = %node, broker = %info.server_host, "starting reverse tunnel setup");

        let handle = tokio::spawn(async move {
            match driver.establish(info, ctx.clone()).await {
                Ok(()) => {
                    let mut ctx = ctx.write().unwrap();
                    if ctx.state == ConnectionState::AwaitingReverseTunnel {
                        ctx.state = ConnectionState::ReverseTunnelEstablished;
                        info!(node = %node, "reverse tunnel established");
                    } else {
                        // Turned back while dialing; the tunnel observes the
                        // level and closes on its own.
                        debug!(node = %node, state = %ctx.state, "tunnel came up after rollback");
                    }
                }
                Err(err) => {
                    error!(node = %node, "reverse tunnel setup failed: {err}");
                }
            }
        });

        *self.setup.lock().unwrap() = Some(handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct NeverDriver;

    #[async_trait]
    impl TunnelDriver for NeverDriver {
        async fn establish(
            &self,
            _target: TargetInfo,
            _ctx: Arc<RwLock<ConnectionContext>>,
        ) -> Result<(), AgentError> {
            unreachable!("must not be dialed in these tests")
        }
    }

    #[tokio::test]
    async fn proceed_without_info_fails_in_place() {
        let machine = ConnectionMachine::new(Arc::new(NeverDriver), 58000);
        let err = machine.proceed().await.unwrap_err();
        assert!(matches!(err, AgentError::MissingInfo(_)));
        assert_eq!(machine.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn turn_back_is_a_no_op_at_the_bottom() {
        let machine = ConnectionMachine::new(Arc::new(NeverDriver), 58000);
        let state = machine.turn_back().await.unwrap();
        assert_eq!(state, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn snapshot_never_echoes_the_password() {
        let machine = ConnectionMachine::new(Arc::new(NeverDriver), 58000);
        machine.set_info(NodeInfoRequest {
            server_host: "broker.example".to_string(),
            server_ssh_port: 22,
            node_name: "kitchen-pi".to_string(),
            node_password: "hunter2".to_string(),
        });

        let snapshot = machine.snapshot();
        assert_eq!(snapshot.server_host.as_deref(), Some("broker.example"));
        assert_eq!(snapshot.node_name.as_deref(), Some("kitchen-pi"));
        assert_eq!(snapshot.state, "Disconnected");

        let wire = serde_json::to_string(&snapshot).unwrap();
        assert!(!wire.contains("hunter2"));
    }
}
