//! Connection lifecycle states and the agent's shared context.

use std::fmt;

/// The five lifecycle states, ordered by level.
///
/// `proceed` moves up one level at a time (with level 1 advancing in the
/// background), `turn_back` moves down exactly one. Levels never skip, so
/// rollback from any state is a fixed sequence of single steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No tunnel activity, level 0.
    Disconnected,
    /// Reverse tunnel setup is running in the background, level 1.
    AwaitingReverseTunnel,
    /// The broker can reach this machine's SSH listener, level 2.
    ReverseTunnelEstablished,
    /// Ready to ask the broker for the proxy half, level 3.
    AwaitingProxy,
    /// Proxy provisioning acknowledged, level 4. Terminal for `proceed`.
    ProxyEstablished,
}

impl ConnectionState {
    pub fn level(&self) -> u8 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::AwaitingReverseTunnel => 1,
            ConnectionState::ReverseTunnelEstablished => 2,
            ConnectionState::AwaitingProxy => 3,
            ConnectionState::ProxyEstablished => 4,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::AwaitingReverseTunnel => "AwaitingReverseTunnel",
            ConnectionState::ReverseTunnelEstablished => "ReverseTunnelEstablished",
            ConnectionState::AwaitingProxy => "AwaitingProxy",
            ConnectionState::ProxyEstablished => "ProxyEstablished",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Where to find the broker and how to identify to it.
#[derive(Debug, Clone)]
pub struct TargetInfo {
    pub server_host: String,
    pub server_ssh_port: u16,
    pub node_name: String,
    pub node_password: String,
}

/// The one piece of shared mutable state on the agent.
///
/// Every transition reads and writes this under its lock; the reverse
/// tunnel's keep-alive loop reads only `state` to decide when to die.
#[derive(Debug)]
pub struct ConnectionContext {
    /// Broker coordinates, set through `POST /node/info`.
    pub info: Option<TargetInfo>,
    /// Broker port the reverse tunnel binds, while one is being set up or
    /// serving.
    pub remote_tunnel_port: Option<u16>,
    /// Broker SOCKS5 port, while the proxy half is provisioned.
    pub proxy_port: Option<u16>,
    pub state: ConnectionState,
}

impl Default for ConnectionContext {
    fn default() -> Self {
        Self {
            info: None,
            remote_tunnel_port: None,
            proxy_port: None,
            state: ConnectionState::Disconnected,
        }
    }
}
