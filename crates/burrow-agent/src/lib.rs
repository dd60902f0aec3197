//! Node-side agent: owns the connection state machine, the reverse half
//! of the tunnel, and the local HTTP surface that steps the lifecycle.

pub mod control;
pub mod driver;
pub mod error;
pub mod handlers;
pub mod machine;
pub mod server;
pub mod state;

pub use burrow_tunnel::SshCredentials;
pub use control::ControlApi;
pub use driver::{SshTunnelDriver, TunnelDriver};
pub use error::AgentError;
pub use machine::ConnectionMachine;
pub use server::{AgentConfig, AgentServer, AgentState};
pub use state::{ConnectionContext, ConnectionState, TargetInfo};
