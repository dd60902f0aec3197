//! SSH double-hop plumbing shared by the broker and the node agent.
//!
//! Two tunnel halves live here:
//!
//! - [`run_reverse_forward`] (agent side, "Phase A"): an outbound SSH session
//!   to the broker that asks the broker to listen on an ephemeral port and
//!   hand arriving connections back over the session, where they are bridged
//!   to the agent machine's own SSH listener.
//! - [`run_socks_forward`] (broker side, "Phase B"): an SSH session dialed
//!   into the Phase A endpoint, so it authenticates through to the agent
//!   machine, plus a local SOCKS5 listener whose CONNECTs are satisfied with
//!   direct-tcpip channels over that session. Traffic into the SOCKS port
//!   egresses on the agent machine.
//!
//! Both halves block, so callers run them on dedicated threads
//! (`spawn_blocking`) and learn about readiness over a oneshot channel.
//! Teardown is cooperative: every loop and relay polls a [`StopSignal`] at
//! [`POLL_INTERVAL`] granularity and the loop owner closes the session once
//! the signal fires, which collapses any remaining relays.

use std::time::Duration;

mod relay;
mod reverse;
mod session;
mod socks;
pub mod socks5;

pub use reverse::{run_reverse_forward, ReverseForward};
pub use session::{SshCredentials, StopSignal, TunnelError};
pub use socks::{run_socks_forward, SocksForward};

/// Cadence at which tunnel loops re-check their stop condition.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Bound on TCP connect and SSH handshake/auth during tunnel setup.
pub(crate) const SETUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Sleep between polls of a non-blocking accept.
pub(crate) const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);
