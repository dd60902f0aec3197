//! Phase A of the tunnel: a reverse port forward held open by the agent.
//!
//! The agent dials the broker's SSH endpoint and asks it to listen on the
//! ephemeral port the control plane handed out. Every connection the broker
//! accepts there is delivered back over the session and bridged to the
//! agent machine's own SSH listener, so `broker:remote_port` becomes a door
//! into the agent's sshd without the agent opening any inbound port.

use std::net::TcpStream;
use std::thread;

use ssh2::{Listener, Session};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::relay::bridge;
use crate::session::{connect_session, SshCredentials, StopSignal, TunnelError};
use crate::{ACCEPT_RETRY_DELAY, POLL_INTERVAL, SETUP_TIMEOUT};

/// Parameters for the agent half of the tunnel.
#[derive(Debug, Clone)]
pub struct ReverseForward {
    /// Broker host to dial.
    pub host: String,
    /// Broker SSH port.
    pub port: u16,
    /// Identity the broker accepts for tunnel sessions.
    pub credentials: SshCredentials,
    /// Broker-side port to listen on (from the port allocator).
    pub remote_port: u16,
    /// Local SSH listener that forwarded connections are bridged to.
    pub local_port: u16,
}

/// Open the reverse forward and serve it until the stop signal fires.
///
/// Blocks for the life of the tunnel; run it on a dedicated thread. `ready`
/// resolves once the remote listener is bound (or with the setup error), so
/// the caller can sequence work that needs the forward to exist.
pub fn run_reverse_forward(
    forward: ReverseForward,
    ready: oneshot::Sender<Result<(), TunnelError>>,
    stop: StopSignal,
) {
    let (session, listener) = match setup(&forward) {
        Ok(pair) => pair,
        Err(err) => {
            let _ = ready.send(Err(err));
            return;
        }
    };

    // From here on the session timeout is the poll cadence: accept() wakes
    // at least once per interval to check the stop signal.
    session.set_timeout(POLL_INTERVAL.as_millis() as u32);
    let _ = ready.send(Ok(()));
    info!(
        broker = %format!("{}:{}", forward.host, forward.port),
        remote_port = forward.remote_port,
        local_port = forward.local_port,
        "reverse tunnel established"
    );

    accept_loop(&forward, &session, listener, &stop);

    session.disconnect(None, "tunnel closed", None).ok();
    info!(remote_port = forward.remote_port, "reverse tunnel closed");
}

fn setup(forward: &ReverseForward) -> Result<(Session, Listener), TunnelError> {
    let session = connect_session(&forward.host, forward.port, &forward.credentials, SETUP_TIMEOUT)?;

    let (listener, bound_port) = session
        .channel_forward_listen(forward.remote_port, Some("127.0.0.1"), None)
        .map_err(|source| TunnelError::Listen {
            port: forward.remote_port,
            source,
        })?;
    debug!(requested = forward.remote_port, bound = bound_port, "remote listener bound");

    Ok((session, listener))
}

fn accept_loop(forward: &ReverseForward, session: &Session, mut listener: Listener, stop: &StopSignal) {
    loop {
        match listener.accept() {
            Ok(channel) => {
                debug!(remote_port = forward.remote_port, "forwarded connection accepted");
                match TcpStream::connect(("127.0.0.1", forward.local_port)) {
                    Ok(local) => {
                        let stop = stop.clone();
                        thread::spawn(move || bridge(channel, local, stop));
                    }
                    Err(err) => {
                        warn!(
                            local_port = forward.local_port,
                            "local ssh listener refused forwarded connection: {err}"
                        );
                    }
                }
            }
            Err(err) => {
                // Expected once per poll interval when no connection arrived;
                // a failing keepalive means the session itself is gone.
                if session.keepalive_send().is_err() {
                    warn!(remote_port = forward.remote_port, "ssh session lost: {err}");
                    break;
                }
                thread::sleep(ACCEPT_RETRY_DELAY);
            }
        }

        if stop.stopped() {
            debug!(remote_port = forward.remote_port, "stop condition reached");
            break;
        }
    }
}
