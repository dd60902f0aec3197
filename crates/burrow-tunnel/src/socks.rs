//! Phase B of the tunnel: a SOCKS5 listener whose egress is the agent
//! machine.
//!
//! The broker dials `host:port` (normally `127.0.0.1:remote_port`, the
//! endpoint Phase A created), so the SSH session actually terminates on the
//! agent machine's sshd. Every CONNECT accepted on the local SOCKS5 port is
//! satisfied with a direct-tcpip channel over that session, which means the
//! target address is resolved and dialed from the agent's network.

use std::io;
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;

use ssh2::Session;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::relay::bridge;
use crate::session::{connect_session, SshCredentials, StopSignal, TunnelError};
use crate::socks5::{self, Reply};
use crate::{ACCEPT_RETRY_DELAY, POLL_INTERVAL, SETUP_TIMEOUT};

/// Parameters for the broker half of the tunnel.
#[derive(Debug, Clone)]
pub struct SocksForward {
    /// Host carrying the agent's sshd, normally the Phase A loopback endpoint.
    pub host: String,
    /// Port of the Phase A reverse listener.
    pub port: u16,
    /// Identity the agent machine accepts.
    pub credentials: SshCredentials,
    /// Local port to bind the SOCKS5 listener on.
    pub proxy_port: u16,
}

/// Open the SOCKS forward and serve it until the stop signal fires.
///
/// Blocks for the life of the tunnel; run it on a dedicated thread. `ready`
/// resolves once the SOCKS listener is bound (or with the setup error).
/// Closing is cooperative: once `stop` fires the listener is dropped and the
/// session disconnected, which collapses any in-flight relays.
pub fn run_socks_forward(
    forward: SocksForward,
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
    let session = Arc::new(session);

    session.set_timeout(POLL_INTERVAL.as_millis() as u32);
    let _ = ready.send(Ok(()));
    info!(
        agent_endpoint = %format!("{}:{}", forward.host, forward.port),
        proxy_port = forward.proxy_port,
        "socks forward listening"
    );

    accept_loop(&forward, &session, &listener, &stop);

    drop(listener);
    session.disconnect(None, "tunnel closed", None).ok();
    info!(proxy_port = forward.proxy_port, "socks forward closed");
}

fn setup(forward: &SocksForward) -> Result<(Session, TcpListener), TunnelError> {
    let session = connect_session(&forward.host, forward.port, &forward.credentials, SETUP_TIMEOUT)?;

    let listener =
        TcpListener::bind(("127.0.0.1", forward.proxy_port)).map_err(|source| TunnelError::Bind {
            port: forward.proxy_port,
            source,
        })?;
    listener
        .set_nonblocking(true)
        .map_err(|source| TunnelError::Bind {
            port: forward.proxy_port,
            source,
        })?;

    Ok((session, listener))
}

fn accept_loop(forward: &SocksForward, session: &Arc<Session>, listener: &TcpListener, stop: &StopSignal) {
    loop {
        if stop.stopped() {
            debug!(proxy_port = forward.proxy_port, "stop condition reached");
            break;
        }

        match listener.accept() {
            Ok((stream, peer)) => {
                debug!(%peer, proxy_port = forward.proxy_port, "socks client connected");
                let session = session.clone();
                let stop = stop.clone();
                thread::spawn(move || {
                    if let Err(err) = serve_connection(&session, stream, stop) {
                        debug!("socks connection ended: {err}");
                    }
                });
            }
            Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_RETRY_DELAY);
            }
            Err(err) => {
                warn!(proxy_port = forward.proxy_port, "socks listener failed: {err}");
                break;
            }
        }
    }
}

/// Handshake one SOCKS client and bridge it onto a direct-tcpip channel.
fn serve_connection(session: &Session, mut stream: TcpStream, stop: StopSignal) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(SETUP_TIMEOUT))?;
    stream.set_write_timeout(Some(SETUP_TIMEOUT))?;

    let target = socks5::read_request(&mut stream)?;

    let channel = match session.channel_direct_tcpip(&target.host, target.port, None) {
        Ok(channel) => channel,
        Err(err) => {
            debug!(host = %target.host, port = target.port, "direct-tcpip open failed: {err}");
            socks5::send_reply(&mut stream, Reply::HostUnreachable)?;
            return Ok(());
        }
    };

    socks5::send_reply(&mut stream, Reply::Succeeded)?;
    debug!(host = %target.host, port = target.port, "socks connect bridged");
    bridge(channel, stream, stop);
    Ok(())
}
