//! SSH session dialing and the shared stop signal.

use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ssh2::Session;
use thiserror::Error;
use tracing::debug;

/// Seconds between SSH-level keepalive probes.
const KEEPALIVE_SECS: u32 = 15;

#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("cannot reach {host}:{port}: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("ssh session with {host}:{port} failed: {source}")]
    Session {
        host: String,
        port: u16,
        #[source]
        source: ssh2::Error,
    },

    #[error("ssh authentication rejected for {user}@{host}")]
    AuthRejected { user: String, host: String },

    #[error("remote listen on port {port} failed: {source}")]
    Listen {
        port: u16,
        #[source]
        source: ssh2::Error,
    },

    #[error("local bind on port {port} failed: {source}")]
    Bind {
        port: u16,
        #[source]
        source: io::Error,
    },
}

/// Identity presented when dialing an SSH endpoint.
#[derive(Debug, Clone)]
pub struct SshCredentials {
    pub username: String,
    pub password: String,
}

/// Teardown condition polled by tunnel loops and relay threads.
///
/// Wraps a predicate over whatever state owns the tunnel: the agent checks
/// its connection context's level, the broker checks a flag derived from the
/// registry. No signal is pushed into the tunnel; the tunnel asks.
#[derive(Clone)]
pub struct StopSignal(Arc<dyn Fn() -> bool + Send + Sync>);

impl StopSignal {
    /// Stop once `predicate` returns true.
    pub fn when(predicate: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(predicate))
    }

    /// Stop once the flag is set.
    pub fn flag(flag: Arc<AtomicBool>) -> Self {
        Self::when(move || flag.load(Ordering::Relaxed))
    }

    pub fn stopped(&self) -> bool {
        (self.0)()
    }
}

/// Dial `host:port`, handshake, and authenticate with a password.
///
/// The returned session still carries the setup timeout; loop owners lower
/// it to the poll interval before entering their accept loop.
pub(crate) fn connect_session(
    host: &str,
    port: u16,
    credentials: &SshCredentials,
    timeout: Duration,
) -> Result<Session, TunnelError> {
    let addr = (host, port)
        .to_socket_addrs()
        .map_err(|source| TunnelError::Connect {
            host: host.to_string(),
            port,
            source,
        })?
        .next()
        .ok_or_else(|| TunnelError::Connect {
            host: host.to_string(),
            port,
            source: io::Error::new(io::ErrorKind::NotFound, "hostname did not resolve"),
        })?;

    let tcp = TcpStream::connect_timeout(&addr, timeout).map_err(|source| TunnelError::Connect {
        host: host.to_string(),
        port,
        source,
    })?;
    tcp.set_nodelay(true).ok();

    let session_err = |source: ssh2::Error| TunnelError::Session {
        host: host.to_string(),
        port,
        source,
    };

    let mut session = Session::new().map_err(session_err)?;
    session.set_tcp_stream(tcp);
    session.set_timeout(timeout.as_millis() as u32);
    session.handshake().map_err(session_err)?;

    session
        .userauth_password(&credentials.username, &credentials.password)
        .map_err(|_| TunnelError::AuthRejected {
            user: credentials.username.clone(),
            host: host.to_string(),
        })?;
    if !session.authenticated() {
        return Err(TunnelError::AuthRejected {
            user: credentials.username.clone(),
            host: host.to_string(),
        });
    }

    session.set_keepalive(false, KEEPALIVE_SECS);
    debug!(user = %credentials.username, host = %host, port, "ssh session established");
    Ok(session)
}
