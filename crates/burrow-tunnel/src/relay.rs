//! Stop-aware byte shuttling between an SSH channel and a TCP stream.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::thread;

use ssh2::Channel;
use tracing::{debug, warn};

use crate::session::StopSignal;
use crate::POLL_INTERVAL;

const RELAY_BUF: usize = 16 * 1024;

/// Timeout-style errors that mean "no progress yet", not failure. Both the
/// TCP stream and the SSH stream are configured with read/write timeouts so
/// a stalled direction wakes up to poll the stop signal.
fn is_poll_tick(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}

/// Copy `reader` into `writer` until EOF, a hard error, or the stop signal.
fn pump<R: Read, W: Write>(mut reader: R, mut writer: W, stop: &StopSignal) -> io::Result<u64> {
    let mut buf = [0u8; RELAY_BUF];
    let mut total = 0u64;

    loop {
        if stop.stopped() {
            return Ok(total);
        }

        let n = match reader.read(&mut buf) {
            Ok(0) => return Ok(total),
            Ok(n) => n,
            Err(ref err) if is_poll_tick(err) => continue,
            Err(err) => return Err(err),
        };

        let mut written = 0;
        while written < n {
            if stop.stopped() {
                return Ok(total);
            }
            match writer.write(&buf[written..n]) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(m) => {
                    written += m;
                    total += m as u64;
                }
                Err(ref err) if is_poll_tick(err) => continue,
                Err(err) => return Err(err),
            }
        }
    }
}

/// Bridge one forwarded connection: TCP bytes into the channel and channel
/// bytes back out, in two threads. Half-closes propagate in both directions
/// (TCP EOF becomes channel EOF, channel EOF shuts the TCP write side) so
/// finished connections drain instead of idling until teardown.
pub(crate) fn bridge(mut channel: Channel, stream: TcpStream, stop: StopSignal) {
    stream.set_nodelay(true).ok();
    stream.set_read_timeout(Some(POLL_INTERVAL)).ok();
    stream.set_write_timeout(Some(POLL_INTERVAL)).ok();

    let mut ssh_read = channel.stream(0);
    let ssh_write = channel.stream(0);

    let (tcp_read, mut tcp_write) = match stream.try_clone() {
        Ok(clone) => (stream, clone),
        Err(err) => {
            warn!("could not clone relay stream: {err}");
            return;
        }
    };

    let to_ssh = {
        let stop = stop.clone();
        thread::spawn(move || pump(tcp_read, ssh_write, &stop))
    };
    let from_ssh = {
        let stop = stop.clone();
        thread::spawn(move || {
            let result = pump(&mut ssh_read, &mut tcp_write, &stop);
            tcp_write.shutdown(Shutdown::Write).ok();
            result
        })
    };

    let sent = join_direction(to_ssh, "tcp to ssh");
    channel.send_eof().ok();
    let received = join_direction(from_ssh, "ssh to tcp");

    if let Err(err) = channel.close() {
        debug!("channel close: {err}");
    }
    debug!(sent, received, "relay finished");
}

fn join_direction(handle: thread::JoinHandle<io::Result<u64>>, direction: &str) -> u64 {
    match handle.join() {
        Ok(Ok(bytes)) => bytes,
        Ok(Err(err)) => {
            debug!("relay {direction} ended: {err}");
            0
        }
        Err(_) => {
            warn!("relay {direction} panicked");
            0
        }
    }
}
