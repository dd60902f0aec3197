//! Phase B orchestration: one supervisor per provisioned node.
//!
//! `Provisioner::provision` spawns the SOCKS-forward thread for a node and
//! an async supervisor that owns it. The supervisor polls the registry once
//! per interval and trips the tunnel's stop flag when `connection_valid`
//! goes false; the registry update on success is the single place a node is
//! marked connected.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use burrow_registry::NodeStore;
use burrow_tunnel::{run_socks_forward, SocksForward, SshCredentials, StopSignal, POLL_INTERVAL};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::allocator::PortAllocator;

/// Handle on one node's live supervisor.
struct ProvisionGuard {
    stop: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

/// Live supervisor per node, so re-provisioning replaces the previous
/// tunnel instead of stacking a second one.
struct SessionTracker {
    sessions: Mutex<HashMap<String, ProvisionGuard>>,
}

impl SessionTracker {
    fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Install `guard` for `node`, stopping any supervisor it replaces.
    fn register(&self, node: &str, guard: ProvisionGuard) {
        let mut sessions = self.sessions.lock().unwrap();
        if let Some(old) = sessions.insert(node.to_string(), guard) {
            debug!(node = %node, "replacing previous tunnel supervisor");
            old.stop.store(true, Ordering::Relaxed);
            old.task.abort();
        }
    }

    /// Remove `node`'s entry if it still belongs to the supervisor holding
    /// `stop`. Returns whether it did; a replaced supervisor gets false and
    /// must leave the registry row to its successor.
    fn unregister(&self, node: &str, stop: &Arc<AtomicBool>) -> bool {
        let mut sessions = self.sessions.lock().unwrap();
        if sessions
            .get(node)
            .is_some_and(|guard| Arc::ptr_eq(&guard.stop, stop))
        {
            sessions.remove(node);
            true
        } else {
            false
        }
    }
}

/// Spawns and supervises Phase B tunnels.
#[derive(Clone)]
pub(crate) struct Provisioner {
    store: NodeStore,
    allocator: Arc<PortAllocator>,
    tracker: Arc<SessionTracker>,
    ssh: SshCredentials,
}

impl Provisioner {
    pub(crate) fn new(store: NodeStore, allocator: Arc<PortAllocator>, ssh: SshCredentials) -> Self {
        Self {
            store,
            allocator,
            tracker: Arc::new(SessionTracker::new()),
            ssh,
        }
    }

    /// Start Phase B for a node in the background and return immediately.
    ///
    /// The SSH session is dialed to `127.0.0.1:remote_ssh_port`, the
    /// endpoint the node's reverse tunnel created, so it authenticates
    /// through to the node's machine.
    pub(crate) fn provision(&self, node: String, remote_ssh_port: u16, proxy_port: u16) {
        let forward = SocksForward {
            host: "127.0.0.1".to_string(),
            port: remote_ssh_port,
            credentials: self.ssh.clone(),
            proxy_port,
        };

        let flag = Arc::new(AtomicBool::new(false));
        let this = self.clone();
        let task = {
            let node = node.clone();
            let flag = flag.clone();
            tokio::spawn(async move { this.supervise(node, forward, flag).await })
        };

        self.tracker.register(&node, ProvisionGuard { stop: flag, task });
    }

    async fn supervise(self, node: String, forward: SocksForward, flag: Arc<AtomicBool>) {
        let proxy_port = forward.proxy_port;
        let remote_port = forward.port;

        let (ready_tx, ready_rx) = oneshot::channel();
        let stop = StopSignal::flag(flag.clone());
        let mut tunnel = tokio::task::spawn_blocking(move || run_socks_forward(forward, ready_tx, stop));

        let ready = match ready_rx.await {
            Ok(result) => result,
            Err(_) => {
                error!(node = %node, remote_port, "proxy tunnel thread died before readiness");
                flag.store(true, Ordering::Relaxed);
                let _ = tunnel.await;
                self.cleanup(&node, proxy_port, &flag).await;
                return;
            }
        };

        if let Err(err) = ready {
            error!(node = %node, remote_port, proxy_port, "proxy tunnel setup failed: {err}");
            flag.store(true, Ordering::Relaxed);
            let _ = tunnel.await;
            self.cleanup(&node, proxy_port, &flag).await;
            return;
        }

        // Tunnel is live. The single atomic update that sets the pair.
        if let Err(err) = self.store.mark_connected(&node, proxy_port).await {
            error!(node = %node, "could not record connection: {err}");
            flag.store(true, Ordering::Relaxed);
            let _ = tunnel.await;
            self.cleanup(&node, proxy_port, &flag).await;
            return;
        }
        info!(node = %node, proxy_port, "proxy provisioned");

        // Keep-alive: watch the registry once per interval, and the thread
        // itself in case the session drops from the far side.
        let mut tunnel_done = false;
        loop {
            tokio::select! {
                _ = &mut tunnel => {
                    warn!(node = %node, "proxy tunnel ended");
                    tunnel_done = true;
                    break;
                }
                _ = tokio::time::sleep(POLL_INTERVAL) => {
                    if flag.load(Ordering::Relaxed) {
                        break;
                    }
                    match self.store.connection_valid(&node).await {
                        Ok(true) => {}
                        Ok(false) => {
                            debug!(node = %node, "disconnect observed");
                            break;
                        }
                        Err(err) => warn!(node = %node, "registry poll failed: {err}"),
                    }
                }
            }
        }

        flag.store(true, Ordering::Relaxed);
        if !tunnel_done {
            let _ = tunnel.await;
        }
        self.cleanup(&node, proxy_port, &flag).await;
    }

    /// Tear down this supervisor's claim: clear the registry row (unless a
    /// successor owns it now) and return the port reservation.
    async fn cleanup(&self, node: &str, proxy_port: u16, flag: &Arc<AtomicBool>) {
        if self.tracker.unregister(node, flag) {
            if let Err(err) = self.store.mark_disconnected(node).await {
                debug!(node = %node, "disconnect on cleanup: {err}");
            }
        }
        self.allocator.release(proxy_port);
        info!(node = %node, proxy_port, "proxy session ended");
    }
}
