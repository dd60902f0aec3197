//! Ephemeral port allocator.

use std::collections::HashMap;
use std::net::TcpListener;
use std::ops::RangeInclusive;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::debug;

use crate::error::BrokerError;

/// Range probed for reverse-tunnel and proxy ports.
pub const DEFAULT_PORT_RANGE: RangeInclusive<u16> = 10_000..=40_000;

const MAX_ATTEMPTS: u32 = 256;
const RESERVATION_TTL: Duration = Duration::from_secs(60);

/// Hands out currently bindable TCP ports.
///
/// Allocation attempts are serialized by the internal lock, and each issued
/// port stays reserved for [`RESERVATION_TTL`], so two concurrent callers
/// can never receive the same port before either has bound it. The bind
/// probe makes the port free at the instant of the call; a later bind race
/// is the caller's proceed-time failure, not an allocator defect.
pub struct PortAllocator {
    range: RangeInclusive<u16>,
    reserved: Mutex<HashMap<u16, Instant>>,
}

impl PortAllocator {
    pub fn new(range: RangeInclusive<u16>) -> Self {
        Self {
            range,
            reserved: Mutex::new(HashMap::new()),
        }
    }

    /// Probe random ports in the range until one binds, erroring after a
    /// bounded number of attempts.
    pub fn allocate(&self) -> Result<u16, BrokerError> {
        let mut reserved = self.reserved.lock().unwrap();
        let now = Instant::now();
        reserved.retain(|_, issued| now.duration_since(*issued) < RESERVATION_TTL);

        let mut rng = rand::thread_rng();
        for _ in 0..MAX_ATTEMPTS {
            let port = rng.gen_range(self.range.clone());
            if reserved.contains_key(&port) {
                continue;
            }
            if TcpListener::bind(("0.0.0.0", port)).is_ok() {
                reserved.insert(port, now);
                debug!(port, "port allocated");
                return Ok(port);
            }
        }

        Err(BrokerError::ResourceExhausted(MAX_ATTEMPTS))
    }

    /// Drop a reservation once its tunnel no longer needs the port.
    pub fn release(&self, port: u16) {
        self.reserved.lock().unwrap().remove(&port);
    }
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new(DEFAULT_PORT_RANGE)
    }
}
