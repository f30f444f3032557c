//! Tracks recently-seen end-user UDP client addresses for a single public
//! port, purely for idle-expiry bookkeeping — envelope framing already
//! carries the client address on every datagram, so routing does not depend
//! on this table.

use std::{net::SocketAddr, time::Instant};

use ahash::AHashMap;
use parking_lot::Mutex;

struct Flow {
    last_seen: Instant,
}

pub struct UdpFlowTable {
    flows: Mutex<AHashMap<SocketAddr, Flow>>,
}

impl UdpFlowTable {
    pub fn new() -> Self {
        Self {
            flows: Mutex::new(AHashMap::new()),
        }
    }

    pub fn touch(&self, client: SocketAddr) {
        self.flows.lock().insert(client, Flow { last_seen: Instant::now() });
    }

    pub fn len(&self) -> usize {
        self.flows.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.lock().is_empty()
    }

    /// Drop entries idle longer than `idle` and return how many were purged.
    pub fn expire(&self, idle: std::time::Duration) -> usize {
        let mut flows = self.flows.lock();
        let before = flows.len();
        flows.retain(|_, flow| flow.last_seen.elapsed() < idle);
        before - flows.len()
    }
}

impl Default for UdpFlowTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expire_purges_stale_entries() {
        let table = UdpFlowTable::new();
        table.touch("127.0.0.1:1".parse().unwrap());
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert_eq!(table.expire(std::time::Duration::from_millis(1)), 1);
        assert!(table.is_empty());
    }
}
