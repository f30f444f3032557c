//! Lightweight process-wide counters surfaced through the Control Plane API.
//! No time-series history or broadcast channel: a snapshot is a point-in-time
//! read of these atomics.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Default)]
pub struct Statistics {
    pub pending_connections: AtomicU64,
    pub idle_sessions: AtomicU64,
    pub active_pairs: AtomicU64,
    pub bytes_forwarded: AtomicU64,
    pub udp_packets_dropped: AtomicU64,
}

#[derive(Serialize, Debug)]
pub struct StatisticsSnapshot {
    pub pending_connections: u64,
    pub idle_sessions: u64,
    pub active_pairs: u64,
    pub bytes_forwarded: u64,
    pub udp_packets_dropped: u64,
}

impl Statistics {
    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            pending_connections: self.pending_connections.load(Ordering::Relaxed),
            idle_sessions: self.idle_sessions.load(Ordering::Relaxed),
            active_pairs: self.active_pairs.load(Ordering::Relaxed),
            bytes_forwarded: self.bytes_forwarded.load(Ordering::Relaxed),
            udp_packets_dropped: self.udp_packets_dropped.load(Ordering::Relaxed),
        }
    }
}
