//! Mapping Manager: for one configured Mapping, keeps an Agent-side Gateway
//! allocation alive and maintains a floor/ceiling pool of dialed Sessions
//! ready to serve.

use std::sync::{
    atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering},
    Arc,
};

use rand::Rng;
use tokio::time::Duration;

use crate::{
    config::{Connection, PortMapping, Protocol},
    forwarder, gateway_client::GatewayClient, session,
};

const BACKOFF_MIN: Duration = Duration::from_secs(1);
const BACKOFF_MAX: Duration = Duration::from_secs(30);
const BACKOFF_FACTOR: u32 = 2;

/// Shared, mutable runtime state for one Mapping, reachable from the Agent's
/// own Control API for start/stop without restarting the manager task.
pub struct MappingControl {
    pub enabled: AtomicBool,
    pub assigned_public_port: AtomicU16,
    pub active_sessions: AtomicUsize,
}

impl MappingControl {
    pub fn new(mapping: &PortMapping) -> Arc<Self> {
        Arc::new(Self {
            enabled: AtomicBool::new(mapping.enabled),
            assigned_public_port: AtomicU16::new(mapping.assigned_public_port.unwrap_or(0)),
            active_sessions: AtomicUsize::new(0),
        })
    }

    fn assigned_port(&self) -> Option<u16> {
        match self.assigned_public_port.load(Ordering::Relaxed) {
            0 => None,
            port => Some(port),
        }
    }
}

fn backoff_with_jitter(attempt: u32) -> Duration {
    let base = BACKOFF_MIN.saturating_mul(BACKOFF_FACTOR.saturating_pow(attempt));
    let capped = base.min(BACKOFF_MAX);
    let jitter_ratio = rand::rng().random_range(-0.2..=0.2);
    let millis = (capped.as_millis() as f64 * (1.0 + jitter_ratio)).max(0.0);
    Duration::from_millis(millis as u64)
}

/// Run this Mapping until it is disabled or the process exits: keep the
/// Gateway allocation alive and maintain `connection.min_idle` Sessions
/// ready, never exceeding `connection.max_total`.
pub async fn run(
    mapping: PortMapping,
    gateway: Arc<GatewayClient>,
    data_plane_addr: String,
    connection: Connection,
    control: Arc<MappingControl>,
) {
    let mut attempt = 0u32;

    loop {
        if !control.enabled.load(Ordering::Relaxed) {
            tokio::time::sleep(Duration::from_millis(connection.check_interval_ms)).await;
            continue;
        }

        let preferred = mapping.preferred_port.or_else(|| control.assigned_port());
        match gateway
            .allocate(mapping.local_port, preferred, mapping.protocol, &mapping.id)
            .await
        {
            Ok(response) => {
                attempt = 0;
                control.assigned_public_port.store(response.public_port, Ordering::Relaxed);
                log::info!(
                    "mapping {} allocated public port {} ({:?})",
                    mapping.id,
                    response.public_port,
                    response.protocol
                );
                maintain_pool(&mapping, &gateway, &data_plane_addr, &connection, &control).await;
            }
            Err(err) => {
                log::warn!("mapping {} allocation failed: {}", mapping.id, err);
                // Repeated refusal invalidates a stale sticky port.
                if attempt >= 3 {
                    control.assigned_public_port.store(0, Ordering::Relaxed);
                }
                let delay = backoff_with_jitter(attempt);
                attempt += 1;
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Keep dialing replacement Sessions until the Mapping is disabled or the
/// Gateway starts refusing this public port, at which point control returns
/// to `run` to reallocate.
async fn maintain_pool(
    mapping: &PortMapping,
    gateway: &Arc<GatewayClient>,
    data_plane_addr: &str,
    connection: &Connection,
    control: &Arc<MappingControl>,
) {
    let mut check = tokio::time::interval(Duration::from_millis(connection.check_interval_ms));
    let mut refusals = 0u32;

    loop {
        check.tick().await;

        if !control.enabled.load(Ordering::Relaxed) {
            let _ = gateway.release(mapping.local_port).await;
            return;
        }

        let current = control.active_sessions.load(Ordering::Relaxed);
        if current >= connection.max_total {
            continue;
        }

        let deficit = connection.min_idle.saturating_sub(current);
        for _ in 0..deficit.min(connection.max_total - current) {
            let public_port = control.assigned_public_port.load(Ordering::Relaxed);
            if public_port == 0 {
                break;
            }

            match session::dial(data_plane_addr, public_port).await {
                Ok(stream) => {
                    refusals = 0;
                    control.active_sessions.fetch_add(1, Ordering::Relaxed);
                    let mapping = mapping.clone();
                    let control = control.clone();
                    tokio::spawn(async move {
                        match mapping.protocol {
                            Protocol::Tcp => forwarder::pump_tcp(stream, &mapping).await,
                            Protocol::Udp | Protocol::Both => forwarder::pump_udp(stream, &mapping).await,
                        }
                        control.active_sessions.fetch_sub(1, Ordering::Relaxed);
                    });
                }
                Err(err) => {
                    log::warn!("mapping {} dial failed: {}", mapping.id, err);
                    refusals += 1;
                    if refusals >= 3 {
                        // Treat as a stale or refused public port; bail out to re-allocate.
                        return;
                    }
                    break;
                }
            }
        }
    }
}
