//! Session Pool: per-port pending/idle queues and the FIFO pairing algorithm
//! that matches a waiting end-user TCP connection with an idle Agent
//! Session.

use std::{
    collections::VecDeque,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use tokio::{
    net::{TcpStream, UdpSocket},
    task::JoinHandle,
};

use crate::{
    session::{Session, SessionState},
    statistics::Statistics,
    udp_flow::UdpFlowTable,
};

/// How long a pending end-user TCP connection waits in the pool before it is
/// closed for lack of an idle Session.
pub const PAIR_TIMEOUT: Duration = Duration::from_secs(60);

/// Default idle timeout for the bookkeeping-only UDP flow table, matching
/// the Agent-side default (per-Mapping overrides live in the Agent's own
/// configuration, not here).
pub const UDP_FLOW_IDLE: Duration = Duration::from_secs(30);

static NEXT_PENDING_ID: AtomicU64 = AtomicU64::new(1);

pub struct PendingConn {
    pub id: u64,
    pub remote_addr: SocketAddr,
    pub enqueued_at: Instant,
    pub stream: TcpStream,
}

/// Per-port pending connections, idle Sessions, and UDP flow bookkeeping.
pub struct PortPool {
    pub public_port: u16,
    pending: Mutex<VecDeque<PendingConn>>,
    idle: Mutex<VecDeque<Arc<Session>>>,
    pub udp_flows: UdpFlowTable,
    stats: Arc<Statistics>,
    udp_socket: Mutex<Option<Arc<UdpSocket>>>,
}

impl PortPool {
    pub fn new(public_port: u16, stats: Arc<Statistics>) -> Arc<Self> {
        Arc::new(Self {
            public_port,
            pending: Mutex::new(VecDeque::new()),
            idle: Mutex::new(VecDeque::new()),
            udp_flows: UdpFlowTable::new(),
            stats,
            udp_socket: Mutex::new(None),
        })
    }

    /// Record the bound public UDP socket, so an idle Session picked for
    /// multiplexing can start decoding inbound envelopes back to it.
    pub fn set_udp_socket(&self, socket: Arc<UdpSocket>) {
        *self.udp_socket.lock() = Some(socket);
    }

    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Enqueue a new end-user TCP connection and drive pairing.
    pub fn enqueue_pending(self: &Arc<Self>, remote_addr: SocketAddr, stream: TcpStream) {
        let conn = PendingConn {
            id: NEXT_PENDING_ID.fetch_add(1, Ordering::Relaxed),
            remote_addr,
            enqueued_at: Instant::now(),
            stream,
        };
        let id = conn.id;
        self.pending.lock().push_back(conn);
        self.stats.pending_connections.fetch_add(1, Ordering::Relaxed);

        let pool = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(PAIR_TIMEOUT).await;
            let removed = {
                let mut pending = pool.pending.lock();
                if let Some(pos) = pending.iter().position(|c| c.id == id) {
                    pending.remove(pos)
                } else {
                    None
                }
            };
            if removed.is_some() {
                pool.stats.pending_connections.fetch_sub(1, Ordering::Relaxed);
                log::warn!(
                    "pending connection on port {} timed out waiting for an idle session",
                    pool.public_port
                );
            }
        });

        self.drive_pairing();
    }

    /// Enqueue a freshly-accepted Agent Session as idle and drive pairing.
    pub fn enqueue_idle(self: &Arc<Self>, session: Arc<Session>) {
        session.set_state(SessionState::Idle);
        self.idle.lock().push_front(session);
        self.stats.idle_sessions.fetch_add(1, Ordering::Relaxed);
        self.drive_pairing();
    }

    /// Pick a session to carry a UDP datagram, rotating across the idle
    /// pool. Unlike TCP pairing this never removes the Session — many
    /// datagrams from many clients share the same Sessions.
    pub fn pick_session_for_udp(&self) -> Option<Arc<Session>> {
        let session = {
            let mut idle = self.idle.lock();
            let len = idle.len();
            let mut found = None;
            for _ in 0..len {
                let session = idle.pop_front()?;
                idle.push_back(session.clone());
                if !session.is_closed() {
                    found = Some(session);
                    break;
                }
            }
            found?
        };

        session.set_state(SessionState::Multiplex);
        if session.start_udp_inbound_once() {
            if let Some(socket) = self.udp_socket.lock().clone() {
                crate::dispatcher::spawn_udp_inbound_reader(session.clone(), socket);
            }
        }
        Some(session)
    }

    /// Find an idle Session eligible for TCP pairing: skips closed
    /// Sessions (dropping them for good) and Sessions already claimed for
    /// UDP multiplexing (left in place).
    fn take_idle_tcp_candidate(&self) -> Option<Arc<Session>> {
        let mut idle = self.idle.lock();
        let len = idle.len();
        for _ in 0..len {
            let session = idle.pop_front()?;
            if session.is_closed() {
                self.stats.idle_sessions.fetch_sub(1, Ordering::Relaxed);
                continue;
            }
            if session.state() == SessionState::Multiplex {
                idle.push_back(session);
                continue;
            }
            return Some(session);
        }
        None
    }

    fn drive_pairing(self: &Arc<Self>) {
        loop {
            if self.pending.lock().is_empty() {
                break;
            }
            let session = match self.take_idle_tcp_candidate() {
                Some(session) => session,
                None => break,
            };
            self.stats.idle_sessions.fetch_sub(1, Ordering::Relaxed);

            let conn = match self.pending.lock().pop_front() {
                Some(conn) => conn,
                None => {
                    // Pending queue emptied by a timeout between the checks above.
                    self.idle.lock().push_front(session);
                    self.stats.idle_sessions.fetch_add(1, Ordering::Relaxed);
                    break;
                }
            };
            self.stats.pending_connections.fetch_sub(1, Ordering::Relaxed);

            session.set_state(SessionState::Active);
            self.stats.active_pairs.fetch_add(1, Ordering::Relaxed);
            let stats = self.stats.clone();
            tokio::spawn(async move {
                crate::dispatcher::pump_tcp(conn, session).await;
                stats.active_pairs.fetch_sub(1, Ordering::Relaxed);
            });
        }
    }

    /// Periodically purge stale entries from the UDP flow table. Spawned
    /// once per Mapping that binds a UDP listener; aborted on teardown along
    /// with the listener task.
    pub fn spawn_udp_flow_reaper(self: &Arc<Self>) -> JoinHandle<()> {
        let pool = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(UDP_FLOW_IDLE);
            loop {
                ticker.tick().await;
                let purged = pool.udp_flows.expire(UDP_FLOW_IDLE);
                if purged > 0 {
                    log::debug!("purged {} stale udp flows on port {}", purged, pool.public_port);
                }
            }
        })
    }

    /// Close every pending connection and idle Session. Used when a Mapping
    /// is torn down.
    pub fn drain(&self) {
        let pending: Vec<_> = self.pending.lock().drain(..).collect();
        self.stats.pending_connections.fetch_sub(pending.len() as u64, Ordering::Relaxed);
        for conn in pending {
            drop(conn.stream);
        }

        let sessions: Vec<_> = self.idle.lock().drain(..).collect();
        self.stats.idle_sessions.fetch_sub(sessions.len() as u64, Ordering::Relaxed);
        for session in sessions {
            let session = session.clone();
            tokio::spawn(async move { session.close().await });
        }
    }
}
