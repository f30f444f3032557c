//! A Session is one persistent TCP connection from an Agent, carrying either
//! one paired end-user TCP flow or many multiplexed UDP flows.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering},
    Arc,
};

use tokio::net::{
    tcp::{OwnedReadHalf, OwnedWriteHalf},
    TcpStream,
};
use tokio::sync::Mutex as AsyncMutex;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Handshaking = 0,
    Idle = 1,
    Active = 2,
    Multiplex = 3,
    Draining = 4,
    Closed = 5,
}

impl SessionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Handshaking,
            1 => Self::Idle,
            2 => Self::Active,
            3 => Self::Multiplex,
            4 => Self::Draining,
            _ => Self::Closed,
        }
    }
}

/// One data-plane connection from an Agent, bound to a single public port.
pub struct Session {
    pub id: u64,
    pub bound_public_port: u16,
    state: AtomicU8,
    reader: AsyncMutex<Option<OwnedReadHalf>>,
    writer: Arc<AsyncMutex<OwnedWriteHalf>>,
    udp_inbound_started: AtomicBool,
}

impl Session {
    pub fn new(bound_public_port: u16, stream: TcpStream) -> Arc<Self> {
        let (reader, writer) = stream.into_split();
        Arc::new(Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            bound_public_port,
            state: AtomicU8::new(SessionState::Idle as u8),
            reader: AsyncMutex::new(Some(reader)),
            writer: Arc::new(AsyncMutex::new(writer)),
            udp_inbound_started: AtomicBool::new(false),
        })
    }

    /// Returns `true` exactly once: for the caller that wins the race to
    /// start this Session's UDP inbound reader task.
    pub fn start_udp_inbound_once(&self) -> bool {
        self.udp_inbound_started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn set_state(&self, state: SessionState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.state() == SessionState::Closed
    }

    /// Exclusive writer handle, shared across every task (TCP pump, UDP
    /// dispatcher) that may write to this Session. Every writer must hold the
    /// lock for the full duration of one frame's write to preserve framing
    /// atomicity.
    pub fn writer(&self) -> Arc<AsyncMutex<OwnedWriteHalf>> {
        self.writer.clone()
    }

    /// Take exclusive ownership of the read half. Returns `None` if already
    /// taken (a Session is only ever read from one task at a time).
    pub async fn take_reader(&self) -> Option<OwnedReadHalf> {
        self.reader.lock().await.take()
    }

    /// Idempotent close: only the first caller performs the socket shutdown.
    pub async fn close(&self) {
        let previous = self.state.swap(SessionState::Closed as u8, Ordering::SeqCst);
        if SessionState::from_u8(previous) == SessionState::Closed {
            return;
        }
        let _ = tokio::io::AsyncWriteExt::shutdown(&mut *self.writer.lock().await).await;
    }
}
