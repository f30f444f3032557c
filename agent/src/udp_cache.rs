//! Per-(client_ip, client_port) cache of local UDP sockets, so replies from
//! the local service can be routed back to the right end-user flow without
//! the Gateway ever seeing the local socket.

use std::{net::Ipv4Addr, sync::Arc, time::Duration};

use ahash::AHashMap;
use bytes::BytesMut;
use framing::Envelope;
use parking_lot::Mutex;
use tokio::{
    io::AsyncWriteExt,
    net::{tcp::OwnedWriteHalf, UdpSocket},
    sync::Mutex as AsyncMutex,
    task::JoinHandle,
    time::Instant,
};

pub const DEFAULT_IDLE: Duration = Duration::from_secs(30);
pub const GAME_WORKLOAD_IDLE: Duration = Duration::from_secs(300);

struct Entry {
    socket: Arc<UdpSocket>,
    last_seen: Mutex<Instant>,
    relay_task: JoinHandle<()>,
}

pub struct UdpCache {
    entries: Mutex<AHashMap<(Ipv4Addr, u16), Arc<Entry>>>,
    local_host: String,
    local_port: u16,
    idle: Duration,
}

impl UdpCache {
    pub fn new(local_host: String, local_port: u16, idle: Duration) -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(AHashMap::new()),
            local_host,
            local_port,
            idle,
        })
    }

    /// Forward `payload` to the local service for `(client_ip, client_port)`,
    /// creating a socket and reply-relay task if this is the first datagram
    /// from that client.
    pub async fn forward(
        self: &Arc<Self>,
        client_ip: Ipv4Addr,
        client_port: u16,
        payload: &[u8],
        session_writer: Arc<AsyncMutex<OwnedWriteHalf>>,
    ) -> std::io::Result<()> {
        let entry = self.get_or_create(client_ip, client_port, session_writer).await?;
        *entry.last_seen.lock() = Instant::now();
        entry.socket.send(payload).await?;
        Ok(())
    }

    async fn get_or_create(
        self: &Arc<Self>,
        client_ip: Ipv4Addr,
        client_port: u16,
        session_writer: Arc<AsyncMutex<OwnedWriteHalf>>,
    ) -> std::io::Result<Arc<Entry>> {
        if let Some(entry) = self.entries.lock().get(&(client_ip, client_port)).cloned() {
            return Ok(entry);
        }

        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect((self.local_host.as_str(), self.local_port)).await?;
        let socket = Arc::new(socket);
        let relay_task = spawn_reply_relay(socket.clone(), client_ip, client_port, session_writer);
        let entry = Arc::new(Entry { socket, last_seen: Mutex::new(Instant::now()), relay_task });

        self.entries.lock().insert((client_ip, client_port), entry.clone());

        Ok(entry)
    }

    /// Close and drop sockets idle longer than the configured timeout.
    pub fn expire(&self) {
        let idle = self.idle;
        let stale: Vec<_> = {
            let entries = self.entries.lock();
            entries
                .iter()
                .filter(|(_, entry)| entry.last_seen.lock().elapsed() >= idle)
                .map(|(key, _)| *key)
                .collect()
        };

        let mut entries = self.entries.lock();
        for key in stale {
            if let Some(entry) = entries.remove(&key) {
                entry.relay_task.abort();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

fn spawn_reply_relay(
    socket: Arc<UdpSocket>,
    client_ip: Ipv4Addr,
    client_port: u16,
    session_writer: Arc<AsyncMutex<OwnedWriteHalf>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buf = vec![0u8; framing::MAX_UDP_PAYLOAD];
        loop {
            let n = match socket.recv(&mut buf).await {
                Ok(n) => n,
                Err(_) => break,
            };

            let mut out = BytesMut::new();
            if Envelope::new(client_ip, client_port, &buf[..n]).encode(&mut out).is_err() {
                continue;
            }

            if session_writer.lock().await.write_all(&out).await.is_err() {
                break;
            }
        }
    });
}
