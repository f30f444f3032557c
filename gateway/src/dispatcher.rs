//! Accept loops and forwarding pumps that sit between a bound public
//! listener and a Mapping's Session Pool.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use bytes::BytesMut;
use framing::{Envelope, EnvelopeDecoder};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, UdpSocket},
    task::JoinHandle,
};

use crate::{
    pool::{PendingConn, PortPool},
    session::Session,
};

/// How long a single envelope write may block before it is dropped as
/// backpressure relief. A proxy for a socket send-buffer watermark, which
/// tokio does not expose portably.
const WRITE_BACKPRESSURE_TIMEOUT: Duration = Duration::from_millis(250);

const UDP_RECV_BUF: usize = 65536;
const TCP_COPY_BUF: usize = 8192;

pub fn spawn_tcp_listener(listener: TcpListener, pool: Arc<PortPool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    log::debug!("accepted end-user tcp connection from {} on port {}", addr, pool.public_port);
                    pool.enqueue_pending(addr, stream);
                }
                Err(err) => {
                    log::warn!("tcp accept failed on port {}: {}", pool.public_port, err);
                    break;
                }
            }
        }
    })
}

pub fn spawn_udp_listener(socket: Arc<UdpSocket>, pool: Arc<PortPool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buf = vec![0u8; UDP_RECV_BUF];
        loop {
            let (len, client_addr) = match socket.recv_from(&mut buf).await {
                Ok(pair) => pair,
                Err(err) => {
                    log::warn!("udp recv failed on port {}: {}", pool.public_port, err);
                    break;
                }
            };

            let client_ip = match client_addr.ip() {
                std::net::IpAddr::V4(v4) => v4,
                std::net::IpAddr::V6(_) => {
                    log::warn!("dropping ipv6 client on port {}, envelope only supports ipv4", pool.public_port);
                    continue;
                }
            };

            pool.udp_flows.touch(client_addr);

            let Some(session) = pool.pick_session_for_udp() else {
                log::warn!("no idle session to carry udp datagram on port {}", pool.public_port);
                continue;
            };

            let mut out = BytesMut::new();
            if let Err(err) = Envelope::new(client_ip, client_addr.port(), &buf[..len]).encode(&mut out) {
                log::warn!("dropping oversized udp datagram on port {}: {}", pool.public_port, err);
                continue;
            }

            let writer = session.writer();
            let write = async {
                let mut guard = writer.lock().await;
                guard.write_all(&out).await
            };
            match tokio::time::timeout(WRITE_BACKPRESSURE_TIMEOUT, write).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    log::warn!("session write failed on port {}: {}", pool.public_port, err);
                    session.close().await;
                }
                Err(_) => {
                    log::warn!("dropping udp datagram on port {}: session write backpressured", pool.public_port);
                }
            }
        }
    })
}

/// Decode inbound envelopes read from a Session and relay them to the
/// end-user client named by each envelope, for as long as the Session
/// remains open.
pub fn spawn_udp_inbound_reader(session: Arc<Session>, socket: Arc<UdpSocket>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let Some(mut reader) = session.take_reader().await else {
            return;
        };
        let mut decoder = EnvelopeDecoder::new(framing::MAX_UDP_PAYLOAD);
        let mut buf = [0u8; TCP_COPY_BUF];

        loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            decoder.feed(&buf[..n]);

            loop {
                match decoder.next_frame() {
                    Ok(Some(envelope)) => {
                        if envelope.is_administrative() {
                            continue;
                        }
                        let addr = SocketAddr::new(std::net::IpAddr::V4(envelope.client_ip), envelope.client_port);
                        if let Err(err) = socket.send_to(&envelope.payload, addr).await {
                            log::warn!("failed relaying datagram to {}: {}", addr, err);
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        log::warn!("framing violation on session {}: {}", session.id, err);
                        session.close().await;
                        return;
                    }
                }
            }
        }
        session.close().await;
    })
}

/// Bidirectional byte pump between a paired end-user TCP connection and its
/// Session, until either side closes or errors.
pub async fn pump_tcp(conn: PendingConn, session: Arc<Session>) {
    let (mut client_read, mut client_write) = conn.stream.into_split();
    let Some(mut session_read) = session.take_reader().await else {
        session.close().await;
        return;
    };
    let session_write = session.writer();

    let client_to_session = {
        let session_write = session_write.clone();
        async move {
            let mut buf = [0u8; TCP_COPY_BUF];
            loop {
                let n = match client_read.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                if session_write.lock().await.write_all(&buf[..n]).await.is_err() {
                    break;
                }
            }
        }
    };

    let session_to_client = async move {
        let mut buf = [0u8; TCP_COPY_BUF];
        loop {
            let n = match session_read.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            if client_write.write_all(&buf[..n]).await.is_err() {
                break;
            }
        }
    };

    tokio::join!(client_to_session, session_to_client);
    session.close().await;
}
