use std::{net::Ipv4Addr, time::Duration};

use agent::udp_cache::UdpCache;
use framing::EnvelopeDecoder;
use tokio::{
    io::AsyncReadExt,
    net::{TcpListener, UdpSocket},
    sync::Mutex as AsyncMutex,
    time::timeout,
};

async fn spawn_udp_echo() -> u16 {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let port = socket.local_addr().unwrap().port();
    tokio::spawn(async move {
        let mut buf = [0u8; 1024];
        loop {
            let (n, peer) = match socket.recv_from(&mut buf).await {
                Ok(v) => v,
                Err(_) => break,
            };
            let _ = socket.send_to(&buf[..n], peer).await;
        }
    });
    port
}

/// A loopback TCP pair standing in for a Session's write half, so we can
/// observe whatever `UdpCache`'s reply relay writes back toward the Gateway.
async fn session_pair() -> (tokio::net::tcp::OwnedWriteHalf, tokio::net::tcp::OwnedReadHalf) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let connect = tokio::spawn(async move { tokio::net::TcpStream::connect(addr).await.unwrap() });
    let (accepted, _) = listener.accept().await.unwrap();
    let client = connect.await.unwrap();
    let (_read_unused, write) = accepted.into_split();
    let (read, _write_unused) = client.into_split();
    (write, read)
}

#[tokio::test]
async fn forwards_to_local_service_and_relays_the_reply_back() {
    let echo_port = spawn_udp_echo().await;
    let (write, mut read) = session_pair().await;
    let writer = std::sync::Arc::new(AsyncMutex::new(write));

    let cache = UdpCache::new("127.0.0.1".to_string(), echo_port, Duration::from_secs(30));
    let client_ip = Ipv4Addr::new(10, 1, 2, 3);
    let client_port = 4242;

    cache.forward(client_ip, client_port, b"hello", writer.clone()).await.unwrap();
    assert_eq!(cache.len(), 1);

    let mut buf = [0u8; 256];
    let n = timeout(Duration::from_secs(2), read.read(&mut buf)).await.unwrap().unwrap();

    let mut decoder = EnvelopeDecoder::new(framing::MAX_UDP_PAYLOAD);
    decoder.feed(&buf[..n]);
    let envelope = decoder.next_frame().unwrap().unwrap();

    assert_eq!(envelope.client_ip, client_ip);
    assert_eq!(envelope.client_port, client_port);
    assert_eq!(&envelope.payload[..], b"hello");
}

#[tokio::test]
async fn expire_drops_idle_entries_and_aborts_their_relay_task() {
    let echo_port = spawn_udp_echo().await;
    let (write, _read) = session_pair().await;
    let writer = std::sync::Arc::new(AsyncMutex::new(write));

    let cache = UdpCache::new("127.0.0.1".to_string(), echo_port, Duration::from_millis(50));
    cache
        .forward(Ipv4Addr::new(10, 0, 0, 1), 1, b"x", writer.clone())
        .await
        .unwrap();
    assert_eq!(cache.len(), 1);

    tokio::time::sleep(Duration::from_millis(150)).await;
    cache.expire();
    assert_eq!(cache.len(), 0);
}
