use std::time::Duration;

use gateway::{
    config::Config,
    mapping::Protocol,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    time::timeout,
};

fn test_config() -> Config {
    let mut config = Config::default();
    config.server.bind_host = "127.0.0.1".parse().unwrap();
    config.server.web_port = 0;
    config.server.data_plane_port = 0;
    config.port_ranges = vec![gateway::config::PortRangeSpec {
        id: 1,
        start: 20100,
        end: 20110,
        enabled: true,
    }];
    config
}

#[tokio::test]
async fn end_to_end_tcp_echo_through_a_paired_session() {
    let dir = std::env::temp_dir().join(format!("fabric-gateway-test-{}", std::process::id()));
    let handle = gateway::run(test_config(), dir).await.expect("gateway boots");

    let binding = handle
        .state
        .allocate_mapping(4000, None, Protocol::Tcp, "test-agent".into())
        .await
        .expect("mapping bring-up succeeds");

    // The Agent dials the data plane and announces the public port it owns.
    let mut agent_conn = TcpStream::connect(handle.data_plane_addr).await.unwrap();
    agent_conn
        .write_all(&framing::encode_port_header(binding.public_port))
        .await
        .unwrap();

    // Give the Gateway a moment to file the session as idle before the
    // end-user dials in, matching the handshake-then-idle lifecycle.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut client_conn = TcpStream::connect(("127.0.0.1", binding.public_port)).await.unwrap();
    client_conn.write_all(b"ping").await.unwrap();

    let mut from_client_side = [0u8; 4];
    agent_conn.read_exact(&mut from_client_side).await.unwrap();
    assert_eq!(&from_client_side, b"ping");

    agent_conn.write_all(b"pong").await.unwrap();

    let mut from_agent_side = [0u8; 4];
    timeout(Duration::from_secs(2), client_conn.read_exact(&mut from_agent_side))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&from_agent_side, b"pong");
}

#[tokio::test]
async fn connections_to_an_unbound_port_are_dropped() {
    let dir = std::env::temp_dir().join(format!("fabric-gateway-test-{}", std::process::id() + 1));
    let handle = gateway::run(test_config(), dir).await.expect("gateway boots");

    let mut agent_conn = TcpStream::connect(handle.data_plane_addr).await.unwrap();
    agent_conn.write_all(&framing::encode_port_header(54321)).await.unwrap();

    let mut buf = [0u8; 1];
    let result = agent_conn.read(&mut buf).await;
    assert!(matches!(result, Ok(0)) || result.is_err());
}
