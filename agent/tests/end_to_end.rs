use std::time::Duration;

use agent::config::{AgentApi, Config as AgentConfig, Connection, PortMapping, Protocol, Server as AgentServer};
use gateway::config::{Config as GatewayConfig, PortRangeSpec};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    time::timeout,
};

async fn spawn_tcp_echo() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        loop {
            let (mut stream, _) = match listener.accept().await {
                Ok(v) => v,
                Err(_) => break,
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                loop {
                    let n = match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => n,
                    };
                    if stream.write_all(&buf[..n]).await.is_err() {
                        break;
                    }
                }
            });
        }
    });
    port
}

fn gateway_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.server.bind_host = "127.0.0.1".parse().unwrap();
    config.server.web_port = 0;
    config.server.data_plane_port = 0;
    config.port_ranges = vec![PortRangeSpec {
        id: 1,
        start: 20200,
        end: 20210,
        enabled: true,
    }];
    config
}

#[tokio::test]
async fn a_tcp_mapping_round_trips_an_end_user_connection_through_the_local_echo_service() {
    let gw_dir = std::env::temp_dir().join(format!("fabric-gateway-e2e-{}", std::process::id()));
    let gw_handle = gateway::run(gateway_config(), gw_dir).await.expect("gateway boots");

    let echo_port = spawn_tcp_echo().await;

    let agent_config = AgentConfig {
        server: AgentServer {
            host: "127.0.0.1".to_string(),
            port: gw_handle.data_plane_addr.port(),
            web_port: gw_handle.control_plane_addr.port(),
        },
        agent_api: AgentApi {
            bind_host: "127.0.0.1".to_string(),
            port: 0,
        },
        port_mappings: vec![PortMapping {
            id: "echo".to_string(),
            name: "local echo".to_string(),
            local_host: "127.0.0.1".to_string(),
            local_port: echo_port,
            protocol: Protocol::Tcp,
            preferred_port: None,
            assigned_public_port: None,
            enabled: true,
            description: String::new(),
            auto_reconnect: true,
            udp_flow_idle_ms: None,
        }],
        connection: Connection {
            min_idle: 1,
            max_total: 2,
            check_interval_ms: 50,
            reconnect_delay_ms: 50,
        },
        ..Default::default()
    };

    let agent_dir = std::env::temp_dir().join(format!("fabric-agent-e2e-{}", std::process::id()));
    let agent_handle = agent::run(agent_config, agent_dir).await.expect("agent boots");

    // Poll for the Mapping's allocation and at least one dialed Session.
    let public_port = timeout(Duration::from_secs(5), async {
        loop {
            if let Some(status) = agent_handle.state.list_mappings().into_iter().find(|m| m.id == "echo") {
                if let Some(port) = status.assigned_public_port {
                    if status.active_sessions >= 1 {
                        return port;
                    }
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("mapping becomes ready");

    let mut client = TcpStream::connect(("127.0.0.1", public_port)).await.unwrap();
    client.write_all(b"round trip").await.unwrap();

    let mut buf = [0u8; 32];
    let n = timeout(Duration::from_secs(2), client.read(&mut buf)).await.unwrap().unwrap();
    assert_eq!(&buf[..n], b"round trip");
}
