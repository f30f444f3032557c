//! Accepts Agent data-plane connections, reads the 4-byte port-selection
//! header, and files the resulting Session under the named Mapping's Port
//! Pool. Connections naming an unknown or unbound port are dropped silently.

use std::{sync::Arc, time::Duration};

use tokio::{io::AsyncReadExt, net::TcpListener, time::timeout};

use crate::{mapping::MappingTable, session::Session};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn run(listener: TcpListener, mappings: Arc<MappingTable>) {
    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(err) => {
                log::warn!("data-plane accept failed: {}", err);
                continue;
            }
        };

        let mappings = mappings.clone();
        tokio::spawn(async move {
            handle_handshake(stream, addr, mappings).await;
        });
    }
}

async fn handle_handshake(
    mut stream: tokio::net::TcpStream,
    addr: std::net::SocketAddr,
    mappings: Arc<MappingTable>,
) {
    let mut header = [0u8; framing::PORT_HEADER_LEN];
    let read = timeout(HANDSHAKE_TIMEOUT, stream.read_exact(&mut header)).await;
    let raw_port = match read {
        Ok(Ok(())) => framing::decode_port_header(header),
        Ok(Err(_)) | Err(_) => {
            log::debug!("data-plane handshake from {} failed to deliver a port header", addr);
            return;
        }
    };

    let Ok(public_port) = u16::try_from(raw_port) else {
        log::warn!("data-plane handshake from {} named out-of-range port {}", addr, raw_port);
        return;
    };

    let Some(binding) = mappings.get_by_public_port(public_port) else {
        log::warn!("data-plane handshake from {} named unbound port {}", addr, public_port);
        return;
    };

    log::debug!("agent session from {} bound to public port {}", addr, public_port);
    let session = Session::new(public_port, stream);
    binding.pool.enqueue_idle(session);
}
