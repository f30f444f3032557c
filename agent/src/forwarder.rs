//! Bridges a Gateway-facing Session to the local service it was configured
//! to forward for.

use std::{sync::Arc, time::Duration};

use framing::EnvelopeDecoder;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};

use crate::{config::PortMapping, udp_cache::UdpCache};

const COPY_BUF: usize = 8192;

/// Pump bytes between the Gateway Session and a freshly-dialed local TCP
/// service connection. The local dial happens lazily, on the first bytes
/// received from the Gateway side, so a Session that never sees traffic
/// never opens an idle connection to the local service.
pub async fn pump_tcp(session: TcpStream, mapping: &PortMapping) {
    let (mut session_read, mut session_write) = session.into_split();

    let mut first_buf = [0u8; COPY_BUF];
    let n = match session_read.read(&mut first_buf).await {
        Ok(0) | Err(_) => return,
        Ok(n) => n,
    };

    let local_addr = (mapping.local_host.as_str(), mapping.local_port);
    let mut local = match TcpStream::connect(local_addr).await {
        Ok(stream) => stream,
        Err(err) => {
            log::warn!(
                "local dial failed for mapping {} ({}:{}): {}",
                mapping.id,
                mapping.local_host,
                mapping.local_port,
                err
            );
            return;
        }
    };

    if local.write_all(&first_buf[..n]).await.is_err() {
        return;
    }

    let (mut local_read, mut local_write) = local.split();

    let session_to_local = async {
        let mut buf = [0u8; COPY_BUF];
        loop {
            let n = match session_read.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            if local_write.write_all(&buf[..n]).await.is_err() {
                break;
            }
        }
    };

    let local_to_session = async {
        let mut buf = [0u8; COPY_BUF];
        loop {
            let n = match local_read.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            if session_write.write_all(&buf[..n]).await.is_err() {
                break;
            }
        }
    };

    tokio::join!(session_to_local, local_to_session);
}

/// Decode envelopes arriving on a UDP-bound Session and relay each to its
/// local destination through the per-client socket cache, for as long as the
/// Session stays open.
pub async fn pump_udp(session: TcpStream, mapping: &PortMapping) {
    let idle = mapping
        .udp_flow_idle_ms
        .map(Duration::from_millis)
        .unwrap_or(crate::udp_cache::DEFAULT_IDLE);
    let cache = UdpCache::new(mapping.local_host.clone(), mapping.local_port, idle);

    let reaper = {
        let cache = cache.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(10));
            loop {
                ticker.tick().await;
                cache.expire();
            }
        })
    };

    let (mut session_read, session_write) = session.into_split();
    let session_write = Arc::new(tokio::sync::Mutex::new(session_write));
    let mut decoder = EnvelopeDecoder::new(framing::MAX_UDP_PAYLOAD);
    let mut buf = [0u8; COPY_BUF];

    loop {
        let n = match session_read.read(&mut buf).await {
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
                    if let Err(err) = cache
                        .forward(envelope.client_ip, envelope.client_port, &envelope.payload, session_write.clone())
                        .await
                    {
                        log::warn!("local forward failed for mapping {}: {}", mapping.id, err);
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    log::warn!("framing violation on mapping {} session: {}", mapping.id, err);
                    reaper.abort();
                    return;
                }
            }
        }
    }

    reaper.abort();
}
