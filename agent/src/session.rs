//! Dialing and handshaking a single data-plane Session toward the Gateway.

use tokio::{io::AsyncWriteExt, net::TcpStream};

/// Dial the Gateway's data-plane listener and announce the public port this
/// Session should be filed under. No response is expected; the Session sits
/// ready until the Gateway pairs or multiplexes onto it.
pub async fn dial(gateway_addr: &str, public_port: u16) -> std::io::Result<TcpStream> {
    let mut stream = TcpStream::connect(gateway_addr).await?;
    stream.write_all(&framing::encode_port_header(public_port)).await?;
    Ok(stream)
}
