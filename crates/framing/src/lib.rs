//! Wire framing for the Agent<->Gateway data plane.
//!
//! Two forms travel over a Session, both big-endian and both pure byte
//! transforms with no I/O of their own:
//!
//! - the port-selection header: 4 bytes, written once by the Agent right
//!   after dialing, naming the public port the Session should be filed
//!   under.
//! - the UDP encapsulation envelope: an 8-byte header (client IPv4, client
//!   port, payload length) followed by the payload, used to multiplex many
//!   end-user UDP flows over one Session.

mod envelope;

pub use envelope::{Envelope, EnvelopeDecoder, OwnedEnvelope};

/// Length in bytes of the port-selection header.
pub const PORT_HEADER_LEN: usize = 4;

/// Length in bytes of the UDP envelope header (excludes payload).
pub const ENVELOPE_HEADER_LEN: usize = 8;

/// Largest payload a UDP envelope may carry, matching the maximum size of a
/// UDP datagram payload.
pub const MAX_UDP_PAYLOAD: usize = 65507;

#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    #[error("envelope declares payload length {len} exceeding the configured max {max}")]
    FrameTooLarge { len: usize, max: usize },
    #[error("buffer shorter than a complete frame")]
    Truncated,
}

/// Encode the 4-byte port-selection header for `port`.
///
/// # Examples
///
/// ```
/// use framing::{decode_port_header, encode_port_header};
///
/// let bytes = encode_port_header(25565);
/// assert_eq!(decode_port_header(bytes), 25565);
/// ```
pub fn encode_port_header(port: u16) -> [u8; PORT_HEADER_LEN] {
    (port as u32).to_be_bytes()
}

/// Decode a 4-byte port-selection header.
///
/// The wire value is a raw u32; callers must check it fits in `u16` before
/// treating it as a port number (a value outside that range can never match
/// a live binding and should be rejected the same way).
pub fn decode_port_header(bytes: [u8; PORT_HEADER_LEN]) -> u32 {
    u32::from_be_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_header_round_trip() {
        for port in [0u16, 1, 9000, 25565, 65535] {
            assert_eq!(decode_port_header(encode_port_header(port)), port as u32);
        }
    }

    #[test]
    fn oversized_port_header_is_detectable() {
        let bytes = 99999u32.to_be_bytes();
        let raw = decode_port_header(bytes);
        assert!(u16::try_from(raw).is_err());
    }
}
