use std::net::Ipv4Addr;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{ENVELOPE_HEADER_LEN, FramingError, MAX_UDP_PAYLOAD};

/// A borrowed view of a UDP encapsulation envelope, ready to be written to a
/// Session in a single call.
///
/// `client_ip` all-zero (with `client_port == 0`) marks the reserved
/// "administrative" direction; real end-user flows always carry the actual
/// client address, so the two can never collide.
#[derive(Debug, Clone, Copy)]
pub struct Envelope<'a> {
    pub client_ip: Ipv4Addr,
    pub client_port: u16,
    pub payload: &'a [u8],
}

impl<'a> Envelope<'a> {
    pub fn new(client_ip: Ipv4Addr, client_port: u16, payload: &'a [u8]) -> Self {
        Self {
            client_ip,
            client_port,
            payload,
        }
    }

    pub fn is_administrative(&self) -> bool {
        self.client_ip == Ipv4Addr::UNSPECIFIED && self.client_port == 0
    }

    /// Append the encoded envelope to `out` as a single contiguous write.
    /// Callers must flush `out` to the socket without interleaving another
    /// envelope's bytes in between, preserving framing atomicity.
    pub fn encode(&self, out: &mut BytesMut) -> Result<(), FramingError> {
        if self.payload.len() > MAX_UDP_PAYLOAD {
            return Err(FramingError::FrameTooLarge {
                len: self.payload.len(),
                max: MAX_UDP_PAYLOAD,
            });
        }

        out.reserve(ENVELOPE_HEADER_LEN + self.payload.len());
        out.put_slice(&self.client_ip.octets());
        out.put_u16(self.client_port);
        out.put_u16(self.payload.len() as u16);
        out.put_slice(self.payload);
        Ok(())
    }
}

/// An owned, decoded envelope pulled out of a stream buffer.
#[derive(Debug, Clone)]
pub struct OwnedEnvelope {
    pub client_ip: Ipv4Addr,
    pub client_port: u16,
    pub payload: Bytes,
}

impl OwnedEnvelope {
    pub fn is_administrative(&self) -> bool {
        self.client_ip == Ipv4Addr::UNSPECIFIED && self.client_port == 0
    }

    pub fn as_envelope(&self) -> Envelope<'_> {
        Envelope::new(self.client_ip, self.client_port, &self.payload)
    }
}

/// Buffers bytes arriving on a Session and yields complete envelopes as soon
/// as they are available, leaving a partial trailing frame buffered for the
/// next call.
pub struct EnvelopeDecoder {
    buf: BytesMut,
    max_payload: usize,
}

impl EnvelopeDecoder {
    pub fn new(max_payload: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            max_payload,
        }
    }

    /// Append newly-read bytes to the internal buffer.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pull one complete envelope out of the buffer, if one is available.
    ///
    /// Returns `Ok(None)` when the buffer holds less than a full frame; the
    /// caller should read more bytes and feed them in before asking again. A
    /// frame whose declared length exceeds `max_payload` is a protocol
    /// violation and the caller must close the Session.
    pub fn next_frame(&mut self) -> Result<Option<OwnedEnvelope>, FramingError> {
        if self.buf.len() < ENVELOPE_HEADER_LEN {
            return Ok(None);
        }

        let len = u16::from_be_bytes([self.buf[6], self.buf[7]]) as usize;
        if len > self.max_payload {
            return Err(FramingError::FrameTooLarge {
                len,
                max: self.max_payload,
            });
        }

        let total = ENVELOPE_HEADER_LEN + len;
        if self.buf.len() < total {
            return Ok(None);
        }

        let mut frame = self.buf.split_to(total);
        let client_ip = Ipv4Addr::new(frame[0], frame[1], frame[2], frame[3]);
        let client_port = u16::from_be_bytes([frame[4], frame[5]]);
        frame.advance(ENVELOPE_HEADER_LEN);

        Ok(Some(OwnedEnvelope {
            client_ip,
            client_port,
            payload: frame.freeze(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_round_trip() {
        let mut out = BytesMut::new();
        let payload = b"ping";
        Envelope::new(Ipv4Addr::new(10, 0, 0, 1), 5000, payload)
            .encode(&mut out)
            .unwrap();

        let mut decoder = EnvelopeDecoder::new(MAX_UDP_PAYLOAD);
        decoder.feed(&out);
        let decoded = decoder.next_frame().unwrap().unwrap();

        assert_eq!(decoded.client_ip, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(decoded.client_port, 5000);
        assert_eq!(&decoded.payload[..], payload);
        assert!(decoder.next_frame().unwrap().is_none());
    }

    #[test]
    fn buffers_partial_frames() {
        let mut out = BytesMut::new();
        Envelope::new(Ipv4Addr::new(10, 0, 0, 2), 6000, b"hello")
            .encode(&mut out)
            .unwrap();

        let mut decoder = EnvelopeDecoder::new(MAX_UDP_PAYLOAD);
        decoder.feed(&out[..5]);
        assert!(decoder.next_frame().unwrap().is_none());

        decoder.feed(&out[5..]);
        let decoded = decoder.next_frame().unwrap().unwrap();
        assert_eq!(&decoded.payload[..], b"hello");
    }

    #[test]
    fn processes_concatenated_frames() {
        let mut out = BytesMut::new();
        Envelope::new(Ipv4Addr::new(10, 0, 0, 1), 1, b"a")
            .encode(&mut out)
            .unwrap();
        Envelope::new(Ipv4Addr::new(10, 0, 0, 1), 2, b"b")
            .encode(&mut out)
            .unwrap();

        let mut decoder = EnvelopeDecoder::new(MAX_UDP_PAYLOAD);
        decoder.feed(&out);

        let first = decoder.next_frame().unwrap().unwrap();
        let second = decoder.next_frame().unwrap().unwrap();
        assert_eq!(first.client_port, 1);
        assert_eq!(second.client_port, 2);
        assert!(decoder.next_frame().unwrap().is_none());
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let mut decoder = EnvelopeDecoder::new(4);
        let mut header = BytesMut::new();
        header.put_slice(&[0, 0, 0, 0]);
        header.put_u16(0);
        header.put_u16(10);
        decoder.feed(&header);
        assert!(matches!(
            decoder.next_frame(),
            Err(FramingError::FrameTooLarge { len: 10, max: 4 })
        ));
    }

    #[test]
    fn administrative_marker_is_all_zero() {
        let env = Envelope::new(Ipv4Addr::UNSPECIFIED, 0, b"");
        assert!(env.is_administrative());
        let env = Envelope::new(Ipv4Addr::new(1, 2, 3, 4), 0, b"");
        assert!(!env.is_administrative());
    }
}
