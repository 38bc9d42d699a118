//! Probe and reply datagram layout.
//!
//! Both directions use the same fixed length, agreed out of band with the
//! echo endpoint:
//!
//! ```text
//! 0       4                12                 len
//! +-------+----------------+------------------+
//! |  id   | server time    | padding          |
//! +-------+----------------+------------------+
//! ```
//!
//! The id is a big-endian u32. The server time is a big-endian i64 written
//! by the echo endpoint into the reply; probes leave it zeroed.

use thiserror::Error;

use crate::state::ProbeId;

/// Datagram length used by the reference echo endpoint
pub const DEFAULT_PACKET_SIZE: usize = 32;

/// Bytes needed to carry the id and the server time
pub const MIN_PACKET_SIZE: usize = 12;

/// Decoded reply datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reply {
    pub id: ProbeId,
    /// Echo endpoint's reply-processing time (opaque, its own clock)
    pub server_time: i64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("reply too short: {0} bytes (need {MIN_PACKET_SIZE})")]
    TooShort(usize),
}

/// Build a probe payload of `size` bytes carrying `id`.
/// Sizes below [`MIN_PACKET_SIZE`] are raised to it.
pub fn build_probe(id: ProbeId, size: usize) -> Vec<u8> {
    let mut payload = vec![0u8; size.max(MIN_PACKET_SIZE)];
    payload[..4].copy_from_slice(&id.to_bytes());
    payload
}

/// Decode the id and server time from a reply datagram
pub fn decode_reply(data: &[u8]) -> Result<Reply, DecodeError> {
    if data.len() < MIN_PACKET_SIZE {
        return Err(DecodeError::TooShort(data.len()));
    }

    let mut id = [0u8; 4];
    id.copy_from_slice(&data[0..4]);
    let mut server_time = [0u8; 8];
    server_time.copy_from_slice(&data[4..12]);

    Ok(Reply {
        id: ProbeId::from_bytes(id),
        server_time: i64::from_be_bytes(server_time),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_layout() {
        let payload = build_probe(ProbeId(0x0A0B_0C0D), DEFAULT_PACKET_SIZE);
        assert_eq!(payload.len(), DEFAULT_PACKET_SIZE);
        assert_eq!(&payload[..4], &[0x0A, 0x0B, 0x0C, 0x0D]);
        assert!(payload[4..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_probe_size_floor() {
        assert_eq!(build_probe(ProbeId(1), 4).len(), MIN_PACKET_SIZE);
        assert_eq!(build_probe(ProbeId(1), 1200).len(), 1200);
    }

    #[test]
    fn test_decode_reply() {
        // Echo endpoint copies the id and writes its time into bytes 4..12
        let mut reply = build_probe(ProbeId(42), DEFAULT_PACKET_SIZE);
        reply[4..12].copy_from_slice(&1_700_000_000_123i64.to_be_bytes());

        let decoded = decode_reply(&reply).unwrap();
        assert_eq!(decoded.id, ProbeId(42));
        assert_eq!(decoded.server_time, 1_700_000_000_123);
    }

    #[test]
    fn test_decode_ignores_padding() {
        let mut reply = vec![0xFFu8; DEFAULT_PACKET_SIZE];
        reply[..12].copy_from_slice(&[0, 0, 0, 5, 0, 0, 0, 0, 0, 0, 0, 9]);

        let decoded = decode_reply(&reply).unwrap();
        assert_eq!(decoded.id, ProbeId(5));
        assert_eq!(decoded.server_time, 9);
    }

    #[test]
    fn test_decode_too_short() {
        assert_eq!(decode_reply(&[0u8; 11]), Err(DecodeError::TooShort(11)));
        assert_eq!(decode_reply(&[]), Err(DecodeError::TooShort(0)));
    }
}
