//! Length-prefixed packet framing codec.
//!
//! Packets are framed as:
//! - 4 bytes: network magic
//! - 4 bytes: big-endian payload length
//! - N bytes: bincode-serialized Packet envelope

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use lattice_core::serialization;

use crate::config::{MAX_PACKET_SIZE, NETWORK_MAGIC};
use crate::error::{ClusterError, ClusterResult};
use crate::protocol::Packet;

/// Header size: 4 bytes magic + 4 bytes length.
const HEADER_SIZE: usize = 8;

/// Codec for length-prefixed packet framing.
#[derive(Debug, Default)]
pub struct PacketCodec {
    /// Expected length of the current packet (if the header has been read).
    current_length: Option<usize>,
}

impl PacketCodec {
    /// Create a new packet codec.
    pub fn new() -> Self {
        Self {
            current_length: None,
        }
    }
}

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = ClusterError;

    fn decode(&mut self, src: &mut BytesMut) -> ClusterResult<Option<Self::Item>> {
        // If we don't have the length yet, try to read the header
        if self.current_length.is_none() {
            if src.len() < HEADER_SIZE {
                return Ok(None);
            }

            // Read and verify magic bytes
            let mut magic = [0u8; 4];
            magic.copy_from_slice(&src[0..4]);
            if magic != NETWORK_MAGIC {
                return Err(ClusterError::InvalidMagic {
                    expected: NETWORK_MAGIC,
                    actual: magic,
                });
            }

            // Read packet length (big-endian)
            let mut len_bytes = [0u8; 4];
            len_bytes.copy_from_slice(&src[4..8]);
            let length = u32::from_be_bytes(len_bytes) as usize;

            if length > MAX_PACKET_SIZE {
                return Err(ClusterError::PacketTooLarge {
                    size: length,
                    max: MAX_PACKET_SIZE,
                });
            }

            self.current_length = Some(length);
        }

        let length = match self.current_length {
            Some(length) => length,
            None => return Ok(None),
        };

        // Check if we have the full packet
        if src.len() < HEADER_SIZE + length {
            // Reserve space for the full packet to avoid reallocations
            src.reserve(HEADER_SIZE + length - src.len());
            return Ok(None);
        }

        // Skip header and extract packet bytes
        src.advance(HEADER_SIZE);
        let packet_bytes = src.split_to(length);

        // Reset state for the next packet
        self.current_length = None;

        let packet: Packet = serialization::deserialize(&packet_bytes)?;

        Ok(Some(packet))
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = ClusterError;

    fn encode(&mut self, packet: Packet, dst: &mut BytesMut) -> ClusterResult<()> {
        let packet_bytes = serialization::serialize(&packet)?;
        let length = packet_bytes.len();

        if length > MAX_PACKET_SIZE {
            return Err(ClusterError::PacketTooLarge {
                size: length,
                max: MAX_PACKET_SIZE,
            });
        }

        dst.reserve(HEADER_SIZE + length);

        dst.put_slice(&NETWORK_MAGIC);
        dst.put_u32(length as u32);
        dst.put_slice(&packet_bytes);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{command, KvPacket, PacketId};

    #[test]
    fn test_roundtrip_heartbeat() {
        let mut codec = PacketCodec::new();
        let original = Packet::heartbeat();

        let mut buf = BytesMut::new();
        codec.encode(original.clone(), &mut buf).unwrap();

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_roundtrip_kv_request() {
        let mut codec = PacketCodec::new();
        let original = Packet::kv_request(&KvPacket::set("a", b"1".to_vec(), 0, 0)).unwrap();

        let mut buf = BytesMut::new();
        codec.encode(original.clone(), &mut buf).unwrap();

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_partial_header() {
        let mut codec = PacketCodec::new();
        let mut buf = BytesMut::new();
        buf.put_slice(&NETWORK_MAGIC);
        // Only 4 bytes, not enough for a header

        let result = codec.decode(&mut buf).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_partial_packet() {
        let mut codec = PacketCodec::new();
        let mut buf = BytesMut::new();

        // Valid header claiming 100 bytes, but only 50 present
        buf.put_slice(&NETWORK_MAGIC);
        buf.put_u32(100);
        buf.put_slice(&[0u8; 50]);

        let result = codec.decode(&mut buf).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_invalid_magic() {
        let mut codec = PacketCodec::new();
        let mut buf = BytesMut::new();

        buf.put_slice(&[0xFF, 0xFF, 0xFF, 0xFF]);
        buf.put_u32(10);
        buf.put_slice(&[0u8; 10]);

        let result = codec.decode(&mut buf);
        assert!(matches!(result, Err(ClusterError::InvalidMagic { .. })));
    }

    #[test]
    fn test_packet_too_large() {
        let mut codec = PacketCodec::new();
        let mut buf = BytesMut::new();

        buf.put_slice(&NETWORK_MAGIC);
        buf.put_u32((MAX_PACKET_SIZE + 1) as u32);

        let result = codec.decode(&mut buf);
        assert!(matches!(result, Err(ClusterError::PacketTooLarge { .. })));
    }

    #[test]
    fn test_multiple_packets() {
        let mut codec = PacketCodec::new();
        let mut buf = BytesMut::new();

        let first = Packet::heartbeat();
        let second = Packet::kv_request(&KvPacket::get("key")).unwrap();

        codec.encode(first.clone(), &mut buf).unwrap();
        codec.encode(second.clone(), &mut buf).unwrap();

        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), first);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), second);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_unknown_command_survives_framing() {
        let mut codec = PacketCodec::new();
        let original = Packet {
            command: 42,
            id: PacketId::generate(),
            reply_to: PacketId::NONE,
            payload: vec![0xde, 0xad],
        };

        let mut buf = BytesMut::new();
        codec.encode(original.clone(), &mut buf).unwrap();

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.command, 42);
        assert_ne!(decoded.command, command::HEARTBEAT);
        assert_eq!(decoded.payload, vec![0xde, 0xad]);
    }
}
