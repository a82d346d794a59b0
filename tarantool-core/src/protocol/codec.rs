//! Codec implementation for encoding/decoding protocol packets.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use super::constants::*;
use super::Packet;
use crate::error::{Result, TarantoolError};

/// Codec for length-prefixed protocol packets.
///
/// Implements the `tokio_util::codec::{Encoder, Decoder}` traits for use
/// with tokio's framed I/O.
#[derive(Debug, Clone, Copy)]
pub struct PacketCodec {
    max_packet_size: usize,
}

impl PacketCodec {
    /// Creates a new codec instance with the default size limit.
    pub fn new() -> Self {
        Self {
            max_packet_size: MAX_PACKET_SIZE,
        }
    }

    /// Creates a codec that rejects packets larger than `max_packet_size`.
    pub fn with_max_packet_size(max_packet_size: usize) -> Self {
        Self { max_packet_size }
    }

    /// Returns the configured size limit.
    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = TarantoolError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<()> {
        if item.encoded_len() > self.max_packet_size {
            return Err(TarantoolError::Protocol(format!(
                "packet of {} bytes exceeds limit of {} bytes",
                item.encoded_len(),
                self.max_packet_size
            )));
        }

        item.write_to(dst);
        Ok(())
    }
}

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = TarantoolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if src.len() < SIZE_OF_LENGTH_FIELD {
            return Ok(None);
        }

        let length = u32::from_le_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if length < HEADER_SIZE {
            return Err(TarantoolError::Protocol(format!(
                "packet length {} shorter than header",
                length
            )));
        }
        if SIZE_OF_LENGTH_FIELD + length > self.max_packet_size {
            return Err(TarantoolError::Protocol(format!(
                "packet of {} bytes exceeds limit of {} bytes",
                SIZE_OF_LENGTH_FIELD + length,
                self.max_packet_size
            )));
        }

        if src.len() < SIZE_OF_LENGTH_FIELD + length {
            src.reserve(SIZE_OF_LENGTH_FIELD + length - src.len());
            return Ok(None);
        }

        Packet::read_from(src)
            .map(Some)
            .ok_or_else(|| TarantoolError::Protocol("failed to read packet".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_encode_decode_roundtrip() {
        let mut codec = PacketCodec::new();
        let original = Packet::call("crud.select", b"\x91\x01").with_sync_id(11);

        let mut buf = BytesMut::new();
        codec.encode(original.clone(), &mut buf).unwrap();
        assert!(!buf.is_empty());

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, original);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_incomplete_length() {
        let mut codec = PacketCodec::new();
        let mut buf = BytesMut::from(&[0x01, 0x02][..]);

        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn test_decode_incomplete_packet() {
        let mut codec = PacketCodec::new();
        let mut buf = BytesMut::new();
        Packet::ok_response(5, Bytes::from_static(b"payload")).write_to(&mut buf);
        let mut partial = BytesMut::from(&buf[..10]);

        assert!(codec.decode(&mut partial).unwrap().is_none());
        assert_eq!(partial.len(), 10);
    }

    #[test]
    fn test_decode_two_packets_in_one_buffer() {
        let mut codec = PacketCodec::new();
        let mut buf = BytesMut::new();
        Packet::ok_response(1, Bytes::from_static(b"a")).write_to(&mut buf);
        Packet::ok_response(2, Bytes::from_static(b"b")).write_to(&mut buf);

        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().sync_id(), 1);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().sync_id(), 2);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_decode_rejects_short_length() {
        let mut codec = PacketCodec::new();
        let mut buf = BytesMut::from(&[0x02, 0x00, 0x00, 0x00, 0xff, 0xff][..]);

        let result = codec.decode(&mut buf);
        assert!(matches!(result, Err(TarantoolError::Protocol(_))));
    }

    #[test]
    fn test_decode_rejects_oversized_packet() {
        let mut codec = PacketCodec::with_max_packet_size(32);
        let mut buf = BytesMut::new();
        Packet::ok_response(1, Bytes::from(vec![0u8; 64])).write_to(&mut buf);

        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn test_encode_rejects_oversized_packet() {
        let mut codec = PacketCodec::with_max_packet_size(16);
        let mut buf = BytesMut::new();
        let result = codec.encode(Packet::call("too.long.for.limit", b""), &mut buf);

        assert!(result.is_err());
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn test_framed_stream_preserves_packet_boundaries() {
        use futures::{SinkExt, StreamExt};
        use tokio_util::codec::{FramedRead, FramedWrite};

        // A tiny pipe forces packets to arrive split across reads.
        let (client, server) = tokio::io::duplex(7);
        let mut writer = FramedWrite::new(client, PacketCodec::new());
        let mut reader = FramedRead::new(server, PacketCodec::new());

        let sent = vec![
            Packet::ping().with_sync_id(1),
            Packet::call("echo", vec![7u8; 100]).with_sync_id(2),
            Packet::error_response(3, 32, "boom"),
        ];
        let expected = sent.clone();
        let send = tokio::spawn(async move {
            for packet in sent {
                writer.send(packet).await.unwrap();
            }
        });

        for packet in expected {
            assert_eq!(reader.next().await.unwrap().unwrap(), packet);
        }
        send.await.unwrap();
    }
}
