//! Packet type shared by requests and responses.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::constants::*;
use crate::error::{Result, TarantoolError};

/// A single protocol packet.
///
/// The header carries the request or response code and the sync id used to
/// correlate a response with its request. The body is opaque to the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    code: u32,
    sync_id: u64,
    body: Bytes,
}

impl Packet {
    /// Creates a packet with the given code and body and no sync id.
    pub fn new(code: u32, body: impl Into<Bytes>) -> Self {
        Self {
            code,
            sync_id: SYNC_ID_NONE,
            body: body.into(),
        }
    }

    /// Creates a ping request.
    pub fn ping() -> Self {
        Self::new(REQUEST_PING, Bytes::new())
    }

    /// Creates a function call request.
    ///
    /// The body is the length-prefixed function name followed by the
    /// already-encoded arguments.
    pub fn call(function: &str, args: impl AsRef<[u8]>) -> Self {
        Self::new(REQUEST_CALL, Self::named_body(function, args.as_ref()))
    }

    /// Creates an expression evaluation request.
    pub fn eval(expression: &str, args: impl AsRef<[u8]>) -> Self {
        Self::new(REQUEST_EVAL, Self::named_body(expression, args.as_ref()))
    }

    /// Creates a successful response for the given sync id.
    pub fn ok_response(sync_id: u64, body: impl Into<Bytes>) -> Self {
        Self::new(RESPONSE_OK, body).with_sync_id(sync_id)
    }

    /// Creates an error response for the given sync id.
    pub fn error_response(sync_id: u64, error_code: u32, message: &str) -> Self {
        Self::new(
            RESPONSE_ERROR_FLAG | error_code,
            Bytes::copy_from_slice(message.as_bytes()),
        )
        .with_sync_id(sync_id)
    }

    /// Returns this packet with the sync id replaced.
    pub fn with_sync_id(mut self, sync_id: u64) -> Self {
        self.sync_id = sync_id;
        self
    }

    /// Sets the sync id.
    pub fn set_sync_id(&mut self, sync_id: u64) {
        self.sync_id = sync_id;
    }

    /// Returns the request or response code.
    pub fn code(&self) -> u32 {
        self.code
    }

    /// Returns the sync id.
    pub fn sync_id(&self) -> u64 {
        self.sync_id
    }

    /// Returns the opaque body.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Consumes the packet and returns its body.
    pub fn into_body(self) -> Bytes {
        self.body
    }

    /// Returns `true` if this is an error response.
    pub fn is_error(&self) -> bool {
        self.code & RESPONSE_ERROR_FLAG != 0
    }

    /// Converts an error response into a [`TarantoolError::Server`], passing
    /// successful responses through unchanged.
    pub fn into_result(self) -> Result<Packet> {
        if !self.is_error() {
            return Ok(self);
        }
        Err(TarantoolError::Server {
            code: self.code & !RESPONSE_ERROR_FLAG,
            message: String::from_utf8_lossy(&self.body).into_owned(),
        })
    }

    /// Returns the encoded size of this packet, length prefix included.
    pub fn encoded_len(&self) -> usize {
        SIZE_OF_LENGTH_FIELD + HEADER_SIZE + self.body.len()
    }

    /// Writes this packet to the buffer.
    pub fn write_to(&self, dst: &mut BytesMut) {
        dst.reserve(self.encoded_len());
        dst.put_u32_le((HEADER_SIZE + self.body.len()) as u32);
        dst.put_u64_le(self.sync_id);
        dst.put_u32_le(self.code);
        dst.put_slice(&self.body);
    }

    /// Reads one complete packet from the buffer.
    ///
    /// Returns `None` and leaves the buffer untouched if it does not yet hold
    /// a complete packet.
    pub fn read_from(src: &mut BytesMut) -> Option<Self> {
        if src.len() < SIZE_OF_LENGTH_FIELD {
            return None;
        }
        let length = u32::from_le_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if length < HEADER_SIZE || src.len() < SIZE_OF_LENGTH_FIELD + length {
            return None;
        }

        src.advance(SIZE_OF_LENGTH_FIELD);
        let sync_id = src.get_u64_le();
        let code = src.get_u32_le();
        let body = src.split_to(length - HEADER_SIZE).freeze();

        Some(Self {
            code,
            sync_id,
            body,
        })
    }

    fn named_body(name: &str, args: &[u8]) -> Bytes {
        let mut buf = BytesMut::with_capacity(4 + name.len() + args.len());
        buf.put_u32_le(name.len() as u32);
        buf.put_slice(name.as_bytes());
        buf.put_slice(args);
        buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_codes_never_look_like_errors() {
        for code in [REQUEST_PING, REQUEST_CALL, REQUEST_EVAL] {
            assert!(!Packet::new(code, Bytes::new()).is_error());
            assert_ne!(code, RESPONSE_OK);
        }
    }

    #[test]
    fn test_ping_has_empty_body() {
        let packet = Packet::ping();
        assert_eq!(packet.code(), REQUEST_PING);
        assert!(packet.body().is_empty());
        assert_eq!(packet.sync_id(), SYNC_ID_NONE);
    }

    #[test]
    fn test_call_body_layout() {
        let packet = Packet::call("box.info", [0x90]);
        let body = packet.body();
        assert_eq!(&body[..4], &8u32.to_le_bytes());
        assert_eq!(&body[4..12], b"box.info");
        assert_eq!(&body[12..], &[0x90]);
    }

    #[test]
    fn test_write_then_read() {
        let packet = Packet::call("echo", b"args").with_sync_id(42);
        let mut buf = BytesMut::new();
        packet.write_to(&mut buf);
        assert_eq!(buf.len(), packet.encoded_len());

        let decoded = Packet::read_from(&mut buf).unwrap();
        assert_eq!(decoded, packet);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_read_incomplete_leaves_buffer() {
        let packet = Packet::ok_response(1, Bytes::from_static(b"value"));
        let mut full = BytesMut::new();
        packet.write_to(&mut full);

        let mut partial = BytesMut::from(&full[..full.len() - 1]);
        assert!(Packet::read_from(&mut partial).is_none());
        assert_eq!(partial.len(), full.len() - 1);
    }

    #[test]
    fn test_error_response_into_result() {
        let packet = Packet::error_response(9, 32, "function not found");
        assert!(packet.is_error());

        match packet.into_result() {
            Err(TarantoolError::Server { code, message }) => {
                assert_eq!(code, 32);
                assert_eq!(message, "function not found");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_ok_response_into_result() {
        let packet = Packet::ok_response(3, Bytes::from_static(b"ok"));
        let packet = packet.into_result().unwrap();
        assert_eq!(packet.sync_id(), 3);
        assert_eq!(packet.into_body(), Bytes::from_static(b"ok"));
    }
}
