//! Protocol constants for the framed Tarantool binary protocol.

/// Size of the length prefix that precedes every packet.
pub const SIZE_OF_LENGTH_FIELD: usize = 4;

/// Size of the packet header (sync id + code) following the length prefix.
pub const HEADER_SIZE: usize = 12;

/// Upper bound for a single packet, guarding against corrupt length prefixes.
pub const MAX_PACKET_SIZE: usize = 16 * 1024 * 1024;

/// Sync id used by packets that are not correlated to a request.
pub const SYNC_ID_NONE: u64 = 0;

/// Evaluate a server-side expression.
pub const REQUEST_EVAL: u32 = 0x08;

/// Call a server-side function.
pub const REQUEST_CALL: u32 = 0x0a;

/// Liveness probe with an empty body.
pub const REQUEST_PING: u32 = 0x40;

/// Successful response.
pub const RESPONSE_OK: u32 = 0x00;

/// Error flag - set on the response code when the body carries an error message.
pub const RESPONSE_ERROR_FLAG: u32 = 0x8000;
