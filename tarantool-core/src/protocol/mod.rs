//! Packet model and frame codec for the Tarantool binary protocol.
//!
//! Request and response bodies are opaque to the runtime; only the sync id
//! in the packet header is interpreted, to correlate responses with requests.

mod codec;
pub mod constants;
mod packet;

pub use codec::PacketCodec;
pub use constants::*;
pub use packet::Packet;
