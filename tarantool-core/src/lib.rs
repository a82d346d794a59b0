//! Core types for the Tarantool client runtime.

#![warn(missing_docs)]

pub mod error;
pub mod protocol;

pub use error::{Result, TarantoolError};
pub use protocol::{Packet, PacketCodec};
