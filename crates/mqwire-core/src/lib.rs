//! mqwire-core - MQTT 3.1 / 3.1.1 wire format.
//!
//! This crate holds the packet model, the exact-size packet encoder and the
//! incremental parser that rebuilds packets from arbitrarily fragmented
//! byte streams. It performs no I/O; the client crate drives it.

pub mod buffer;
pub mod codec;
pub mod encode;
pub mod error;
pub mod packet;
pub mod parser;
pub mod varint;

pub use buffer::ByteAccumulator;
pub use encode::encode;
pub use error::{EncodeError, EncodingError, ProtocolError, Result};
pub use packet::*;
pub use parser::{FixedHeader, Parser};
