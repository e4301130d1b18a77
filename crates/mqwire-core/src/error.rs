//! Error types shared by the codec, encoder and parser.

use thiserror::Error;

use crate::packet::PacketType;

/// Text encoding failures.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodingError {
    /// Invalid lead byte, bad continuation byte or truncated sequence.
    #[error("malformed UTF-8 sequence")]
    MalformedUtf,

    /// Unpaired surrogate, either in UTF-16 input or encoded into UTF-8.
    #[error("malformed unicode: unmatched surrogate")]
    MalformedUnicode,
}

/// Errors raised while decoding bytes received from a peer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("invalid packet type: {0}")]
    InvalidPacketType(u8),

    #[error("invalid remaining length encoding")]
    InvalidRemainingLength,

    #[error("invalid QoS: {0}")]
    InvalidQoS(u8),

    #[error("invalid fixed header flags for {packet_type:?}: {flags:#04x}")]
    InvalidHeaderFlags { packet_type: PacketType, flags: u8 },

    #[error("invalid protocol name: {0}")]
    InvalidProtocolName(String),

    #[error("unsupported protocol version: {0}")]
    UnsupportedProtocolVersion(u8),

    /// Protocol id and protocol level disagree, e.g. "MQTT" with level 3.
    #[error("protocol name {name} does not match version {version}")]
    ProtocolMismatch { name: String, version: u8 },

    #[error("invalid CONNACK return code: {0}")]
    InvalidConnackCode(u8),

    /// A field ran past the end of the packet's remaining length.
    #[error("truncated {field}: need {needed} bytes, have {available}")]
    Truncated {
        field: &'static str,
        needed: usize,
        available: usize,
    },

    /// Read past the end of the byte accumulator.
    #[error("read out of bounds: offset {offset} len {len} exceeds {available}")]
    OutOfBounds {
        offset: usize,
        len: usize,
        available: usize,
    },

    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),
}

/// Errors raised while encoding a packet for transmission.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("string of {0} bytes exceeds the 65535 byte limit")]
    StringTooLong(usize),

    #[error("remaining length {0} exceeds the protocol maximum")]
    PacketTooLarge(usize),

    #[error("QoS > 0 PUBLISH requires a packet id")]
    MissingPacketId,

    #[error("QoS 0 PUBLISH must not carry a packet id")]
    UnexpectedPacketId,

    #[error("packet id must be non-zero")]
    ZeroPacketId,

    #[error("{0:?} requires at least one topic")]
    EmptyTopicList(PacketType),

    /// MQTT-3.1.2-22: the password flag needs the username flag.
    #[error("CONNECT password requires a username")]
    PasswordWithoutUsername,
}

/// Result of a decode operation.
pub type Result<T> = std::result::Result<T, ProtocolError>;
