//! Client error types.

use std::io;

use mqwire_core::{ConnackCode, PacketType};
use thiserror::Error;

use crate::config::ConfigError;

/// Client error type.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] mqwire_core::ProtocolError),

    #[error("Encode error: {0}")]
    Encode(#[from] mqwire_core::EncodeError),

    /// No acknowledgment of the expected type arrived in time.
    #[error("Timed out waiting for {expected:?}")]
    Timeout { expected: PacketType },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Connection closed{}", .0.as_ref().map(|r| format!(": {}", r)).unwrap_or_default())]
    ConnectionClosed(Option<String>),

    #[error("Connection refused: {}", .0.description())]
    ConnectionRefused(ConnackCode),

    #[error("Not connected")]
    NotConnected,

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, ClientError>;
