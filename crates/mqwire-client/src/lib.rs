//! mqwire-client - MQTT 3.1 / 3.1.1 client over pluggable transports.
//!
//! The core is [`WireClient`] + [`EventLoop`]: the handle encodes packets and
//! can wait for the acknowledgment that answers them, while the loop owns
//! the transport, reassembles packets from whatever chunks arrive and
//! settles each waiter exactly once.
//!
//! # Example
//!
//! ```ignore
//! use mqwire_client::{AckSpec, MemoryTransport, WireClient};
//! use mqwire_client::{Connect, Packet, PacketType};
//!
//! let (transport, peer) = MemoryTransport::pair();
//! let (wire, mut eventloop) = WireClient::connect(transport, 16).await?;
//! tokio::spawn(async move { while eventloop.poll().await.is_ok() {} });
//!
//! let ack = wire
//!     .send_with_ack(
//!         &Packet::Connect(Connect::new("my-client")),
//!         AckSpec::new(PacketType::Connack).timeout(Duration::from_secs(5)),
//!     )
//!     .await?;
//! ```
//!
//! [`Client`] wraps the same machinery in connect / subscribe / publish calls.

mod client;
mod config;
mod error;
mod events;
mod packet_id;
mod pending;
pub mod transport;
mod wire;

pub use client::Client;
pub use crate::config::{ClientConfig, ConfigError};
pub use error::{ClientError, Result};
pub use events::Event;
pub use packet_id::PacketIdAllocator;
pub use pending::AckKey;
pub use transport::{
    MemoryPeer, MemoryTransport, TcpTransport, Transport, TransportEvent, WebSocketTransport,
};
pub use wire::{AckSpec, EventLoop, WireClient};

// Re-export useful types from core
pub use mqwire_core::packet::{
    Connack, ConnackCode, Connect, Packet, PacketType, ProtocolVersion, Publish, QoS, Suback,
    Subscribe, Unsubscribe, Will,
};
