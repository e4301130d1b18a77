//! Framed message transports.
//!
//! A transport moves opaque byte chunks. It knows nothing about MQTT
//! packet boundaries: one received message may hold several packets or a
//! fraction of one, and the event loop's parser sorts that out.

use std::future::Future;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::Result;

mod memory;
mod tcp;
mod websocket;

pub use memory::{MemoryPeer, MemoryTransport};
pub use tcp::TcpTransport;
pub use websocket::WebSocketTransport;

/// Notifications raised by a connected transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A chunk of received bytes.
    Message(Bytes),
    /// The connection failed.
    Error(String),
    /// The connection is gone, with the reason if known.
    Closed(Option<String>),
}

/// Receiving side of a connected transport.
pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

/// A bidirectional byte-chunk transport.
pub trait Transport: Send + 'static {
    /// Open the connection and return its event stream.
    ///
    /// Called again after a close to open a fresh connection.
    fn connect(&mut self) -> impl Future<Output = Result<TransportEvents>> + Send;

    /// Queue one encoded packet for transmission.
    fn send(&mut self, frame: Bytes) -> Result<()>;

    /// Close the connection. A `Closed` event follows on its event stream,
    /// whether or not the remote end responds.
    fn close(&mut self) -> Result<()>;
}
