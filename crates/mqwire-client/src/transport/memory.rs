//! In-process transport backed by channels.

use bytes::Bytes;
use mqwire_core::{Packet, Parser, ProtocolError};
use tokio::sync::mpsc;

use super::{Transport, TransportEvent, TransportEvents};
use crate::error::{ClientError, Result};

type EventSender = mpsc::UnboundedSender<TransportEvent>;

/// Client half of an in-memory connection.
///
/// Can be connected again after it closes; each connection gets a fresh
/// event channel that the peer picks up.
pub struct MemoryTransport {
    connections: mpsc::UnboundedSender<EventSender>,
    /// Event sender of the open connection.
    events: Option<EventSender>,
    outbound: mpsc::UnboundedSender<Bytes>,
}

/// Far end of a [`MemoryTransport`], standing in for the broker.
///
/// Always talks to the most recent connection.
pub struct MemoryPeer {
    connections: mpsc::UnboundedReceiver<EventSender>,
    events: Option<EventSender>,
    outbound: mpsc::UnboundedReceiver<Bytes>,
    parser: Parser,
    accepted: usize,
}

impl MemoryTransport {
    /// Create a transport/peer pair. Nothing flows until `connect`.
    pub fn pair() -> (MemoryTransport, MemoryPeer) {
        let (conn_tx, conn_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let transport = MemoryTransport {
            connections: conn_tx,
            events: None,
            outbound: out_tx,
        };
        let peer = MemoryPeer {
            connections: conn_rx,
            events: None,
            outbound: out_rx,
            parser: Parser::new(),
            accepted: 0,
        };
        (transport, peer)
    }
}

impl Transport for MemoryTransport {
    async fn connect(&mut self) -> Result<TransportEvents> {
        if self.events.is_some() {
            return Err(ClientError::InvalidState(
                "memory transport already connected".into(),
            ));
        }
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        self.connections
            .send(events_tx.clone())
            .map_err(|_| ClientError::Transport("peer dropped".into()))?;
        self.events = Some(events_tx);
        Ok(events_rx)
    }

    fn send(&mut self, frame: Bytes) -> Result<()> {
        if self.events.is_none() {
            return Err(ClientError::ConnectionClosed(None));
        }
        log::trace!("memory transport: sending {} bytes", frame.len());
        self.outbound
            .send(frame)
            .map_err(|_| ClientError::Transport("peer dropped".into()))
    }

    fn close(&mut self) -> Result<()> {
        if let Some(events) = self.events.take() {
            let _ = events.send(TransportEvent::Closed(None));
        }
        Ok(())
    }
}

impl MemoryPeer {
    /// Deliver raw bytes to the client as one message.
    pub fn deliver(&mut self, bytes: impl Into<Bytes>) {
        self.emit(TransportEvent::Message(bytes.into()));
    }

    /// Encode a packet and deliver it as one message.
    pub fn deliver_packet(&mut self, packet: &Packet) -> Result<()> {
        self.deliver(mqwire_core::encode(packet)?);
        Ok(())
    }

    /// Raise a transport error on the client side.
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.emit(TransportEvent::Error(reason.into()));
    }

    /// Close the connection from the peer side.
    pub fn close(&mut self, reason: Option<String>) {
        self.emit(TransportEvent::Closed(reason));
    }

    /// Number of connections the client has opened so far.
    pub fn accepted(&mut self) -> usize {
        self.accept_pending();
        self.accepted
    }

    /// Next frame sent by the client, waiting for one if needed.
    pub async fn recv(&mut self) -> Option<Bytes> {
        let frame = self.outbound.recv().await;
        self.accept_pending();
        frame
    }

    /// Next packet sent by the client.
    pub async fn recv_packet(&mut self) -> Option<std::result::Result<Packet, ProtocolError>> {
        self.accept_pending();
        loop {
            match self.parser.next_packet() {
                Ok(Some(packet)) => return Some(Ok(packet)),
                Ok(None) => {}
                Err(e) => return Some(Err(e)),
            }
            let frame = self.outbound.recv().await?;
            // A new connection starts a fresh byte stream.
            self.accept_pending();
            self.parser.push(&frame);
        }
    }

    /// A frame already sent by the client, without waiting.
    pub fn try_recv(&mut self) -> Option<Bytes> {
        let frame = self.outbound.try_recv().ok();
        self.accept_pending();
        frame
    }

    fn emit(&mut self, event: TransportEvent) {
        self.accept_pending();
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }

    fn accept_pending(&mut self) {
        while let Ok(events) = self.connections.try_recv() {
            log::trace!("memory peer: accepted connection {}", self.accepted + 1);
            self.events = Some(events);
            self.parser.reset();
            self.accepted += 1;
        }
    }
}
