//! Acknowledgment correlation over a transport.
//!
//! Split architecture: [`WireClient`] (cloneable handle) + [`EventLoop`]
//! (owns the transport, the parser and the pending acknowledgments).
//!
//! ```ignore
//! let (transport, peer) = MemoryTransport::pair();
//! let (wire, mut eventloop) = WireClient::connect(transport, 16).await?;
//!
//! tokio::spawn(async move {
//!     while let Ok(event) = eventloop.poll().await {
//!         log::info!("{:?}", event);
//!     }
//! });
//!
//! let connack = wire
//!     .send_with_ack(&Packet::Connect(Connect::new("id")), AckSpec::new(PacketType::Connack))
//!     .await?;
//! ```

use std::collections::VecDeque;
use std::time::Duration;

use bytes::Bytes;
use mqwire_core::{encode, Packet, PacketType, Parser};
use tokio::sync::{mpsc, oneshot};

use crate::error::{ClientError, Result};
use crate::events::Event;
use crate::pending::{AckKey, PendingAcks, Waiter};
use crate::transport::{Transport, TransportEvent, TransportEvents};

/// What acknowledgment to wait for, and for how long.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckSpec {
    pub expected: PacketType,
    /// `None` waits until the ack arrives or the transport fails.
    pub timeout: Option<Duration>,
}

impl AckSpec {
    pub fn new(expected: PacketType) -> Self {
        Self {
            expected,
            timeout: None,
        }
    }

    /// Fail with [`ClientError::Timeout`] after `timeout`. Zero disables it.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = (!timeout.is_zero()).then_some(timeout);
        self
    }
}

/// Commands sent from WireClient to EventLoop.
enum Command {
    Send {
        frame: Bytes,
        resp: oneshot::Sender<Result<()>>,
    },
    Request {
        frame: Bytes,
        key: AckKey,
        waiter: Waiter,
    },
    /// A waiter timed out; drop it.
    Prune,
    Close {
        resp: oneshot::Sender<Result<()>>,
    },
    Reconnect {
        resp: oneshot::Sender<Result<()>>,
    },
}

/// Handle for sending packets through an [`EventLoop`].
///
/// Cheap to clone and share across tasks. The event loop must be polled
/// for any of these calls to complete.
#[derive(Clone)]
pub struct WireClient {
    tx: mpsc::Sender<Command>,
}

impl WireClient {
    /// Connect `transport` and create a handle / event loop pair.
    ///
    /// `cap` is the command channel capacity.
    pub async fn connect<T: Transport>(
        mut transport: T,
        cap: usize,
    ) -> Result<(Self, EventLoop<T>)> {
        let events = transport.connect().await?;
        let (tx, rx) = mpsc::channel(cap.max(1));
        let eventloop = EventLoop {
            transport,
            events: Some(events),
            rx,
            parser: Parser::new(),
            pending: PendingAcks::default(),
            queue: VecDeque::new(),
            handles_dropped: false,
        };
        Ok((Self { tx }, eventloop))
    }

    /// Encode and send a packet without waiting for any acknowledgment.
    ///
    /// Encoding errors are returned before anything is queued.
    pub async fn send(&self, packet: &Packet) -> Result<()> {
        let frame = encode(packet)?;
        let (resp_tx, resp_rx) = oneshot::channel();
        self.command(Command::Send {
            frame,
            resp: resp_tx,
        })
        .await?;
        resp_rx
            .await
            .map_err(|_| ClientError::ConnectionClosed(None))?
    }

    /// Send a packet and wait for the matching acknowledgment.
    ///
    /// The ack must have type `spec.expected` and, when the outgoing packet
    /// carries a packet id, the same id. Resolves exactly once: with the
    /// ack, a timeout, or the transport failure that cut the wait short.
    pub async fn send_with_ack(&self, packet: &Packet, spec: AckSpec) -> Result<Packet> {
        let frame = encode(packet)?;
        let key = AckKey::new(spec.expected, packet.packet_id());
        let (waiter, settled) = oneshot::channel();
        self.command(Command::Request { frame, key, waiter }).await?;

        let result = match spec.timeout.filter(|t| !t.is_zero()) {
            Some(timeout) => match tokio::time::timeout(timeout, settled).await {
                Ok(result) => result,
                Err(_) => {
                    log::debug!(
                        "No {:?} for packet id {:?} within {:?}",
                        spec.expected,
                        key.packet_id,
                        timeout
                    );
                    let _ = self.tx.try_send(Command::Prune);
                    return Err(ClientError::Timeout {
                        expected: spec.expected,
                    });
                }
            },
            None => settled.await,
        };

        result.map_err(|_| ClientError::ConnectionClosed(None))?
    }

    /// Close the transport. A `Closed` event follows.
    ///
    /// Every pending acknowledgment has been rejected by the time this
    /// returns.
    pub async fn close(&self) -> Result<()> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.command(Command::Close { resp: resp_tx }).await?;
        resp_rx
            .await
            .map_err(|_| ClientError::ConnectionClosed(None))?
    }

    /// Open the transport again after it closed.
    ///
    /// Does nothing while the current connection is open.
    pub async fn reconnect(&self) -> Result<()> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.command(Command::Reconnect { resp: resp_tx }).await?;
        resp_rx
            .await
            .map_err(|_| ClientError::ConnectionClosed(None))?
    }

    async fn command(&self, cmd: Command) -> Result<()> {
        self.tx
            .send(cmd)
            .await
            .map_err(|_| ClientError::ConnectionClosed(None))
    }
}

/// Drives transport I/O, decoding and acknowledgment settlement.
///
/// You must call `poll()` repeatedly to make progress.
pub struct EventLoop<T: Transport> {
    transport: T,
    /// `None` once the transport has closed.
    events: Option<TransportEvents>,
    rx: mpsc::Receiver<Command>,
    parser: Parser,
    pending: PendingAcks,
    /// Decoded but not yet returned, in arrival order.
    queue: VecDeque<Result<Event>>,
    handles_dropped: bool,
}

impl<T: Transport> EventLoop<T> {
    /// Poll for the next event.
    ///
    /// Parse errors come back as `Err(ClientError::Protocol)` in stream
    /// order; the loop stays usable afterwards. Once the transport has
    /// closed and every handle is dropped, returns
    /// `Err(ClientError::ConnectionClosed)`.
    pub async fn poll(&mut self) -> Result<Event> {
        loop {
            if let Some(item) = self.queue.pop_front() {
                return item;
            }
            if self.events.is_none() && self.handles_dropped {
                return Err(ClientError::ConnectionClosed(None));
            }

            enum Action {
                Transport(Option<TransportEvent>),
                Command(Option<Command>),
            }

            let connected = self.events.is_some();
            let action = tokio::select! {
                event = next_event(&mut self.events), if connected => Action::Transport(event),
                cmd = self.rx.recv(), if !self.handles_dropped => Action::Command(cmd),
            };

            match action {
                Action::Transport(event) => self.handle_transport_event(event),
                Action::Command(Some(cmd)) => self.handle_command(cmd).await,
                Action::Command(None) => {
                    log::debug!("All handles dropped");
                    self.handles_dropped = true;
                }
            }
        }
    }

    /// Number of callers waiting for an acknowledgment.
    pub fn pending_acks(&self) -> usize {
        self.pending.len()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Whether the transport is open.
    pub fn is_connected(&self) -> bool {
        self.events.is_some()
    }

    /// Open the transport again after it closed. No-op while connected.
    ///
    /// The parser starts from an empty buffer on the new connection.
    pub async fn reconnect(&mut self) -> Result<()> {
        if self.events.is_some() {
            return Ok(());
        }
        let events = self.transport.connect().await?;
        self.parser.reset();
        self.events = Some(events);
        log::debug!("Transport reconnected");
        Ok(())
    }

    fn handle_transport_event(&mut self, event: Option<TransportEvent>) {
        match event {
            Some(TransportEvent::Message(bytes)) => {
                log::trace!("Received {} bytes", bytes.len());
                self.parser.push(&bytes);
                for item in self.parser.packets() {
                    match item {
                        Ok(packet) => {
                            self.pending.settle(&packet);
                            self.queue.push_back(Ok(Event::Packet(packet)));
                        }
                        Err(e) => {
                            log::warn!("Protocol error: {}", e);
                            self.queue.push_back(Err(e.into()));
                        }
                    }
                }
            }
            Some(TransportEvent::Error(reason)) => {
                log::warn!("Transport error: {}", reason);
                let failed = self
                    .pending
                    .fail_all(|| ClientError::Transport(reason.clone()));
                if failed > 0 {
                    log::debug!("Failed {} pending acknowledgments", failed);
                }
                self.queue.push_back(Ok(Event::Error(reason)));
            }
            Some(TransportEvent::Closed(reason)) => self.handle_closed(reason),
            None => self.handle_closed(None),
        }
    }

    fn handle_closed(&mut self, reason: Option<String>) {
        log::debug!("Transport closed: {:?}", reason);
        self.events = None;
        self.parser.reset();
        if !self.pending.is_empty() {
            self.pending
                .fail_all(|| ClientError::ConnectionClosed(reason.clone()));
        }
        self.queue.push_back(Ok(Event::Closed(reason)));
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Send { frame, resp } => {
                let _ = resp.send(self.transmit(frame));
            }
            Command::Request { frame, key, waiter } => {
                if waiter.is_closed() {
                    return;
                }
                match self.transmit(frame) {
                    Ok(()) => self.pending.register(key, waiter),
                    Err(e) => {
                        let _ = waiter.send(Err(e));
                    }
                }
            }
            Command::Prune => {
                let pruned = self.pending.prune();
                if pruned > 0 {
                    log::trace!("Pruned {} abandoned waiters", pruned);
                }
            }
            Command::Close { resp } => {
                let result = if self.events.is_some() {
                    // Settle right away instead of waiting for the
                    // transport's own Closed event, which is dropped.
                    self.transport.close().map(|()| self.handle_closed(None))
                } else {
                    Ok(())
                };
                let _ = resp.send(result);
            }
            Command::Reconnect { resp } => {
                let _ = resp.send(self.reconnect().await);
            }
        }
    }

    fn transmit(&mut self, frame: Bytes) -> Result<()> {
        if self.events.is_none() {
            return Err(ClientError::ConnectionClosed(None));
        }
        log::trace!("Sending {} bytes", frame.len());
        self.transport.send(frame)
    }
}

async fn next_event(events: &mut Option<TransportEvents>) -> Option<TransportEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use mqwire_core::{Connack, ConnackCode, Connect, Publish, QoS};

    use super::*;
    use crate::transport::{MemoryPeer, MemoryTransport};

    async fn setup() -> (WireClient, EventLoop<MemoryTransport>, MemoryPeer) {
        let (transport, peer) = MemoryTransport::pair();
        let (wire, eventloop) = WireClient::connect(transport, 8).await.unwrap();
        (wire, eventloop, peer)
    }

    #[tokio::test]
    async fn test_send_encode_error_is_synchronous() {
        let (wire, _eventloop, _peer) = setup().await;
        let mut publish = Publish::new("t", "x");
        publish.qos = QoS::AtLeastOnce;
        // Nobody polls the loop, so only a synchronous error can come back.
        assert!(matches!(
            wire.send(&Packet::Publish(publish)).await,
            Err(ClientError::Encode(_))
        ));
    }

    #[tokio::test]
    async fn test_every_packet_is_emitted() {
        let (_wire, mut eventloop, mut peer) = setup().await;
        let mut chunk = mqwire_core::encode(&Packet::Pingresp).unwrap().to_vec();
        chunk.extend_from_slice(&mqwire_core::encode(&Packet::Puback { packet_id: 4 }).unwrap());
        peer.deliver(chunk);

        assert_eq!(eventloop.poll().await.unwrap(), Event::Packet(Packet::Pingresp));
        assert_eq!(
            eventloop.poll().await.unwrap(),
            Event::Packet(Packet::Puback { packet_id: 4 })
        );
    }

    #[tokio::test]
    async fn test_protocol_error_keeps_order() {
        let (_wire, mut eventloop, mut peer) = setup().await;
        peer.deliver(vec![0xD0, 0x00, 0x00, 0x00]);
        assert_eq!(eventloop.poll().await.unwrap(), Event::Packet(Packet::Pingresp));
        assert!(matches!(
            eventloop.poll().await,
            Err(ClientError::Protocol(mqwire_core::ProtocolError::InvalidPacketType(0)))
        ));

        // Still usable.
        peer.deliver_packet(&Packet::Pingresp).unwrap();
        assert_eq!(eventloop.poll().await.unwrap(), Event::Packet(Packet::Pingresp));
    }

    #[tokio::test]
    async fn test_connect_roundtrip() {
        let (wire, mut eventloop, mut peer) = setup().await;
        let request = tokio::spawn(async move {
            wire.send_with_ack(
                &Packet::Connect(Connect::new("c1")),
                AckSpec::new(PacketType::Connack).timeout(Duration::from_secs(5)),
            )
            .await
        });

        let broker = tokio::spawn(async move {
            let packet = peer.recv_packet().await.unwrap().unwrap();
            assert!(matches!(packet, Packet::Connect(_)));
            peer.deliver_packet(&Packet::Connack(Connack {
                session_present: false,
                code: ConnackCode::Accepted,
            }))
            .unwrap();
            peer
        });

        let event = eventloop.poll().await.unwrap();
        assert!(matches!(event, Event::Packet(Packet::Connack(_))));
        let ack = request.await.unwrap().unwrap();
        assert_eq!(
            ack,
            Packet::Connack(Connack {
                session_present: false,
                code: ConnackCode::Accepted,
            })
        );
        assert_eq!(eventloop.pending_acks(), 0);
        let _peer = broker.await.unwrap();
    }

    #[tokio::test]
    async fn test_close_fails_pending() {
        let (wire, mut eventloop, _peer) = setup().await;
        let request = tokio::spawn({
            let wire = wire.clone();
            async move {
                wire.send_with_ack(&Packet::Pingreq, AckSpec::new(PacketType::Pingresp))
                    .await
            }
        });

        // Let the request reach the loop before closing.
        while eventloop.pending_acks() == 0 {
            tokio::select! {
                _ = eventloop.poll() => {}
                _ = tokio::task::yield_now() => {}
            }
        }

        let closer = tokio::spawn(async move { wire.close().await });
        assert_eq!(eventloop.poll().await.unwrap(), Event::Closed(None));
        closer.await.unwrap().unwrap();
        assert!(matches!(
            request.await.unwrap(),
            Err(ClientError::ConnectionClosed(None))
        ));
        assert!(!eventloop.is_connected());
    }

    #[tokio::test]
    async fn test_reconnect_after_close() {
        let (wire, mut eventloop, mut peer) = setup().await;
        let handle = wire.clone();
        let session = tokio::spawn(async move {
            handle.close().await?;
            handle.send(&Packet::Pingreq).await?;
            Ok::<_, ClientError>(())
        });

        assert_eq!(eventloop.poll().await.unwrap(), Event::Closed(None));
        // Sending on the closed transport fails until reconnect.
        let reconnect = tokio::spawn(async move {
            let _ = session.await;
            wire.reconnect().await?;
            wire.send(&Packet::Pingreq).await
        });
        tokio::select! {
            _ = eventloop.poll() => panic!("no event expected"),
            result = reconnect => result.unwrap().unwrap(),
        }
        assert!(eventloop.is_connected());
        assert_eq!(peer.accepted(), 2);
        assert_eq!(peer.recv_packet().await.unwrap().unwrap(), Packet::Pingreq);

        peer.deliver_packet(&Packet::Pingresp).unwrap();
        assert_eq!(eventloop.poll().await.unwrap(), Event::Packet(Packet::Pingresp));
    }

    #[tokio::test]
    async fn test_reconnect_while_connected_is_noop() {
        let (_wire, mut eventloop, mut peer) = setup().await;
        eventloop.reconnect().await.unwrap();
        assert_eq!(peer.accepted(), 1);
    }
}
