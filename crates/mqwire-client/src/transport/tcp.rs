//! Plain TCP transport.

use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{Transport, TransportEvent, TransportEvents};
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};

const READ_BUFFER_SIZE: usize = 4096;

/// TCP connection to a broker.
///
/// Reads and writes run on their own tasks; `send` only queues frames.
/// Can be connected again after `close`.
pub struct TcpTransport {
    address: String,
    connect_timeout: Duration,
    writer: Option<mpsc::UnboundedSender<Bytes>>,
    events: Option<mpsc::UnboundedSender<TransportEvent>>,
    reader: Option<JoinHandle<()>>,
}

impl TcpTransport {
    pub fn new(address: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            address: address.into(),
            connect_timeout,
            writer: None,
            events: None,
            reader: None,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.address.clone(), config.connect_timeout_duration())
    }
}

impl Transport for TcpTransport {
    async fn connect(&mut self) -> Result<TransportEvents> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.address))
            .await
            .map_err(|_| ClientError::Transport(format!("connect to {} timed out", self.address)))?
            .map_err(ClientError::Io)?;
        stream.set_nodelay(true).map_err(ClientError::Io)?;
        log::debug!("Connected to {}", self.address);

        let (mut reader, mut writer) = stream.into_split();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (frames_tx, mut frames_rx) = mpsc::unbounded_channel::<Bytes>();

        let read_events = events_tx.clone();
        let write_events = events_tx.clone();
        let reader_task = tokio::spawn(async move {
            let mut buf = [0u8; READ_BUFFER_SIZE];
            loop {
                match reader.read(&mut buf).await {
                    Ok(0) => {
                        let _ = read_events.send(TransportEvent::Closed(None));
                        break;
                    }
                    Ok(n) => {
                        let chunk = Bytes::copy_from_slice(&buf[..n]);
                        if read_events.send(TransportEvent::Message(chunk)).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = read_events.send(TransportEvent::Error(e.to_string()));
                        let _ = read_events.send(TransportEvent::Closed(Some(e.to_string())));
                        break;
                    }
                }
            }
        });

        tokio::spawn(async move {
            while let Some(frame) = frames_rx.recv().await {
                if let Err(e) = writer.write_all(&frame).await {
                    log::warn!("TCP write failed: {}", e);
                    let _ = write_events.send(TransportEvent::Error(e.to_string()));
                    return;
                }
            }
            // Sender dropped by close()
            let _ = writer.shutdown().await;
        });

        self.writer = Some(frames_tx);
        self.events = Some(events_tx);
        self.reader = Some(reader_task);
        Ok(events_rx)
    }

    fn send(&mut self, frame: Bytes) -> Result<()> {
        let writer = self.writer.as_ref().ok_or(ClientError::NotConnected)?;
        writer
            .send(frame)
            .map_err(|_| ClientError::ConnectionClosed(Some("writer stopped".into())))
    }

    fn close(&mut self) -> Result<()> {
        // Dropping the sender lets the writer flush and shut down.
        if self.writer.take().is_none() {
            return Err(ClientError::NotConnected);
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(events) = self.events.take() {
            let _ = events.send(TransportEvent::Closed(None));
        }
        log::debug!("Closed connection to {}", self.address);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_tcp_exchange() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let broker = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 2];
            socket.read_exact(&mut buf).await.unwrap();
            assert_eq!(buf, [0xC0, 0x00]);
            socket.write_all(&[0xD0, 0x00]).await.unwrap();
        });

        let mut transport = TcpTransport::new(addr.to_string(), Duration::from_secs(5));
        let mut events = transport.connect().await.unwrap();
        transport.send(Bytes::from_static(&[0xC0, 0x00])).unwrap();

        assert_eq!(
            events.recv().await.unwrap(),
            TransportEvent::Message(Bytes::from_static(&[0xD0, 0x00]))
        );
        broker.await.unwrap();
        assert_eq!(events.recv().await.unwrap(), TransportEvent::Closed(None));
    }

    #[tokio::test]
    async fn test_close_emits_closed_while_peer_stays_open() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (hold_tx, hold_rx) = tokio::sync::oneshot::channel::<()>();

        let broker = tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            let _ = hold_rx.await;
        });

        let mut transport = TcpTransport::new(addr.to_string(), Duration::from_secs(5));
        let mut events = transport.connect().await.unwrap();
        transport.close().unwrap();

        let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap();
        assert_eq!(event, Some(TransportEvent::Closed(None)));
        assert!(matches!(
            transport.send(Bytes::from_static(&[0xC0, 0x00])),
            Err(ClientError::NotConnected)
        ));

        hold_tx.send(()).unwrap();
        broker.await.unwrap();
    }

    #[tokio::test]
    async fn test_reconnect_after_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let broker = tokio::spawn(async move {
            for _ in 0..2 {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut buf = [0u8; 2];
                socket.read_exact(&mut buf).await.unwrap();
                socket.write_all(&[0xD0, 0x00]).await.unwrap();
            }
        });

        let mut transport = TcpTransport::new(addr.to_string(), Duration::from_secs(5));
        for _ in 0..2 {
            let mut events = transport.connect().await.unwrap();
            transport.send(Bytes::from_static(&[0xC0, 0x00])).unwrap();
            assert_eq!(
                events.recv().await.unwrap(),
                TransportEvent::Message(Bytes::from_static(&[0xD0, 0x00]))
            );
            transport.close().unwrap();
            assert_eq!(events.recv().await.unwrap(), TransportEvent::Closed(None));
        }
        broker.await.unwrap();
    }

    #[tokio::test]
    async fn test_send_before_connect() {
        let mut transport = TcpTransport::new("127.0.0.1:1", Duration::from_secs(1));
        assert!(matches!(
            transport.send(Bytes::from_static(&[0xC0, 0x00])),
            Err(ClientError::NotConnected)
        ));
    }
}
