//! MQTT over WebSocket.
//!
//! Opens a `ws://` connection requesting the `mqtt` subprotocol. Every
//! outgoing packet travels in its own Binary frame; incoming Binary frames
//! are handed up as they arrive, whatever packet boundaries they cut.

use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;

use super::{Transport, TransportEvent, TransportEvents};
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};

/// MQTT WebSocket subprotocol identifier.
const MQTT_SUBPROTOCOL: &str = "mqtt";

/// WebSocket connection to a broker.
pub struct WebSocketTransport {
    url: String,
    connect_timeout: Duration,
    writer: Option<mpsc::UnboundedSender<Bytes>>,
    events: Option<mpsc::UnboundedSender<TransportEvent>>,
    reader: Option<JoinHandle<()>>,
}

impl WebSocketTransport {
    /// `url` is a full WebSocket URL, e.g. `ws://broker:8080/mqtt`.
    pub fn new(url: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            connect_timeout,
            writer: None,
            events: None,
            reader: None,
        }
    }

    /// Use `config.address` as the URL.
    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.address.clone(), config.connect_timeout_duration())
    }
}

impl Transport for WebSocketTransport {
    async fn connect(&mut self) -> Result<TransportEvents> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        request.headers_mut().insert(
            "Sec-WebSocket-Protocol",
            HeaderValue::from_static(MQTT_SUBPROTOCOL),
        );

        let (ws, response) =
            tokio::time::timeout(self.connect_timeout, tokio_tungstenite::connect_async(request))
                .await
                .map_err(|_| ClientError::Transport(format!("connect to {} timed out", self.url)))?
                .map_err(|e| ClientError::Transport(e.to_string()))?;
        log::debug!(
            "Connected to {} (subprotocol {:?})",
            self.url,
            response.headers().get("Sec-WebSocket-Protocol")
        );

        let (mut sink, mut stream) = ws.split();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (frames_tx, mut frames_rx) = mpsc::unbounded_channel::<Bytes>();

        let read_events = events_tx.clone();
        let write_events = events_tx.clone();
        let reader_task = tokio::spawn(async move {
            while let Some(item) = stream.next().await {
                match item {
                    Ok(Message::Binary(data)) => {
                        if read_events.send(TransportEvent::Message(data)).is_err() {
                            return;
                        }
                    }
                    Ok(Message::Close(frame)) => {
                        let reason = frame
                            .map(|f| f.reason.as_str().to_string())
                            .filter(|r| !r.is_empty());
                        let _ = read_events.send(TransportEvent::Closed(reason));
                        return;
                    }
                    Ok(Message::Text(_)) => {
                        // MQTT-over-WS requires Binary frames
                        let reason = "MQTT requires Binary WebSocket frames".to_string();
                        let _ = read_events.send(TransportEvent::Error(reason.clone()));
                        let _ = read_events.send(TransportEvent::Closed(Some(reason)));
                        return;
                    }
                    // Ping/pong is answered by tungstenite
                    Ok(_) => {}
                    Err(e) => {
                        let _ = read_events.send(TransportEvent::Error(e.to_string()));
                        let _ = read_events.send(TransportEvent::Closed(Some(e.to_string())));
                        return;
                    }
                }
            }
            let _ = read_events.send(TransportEvent::Closed(None));
        });

        tokio::spawn(async move {
            while let Some(frame) = frames_rx.recv().await {
                if let Err(e) = sink.send(Message::Binary(frame)).await {
                    log::warn!("WebSocket write failed: {}", e);
                    let _ = write_events.send(TransportEvent::Error(e.to_string()));
                    return;
                }
            }
            // Sender dropped by close()
            let _ = sink.close().await;
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
        if self.writer.take().is_none() {
            return Err(ClientError::NotConnected);
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(events) = self.events.take() {
            let _ = events.send(TransportEvent::Closed(None));
        }
        log::debug!("Closed WebSocket to {}", self.url);
        Ok(())
    }
}
