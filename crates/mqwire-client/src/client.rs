//! Convenience MQTT client built on [`WireClient`].
//!
//! ```ignore
//! let config = ClientConfig::new("localhost:1883").client_id("sensor-1");
//! let transport = TcpTransport::from_config(&config);
//! let (mut client, mut eventloop) = Client::new(transport, config).await?;
//!
//! // The loop must run for any request to complete.
//! tokio::spawn(async move { while eventloop.poll().await.is_ok() {} });
//!
//! client.connect().await?;
//! client.subscribe(&[("sensors/#", QoS::AtLeastOnce)]).await?;
//! client.publish("sensors/temp", "25.5", QoS::AtLeastOnce, false).await?;
//!
//! client.disconnect().await?;
//! client.connect().await?;
//! ```

use std::time::Duration;

use bytes::Bytes;
use mqwire_core::{
    ConnackCode, Connect, Packet, PacketType, Publish, QoS, Subscribe, Unsubscribe,
    SUBACK_FAILURE,
};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::packet_id::PacketIdAllocator;
use crate::transport::Transport;
use crate::wire::{AckSpec, EventLoop, WireClient};

/// Pub/sub client for QoS 0 and 1.
pub struct Client {
    wire: WireClient,
    config: ClientConfig,
    packet_ids: PacketIdAllocator,
}

impl Client {
    /// Open `transport` and create the client / event loop pair.
    ///
    /// No CONNECT is sent until [`Client::connect`].
    pub async fn new<T: Transport>(
        transport: T,
        config: ClientConfig,
    ) -> Result<(Self, EventLoop<T>)> {
        config.validate()?;
        let (wire, eventloop) = WireClient::connect(transport, config.channel_capacity).await?;
        let client = Self {
            wire,
            config,
            packet_ids: PacketIdAllocator::new(),
        };
        Ok((client, eventloop))
    }

    /// Raw access to the underlying handle.
    pub fn wire(&self) -> &WireClient {
        &self.wire
    }

    /// Send CONNECT and wait for an accepting CONNACK.
    ///
    /// After a [`Client::disconnect`] the transport is opened again first.
    /// Returns the broker's session-present flag.
    pub async fn connect(&mut self) -> Result<bool> {
        self.wire.reconnect().await?;
        let connect = Connect {
            protocol_version: self.config.protocol(),
            clean_session: self.config.clean_session,
            keep_alive: self.config.keep_alive,
            client_id: self.config.client_id.clone(),
            will: None,
            username: self.config.username.clone(),
            password: self.config.password.clone().map(Bytes::from),
        };

        match self.request(&Packet::Connect(connect), PacketType::Connack).await? {
            Packet::Connack(connack) if connack.code == ConnackCode::Accepted => {
                log::info!("Connected as {:?}", self.config.client_id);
                if self.config.clean_session {
                    self.packet_ids.clear();
                }
                Ok(connack.session_present)
            }
            Packet::Connack(connack) => Err(ClientError::ConnectionRefused(connack.code)),
            other => Err(unexpected(other)),
        }
    }

    /// Subscribe and return the broker's return code per filter.
    pub async fn subscribe(&mut self, topics: &[(&str, QoS)]) -> Result<Vec<u8>> {
        let packet_id = self.allocate_id()?;
        let subscribe = Subscribe {
            packet_id,
            topics: topics.iter().map(|(t, q)| (t.to_string(), *q)).collect(),
        };
        let result = self
            .request(&Packet::Subscribe(subscribe), PacketType::Suback)
            .await;
        self.packet_ids.release(packet_id);

        match result? {
            Packet::Suback(suback) => {
                for ((topic, _), code) in topics.iter().zip(&suback.return_codes) {
                    if *code == SUBACK_FAILURE {
                        log::warn!("Subscription to {} rejected", topic);
                    }
                }
                Ok(suback.return_codes)
            }
            other => Err(unexpected(other)),
        }
    }

    pub async fn unsubscribe(&mut self, topics: &[&str]) -> Result<()> {
        let packet_id = self.allocate_id()?;
        let unsubscribe = Unsubscribe {
            packet_id,
            topics: topics.iter().map(|t| t.to_string()).collect(),
        };
        let result = self
            .request(&Packet::Unsubscribe(unsubscribe), PacketType::Unsuback)
            .await;
        self.packet_ids.release(packet_id);
        result.map(|_| ())
    }

    /// Publish a message.
    ///
    /// QoS 0 returns once the frame is handed to the transport; QoS 1 waits
    /// for PUBACK. QoS 2 is not supported.
    pub async fn publish(
        &mut self,
        topic: &str,
        payload: impl Into<Bytes>,
        qos: QoS,
        retain: bool,
    ) -> Result<()> {
        let mut publish = Publish::new(topic, payload);
        publish.qos = qos;
        publish.retain = retain;

        match qos {
            QoS::AtMostOnce => self.wire.send(&Packet::Publish(publish)).await,
            QoS::AtLeastOnce => {
                let packet_id = self.allocate_id()?;
                publish.packet_id = Some(packet_id);
                let result = self
                    .request(&Packet::Publish(publish), PacketType::Puback)
                    .await;
                self.packet_ids.release(packet_id);
                result.map(|_| ())
            }
            QoS::ExactlyOnce => Err(ClientError::InvalidState(
                "QoS 2 publish is not supported".into(),
            )),
        }
    }

    /// Send PINGREQ and wait for PINGRESP.
    pub async fn ping(&self) -> Result<()> {
        self.request(&Packet::Pingreq, PacketType::Pingresp)
            .await
            .map(|_| ())
    }

    /// Send DISCONNECT and close the transport.
    pub async fn disconnect(&self) -> Result<()> {
        self.wire.send(&Packet::Disconnect).await?;
        self.wire.close().await
    }

    async fn request(&self, packet: &Packet, expected: PacketType) -> Result<Packet> {
        let spec = AckSpec::new(expected)
            .timeout(self.config.ack_timeout_duration().unwrap_or(Duration::ZERO));
        self.wire.send_with_ack(packet, spec).await
    }

    fn allocate_id(&mut self) -> Result<u16> {
        self.packet_ids
            .allocate()
            .ok_or_else(|| ClientError::InvalidState("no free packet ids".into()))
    }
}

fn unexpected(packet: Packet) -> ClientError {
    ClientError::InvalidState(format!("unexpected {:?}", packet.packet_type()))
}
