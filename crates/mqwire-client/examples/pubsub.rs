//! Connect to a broker, subscribe, publish and print what arrives.
//!
//! Run with: cargo run --example pubsub -- [config.toml]
//!
//! Settings come from the optional TOML file and `MQWIRE__*` variables,
//! e.g. `MQWIRE__ADDRESS=test.mosquitto.org:1883`. A `ws://` address
//! connects over WebSocket instead of TCP.

use std::time::Duration;

use mqwire_client::{
    Client, ClientConfig, ClientError, Event, Packet, QoS, TcpTransport, Transport,
    WebSocketTransport,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let path = std::env::args().nth(1).unwrap_or_else(|| "mqwire.toml".to_string());
    let mut config = ClientConfig::load(&path)?;
    if config.client_id.is_empty() {
        config.client_id = format!("mqwire-{}", std::process::id());
    }

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.log_level))
        .init();

    if config.address.starts_with("ws://") {
        run(WebSocketTransport::from_config(&config), config).await
    } else {
        run(TcpTransport::from_config(&config), config).await
    }
}

async fn run<T: Transport>(
    transport: T,
    config: ClientConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let (mut client, mut eventloop) = Client::new(transport, config).await?;

    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Packet(Packet::Publish(publish))) => {
                    println!(
                        "{} => {}",
                        publish.topic,
                        String::from_utf8_lossy(&publish.payload)
                    );
                }
                Ok(Event::Closed(reason)) => log::info!("Connection closed: {:?}", reason),
                Ok(event) => log::debug!("{:?}", event),
                Err(ClientError::ConnectionClosed(_)) => break,
                Err(e) => log::warn!("{}", e),
            }
        }
    });

    let session_present = client.connect().await?;
    log::info!("Session present: {}", session_present);

    let granted = client.subscribe(&[("mqwire/demo/#", QoS::AtLeastOnce)]).await?;
    log::info!("Granted: {:?}", granted);

    for i in 0..3 {
        client
            .publish("mqwire/demo/count", i.to_string(), QoS::AtLeastOnce, false)
            .await?;
    }

    client.ping().await?;
    tokio::time::sleep(Duration::from_secs(1)).await;
    client.disconnect().await?;

    // Same client, fresh connection.
    client.connect().await?;
    client
        .publish("mqwire/demo/count", "again", QoS::AtMostOnce, false)
        .await?;
    client.disconnect().await?;
    Ok(())
}
