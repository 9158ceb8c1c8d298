//! MQTT connection management and the retained-state publisher.

use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS, Transport};
use serde::Deserialize;
use tokio::task::JoinHandle;

use crate::Publisher;

/// Errors from broker operations.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("MQTT connection error: {0}")]
    Connection(String),

    #[error("MQTT client error: {0}")]
    Client(#[from] rumqttc::ClientError),

    #[error("Timed out after {0:?} waiting for the broker")]
    Timeout(Duration),

    #[error("Invalid QoS level {0}; expected 0, 1 or 2")]
    InvalidQos(u8),
}

/// Configuration for connecting to the MQTT broker.
///
/// Loaded as the `broker` table of the tracker configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Connect over TLS using the platform's default roots.
    #[serde(default)]
    pub tls: bool,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// QoS used for subscriptions and publishes (0, 1 or 2).
    #[serde(default = "default_qos")]
    pub qos: u8,

    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,

    /// How long to wait for the broker's CONNACK.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Prefix for generated MQTT client ids.
    #[serde(default = "default_client_id")]
    pub client_id: String,
}

fn default_host() -> String {
    "mosquitto".to_string()
}

fn default_port() -> u16 {
    1883
}

fn default_qos() -> u8 {
    1
}

fn default_keep_alive() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_client_id() -> String {
    "presence-tracker".to_string()
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            tls: false,
            username: None,
            password: None,
            qos: default_qos(),
            keep_alive_secs: default_keep_alive(),
            connect_timeout_secs: default_connect_timeout(),
            client_id: default_client_id(),
        }
    }
}

impl BrokerConfig {
    pub fn qos(&self) -> Result<QoS, BrokerError> {
        match self.qos {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            other => Err(BrokerError::InvalidQos(other)),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Build client options for a session whose id ends in `suffix`.
    pub(crate) fn mqtt_options(&self, suffix: &str) -> MqttOptions {
        let mut options = MqttOptions::new(
            format!("{}-{suffix}", self.client_id),
            self.host.clone(),
            self.port,
        );
        options.set_keep_alive(Duration::from_secs(self.keep_alive_secs));
        options.set_clean_session(true);
        if let Some(username) = &self.username {
            options.set_credentials(username.clone(), self.password.clone().unwrap_or_default());
        }
        if self.tls {
            tracing::debug!("Using TLS");
            options.set_transport(Transport::tls_with_default_config());
        }
        options
    }
}

/// Drive `eventloop` until the broker acknowledges the connection.
pub(crate) async fn await_connack(
    eventloop: &mut EventLoop,
    timeout: Duration,
) -> Result<(), BrokerError> {
    let handshake = async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    return match ack.code {
                        ConnectReturnCode::Success => Ok(()),
                        code => Err(BrokerError::Connection(format!("refused: {code:?}"))),
                    };
                }
                Ok(_) => {}
                Err(e) => return Err(BrokerError::Connection(e.to_string())),
            }
        }
    };

    tokio::time::timeout(timeout, handshake)
        .await
        .map_err(|_| BrokerError::Timeout(timeout))?
}

/// Long-lived MQTT session used to publish retained presence state.
///
/// The event loop is driven by a background task for the lifetime of the
/// client; dropping the client stops it.
pub struct BrokerClient {
    client: AsyncClient,
    qos: QoS,
    driver: JoinHandle<()>,
}

impl BrokerClient {
    /// Connect and wait for the broker to accept the session.
    pub async fn connect(config: &BrokerConfig) -> Result<Self, BrokerError> {
        let qos = config.qos()?;
        let options = config.mqtt_options(&uuid::Uuid::new_v4().simple().to_string());
        let (client, mut eventloop) = AsyncClient::new(options, 64);

        await_connack(&mut eventloop, config.connect_timeout()).await?;
        tracing::info!(host = %config.host, port = config.port, "Connected to MQTT broker");

        let driver = tokio::spawn(async move {
            loop {
                if let Err(e) = eventloop.poll().await {
                    tracing::warn!(error = %e, "MQTT event loop error");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        });

        Ok(Self {
            client,
            qos,
            driver,
        })
    }

    /// Send DISCONNECT and stop the event loop.
    pub async fn disconnect(self) -> Result<(), BrokerError> {
        let result = self.client.disconnect().await;
        // Give the driver a moment to flush the DISCONNECT packet.
        tokio::time::sleep(Duration::from_millis(100)).await;
        self.driver.abort();
        result.map_err(BrokerError::from)
    }
}

impl Drop for BrokerClient {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

#[async_trait]
impl Publisher for BrokerClient {
    async fn publish_retained(&self, topic: &str, payload: &[u8]) -> Result<(), BrokerError> {
        self.client
            .publish(topic, self.qos, true, payload.to_vec())
            .await?;
        tracing::debug!(topic = %topic, bytes = payload.len(), "Published");
        Ok(())
    }
}
