//! Retrieval of previously retained presence state.
//!
//! The broker replays retained messages immediately after a subscription
//! is accepted, so a short-lived session that subscribes to the layout
//! wildcard and listens for a bounded time sees the last-known state.

use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, Packet};
use tokio::time::Instant;

use crate::client::{await_connack, BrokerConfig, BrokerError};
use crate::{RetainedMessage, RetainedReader};

/// Reads retained messages through its own throwaway MQTT session.
pub struct RetainedFetcher {
    config: BrokerConfig,
    max_messages: usize,
}

impl RetainedFetcher {
    pub fn new(config: BrokerConfig, max_messages: usize) -> Self {
        Self {
            config,
            max_messages,
        }
    }
}

#[async_trait]
impl RetainedReader for RetainedFetcher {
    async fn fetch_retained(
        &self,
        topic_pattern: &str,
        wait: Duration,
    ) -> Result<Vec<RetainedMessage>, BrokerError> {
        let qos = self.config.qos()?;
        let suffix = format!("retained-{}", uuid::Uuid::new_v4().simple());
        let (client, mut eventloop) = AsyncClient::new(self.config.mqtt_options(&suffix), 16);

        await_connack(&mut eventloop, self.config.connect_timeout()).await?;
        client.subscribe(topic_pattern, qos).await?;
        tracing::debug!(pattern = %topic_pattern, "Subscribed for retained state");

        let deadline = Instant::now() + wait;
        let mut messages = Vec::new();

        while messages.len() < self.max_messages {
            let event = match tokio::time::timeout_at(deadline, eventloop.poll()).await {
                Ok(event) => event,
                Err(_) => break,
            };
            match event {
                Ok(Event::Incoming(Packet::Publish(publish))) if publish.retain => {
                    tracing::debug!(topic = %publish.topic, "Retained message");
                    messages.push(RetainedMessage {
                        topic: publish.topic,
                        payload: publish.payload.to_vec(),
                    });
                }
                Ok(_) => {}
                Err(e) => return Err(BrokerError::Connection(e.to_string())),
            }
        }

        if messages.len() >= self.max_messages {
            tracing::warn!(
                max = self.max_messages,
                "Retained message limit reached; baseline may be incomplete"
            );
        }

        // Best effort; the session is discarded either way.
        let _ = client.disconnect().await;
        let _ = tokio::time::timeout(Duration::from_millis(100), eventloop.poll()).await;

        Ok(messages)
    }
}
