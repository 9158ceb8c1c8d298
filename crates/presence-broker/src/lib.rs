//! presence-broker: MQTT collaborator for the presence tracker.
//!
//! All broker reads and writes flow through the two traits defined here,
//! so the scan loop can run against the real MQTT client or an in-memory
//! stand-in.

pub mod client;
pub mod retained;
pub mod topics;

use std::time::Duration;

use async_trait::async_trait;

pub use client::{BrokerClient, BrokerConfig, BrokerError};
pub use retained::RetainedFetcher;
pub use topics::{TopicKey, TopicLayout, DEFAULT_TOPIC_BASE};

/// A retained message replayed by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetainedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Publishes retained key/value state.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish `payload` on `topic` with the retain flag set. An empty
    /// payload clears the broker's retained state for the topic.
    async fn publish_retained(&self, topic: &str, payload: &[u8]) -> Result<(), BrokerError>;
}

/// Reads previously retained key/value state.
#[async_trait]
pub trait RetainedReader: Send + Sync {
    /// Collect retained messages matching `topic_pattern`, waiting at most
    /// `wait`. Returns whatever arrived before the deadline.
    async fn fetch_retained(
        &self,
        topic_pattern: &str,
        wait: Duration,
    ) -> Result<Vec<RetainedMessage>, BrokerError>;
}
