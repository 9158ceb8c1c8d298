//! Broker persistence: publish presence events as retained topics.

use presence_broker::{Publisher, TopicLayout};
use presence_core::PresenceEvent;

use crate::config::AbsencePayload;

/// Payloads written for arrivals and departures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresencePayloads {
    pub present: String,
    pub absent: AbsencePayload,
}

/// Publish every event; returns how many publishes succeeded.
///
/// A failed publish is logged and skipped. The scan baseline still moves
/// forward, matching the retained state the broker will be re-read from at
/// the next epoch.
pub async fn publish_events(
    publisher: &dyn Publisher,
    layout: &TopicLayout,
    payloads: &PresencePayloads,
    events: &[PresenceEvent],
) -> usize {
    let mut published = 0;

    for event in events {
        let topic = layout.client_topic(&event.mac, event.ap_hostname.as_deref());
        let payload = if event.is_arrival() {
            payloads.present.as_bytes()
        } else {
            payloads.absent.as_bytes()
        };

        match publisher.publish_retained(&topic, payload).await {
            Ok(()) => published += 1,
            Err(e) => {
                tracing::error!(topic = %topic, error = %e, "Failed to publish presence state");
            }
        }
    }

    published
}
