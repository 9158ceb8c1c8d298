//! Presence events handed from the diff engine to the broker publisher.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::MacAddress;

/// Direction of a presence change.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PresenceChange {
    /// The client is newly associated (or handed off to this AP).
    Arrived,
    /// The client is gone (or handed off away from this AP).
    Departed,
}

/// A single client presence change observed by one scan cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PresenceEvent {
    pub mac: MacAddress,
    /// Reporting access point; only set when clients are grouped by AP.
    pub ap_hostname: Option<String>,
    pub change: PresenceChange,
    pub observed_at: DateTime<Utc>,
}

impl PresenceEvent {
    pub fn arrived(mac: MacAddress, ap_hostname: Option<String>, at: DateTime<Utc>) -> Self {
        Self {
            mac,
            ap_hostname,
            change: PresenceChange::Arrived,
            observed_at: at,
        }
    }

    pub fn departed(mac: MacAddress, ap_hostname: Option<String>, at: DateTime<Utc>) -> Self {
        Self {
            mac,
            ap_hostname,
            change: PresenceChange::Departed,
            observed_at: at,
        }
    }

    pub fn is_arrival(&self) -> bool {
        self.change == PresenceChange::Arrived
    }
}
