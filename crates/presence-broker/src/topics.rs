//! Topic naming for retained presence state.
//!
//! Flat layout publishes `{base}/{MAC}`; grouped layout publishes
//! `{base}/{AP}/{MAC}`.

use presence_core::{MacAddress, UNKNOWN_AP};

/// Topic prefix used when none is configured.
pub const DEFAULT_TOPIC_BASE: &str = "device_tracker/unifi_tracker";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicLayout {
    base: String,
    group_by_ap: bool,
}

/// A retained topic decoded back into its client key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicKey {
    pub mac: MacAddress,
    pub ap_hostname: Option<String>,
}

impl TopicLayout {
    pub fn new(base: &str, group_by_ap: bool) -> Self {
        Self {
            base: base.trim_end_matches('/').to_string(),
            group_by_ap,
        }
    }

    /// Topic for one client. `ap_hostname` is ignored in flat layout.
    pub fn client_topic(&self, mac: &MacAddress, ap_hostname: Option<&str>) -> String {
        if self.group_by_ap {
            let ap = ap_hostname.unwrap_or(UNKNOWN_AP);
            format!("{}/{ap}/{mac}", self.base)
        } else {
            format!("{}/{mac}", self.base)
        }
    }

    /// Subscription filter that matches every client topic.
    pub fn wildcard(&self) -> String {
        if self.group_by_ap {
            format!("{}/+/+", self.base)
        } else {
            format!("{}/+", self.base)
        }
    }

    /// Decode a topic produced by this layout. Returns `None` for topics
    /// outside the layout.
    pub fn parse(&self, topic: &str) -> Option<TopicKey> {
        let rest = topic.strip_prefix(&self.base)?.strip_prefix('/')?;
        let mut segments = rest.split('/');

        let key = if self.group_by_ap {
            let ap = segments.next()?;
            let mac = segments.next()?;
            if ap.is_empty() {
                return None;
            }
            TopicKey {
                mac: MacAddress::parse(mac).ok()?,
                ap_hostname: Some(ap.to_string()),
            }
        } else {
            TopicKey {
                mac: MacAddress::parse(segments.next()?).ok()?,
                ap_hostname: None,
            }
        };

        match segments.next() {
            Some(_) => None,
            None => Some(key),
        }
    }
}
