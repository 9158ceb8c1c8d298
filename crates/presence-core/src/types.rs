//! Core domain types for the presence tracker.
//!
//! A scan produces one `ClientRecord` per associated station; records are
//! keyed by their canonical `MacAddress` inside a `ClientTable`.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::PresenceError;

// ── MAC address ───────────────────────────────────────────────────

/// Canonical client key: a non-empty, uppercase hardware address.
///
/// The format itself is not validated; access points are trusted to
/// report well-formed addresses, only the casing is normalized.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddress(String);

impl MacAddress {
    /// Normalize `raw` into canonical form. Fails on empty input.
    pub fn parse(raw: &str) -> Result<Self, PresenceError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(PresenceError::InvalidMac(raw.to_string()));
        }
        Ok(Self(trimmed.to_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for MacAddress {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for MacAddress {
    type Error = PresenceError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<MacAddress> for String {
    fn from(mac: MacAddress) -> Self {
        mac.0
    }
}

// ── Client record ─────────────────────────────────────────────────

/// Group name for clients whose access point is not known.
pub const UNKNOWN_AP: &str = "unknown";

/// One wireless client as reported by an access point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRecord {
    pub mac: MacAddress,
    pub ip: Option<String>,
    pub hostname: Option<String>,
    /// Seconds since the AP last saw traffic from this client.
    pub idle_time: u64,
    pub signal: Option<i32>,
    /// Reporting access point; only populated when grouping by AP.
    pub ap_hostname: Option<String>,
}

impl ClientRecord {
    /// A record carrying only its key, as seeded from retained broker state.
    pub fn new(mac: MacAddress) -> Self {
        Self {
            mac,
            ip: None,
            hostname: None,
            idle_time: 0,
            signal: None,
            ap_hostname: None,
        }
    }

    pub fn with_ap_hostname(mut self, ap_hostname: impl Into<String>) -> Self {
        self.ap_hostname = Some(ap_hostname.into());
        self
    }

    /// `hostname (MAC)` when a hostname is known, the bare MAC otherwise.
    pub fn display_name(&self) -> String {
        match &self.hostname {
            Some(name) => format!("{name} ({})", self.mac),
            None => self.mac.to_string(),
        }
    }
}

// ── Client table ──────────────────────────────────────────────────

/// MAC-keyed client table that remembers insertion order.
///
/// Iteration follows the order in which keys were first inserted, which
/// in turn follows the merge order of a scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientTable {
    clients: IndexMap<MacAddress, ClientRecord>,
}

impl ClientTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `record`, replacing any record with the same MAC in full.
    ///
    /// A replaced key keeps its original position. Returns the previous
    /// record, if any.
    pub fn insert(&mut self, record: ClientRecord) -> Option<ClientRecord> {
        self.clients.insert(record.mac.clone(), record)
    }

    pub fn get(&self, mac: &MacAddress) -> Option<&ClientRecord> {
        self.clients.get(mac)
    }

    pub fn contains(&self, mac: &MacAddress) -> bool {
        self.clients.contains_key(mac)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&MacAddress, &ClientRecord)> {
        self.clients.iter()
    }

    pub fn macs(&self) -> impl Iterator<Item = &MacAddress> {
        self.clients.keys()
    }

    pub fn records(&self) -> impl Iterator<Item = &ClientRecord> {
        self.clients.values()
    }
}

impl FromIterator<ClientRecord> for ClientTable {
    fn from_iter<I: IntoIterator<Item = ClientRecord>>(iter: I) -> Self {
        let mut table = Self::new();
        for record in iter {
            table.insert(record);
        }
        table
    }
}

impl Extend<ClientRecord> for ClientTable {
    fn extend<I: IntoIterator<Item = ClientRecord>>(&mut self, iter: I) {
        for record in iter {
            self.insert(record);
        }
    }
}
