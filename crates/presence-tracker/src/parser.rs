//! `mca-dump` output deserialization.
//!
//! An access point's `mca-dump` prints one JSON document describing the
//! device. Only a small part of it matters here: the device `hostname`
//! and the `vap_table`, one entry per SSID, each carrying a `sta_table`
//! of associated stations.

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use thiserror::Error;

use presence_core::{ClientRecord, MacAddress};

/// Ways an access point response can be unusable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolViolation {
    #[error("empty response")]
    Empty,

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("no vap_table in response")]
    MissingSsidTable,

    #[error("no sta_table in SSID entry {ssid}")]
    MissingClientTable { ssid: usize },

    #[error("client {client} of SSID entry {ssid} has no mac")]
    MissingMac { ssid: usize, client: usize },

    #[error("client {client} of SSID entry {ssid} has an invalid mac {mac:?}")]
    InvalidMac {
        ssid: usize,
        client: usize,
        mac: String,
    },
}

/// Root document. Everything besides these fields is ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct McaDump {
    pub hostname: Option<String>,
    pub vap_table: Option<Vec<VapEntry>>,
}

/// One SSID (virtual AP).
#[derive(Debug, Clone, Deserialize)]
pub struct VapEntry {
    pub sta_table: Option<Vec<StaEntry>>,
}

/// One associated station.
///
/// Only `mac` is strictly typed. The informational fields accept any JSON
/// type; values are converted when possible and dropped otherwise.
#[derive(Debug, Clone, Deserialize)]
pub struct StaEntry {
    pub mac: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub ip: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub hostname: Option<String>,
    #[serde(default, deserialize_with = "lenient_idle")]
    pub idletime: Option<u64>,
    #[serde(default, deserialize_with = "lenient_signal")]
    pub signal: Option<i32>,
}

fn lenient_string<'de, D: Deserializer<'de>>(de: D) -> Result<Option<String>, D::Error> {
    Ok(match Option::<Value>::deserialize(de)? {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(other) => {
            tracing::debug!(value = %other, "Dropping non-text station field");
            None
        }
    })
}

/// Seconds idle. Negative or fractional values are clamped to whole
/// non-negative seconds.
fn lenient_idle<'de, D: Deserializer<'de>>(de: D) -> Result<Option<u64>, D::Error> {
    let value = Option::<Value>::deserialize(de)?;
    let secs = match &value {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        Some(_) => None,
    };
    match secs {
        Some(secs) if secs.is_finite() => Ok(Some(secs.max(0.0) as u64)),
        _ => {
            tracing::debug!(value = ?value, "Unusable idletime; treating as 0");
            Ok(Some(0))
        }
    }
}

fn lenient_signal<'de, D: Deserializer<'de>>(de: D) -> Result<Option<i32>, D::Error> {
    let value = Option::<Value>::deserialize(de)?;
    let dbm = match &value {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        Some(_) => None,
    };
    let signal = dbm
        .filter(|v| v.is_finite() && *v >= f64::from(i32::MIN) && *v <= f64::from(i32::MAX))
        .map(|v| v.round() as i32);
    if signal.is_none() {
        tracing::debug!(value = ?value, "Dropping unusable signal value");
    }
    Ok(signal)
}

/// Clients reported by a single access point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApReport {
    /// The AP's own hostname, when it reports one.
    pub ap_hostname: Option<String>,
    /// Clients across all SSIDs, in document order.
    pub clients: Vec<ClientRecord>,
}

/// Parse raw `mca-dump` output into the reporting AP and its clients.
pub fn parse_client_table(raw: &[u8]) -> Result<ApReport, ProtocolViolation> {
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Err(ProtocolViolation::Empty);
    }

    let dump: Option<McaDump> =
        serde_json::from_slice(raw).map_err(|e| ProtocolViolation::Malformed(e.to_string()))?;
    let dump = dump.ok_or(ProtocolViolation::Empty)?;
    let vaps = dump.vap_table.ok_or(ProtocolViolation::MissingSsidTable)?;

    let mut clients = Vec::new();
    for (ssid, vap) in vaps.into_iter().enumerate() {
        let stations = vap
            .sta_table
            .ok_or(ProtocolViolation::MissingClientTable { ssid })?;
        for (client, sta) in stations.into_iter().enumerate() {
            clients.push(convert_station(sta, ssid, client)?);
        }
    }

    Ok(ApReport {
        ap_hostname: dump.hostname.filter(|h| !h.trim().is_empty()),
        clients,
    })
}

fn convert_station(
    sta: StaEntry,
    ssid: usize,
    client: usize,
) -> Result<ClientRecord, ProtocolViolation> {
    let raw_mac = sta
        .mac
        .ok_or(ProtocolViolation::MissingMac { ssid, client })?;
    let mac = MacAddress::parse(&raw_mac).map_err(|_| ProtocolViolation::InvalidMac {
        ssid,
        client,
        mac: raw_mac.clone(),
    })?;

    Ok(ClientRecord {
        mac,
        ip: sta.ip,
        hostname: sta.hostname,
        idle_time: sta.idletime.unwrap_or(0),
        signal: sta.signal,
        ap_hostname: None,
    })
}
