//! Change detection between two client tables.
//!
//! Flat mode reports which MACs appeared and disappeared. Grouped mode
//! partitions the same information by reporting access point and treats a
//! client moving between APs as a departure from the old AP plus an
//! arrival at the new one.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;

use presence_core::{ClientRecord, ClientTable, MacAddress, PresenceEvent, UNKNOWN_AP};

/// MACs grouped by access point, in first-seen order.
pub type ByAccessPoint = IndexMap<String, Vec<MacAddress>>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlatDelta {
    pub added: Vec<MacAddress>,
    pub removed: Vec<MacAddress>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupedDelta {
    pub added: ByAccessPoint,
    pub removed: ByAccessPoint,
}

/// The outcome of diffing a scan against the baseline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientDelta {
    Flat(FlatDelta),
    ByAccessPoint(GroupedDelta),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DiffSummary {
    pub total_clients: usize,
    pub added_count: usize,
    pub removed_count: usize,
}

/// Keys of `current` missing from `previous`, then keys of `previous`
/// missing from `current`, each in its own table's order. MACs in
/// `withheld` are never reported as removed.
pub fn diff_flat(
    current: &ClientTable,
    previous: &ClientTable,
    withheld: &HashSet<MacAddress>,
) -> FlatDelta {
    let mut delta = FlatDelta::default();

    for (mac, record) in current.iter() {
        if !previous.contains(mac) {
            tracing::info!(client = %record.display_name(), "Added");
            delta.added.push(mac.clone());
        }
    }

    for (mac, record) in previous.iter() {
        if !current.contains(mac) && !withheld.contains(mac) {
            tracing::info!(client = %record.display_name(), "Removed");
            delta.removed.push(mac.clone());
        }
    }

    delta
}

/// Like [`diff_flat`], partitioned by `ap_hostname`, with hand-offs
/// reported on both sides.
pub fn diff_by_ap(
    current: &ClientTable,
    previous: &ClientTable,
    withheld: &HashSet<MacAddress>,
) -> GroupedDelta {
    let mut delta = GroupedDelta::default();

    for (mac, record) in current.iter() {
        match previous.get(mac) {
            None => {
                tracing::info!(client = %record.display_name(), ap = %ap_of(record), "Added");
                push(&mut delta.added, record, mac);
            }
            Some(before) if before.ap_hostname != record.ap_hostname => {
                tracing::info!(
                    client = %record.display_name(),
                    from = %ap_of(before),
                    to = %ap_of(record),
                    "Handed off"
                );
                push(&mut delta.added, record, mac);
                push(&mut delta.removed, before, mac);
            }
            Some(_) => {}
        }
    }

    for (mac, record) in previous.iter() {
        if !current.contains(mac) && !withheld.contains(mac) {
            tracing::info!(client = %record.display_name(), ap = %ap_of(record), "Removed");
            push(&mut delta.removed, record, mac);
        }
    }

    delta
}

/// Diff in the mode selected by `group_by_ap`.
pub fn compute_delta(
    current: &ClientTable,
    previous: &ClientTable,
    withheld: &HashSet<MacAddress>,
    group_by_ap: bool,
) -> ClientDelta {
    if group_by_ap {
        ClientDelta::ByAccessPoint(diff_by_ap(current, previous, withheld))
    } else {
        ClientDelta::Flat(diff_flat(current, previous, withheld))
    }
}

impl ClientDelta {
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Flat(d) => d.added.is_empty() && d.removed.is_empty(),
            Self::ByAccessPoint(d) => d.added.is_empty() && d.removed.is_empty(),
        }
    }

    pub fn summary(&self, total_clients: usize) -> DiffSummary {
        let (added_count, removed_count) = match self {
            Self::Flat(d) => (d.added.len(), d.removed.len()),
            Self::ByAccessPoint(d) => (count(&d.added), count(&d.removed)),
        };
        DiffSummary {
            total_clients,
            added_count,
            removed_count,
        }
    }

    /// Arrivals first, then departures.
    pub fn events(&self, at: DateTime<Utc>) -> Vec<PresenceEvent> {
        match self {
            Self::Flat(d) => d
                .added
                .iter()
                .map(|mac| PresenceEvent::arrived(mac.clone(), None, at))
                .chain(
                    d.removed
                        .iter()
                        .map(|mac| PresenceEvent::departed(mac.clone(), None, at)),
                )
                .collect(),
            Self::ByAccessPoint(d) => {
                let arrivals = d.added.iter().flat_map(|(ap, macs)| {
                    macs.iter()
                        .map(move |mac| PresenceEvent::arrived(mac.clone(), Some(ap.clone()), at))
                });
                let departures = d.removed.iter().flat_map(|(ap, macs)| {
                    macs.iter()
                        .map(move |mac| PresenceEvent::departed(mac.clone(), Some(ap.clone()), at))
                });
                arrivals.chain(departures).collect()
            }
        }
    }
}

fn ap_of(record: &ClientRecord) -> &str {
    record.ap_hostname.as_deref().unwrap_or(UNKNOWN_AP)
}

fn push(groups: &mut ByAccessPoint, record: &ClientRecord, mac: &MacAddress) {
    groups
        .entry(ap_of(record).to_string())
        .or_default()
        .push(mac.clone());
}

fn count(groups: &ByAccessPoint) -> usize {
    groups.values().map(Vec::len).sum()
}
