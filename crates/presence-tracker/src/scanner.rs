//! Access point fan-out and client table merge.
//!
//! One scan queries every configured access point, either one after the
//! other or through a bounded set of tokio tasks, and merges the per-AP
//! client lists into a single MAC-keyed table. A scan either succeeds for
//! every AP or fails as a whole.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use presence_core::{ClientRecord, ClientTable, MacAddress};

use crate::config::ScanPolicy;
use crate::error::ScanError;
use crate::parser;
use crate::remote::RemoteExecutor;

/// Clients reported by one access point, ready to merge.
#[derive(Debug, Clone)]
pub struct ApScan {
    /// Identity the AP reported, or the queried address when it reported
    /// none. Never contains MQTT topic separators or wildcards.
    pub ap_hostname: String,
    pub clients: Vec<ClientRecord>,
}

/// Merged result of one successful scan.
#[derive(Debug, Clone, Default)]
pub struct ScanSnapshot {
    pub table: ClientTable,
    /// Previously known MACs left out of `table` by the idle filter.
    /// These must not be reported as departures.
    pub idle_withheld: HashSet<MacAddress>,
}

/// Scan engine bound to one policy and one remote transport.
pub struct ApScanner {
    policy: Arc<ScanPolicy>,
    executor: Arc<dyn RemoteExecutor>,
}

impl ApScanner {
    pub fn new(policy: ScanPolicy, executor: Arc<dyn RemoteExecutor>) -> Self {
        Self {
            policy: Arc::new(policy),
            executor,
        }
    }

    /// Query every access point and merge the results.
    ///
    /// `previous` is only consulted by the idle filter, to decide which
    /// exclusions are worth reporting.
    pub async fn scan(&self, previous: &ClientTable) -> Result<ScanSnapshot, ScanError> {
        let count = self.policy.ap_hosts.len();
        if count > self.policy.max_ap_hosts {
            return Err(ScanError::Policy {
                count,
                max: self.policy.max_ap_hosts,
            });
        }

        tracing::debug!(aps = count, parallelism = self.policy.parallelism, "Scanning start");

        let scans = if self.policy.parallelism == 0 {
            self.collect_sequential().await?
        } else {
            self.collect_parallel(self.policy.parallelism).await?
        };

        let snapshot = merge_scans(scans, previous, &self.policy);
        tracing::debug!(clients = snapshot.table.len(), "Scanning end");
        Ok(snapshot)
    }

    async fn collect_sequential(&self) -> Result<Vec<ApScan>, ScanError> {
        let mut scans = Vec::with_capacity(self.policy.ap_hosts.len());
        for host in &self.policy.ap_hosts {
            scans.push(query_access_point(self.executor.as_ref(), &self.policy, host).await?);
        }
        Ok(scans)
    }

    /// Spawn one task per AP in host-list order, at most `workers` running
    /// at once. Results come back in completion order. The first failure
    /// drops the set, which aborts the remaining queries.
    async fn collect_parallel(&self, workers: usize) -> Result<Vec<ApScan>, ScanError> {
        let permits = Arc::new(Semaphore::new(workers));
        let mut tasks = JoinSet::new();

        for host in &self.policy.ap_hosts {
            let executor = Arc::clone(&self.executor);
            let policy = Arc::clone(&self.policy);
            let permits = Arc::clone(&permits);
            let host = host.clone();

            tasks.spawn(async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|e| ScanError::Worker(e.to_string()))?;
                query_access_point(executor.as_ref(), &policy, &host).await
            });
        }

        let mut scans = Vec::with_capacity(self.policy.ap_hosts.len());
        while let Some(joined) = tasks.join_next().await {
            let scan = joined.map_err(|e| ScanError::Worker(e.to_string()))??;
            scans.push(scan);
        }
        Ok(scans)
    }
}

/// Run the client dump on one AP and parse the answer.
pub async fn query_access_point(
    executor: &dyn RemoteExecutor,
    policy: &ScanPolicy,
    host: &str,
) -> Result<ApScan, ScanError> {
    let output = executor
        .execute(&policy.identity_user, host, &policy.remote_command)
        .await
        .map_err(|source| ScanError::RemoteExecution {
            host: host.to_string(),
            source,
        })?;

    let report = parser::parse_client_table(&output.stdout).map_err(|source| {
        tracing::debug!(
            host = %host,
            stderr = %String::from_utf8_lossy(&output.stderr).trim(),
            "Unusable access point response"
        );
        ScanError::Protocol {
            host: host.to_string(),
            source,
        }
    })?;

    let ap_hostname = topic_safe_ap_name(host, report.ap_hostname.as_deref().unwrap_or(host));
    let mut clients = report.clients;
    if policy.group_by_ap {
        for client in &mut clients {
            client.ap_hostname = Some(ap_hostname.clone());
        }
    }

    tracing::debug!(host = %host, ap = %ap_hostname, clients = clients.len(), "Access point scanned");

    Ok(ApScan {
        ap_hostname,
        clients,
    })
}

/// Replace characters that would break the `{base}/{AP}/{MAC}` topic
/// (`/`, `+`, `#`) with `_`.
fn topic_safe_ap_name(host: &str, name: &str) -> String {
    if !name.contains(['/', '+', '#']) {
        return name.to_string();
    }
    let safe = name.replace(['/', '+', '#'], "_");
    tracing::warn!(host = %host, reported = %name, using = %safe, "AP hostname is not topic-safe");
    safe
}

/// Merge per-AP results in the given order, applying the idle filter.
///
/// Later records replace earlier ones with the same MAC. An idle record is
/// dropped before it can replace anything.
pub fn merge_scans(scans: Vec<ApScan>, previous: &ClientTable, policy: &ScanPolicy) -> ScanSnapshot {
    let mut snapshot = ScanSnapshot::default();

    for scan in scans {
        for record in scan.clients {
            if exceeds_idle_limit(&record, policy) {
                if previous.contains(&record.mac) {
                    tracing::info!(
                        client = %record.display_name(),
                        idle_secs = record.idle_time,
                        "Excluded due to idle timeout"
                    );
                    snapshot.idle_withheld.insert(record.mac.clone());
                }
                continue;
            }
            snapshot.table.insert(record);
        }
    }

    // A MAC idle on one AP but active on another is present, not withheld.
    let table = &snapshot.table;
    snapshot.idle_withheld.retain(|mac| !table.contains(mac));
    snapshot
}

fn exceeds_idle_limit(record: &ClientRecord, policy: &ScanPolicy) -> bool {
    policy
        .max_idle_time
        .is_some_and(|limit| record.idle_time > limit.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn record(mac: &str, idle: u64) -> ClientRecord {
        ClientRecord {
            idle_time: idle,
            ..ClientRecord::new(MacAddress::parse(mac).unwrap())
        }
    }

    fn ap(host: &str, clients: Vec<ClientRecord>) -> ApScan {
        ApScan {
            ap_hostname: host.to_string(),
            clients,
        }
    }

    fn policy() -> ScanPolicy {
        ScanPolicy::new("admin", vec![])
    }

    #[test]
    fn test_merge_last_write_wins() {
        let mut late = record("m1", 0);
        late.hostname = Some("from-ap2".to_string());

        let snapshot = merge_scans(
            vec![ap("ap1", vec![record("m1", 5), record("m2", 0)]), ap("ap2", vec![late])],
            &ClientTable::new(),
            &policy(),
        );

        assert_eq!(snapshot.table.len(), 2);
        let m1 = snapshot.table.get(&MacAddress::parse("m1").unwrap()).unwrap();
        assert_eq!(m1.hostname.as_deref(), Some("from-ap2"));
        assert_eq!(m1.idle_time, 0);
    }

    #[test]
    fn test_idle_filter_without_limit_keeps_all() {
        let snapshot = merge_scans(
            vec![ap("ap1", vec![record("m1", 100_000)])],
            &ClientTable::new(),
            &policy(),
        );
        assert_eq!(snapshot.table.len(), 1);
    }

    #[test]
    fn test_idle_filter_withholds_known_clients() {
        let policy = ScanPolicy {
            max_idle_time: Some(Duration::from_secs(300)),
            ..policy()
        };
        let previous: ClientTable = vec![record("known", 0)].into_iter().collect();

        let snapshot = merge_scans(
            vec![ap(
                "ap1",
                vec![record("known", 400), record("stranger", 400), record("fresh", 300)],
            )],
            &previous,
            &policy,
        );

        let macs: Vec<&str> = snapshot.table.macs().map(MacAddress::as_str).collect();
        assert_eq!(macs, vec!["FRESH"]);
        assert!(snapshot
            .idle_withheld
            .contains(&MacAddress::parse("known").unwrap()));
        assert_eq!(snapshot.idle_withheld.len(), 1);
    }

    #[test]
    fn test_idle_record_does_not_evict_active_one() {
        let policy = ScanPolicy {
            max_idle_time: Some(Duration::from_secs(60)),
            ..policy()
        };
        let previous: ClientTable = vec![record("roamer", 0)].into_iter().collect();

        let snapshot = merge_scans(
            vec![ap("ap1", vec![record("roamer", 2)]), ap("ap2", vec![record("roamer", 900)])],
            &previous,
            &policy,
        );

        assert_eq!(snapshot.table.len(), 1);
        assert!(snapshot.idle_withheld.is_empty());
    }

    #[test]
    fn test_topic_safe_ap_name() {
        assert_eq!(topic_safe_ap_name("10.0.0.2", "ap-den"), "ap-den");
        assert_eq!(topic_safe_ap_name("10.0.0.2", "lab/ap+1#"), "lab_ap_1_");
    }

    #[tokio::test]
    async fn test_reported_hostname_with_separators_is_stamped_safely() {
        struct Canned;

        #[async_trait::async_trait]
        impl RemoteExecutor for Canned {
            async fn execute(
                &self,
                _user: &str,
                _host: &str,
                _command: &str,
            ) -> Result<crate::remote::RemoteOutput, crate::remote::RemoteFailure> {
                Ok(crate::remote::RemoteOutput {
                    stdout: br#"{"hostname": "floor/2#ap", "vap_table": [{"sta_table": [{"mac": "aa:01"}]}]}"#
                        .to_vec(),
                    ..Default::default()
                })
            }
        }

        let policy = ScanPolicy {
            group_by_ap: true,
            ..policy()
        };
        let scan = query_access_point(&Canned, &policy, "10.0.0.2").await.unwrap();
        assert_eq!(scan.ap_hostname, "floor_2_ap");
        assert_eq!(scan.clients[0].ap_hostname.as_deref(), Some("floor_2_ap"));
    }
}
