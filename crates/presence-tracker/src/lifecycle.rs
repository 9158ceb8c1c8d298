//! Scan loop and baseline lifecycle.
//!
//! The tracker runs in epochs. Each epoch seeds the baseline from retained
//! broker state, connects a publishing session, and runs a fixed number of
//! scan cycles (about a day's worth) before tearing everything down and
//! starting over. A failed scan cycle leaves the baseline untouched; a
//! failed epoch is retried after a backoff.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use presence_broker::{BrokerClient, Publisher, RetainedFetcher, RetainedReader, TopicLayout};
use presence_core::{ClientRecord, ClientTable};

use crate::config::{AbsencePayload, TrackerConfig};
use crate::diff::{self, ClientDelta};
use crate::error::{Result, ScanError};
use crate::publish::{self, PresencePayloads};
use crate::remote::RemoteExecutor;
use crate::scanner::ApScanner;

const SECONDS_PER_EPOCH: f64 = 24.0 * 60.0 * 60.0;

/// Result of one successful scan cycle.
#[derive(Debug, Clone)]
pub struct ScanOutcome {
    pub scan_id: Uuid,
    pub scanned_at: DateTime<Utc>,
    pub duration: Duration,
    /// The merged table; becomes the next baseline.
    pub table: ClientTable,
    pub delta: ClientDelta,
}

/// Number of cycles that make up roughly 24 hours at `poll_interval`.
pub fn epoch_cycles(poll_interval: Duration) -> u32 {
    let secs = poll_interval.as_secs_f64();
    if secs <= 0.0 {
        return 1;
    }
    ((SECONDS_PER_EPOCH / secs).round() as u32).max(1)
}

/// Rebuild the last published client table from retained broker state.
///
/// Topics whose payload marks a departed client are skipped. Failure to
/// read is not fatal; the baseline then starts empty.
pub async fn seed_baseline(
    reader: &dyn RetainedReader,
    layout: &TopicLayout,
    wait: Duration,
    absent: &AbsencePayload,
) -> ClientTable {
    tracing::info!("Retrieving retained clients");

    let messages = match reader.fetch_retained(&layout.wildcard(), wait).await {
        Ok(messages) => messages,
        Err(e) => {
            tracing::warn!(error = %e, "Could not read retained clients");
            return ClientTable::new();
        }
    };

    let mut baseline = ClientTable::new();
    for message in messages {
        if absent.matches(&message.payload) {
            continue;
        }
        match layout.parse(&message.topic) {
            Some(key) => {
                tracing::debug!(topic = %message.topic, "Existing client");
                let mut record = ClientRecord::new(key.mac);
                record.ap_hostname = key.ap_hostname;
                baseline.insert(record);
            }
            None => tracing::debug!(topic = %message.topic, "Ignoring foreign retained topic"),
        }
    }

    if baseline.is_empty() {
        tracing::info!("No retained clients retrieved");
    } else {
        tracing::info!(clients = baseline.len(), "Retained clients retrieved");
    }
    baseline
}

/// Drives scans, diffs and publishes for one tracker configuration.
pub struct PresenceTracker {
    config: TrackerConfig,
    scanner: ApScanner,
    layout: TopicLayout,
    payloads: PresencePayloads,
}

impl PresenceTracker {
    pub fn new(config: TrackerConfig, executor: Arc<dyn RemoteExecutor>) -> Self {
        let scanner = ApScanner::new(config.scan_policy(), executor);
        let layout = TopicLayout::new(&config.topic, config.group_by_ap);
        let payloads = PresencePayloads {
            present: config.home_payload.clone(),
            absent: config.absence_payload(),
        };
        Self {
            config,
            scanner,
            layout,
            payloads,
        }
    }

    pub fn layout(&self) -> &TopicLayout {
        &self.layout
    }

    /// Run epochs forever, restarting after a backoff whenever one fails.
    pub async fn run(&self) {
        tracing::info!(
            aps = self.config.ap_hosts.len(),
            group_by_ap = self.config.group_by_ap,
            "Starting processing loop"
        );

        loop {
            if let Err(e) = self.run_pipeline().await {
                tracing::error!(error = ?e, "Tracker pipeline failed");
            }
            tokio::time::sleep(self.config.restart_backoff()).await;
        }
    }

    /// One epoch against the real broker: seed, connect, scan, disconnect.
    pub async fn run_pipeline(&self) -> Result<()> {
        let fetcher = RetainedFetcher::new(self.config.broker.clone(), self.config.retained_max);
        let baseline = seed_baseline(
            &fetcher,
            &self.layout,
            self.config.retained_wait(),
            &self.payloads.absent,
        )
        .await;

        let client = BrokerClient::connect(&self.config.broker).await?;
        let interval = self.config.poll_interval();
        self.run_epoch(&client, baseline, epoch_cycles(interval), interval)
            .await;
        client.disconnect().await?;
        Ok(())
    }

    /// Run `cycles` scan cycles, `interval` apart, starting from `baseline`.
    /// Returns the final baseline.
    pub async fn run_epoch(
        &self,
        publisher: &dyn Publisher,
        mut baseline: ClientTable,
        cycles: u32,
        interval: Duration,
    ) -> ClientTable {
        tracing::debug!(cycles, baseline = baseline.len(), "Epoch started");

        for cycle in 0..cycles {
            match self.scan_cycle(publisher, &baseline).await {
                Ok(outcome) => baseline = outcome.table,
                // Routine under normal network flakiness; keep it quiet.
                Err(e) => tracing::info!(cycle, error = %e, "Scan cycle failed"),
            }
            if cycle + 1 < cycles {
                tokio::time::sleep(interval).await;
            }
        }

        baseline
    }

    /// Scan, diff against `baseline` and publish the resulting events.
    pub async fn scan_cycle(
        &self,
        publisher: &dyn Publisher,
        baseline: &ClientTable,
    ) -> std::result::Result<ScanOutcome, ScanError> {
        let scan_id = Uuid::new_v4();
        let start = Instant::now();

        let snapshot = self.scanner.scan(baseline).await?;
        let delta = diff::compute_delta(
            &snapshot.table,
            baseline,
            &snapshot.idle_withheld,
            self.config.group_by_ap,
        );

        let scanned_at = Utc::now();
        let events = delta.events(scanned_at);
        let published =
            publish::publish_events(publisher, &self.layout, &self.payloads, &events).await;

        let duration = start.elapsed();
        let summary = delta.summary(snapshot.table.len());
        if delta.is_empty() {
            tracing::debug!(scan_id = %scan_id, clients = summary.total_clients, "No changes");
        } else {
            tracing::info!(
                scan_id = %scan_id,
                clients = summary.total_clients,
                added = summary.added_count,
                removed = summary.removed_count,
                published,
                duration_ms = duration.as_millis() as u64,
                "Scan complete"
            );
        }

        Ok(ScanOutcome {
            scan_id,
            scanned_at,
            duration,
            table: snapshot.table,
            delta,
        })
    }
}
