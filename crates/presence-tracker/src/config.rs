//! Configuration for the presence tracker.

use std::time::Duration;

use serde::{Deserialize, Deserializer};

use presence_broker::{BrokerConfig, DEFAULT_TOPIC_BASE};

use crate::error::{Result, TrackerError};
use crate::remote::HostKeyPolicy;

/// Default cap on access points queried by one scan.
pub const MAX_AP_HOST_SCANS: usize = 32;

/// Bounds for the delay between scan cycles, in seconds.
pub const POLL_INTERVAL_RANGE: std::ops::RangeInclusive<u64> = 1..=60;

/// Top-level tracker configuration.
///
/// Loaded from the `[tracker]` section of `presence.toml` or
/// `PRESENCE__TRACKER__` environment variables, then overridden by CLI flags.
#[derive(Debug, Clone, Deserialize)]
pub struct TrackerConfig {
    /// SSH user used to log in to every access point.
    #[serde(default)]
    pub identity_user: String,

    /// Access point addresses; a list or one comma-separated string.
    #[serde(default, deserialize_with = "deserialize_host_list")]
    pub ap_hosts: Vec<String>,

    /// Verify hosts against known_hosts instead of accepting unknown keys.
    #[serde(default)]
    pub use_known_hosts: bool,

    /// SSH connect and command timeout in seconds.
    #[serde(default)]
    pub ssh_timeout_secs: Option<f64>,

    /// Path to the ssh binary (default: "ssh").
    #[serde(default = "default_ssh_path")]
    pub ssh_path: String,

    /// Command run on each access point.
    #[serde(default = "default_remote_command")]
    pub remote_command: String,

    /// Clients idle for longer than this many seconds are ignored.
    #[serde(default)]
    pub max_idle_secs: Option<u64>,

    /// Parallel AP queries; 0 scans sequentially, unset uses the CPU count.
    #[serde(default)]
    pub parallelism: Option<usize>,

    /// Upper limit on `ap_hosts`; may only be raised.
    #[serde(default = "default_max_ap_hosts")]
    pub max_ap_hosts: usize,

    /// Publish per-AP topics and track hand-offs between APs.
    #[serde(default)]
    pub group_by_ap: bool,

    /// Seconds between scan cycles (1..=60).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_topic")]
    pub topic: String,

    /// Payload published when a client appears.
    #[serde(default = "default_home_payload")]
    pub home_payload: String,

    /// Payload published when a client disappears. Unset clears the
    /// retained topic instead.
    #[serde(default)]
    pub away_payload: Option<String>,

    /// How long to listen for retained state at startup, in milliseconds.
    #[serde(default = "default_retained_wait_ms")]
    pub retained_wait_ms: u64,

    /// Maximum retained messages read at startup.
    #[serde(default = "default_retained_max")]
    pub retained_max: usize,

    /// Pause before the pipeline restarts after a failure, in seconds.
    #[serde(default = "default_restart_backoff")]
    pub restart_backoff_secs: u64,

    #[serde(default)]
    pub broker: BrokerConfig,
}

/// What a departed client's topic is set to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbsencePayload {
    /// Publish an empty retained payload, which deletes the retained state.
    Clear,
    /// Publish this marker as the retained payload.
    Marker(String),
}

impl AbsencePayload {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Clear => &[],
            Self::Marker(marker) => marker.as_bytes(),
        }
    }

    /// True if a retained payload records a departed client.
    pub fn matches(&self, payload: &[u8]) -> bool {
        payload.is_empty() || payload == self.as_bytes()
    }
}

/// Immutable per-run parameters of the scan engine.
#[derive(Debug, Clone)]
pub struct ScanPolicy {
    pub identity_user: String,
    pub ap_hosts: Vec<String>,
    pub host_keys: HostKeyPolicy,
    pub connect_timeout: Option<Duration>,
    pub max_idle_time: Option<Duration>,
    /// 0 means strictly sequential.
    pub parallelism: usize,
    pub group_by_ap: bool,
    pub max_ap_hosts: usize,
    pub remote_command: String,
}

impl ScanPolicy {
    pub fn new(identity_user: &str, ap_hosts: Vec<String>) -> Self {
        Self {
            identity_user: identity_user.to_string(),
            ap_hosts,
            host_keys: HostKeyPolicy::default(),
            connect_timeout: None,
            max_idle_time: None,
            parallelism: default_parallelism(),
            group_by_ap: false,
            max_ap_hosts: MAX_AP_HOST_SCANS,
            remote_command: default_remote_command(),
        }
    }
}

impl TrackerConfig {
    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.identity_user.trim().is_empty() {
            return Err(TrackerError::Config(
                "identity user required: set --user or tracker.identity_user".to_string(),
            ));
        }
        if self.ap_hosts.is_empty() {
            return Err(TrackerError::Config(
                "access point list required: set --hostlist or tracker.ap_hosts".to_string(),
            ));
        }
        if !POLL_INTERVAL_RANGE.contains(&self.poll_interval_secs) {
            return Err(TrackerError::Config(format!(
                "poll interval must be between {} and {} seconds, got {}",
                POLL_INTERVAL_RANGE.start(),
                POLL_INTERVAL_RANGE.end(),
                self.poll_interval_secs
            )));
        }
        if self.max_ap_hosts < MAX_AP_HOST_SCANS {
            return Err(TrackerError::Config(format!(
                "max_ap_hosts may only be raised above {MAX_AP_HOST_SCANS}, got {}",
                self.max_ap_hosts
            )));
        }
        if let Some(secs) = self.ssh_timeout_secs {
            if !secs.is_finite() || secs <= 0.0 {
                return Err(TrackerError::Config(format!(
                    "ssh timeout must be a positive number of seconds, got {secs}"
                )));
            }
        }
        self.broker.qos()?;
        Ok(())
    }

    pub fn scan_policy(&self) -> ScanPolicy {
        ScanPolicy {
            identity_user: self.identity_user.clone(),
            ap_hosts: self.ap_hosts.clone(),
            host_keys: HostKeyPolicy::from_known_hosts_flag(self.use_known_hosts),
            connect_timeout: self.ssh_timeout(),
            max_idle_time: self.max_idle_secs.map(Duration::from_secs),
            parallelism: self.parallelism.unwrap_or_else(default_parallelism),
            group_by_ap: self.group_by_ap,
            max_ap_hosts: self.max_ap_hosts,
            remote_command: self.remote_command.clone(),
        }
    }

    pub fn ssh_timeout(&self) -> Option<Duration> {
        self.ssh_timeout_secs
            .filter(|secs| secs.is_finite() && *secs > 0.0)
            .map(Duration::from_secs_f64)
    }

    pub fn absence_payload(&self) -> AbsencePayload {
        match &self.away_payload {
            Some(marker) if !marker.is_empty() => AbsencePayload::Marker(marker.clone()),
            _ => AbsencePayload::Clear,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn retained_wait(&self) -> Duration {
        Duration::from_millis(self.retained_wait_ms)
    }

    pub fn restart_backoff(&self) -> Duration {
        Duration::from_secs(self.restart_backoff_secs)
    }
}

/// Load `[tracker]` from `{file_prefix}.toml` (optional) and the environment.
pub fn load_tracker_config(file_prefix: &str) -> Result<TrackerConfig> {
    let cfg = config::Config::builder()
        .add_source(config::File::with_name(file_prefix).required(false))
        .add_source(
            config::Environment::with_prefix("PRESENCE")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    match cfg.get::<TrackerConfig>("tracker") {
        Ok(c) => Ok(c),
        Err(config::ConfigError::NotFound(_)) => Ok(TrackerConfig::default()),
        Err(e) => Err(e.into()),
    }
}

/// Split a comma-separated host list, dropping blanks.
pub fn parse_host_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .map(String::from)
        .collect()
}

fn deserialize_host_list<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum HostList {
        Joined(String),
        List(Vec<String>),
    }

    Ok(match HostList::deserialize(deserializer)? {
        HostList::Joined(raw) => parse_host_list(&raw),
        HostList::List(hosts) => hosts
            .iter()
            .flat_map(|h| parse_host_list(h))
            .collect(),
    })
}

pub fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn default_ssh_path() -> String {
    "ssh".to_string()
}

fn default_remote_command() -> String {
    "mca-dump".to_string()
}

fn default_max_ap_hosts() -> usize {
    MAX_AP_HOST_SCANS
}

fn default_poll_interval() -> u64 {
    15
}

fn default_topic() -> String {
    DEFAULT_TOPIC_BASE.to_string()
}

fn default_home_payload() -> String {
    "home".to_string()
}

fn default_retained_wait_ms() -> u64 {
    1000
}

fn default_retained_max() -> usize {
    100
}

fn default_restart_backoff() -> u64 {
    30
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            identity_user: String::new(),
            ap_hosts: Vec::new(),
            use_known_hosts: false,
            ssh_timeout_secs: None,
            ssh_path: default_ssh_path(),
            remote_command: default_remote_command(),
            max_idle_secs: None,
            parallelism: None,
            max_ap_hosts: default_max_ap_hosts(),
            group_by_ap: false,
            poll_interval_secs: default_poll_interval(),
            topic: default_topic(),
            home_payload: default_home_payload(),
            away_payload: None,
            retained_wait_ms: default_retained_wait_ms(),
            retained_max: default_retained_max(),
            restart_backoff_secs: default_restart_backoff(),
            broker: BrokerConfig::default(),
        }
    }
}
