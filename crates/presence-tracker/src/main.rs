//! CLI entry point for the presence tracker daemon.

use std::sync::Arc;

use clap::{ArgGroup, Parser};
use tracing_subscriber::{fmt, EnvFilter};

use presence_tracker::config::{load_tracker_config, parse_host_list, TrackerConfig};
use presence_tracker::lifecycle::PresenceTracker;
use presence_tracker::remote::SshExecutor;

#[derive(Parser)]
#[command(name = "presence-tracker")]
#[command(about = "Publish wireless client presence from access points to MQTT")]
#[command(group(ArgGroup::new("verbosity").multiple(false)))]
struct Cli {
    /// Enable debug level logging.
    #[arg(long, group = "verbosity")]
    debug: bool,

    /// Enable info level logging.
    #[arg(long, group = "verbosity")]
    info: bool,

    /// Enable warning level logging (default).
    #[arg(long, group = "verbosity")]
    warning: bool,

    /// Enable error level logging.
    #[arg(long, group = "verbosity")]
    error: bool,

    /// Comma-separated access point addresses.
    #[arg(long)]
    hostlist: Option<String>,

    /// SSH user for the access points.
    #[arg(short, long)]
    user: Option<String>,

    /// Verify access points against the known_hosts file.
    #[arg(long)]
    usehostkeys: bool,

    /// SSH timeout in seconds.
    #[arg(long)]
    ssh_timeout: Option<f64>,

    /// Maximum client idle time in seconds.
    #[arg(long)]
    max_idle_time: Option<u64>,

    /// Access points scanned in parallel; 0 scans sequentially.
    #[arg(long)]
    processes: Option<usize>,

    /// MQTT host.
    #[arg(long)]
    mqtt_host: Option<String>,

    /// MQTT port.
    #[arg(long)]
    mqtt_port: Option<u16>,

    /// Use MQTT over TLS.
    #[arg(long)]
    mqtts: bool,

    /// MQTT topic prefix.
    #[arg(long)]
    topic: Option<String>,

    /// Payload published when a client appears.
    #[arg(long)]
    home_payload: Option<String>,

    /// Payload published when a client leaves; omit to clear the topic.
    #[arg(long)]
    away_payload: Option<String>,

    /// Delay between scans in seconds.
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..=60))]
    delay: Option<u64>,

    /// Group clients by access point hostname.
    #[arg(long)]
    group_by_ap: bool,

    /// Config file prefix (default: presence).
    #[arg(short, long, default_value = "presence")]
    config: String,
}

impl Cli {
    fn log_level(&self) -> &'static str {
        match (self.debug, self.info, self.warning, self.error) {
            (true, ..) => "debug",
            (_, true, ..) => "info",
            (.., true) => "error",
            _ => "warn",
        }
    }

    /// Layer command-line flags over file and environment configuration.
    fn apply(self, mut config: TrackerConfig) -> TrackerConfig {
        if let Some(hosts) = self.hostlist {
            config.ap_hosts = parse_host_list(&hosts);
        }
        if let Some(user) = self.user {
            config.identity_user = user;
        }
        if self.usehostkeys {
            config.use_known_hosts = true;
        }
        if self.ssh_timeout.is_some() {
            config.ssh_timeout_secs = self.ssh_timeout;
        }
        if self.max_idle_time.is_some() {
            config.max_idle_secs = self.max_idle_time;
        }
        if self.processes.is_some() {
            config.parallelism = self.processes;
        }
        if let Some(host) = self.mqtt_host {
            config.broker.host = host;
        }
        if let Some(port) = self.mqtt_port {
            config.broker.port = port;
        }
        if self.mqtts {
            config.broker.tls = true;
        }
        if let Some(topic) = self.topic {
            config.topic = topic;
        }
        if let Some(payload) = self.home_payload {
            config.home_payload = payload;
        }
        if self.away_payload.is_some() {
            config.away_payload = self.away_payload;
        }
        if let Some(delay) = self.delay {
            config.poll_interval_secs = delay;
        }
        if self.group_by_ap {
            config.group_by_ap = true;
        }
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_level()));
    fmt().with_env_filter(filter).json().init();

    let file_config = load_tracker_config(&cli.config)?;
    let config = cli.apply(file_config);
    config.validate()?;
    tracing::debug!(aps = ?config.ap_hosts, "Access points");

    let policy = config.scan_policy();
    let executor = Arc::new(SshExecutor::new(
        &config.ssh_path,
        policy.host_keys,
        policy.connect_timeout,
    ));

    let tracker = PresenceTracker::new(config, executor);
    tracker.run().await;

    Ok(())
}
