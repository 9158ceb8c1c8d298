//! Error types for the presence-tracker crate.

use thiserror::Error;

use crate::parser::ProtocolViolation;
use crate::remote::RemoteFailure;

/// Reasons a single scan cycle is abandoned.
///
/// Any of these aborts the whole cycle; the baseline is left untouched and
/// the next cycle retries.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Remote execution failed on {host}: {source}")]
    RemoteExecution {
        host: String,
        #[source]
        source: RemoteFailure,
    },

    #[error("Bad response from {host}: {source}")]
    Protocol {
        host: String,
        #[source]
        source: ProtocolViolation,
    },

    #[error("Exceeded limit of {max} access points per scan ({count} configured)")]
    Policy { count: usize, max: usize },

    #[error("Scan worker failed: {0}")]
    Worker(String),
}

impl ScanError {
    /// True when the failure was a remote timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::RemoteExecution { source, .. } if source.is_timeout())
    }
}

/// Top-level error for the tracker pipeline.
#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("Scan error: {0}")]
    Scan(#[from] ScanError),

    #[error("Broker error: {0}")]
    Broker(#[from] presence_broker::BrokerError),

    #[error("Config error: {0}")]
    Config(String),
}

impl From<config::ConfigError> for TrackerError {
    fn from(e: config::ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TrackerError>;
