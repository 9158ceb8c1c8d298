use thiserror::Error;

/// Error type shared by the presence tracker crates.
#[derive(Error, Debug)]
pub enum PresenceError {
    #[error("Invalid MAC address: {0:?}")]
    InvalidMac(String),
}
