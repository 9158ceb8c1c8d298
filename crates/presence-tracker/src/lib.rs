//! presence-tracker: Access point client scanner.
//!
//! Polls wireless access points over SSH for their associated clients,
//! diffs the merged client table against the previous scan, and publishes
//! arrivals and departures to MQTT as retained state.

pub mod config;
pub mod diff;
pub mod error;
pub mod lifecycle;
pub mod parser;
pub mod publish;
pub mod remote;
pub mod scanner;
