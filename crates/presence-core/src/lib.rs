//! presence-core: Shared types for the access point presence tracker.
//!
//! This crate provides the foundational types used across the tracker:
//! - `MacAddress`, the canonical client key
//! - `ClientRecord` and the insertion-ordered `ClientTable`
//! - Presence events emitted when clients arrive or depart
//! - Common error types

pub mod error;
pub mod events;
pub mod types;

pub use error::PresenceError;
pub use events::{PresenceChange, PresenceEvent};
pub use types::{ClientRecord, ClientTable, MacAddress, UNKNOWN_AP};
