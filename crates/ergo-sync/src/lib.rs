//! # ergo-sync
//!
//! Modifier and snapshot exchange for the Ergo P2P layer.
//!
//! This crate provides:
//! - Delivery tracking with timeouts, re-requests and unsolicited accounting
//! - The synchronizer actor that answers and issues requests
//! - UTXO snapshot discovery and chunked download

mod config;
pub mod delivery;
mod error;
mod protocol;
mod snapshot;

pub use config::SyncConfig;
pub use delivery::{ArtifactId, ArtifactKind, DeliveryRecord, DeliveryTracker, Expiry, Receipt};
pub use error::{SyncError, SyncResult};
pub use protocol::{ModifierSource, SnapshotSync, SyncCommand, SyncEvent, SyncProtocol};
pub use snapshot::AvailableManifests;

/// Capacity of the event and command channels.
pub const CHANNEL_CAPACITY: usize = 1024;
