//! # ergo-state
//!
//! UTXO snapshot state for the Ergo blockchain.
//!
//! This crate provides:
//! - `SnapshotsDb`: the persisted index of locally held snapshots, their
//!   manifests and subtree chunks, used both to serve peers and to store
//!   downloads
//! - `UtxoSetSnapshotDownloadPlan`: which subtree chunks of a snapshot are
//!   still missing, requested or downloaded
//!
//! The authenticated tree itself is out of scope: manifests and subtrees are
//! stored and served as opaque bytes.

mod error;
mod plan;
mod snapshots;

pub use error::{StateError, StateResult};
pub use plan::{ChunkState, UtxoSetSnapshotDownloadPlan};
pub use snapshots::SnapshotsDb;

/// Number of peers that must advertise a manifest before it is downloaded.
pub const MIN_SNAPSHOT_PEERS: usize = 2;

/// Lower bound on chunk requests kept in flight.
pub const CHUNKS_IN_PARALLEL_MIN: usize = 16;

/// Chunk requests sent to one peer per round.
pub const CHUNKS_PER_PEER: usize = 4;

/// Snapshots kept when pruning.
pub const SNAPSHOTS_TO_KEEP: usize = 2;
