//! Synchronizer configuration.

use ergo_network::MAX_MODIFIERS_MESSAGE_SIZE;
use ergo_state::{CHUNKS_IN_PARALLEL_MIN, CHUNKS_PER_PEER, MIN_SNAPSHOT_PEERS, SNAPSHOTS_TO_KEEP};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Sync configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Time a peer has to answer a request before it is re-requested.
    pub delivery_timeout_secs: u64,
    /// Attempts per artifact before the delivery is reported failed.
    pub max_delivery_checks: u32,
    /// Ids requested per RequestModifier.
    pub desired_inv_objects: usize,
    /// Timeout multiplier for manifests and subtree chunks.
    pub chunk_timeout_multiplier: u32,
    /// Length of the unsolicited delivery window.
    pub unsolicited_window_secs: u64,
    /// Unsolicited items tolerated per window.
    pub max_unsolicited_items: u32,
    /// Unsolicited payload bytes tolerated per window.
    pub max_unsolicited_bytes: u64,
    /// Recently delivered ids remembered so late copies are not unsolicited.
    pub delivered_cache_size: usize,
    /// Nominal size of Modifiers responses.
    pub max_modifiers_size: usize,
    /// Download the UTXO set from a snapshot instead of replaying blocks.
    pub utxo_bootstrap: bool,
    /// Peers that must advertise a manifest before it is downloaded.
    pub min_snapshot_peers: usize,
    /// Chunk requests sent to one peer per tick.
    pub chunks_per_peer: usize,
    /// Chunk requests kept in flight.
    pub chunks_in_parallel_min: usize,
    /// Snapshots kept after a download completes.
    pub snapshots_to_keep: usize,
    /// Interval between delivery sweeps.
    pub tick_interval_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            delivery_timeout_secs: 10,
            max_delivery_checks: 100,
            desired_inv_objects: 400,
            chunk_timeout_multiplier: 4,
            unsolicited_window_secs: 60,
            max_unsolicited_items: 32,
            max_unsolicited_bytes: 1024 * 1024,
            delivered_cache_size: 10_000,
            max_modifiers_size: MAX_MODIFIERS_MESSAGE_SIZE,
            utxo_bootstrap: false,
            min_snapshot_peers: MIN_SNAPSHOT_PEERS,
            chunks_per_peer: CHUNKS_PER_PEER,
            chunks_in_parallel_min: CHUNKS_IN_PARALLEL_MIN,
            snapshots_to_keep: SNAPSHOTS_TO_KEEP,
            tick_interval_ms: 1_000,
        }
    }
}

impl SyncConfig {
    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_secs(self.delivery_timeout_secs)
    }

    pub fn chunk_timeout(&self) -> Duration {
        self.delivery_timeout() * self.chunk_timeout_multiplier
    }

    pub fn unsolicited_window(&self) -> Duration {
        Duration::from_secs(self.unsolicited_window_secs)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }
}
