//! UTXO set snapshot download plan.

use ergo_network::{ManifestId, SubtreeId};
use std::collections::{HashMap, VecDeque};
use std::time::Instant;

/// Download state of one subtree chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkState {
    Pending,
    Requested,
    Downloaded,
}

/// Tracks the state of a snapshot download:
/// - which chunks are expected
/// - which chunks have been downloaded
/// - which chunks are currently requested
#[derive(Debug, Clone)]
pub struct UtxoSetSnapshotDownloadPlan {
    created_at: Instant,
    latest_update: Instant,
    /// Block height of the snapshot.
    pub snapshot_height: i32,
    /// Manifest the chunks belong to.
    pub manifest_id: ManifestId,
    expected_chunk_ids: Vec<SubtreeId>,
    states: Vec<ChunkState>,
    positions: HashMap<SubtreeId, usize>,
    /// Chunks put back after a failed request, served before new ones.
    retry: VecDeque<usize>,
    next_chunk_index: usize,
    downloading: usize,
    downloaded: usize,
}

impl UtxoSetSnapshotDownloadPlan {
    /// Create a plan from the subtree ids listed in a manifest. Repeated
    /// ids are kept once.
    pub fn new(
        snapshot_height: i32,
        manifest_id: ManifestId,
        chunk_ids: Vec<SubtreeId>,
        now: Instant,
    ) -> Self {
        let mut positions = HashMap::with_capacity(chunk_ids.len());
        let mut expected_chunk_ids = Vec::with_capacity(chunk_ids.len());
        for id in chunk_ids {
            if !positions.contains_key(&id) {
                positions.insert(id, expected_chunk_ids.len());
                expected_chunk_ids.push(id);
            }
        }
        let states = vec![ChunkState::Pending; expected_chunk_ids.len()];

        Self {
            created_at: now,
            latest_update: now,
            snapshot_height,
            manifest_id,
            expected_chunk_ids,
            states,
            positions,
            retry: VecDeque::new(),
            next_chunk_index: 0,
            downloading: 0,
            downloaded: 0,
        }
    }

    pub fn expected_chunk_ids(&self) -> &[SubtreeId] {
        &self.expected_chunk_ids
    }

    pub fn total_chunks(&self) -> usize {
        self.expected_chunk_ids.len()
    }

    pub fn downloaded_count(&self) -> usize {
        self.downloaded
    }

    pub fn downloading_count(&self) -> usize {
        self.downloading
    }

    pub fn state(&self, id: &SubtreeId) -> Option<ChunkState> {
        self.positions.get(id).map(|&idx| self.states[idx])
    }

    pub fn is_fully_downloaded(&self) -> bool {
        self.downloaded == self.expected_chunk_ids.len()
    }

    /// Download progress (0.0 - 1.0).
    pub fn progress(&self) -> f64 {
        if self.expected_chunk_ids.is_empty() {
            return 1.0;
        }
        self.downloaded as f64 / self.expected_chunk_ids.len() as f64
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn latest_update(&self) -> Instant {
        self.latest_update
    }

    /// Take up to `how_many` chunks to request and mark them requested.
    /// Failed chunks come first, then chunks never requested.
    pub fn chunk_ids_to_download(&mut self, how_many: usize, now: Instant) -> Vec<SubtreeId> {
        let mut result = Vec::with_capacity(how_many);

        while result.len() < how_many {
            let idx = match self.retry.pop_front() {
                Some(idx) => idx,
                None if self.next_chunk_index < self.expected_chunk_ids.len() => {
                    self.next_chunk_index += 1;
                    self.next_chunk_index - 1
                }
                None => break,
            };
            if self.states[idx] == ChunkState::Pending {
                self.states[idx] = ChunkState::Requested;
                self.downloading += 1;
                result.push(self.expected_chunk_ids[idx]);
            }
        }

        if !result.is_empty() {
            self.latest_update = now;
        }
        result
    }

    /// Mark a chunk downloaded.
    ///
    /// Returns `true` if the chunk was expected and not yet downloaded.
    pub fn mark_chunk_downloaded(&mut self, id: &SubtreeId, now: Instant) -> bool {
        let Some(&idx) = self.positions.get(id) else {
            return false;
        };
        match self.states[idx] {
            ChunkState::Downloaded => false,
            state => {
                if state == ChunkState::Requested {
                    self.downloading -= 1;
                }
                self.states[idx] = ChunkState::Downloaded;
                self.downloaded += 1;
                self.latest_update = now;
                true
            }
        }
    }

    /// Put a requested chunk back so it is handed out again.
    pub fn mark_chunk_failed(&mut self, id: &SubtreeId, now: Instant) {
        let Some(&idx) = self.positions.get(id) else {
            return;
        };
        if self.states[idx] == ChunkState::Requested {
            self.states[idx] = ChunkState::Pending;
            self.downloading -= 1;
            self.retry.push_back(idx);
            self.latest_update = now;
        }
    }

    /// Chunks not downloaded yet.
    pub fn pending_chunk_ids(&self) -> Vec<SubtreeId> {
        self.expected_chunk_ids
            .iter()
            .zip(&self.states)
            .filter(|(_, state)| **state != ChunkState::Downloaded)
            .map(|(id, _)| *id)
            .collect()
    }
}
