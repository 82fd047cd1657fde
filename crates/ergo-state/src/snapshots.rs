//! Snapshot database.
//!
//! Stores:
//! - SnapshotsInfo (index of held snapshots, in its wire format)
//! - Manifests (by manifest ID)
//! - Subtree chunks (by subtree ID)
//! - The subtree ids of each manifest, so pruning can drop its chunks

use crate::{StateError, StateResult};
use bytes::Bytes;
use ergo_network::{
    ManifestId, MessageSpec, SnapshotsInfo, SnapshotsInfoSpec, SubtreeId,
};
use ergo_storage::{ColumnFamily, Storage, WriteBatch};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Database for UTXO snapshots.
pub struct SnapshotsDb {
    storage: Arc<dyn Storage>,
    cached_info: RwLock<Option<SnapshotsInfo>>,
}

impl SnapshotsDb {
    const SNAPSHOTS_INFO_KEY: &'static [u8] = b"snapshots_info";

    const SUBTREE_INDEX_PREFIX: &'static [u8] = b"subtrees:";

    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            cached_info: RwLock::new(None),
        }
    }

    /// Read the snapshot index. Empty if nothing was stored yet.
    pub fn read_snapshots_info(&self) -> StateResult<SnapshotsInfo> {
        if let Some(ref info) = *self.cached_info.read() {
            return Ok(info.clone());
        }

        let info = match self
            .storage
            .get(ColumnFamily::SnapshotsInfo, Self::SNAPSHOTS_INFO_KEY)?
        {
            Some(data) => SnapshotsInfoSpec.parse_bytes(Bytes::from(data))?,
            None => SnapshotsInfo::empty(),
        };

        *self.cached_info.write() = Some(info.clone());
        Ok(info)
    }

    pub fn write_snapshots_info(&self, info: &SnapshotsInfo) -> StateResult<()> {
        self.storage.put(
            ColumnFamily::SnapshotsInfo,
            Self::SNAPSHOTS_INFO_KEY,
            &SnapshotsInfoSpec.to_bytes(info),
        )?;
        *self.cached_info.write() = Some(info.clone());
        Ok(())
    }

    pub fn read_manifest(&self, manifest_id: &ManifestId) -> StateResult<Option<Bytes>> {
        Ok(self
            .storage
            .get(ColumnFamily::Manifests, manifest_id.as_ref())?
            .map(Bytes::from))
    }

    pub fn write_manifest(&self, manifest_id: &ManifestId, data: &[u8]) -> StateResult<()> {
        Ok(self
            .storage
            .put(ColumnFamily::Manifests, manifest_id.as_ref(), data)?)
    }

    pub fn read_subtree(&self, subtree_id: &SubtreeId) -> StateResult<Option<Bytes>> {
        Ok(self
            .storage
            .get(ColumnFamily::Subtrees, subtree_id.as_ref())?
            .map(Bytes::from))
    }

    pub fn write_subtree(&self, subtree_id: &SubtreeId, data: &[u8]) -> StateResult<()> {
        Ok(self
            .storage
            .put(ColumnFamily::Subtrees, subtree_id.as_ref(), data)?)
    }

    /// Subtree ids recorded for a manifest.
    pub fn subtree_ids(&self, manifest_id: &ManifestId) -> StateResult<Vec<SubtreeId>> {
        let Some(data) = self
            .storage
            .get(ColumnFamily::Metadata, &Self::subtree_index_key(manifest_id))?
        else {
            return Ok(Vec::new());
        };
        data.chunks(32)
            .map(|chunk| {
                SubtreeId::from_slice(chunk).map_err(|_| {
                    StateError::Corruption(format!("subtree index of {}", manifest_id))
                })
            })
            .collect()
    }

    /// Register a snapshot whose manifest is already stored.
    pub fn register_snapshot(
        &self,
        height: i32,
        manifest_id: ManifestId,
        subtree_ids: &[SubtreeId],
    ) -> StateResult<()> {
        if !self
            .storage
            .contains(ColumnFamily::Manifests, manifest_id.as_ref())?
        {
            return Err(StateError::ManifestNotFound(manifest_id.to_string()));
        }
        self.commit_snapshot(WriteBatch::new(), height, manifest_id, subtree_ids)
    }

    /// Store a manifest and register the snapshot in one batch.
    pub fn add_snapshot(
        &self,
        height: i32,
        manifest_id: ManifestId,
        manifest: &[u8],
        subtree_ids: &[SubtreeId],
    ) -> StateResult<()> {
        let mut batch = WriteBatch::new();
        batch.put(ColumnFamily::Manifests, manifest_id.as_ref(), manifest);
        self.commit_snapshot(batch, height, manifest_id, subtree_ids)
    }

    fn commit_snapshot(
        &self,
        mut batch: WriteBatch,
        height: i32,
        manifest_id: ManifestId,
        subtree_ids: &[SubtreeId],
    ) -> StateResult<()> {
        let index: Vec<u8> = subtree_ids.iter().flat_map(|id| id.0).collect();
        batch.put(
            ColumnFamily::Metadata,
            Self::subtree_index_key(&manifest_id),
            index,
        );

        let info = self.read_snapshots_info()?.with_manifest(height, manifest_id);
        batch.put(
            ColumnFamily::SnapshotsInfo,
            Self::SNAPSHOTS_INFO_KEY,
            SnapshotsInfoSpec.to_bytes(&info).to_vec(),
        );

        self.storage.write_batch(batch)?;
        *self.cached_info.write() = Some(info);

        info!(
            height,
            manifest_id = %manifest_id,
            subtrees = subtree_ids.len(),
            "Added snapshot"
        );
        Ok(())
    }

    /// Keep only the `keep_count` highest snapshots. Returns removed heights.
    pub fn prune_snapshots(&self, keep_count: usize) -> StateResult<Vec<i32>> {
        let mut info = self.read_snapshots_info()?;
        if info.len() <= keep_count {
            return Ok(Vec::new());
        }

        let to_remove: Vec<(i32, ManifestId)> = info
            .manifests()
            .iter()
            .take(info.len() - keep_count)
            .map(|(h, id)| (*h, *id))
            .collect();

        // Unchanged subtrees keep their digest across heights, so kept
        // snapshots may share chunks with pruned ones.
        let mut kept_subtrees = HashSet::new();
        for manifest_id in info.manifests().values().skip(to_remove.len()) {
            kept_subtrees.extend(self.subtree_ids(manifest_id)?);
        }

        let mut batch = WriteBatch::new();
        for (height, manifest_id) in &to_remove {
            debug!(height, manifest_id = %manifest_id, "Pruning snapshot");
            for subtree in self.subtree_ids(manifest_id)? {
                if !kept_subtrees.contains(&subtree) {
                    batch.delete(ColumnFamily::Subtrees, subtree.as_ref());
                }
            }
            batch.delete(ColumnFamily::Metadata, Self::subtree_index_key(manifest_id));
            batch.delete(ColumnFamily::Manifests, manifest_id.as_ref());
            info.remove(*height);
        }
        batch.put(
            ColumnFamily::SnapshotsInfo,
            Self::SNAPSHOTS_INFO_KEY,
            SnapshotsInfoSpec.to_bytes(&info).to_vec(),
        );

        self.storage.write_batch(batch)?;
        *self.cached_info.write() = Some(info);

        info!(removed = to_remove.len(), remaining = keep_count, "Pruned snapshots");
        Ok(to_remove.into_iter().map(|(h, _)| h).collect())
    }

    fn subtree_index_key(manifest_id: &ManifestId) -> Vec<u8> {
        let mut key = Self::SUBTREE_INDEX_PREFIX.to_vec();
        key.extend_from_slice(manifest_id.as_ref());
        key
    }
}
