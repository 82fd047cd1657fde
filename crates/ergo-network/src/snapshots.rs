//! UTXO snapshot exchange messages.
//!
//! - `GetSnapshotsInfo` / `SnapshotsInfo`: which (height, manifest) pairs a peer stores
//! - `GetManifest` / `Manifest`: top of the sliced UTXO tree
//! - `GetUtxoSnapshotChunk` / `UtxoSnapshotChunk`: one subtree below the manifest

use crate::message_spec::MessageSpec;
use crate::serialization::{Reader, VlqWrite};
use crate::types::{ManifestId, SubtreeId, DIGEST_LENGTH};
use crate::{Message, MessageCode, NetworkResult};
use bytes::{BufMut, Bytes, BytesMut};
use std::collections::BTreeMap;

/// Snapshot requests must stay below this many bytes.
pub const SNAPSHOT_REQUEST_LIMIT: usize = 100;

/// Maximum SnapshotsInfo payload.
pub const MAX_SNAPSHOTS_INFO_SIZE: usize = 20_000;

/// Maximum Manifest and UtxoSnapshotChunk payload.
pub const MAX_SNAPSHOT_DATA_SIZE: usize = 4_000_000;

/// Encoded size of one SnapshotsInfo entry: height (4) and digest (32).
pub const SNAPSHOTS_INFO_ENTRY_SIZE: usize = 4 + DIGEST_LENGTH;

// ==================== SnapshotsInfo ====================

/// Manifests a node stores, by block height.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotsInfo {
    manifests: BTreeMap<i32, ManifestId>,
}

impl SnapshotsInfo {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(manifests: BTreeMap<i32, ManifestId>) -> Self {
        Self { manifests }
    }

    /// Add a manifest, builder style.
    pub fn with_manifest(mut self, height: i32, manifest_id: ManifestId) -> Self {
        self.manifests.insert(height, manifest_id);
        self
    }

    pub fn insert(&mut self, height: i32, manifest_id: ManifestId) -> Option<ManifestId> {
        self.manifests.insert(height, manifest_id)
    }

    pub fn remove(&mut self, height: i32) -> Option<ManifestId> {
        self.manifests.remove(&height)
    }

    pub fn get(&self, height: i32) -> Option<&ManifestId> {
        self.manifests.get(&height)
    }

    pub fn manifests(&self) -> &BTreeMap<i32, ManifestId> {
        &self.manifests
    }

    /// Newest snapshot.
    pub fn highest(&self) -> Option<(i32, ManifestId)> {
        self.manifests
            .iter()
            .next_back()
            .map(|(height, id)| (*height, *id))
    }

    pub fn len(&self) -> usize {
        self.manifests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.manifests.is_empty()
    }
}

// ==================== Codecs ====================

/// GetSnapshotsInfo codec. Carries no payload.
#[derive(Debug, Clone, Default)]
pub struct GetSnapshotsInfoSpec;

impl MessageSpec for GetSnapshotsInfoSpec {
    type Payload = ();

    fn code(&self) -> MessageCode {
        MessageCode::GetSnapshotsInfo
    }

    fn name(&self) -> &'static str {
        "GetSnapshotsInfo"
    }

    fn max_size(&self) -> usize {
        SNAPSHOT_REQUEST_LIMIT - 1
    }

    fn serialize(&self, _payload: &(), _w: &mut BytesMut) {}

    fn parse(&self, _r: &mut Reader) -> NetworkResult<()> {
        Ok(())
    }

    fn wrap(_payload: ()) -> Message {
        Message::GetSnapshotsInfo
    }

    fn payload(message: &Message) -> Option<&()> {
        match message {
            Message::GetSnapshotsInfo => Some(&()),
            _ => None,
        }
    }
}

/// SnapshotsInfo codec.
#[derive(Debug, Clone, Default)]
pub struct SnapshotsInfoSpec;

impl MessageSpec for SnapshotsInfoSpec {
    type Payload = SnapshotsInfo;

    fn code(&self) -> MessageCode {
        MessageCode::SnapshotsInfo
    }

    fn name(&self) -> &'static str {
        "SnapshotsInfo"
    }

    fn max_size(&self) -> usize {
        MAX_SNAPSHOTS_INFO_SIZE
    }

    fn serialize(&self, payload: &SnapshotsInfo, w: &mut BytesMut) {
        w.put_vlq(payload.len() as u64);
        for (height, manifest_id) in payload.manifests() {
            w.put_i32(*height);
            w.put_slice(manifest_id.as_ref());
        }
    }

    fn parse(&self, r: &mut Reader) -> NetworkResult<SnapshotsInfo> {
        let count = r.get_vlq()?;
        let declared = count.saturating_mul(SNAPSHOTS_INFO_ENTRY_SIZE as u64);
        if declared > self.max_size() as u64 {
            return Err(r.malformed(format!(
                "{} entries cannot fit in {} bytes",
                count,
                self.max_size()
            )));
        }
        if declared > r.remaining() as u64 {
            return Err(r.malformed(format!(
                "{} entries declared, only {} bytes left",
                count,
                r.remaining()
            )));
        }

        let mut info = SnapshotsInfo::empty();
        for _ in 0..count {
            let height = r.get_i32()?;
            let manifest_id = ManifestId(r.get_array()?);
            info.insert(height, manifest_id);
        }
        Ok(info)
    }

    fn wrap(payload: SnapshotsInfo) -> Message {
        Message::SnapshotsInfo(payload)
    }

    fn payload(message: &Message) -> Option<&SnapshotsInfo> {
        match message {
            Message::SnapshotsInfo(info) => Some(info),
            _ => None,
        }
    }
}

/// GetManifest codec.
#[derive(Debug, Clone, Default)]
pub struct GetManifestSpec;

impl MessageSpec for GetManifestSpec {
    type Payload = ManifestId;

    fn code(&self) -> MessageCode {
        MessageCode::GetManifest
    }

    fn name(&self) -> &'static str {
        "GetManifest"
    }

    fn max_size(&self) -> usize {
        SNAPSHOT_REQUEST_LIMIT - 1
    }

    fn serialize(&self, payload: &ManifestId, w: &mut BytesMut) {
        w.put_slice(payload.as_ref());
    }

    fn parse(&self, r: &mut Reader) -> NetworkResult<ManifestId> {
        Ok(ManifestId(r.get_array()?))
    }

    fn wrap(payload: ManifestId) -> Message {
        Message::GetManifest(payload)
    }

    fn payload(message: &Message) -> Option<&ManifestId> {
        match message {
            Message::GetManifest(id) => Some(id),
            _ => None,
        }
    }
}

/// Manifest codec.
#[derive(Debug, Clone, Default)]
pub struct ManifestSpec;

impl MessageSpec for ManifestSpec {
    type Payload = Bytes;

    fn code(&self) -> MessageCode {
        MessageCode::Manifest
    }

    fn name(&self) -> &'static str {
        "Manifest"
    }

    fn max_size(&self) -> usize {
        MAX_SNAPSHOT_DATA_SIZE
    }

    fn serialize(&self, payload: &Bytes, w: &mut BytesMut) {
        w.put_len_prefixed(payload);
    }

    fn parse(&self, r: &mut Reader) -> NetworkResult<Bytes> {
        let len = r.get_len()?;
        r.get_bytes(len)
    }

    fn wrap(payload: Bytes) -> Message {
        Message::Manifest(payload)
    }

    fn payload(message: &Message) -> Option<&Bytes> {
        match message {
            Message::Manifest(bytes) => Some(bytes),
            _ => None,
        }
    }
}

/// GetUtxoSnapshotChunk codec.
#[derive(Debug, Clone, Default)]
pub struct GetUtxoSnapshotChunkSpec;

impl MessageSpec for GetUtxoSnapshotChunkSpec {
    type Payload = SubtreeId;

    fn code(&self) -> MessageCode {
        MessageCode::GetUtxoSnapshotChunk
    }

    fn name(&self) -> &'static str {
        "GetUtxoSnapshotChunk"
    }

    fn max_size(&self) -> usize {
        SNAPSHOT_REQUEST_LIMIT - 1
    }

    fn serialize(&self, payload: &SubtreeId, w: &mut BytesMut) {
        w.put_slice(payload.as_ref());
    }

    fn parse(&self, r: &mut Reader) -> NetworkResult<SubtreeId> {
        Ok(SubtreeId(r.get_array()?))
    }

    fn wrap(payload: SubtreeId) -> Message {
        Message::GetUtxoSnapshotChunk(payload)
    }

    fn payload(message: &Message) -> Option<&SubtreeId> {
        match message {
            Message::GetUtxoSnapshotChunk(id) => Some(id),
            _ => None,
        }
    }
}

/// UtxoSnapshotChunk codec.
#[derive(Debug, Clone, Default)]
pub struct UtxoSnapshotChunkSpec;

impl MessageSpec for UtxoSnapshotChunkSpec {
    type Payload = Bytes;

    fn code(&self) -> MessageCode {
        MessageCode::UtxoSnapshotChunk
    }

    fn name(&self) -> &'static str {
        "UtxoSnapshotChunk"
    }

    fn max_size(&self) -> usize {
        MAX_SNAPSHOT_DATA_SIZE
    }

    fn serialize(&self, payload: &Bytes, w: &mut BytesMut) {
        w.put_len_prefixed(payload);
    }

    fn parse(&self, r: &mut Reader) -> NetworkResult<Bytes> {
        let len = r.get_len()?;
        r.get_bytes(len)
    }

    fn wrap(payload: Bytes) -> Message {
        Message::UtxoSnapshotChunk(payload)
    }

    fn payload(message: &Message) -> Option<&Bytes> {
        match message {
            Message::UtxoSnapshotChunk(bytes) => Some(bytes),
            _ => None,
        }
    }
}

// ==================== Tests ====================
