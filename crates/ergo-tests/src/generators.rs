//! Deterministic test data.

use bytes::Bytes;
use ergo_network::{
    ManifestId, ModifierId, ModifierItem, PeerFeature, PeerId, PeerSpec, SnapshotsInfo,
    SubtreeId, PROTOCOL_VERSION,
};
use std::net::SocketAddr;

/// 32 bytes derived from a seed and a domain marker.
fn digest(marker: u8, seed: u8) -> [u8; 32] {
    let mut bytes = [0u8; 32];
    bytes[0] = marker;
    bytes[1] = seed;
    bytes[31] = seed.wrapping_mul(7);
    bytes
}

pub fn peer(n: u8) -> PeerId {
    PeerId(vec![n])
}

pub fn modifier_id(seed: u8) -> ModifierId {
    ModifierId(digest(0xAA, seed))
}

pub fn manifest_id(seed: u8) -> ManifestId {
    ManifestId(digest(0xBB, seed))
}

pub fn subtree_id(seed: u8) -> SubtreeId {
    SubtreeId(digest(0xCC, seed))
}

/// Modifier with `size` bytes of payload.
pub fn modifier_item(seed: u8, size: usize) -> ModifierItem {
    ModifierItem::new(modifier_id(seed), Bytes::from(vec![seed; size]))
}

/// Snapshot index from `(height, manifest seed)` pairs.
pub fn snapshots_info(entries: &[(i32, u8)]) -> SnapshotsInfo {
    entries
        .iter()
        .fold(SnapshotsInfo::empty(), |info, (height, seed)| {
            info.with_manifest(*height, manifest_id(*seed))
        })
}

/// Peer record as a full node would advertise it.
pub fn peer_spec(n: u8) -> PeerSpec {
    let addr: SocketAddr = ([10, 0, 0, n], 9030).into();
    PeerSpec::new("ergoref", PROTOCOL_VERSION, format!("node-{}", n), Some(addr))
        .with_feature(PeerFeature::Mode {
            state_type: 0,
            verifying: true,
            nipopow_suffix: None,
            blocks_to_keep: -1,
        })
        .with_feature(PeerFeature::Session {
            magic: ergo_network::MAINNET_MAGIC,
            session_id: i64::from(n) * 1_000_003,
        })
}
