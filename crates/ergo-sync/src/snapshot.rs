//! Manifests advertised by peers.

use ergo_network::{ManifestId, PeerId, SnapshotsInfo};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Which peers advertised which `(height, manifest)` pairs.
#[derive(Debug, Default)]
pub struct AvailableManifests {
    available: BTreeMap<(i32, ManifestId), BTreeSet<PeerId>>,
    reported: HashSet<PeerId>,
}

impl AvailableManifests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace what `peer` advertises with `info`.
    pub fn update(&mut self, peer: &PeerId, info: &SnapshotsInfo) {
        self.forget(peer);
        for (height, manifest_id) in info.manifests() {
            self.available
                .entry((*height, *manifest_id))
                .or_default()
                .insert(peer.clone());
        }
        self.reported.insert(peer.clone());
    }

    pub fn remove_peer(&mut self, peer: &PeerId) {
        self.forget(peer);
        self.reported.remove(peer);
    }

    /// Whether `peer` sent its snapshot index.
    pub fn has_reported(&self, peer: &PeerId) -> bool {
        self.reported.contains(peer)
    }

    pub fn peers_for(&self, height: i32, manifest_id: &ManifestId) -> Vec<PeerId> {
        self.available
            .get(&(height, *manifest_id))
            .map(|peers| peers.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Highest manifest advertised by at least `min_peers` peers.
    pub fn best(&self, min_peers: usize) -> Option<(i32, ManifestId, Vec<PeerId>)> {
        self.available
            .iter()
            .rev()
            .find(|(_, peers)| peers.len() >= min_peers)
            .map(|((height, id), peers)| (*height, *id, peers.iter().cloned().collect()))
    }

    pub fn is_empty(&self) -> bool {
        self.available.is_empty()
    }

    fn forget(&mut self, peer: &PeerId) {
        self.available.retain(|_, peers| {
            peers.remove(peer);
            !peers.is_empty()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(n: u8) -> PeerId {
        PeerId(vec![n])
    }

    #[test]
    fn test_best_requires_min_peers() {
        let mut manifests = AvailableManifests::new();
        let low = SnapshotsInfo::empty().with_manifest(100, ManifestId([1; 32]));
        let both = low.clone().with_manifest(200, ManifestId([2; 32]));

        manifests.update(&peer(1), &both);
        manifests.update(&peer(2), &low);
        assert_eq!(
            manifests.best(2),
            Some((100, ManifestId([1; 32]), vec![peer(1), peer(2)]))
        );

        manifests.update(&peer(2), &both);
        assert_eq!(manifests.best(2).map(|(h, _, _)| h), Some(200));
        assert!(manifests.best(3).is_none());
    }

    #[test]
    fn test_update_replaces_previous() {
        let mut manifests = AvailableManifests::new();
        manifests.update(&peer(1), &SnapshotsInfo::empty().with_manifest(100, ManifestId([1; 32])));
        manifests.update(&peer(1), &SnapshotsInfo::empty());

        assert!(manifests.is_empty());
        assert!(manifests.has_reported(&peer(1)));
    }

    #[test]
    fn test_remove_peer() {
        let mut manifests = AvailableManifests::new();
        let info = SnapshotsInfo::empty().with_manifest(100, ManifestId([1; 32]));
        manifests.update(&peer(1), &info);
        manifests.update(&peer(2), &info);

        manifests.remove_peer(&peer(1));
        assert!(!manifests.has_reported(&peer(1)));
        assert_eq!(manifests.peers_for(100, &ManifestId([1; 32])), vec![peer(2)]);
    }
}
