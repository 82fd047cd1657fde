//! Delivery tracking for outstanding requests.
//!
//! Every id sent in a request gets a record naming the peer that was asked,
//! when, and on which attempt. A response either matches a record
//! (`Accepted`), repeats something delivered recently (`Duplicate`), or was
//! never asked for (`Unsolicited`). Records are expired by a periodic sweep,
//! not per-item timers.

use crate::config::SyncConfig;
use ergo_network::{
    ManifestId, ModifierId, NetworkObjectTypeId, PeerId, PenaltyReason, SubtreeId,
};
use lru::LruCache;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Something that can be requested from a peer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ArtifactId {
    Modifier(NetworkObjectTypeId, ModifierId),
    Manifest(ManifestId),
    Subtree(SubtreeId),
    /// Snapshot index of one peer.
    SnapshotsInfo(PeerId),
    /// NiPoPoW proof asked from one peer.
    NipopowProof(PeerId),
}

/// Kind of an [`ArtifactId`], for matching responses that carry no id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    Modifier,
    Manifest,
    Subtree,
    SnapshotsInfo,
    NipopowProof,
}

impl ArtifactId {
    pub fn kind(&self) -> ArtifactKind {
        match self {
            Self::Modifier(..) => ArtifactKind::Modifier,
            Self::Manifest(_) => ArtifactKind::Manifest,
            Self::Subtree(_) => ArtifactKind::Subtree,
            Self::SnapshotsInfo(_) => ArtifactKind::SnapshotsInfo,
            Self::NipopowProof(_) => ArtifactKind::NipopowProof,
        }
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Modifier(type_id, id) => write!(f, "modifier {}:{}", type_id.0, id),
            Self::Manifest(id) => write!(f, "manifest {}", id),
            Self::Subtree(id) => write!(f, "subtree {}", id),
            Self::SnapshotsInfo(peer) => write!(f, "snapshots info from {}", peer),
            Self::NipopowProof(peer) => write!(f, "nipopow proof from {}", peer),
        }
    }
}

/// An outstanding request.
#[derive(Debug, Clone)]
pub struct DeliveryRecord {
    /// Peer the current attempt went to.
    pub peer: PeerId,
    pub requested_at: Instant,
    /// 1 for the first request.
    pub attempt: u32,
    /// Every peer asked so far.
    pub tried: BTreeSet<PeerId>,
    /// Peers known to hold the artifact, candidates for a re-request.
    pub sources: BTreeSet<PeerId>,
    seq: u64,
}

/// Outcome of a delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum Receipt {
    /// Matches an outstanding request; the record is gone.
    Accepted {
        requested_from: PeerId,
        elapsed: Duration,
        attempt: u32,
    },
    /// Delivered recently already.
    Duplicate,
    /// Never requested from this peer. `penalty` is set when the peer
    /// crossed the unsolicited threshold with this delivery.
    Unsolicited { penalty: Option<PenaltyReason> },
}

/// Result of the timeout sweep for one record.
#[derive(Debug, Clone, PartialEq)]
pub enum Expiry {
    /// Asked again from another peer.
    Rerequest {
        id: ArtifactId,
        from: PeerId,
        to: PeerId,
        attempt: u32,
    },
    /// Attempts exhausted or no alternative peer; the record is gone.
    Failed {
        id: ArtifactId,
        peer: PeerId,
        attempts: u32,
    },
}

#[derive(Debug, Clone)]
struct UnsolicitedWindow {
    started: Instant,
    items: u32,
    bytes: u64,
}

/// Outstanding requests plus the per-peer unsolicited accounting.
pub struct DeliveryTracker {
    timeout: Duration,
    chunk_timeout: Duration,
    max_checks: u32,
    window_len: Duration,
    max_unsolicited_items: u32,
    max_unsolicited_bytes: u64,
    requested: HashMap<ArtifactId, DeliveryRecord>,
    delivered: LruCache<ArtifactId, ()>,
    windows: HashMap<PeerId, UnsolicitedWindow>,
    next_seq: u64,
}

impl DeliveryTracker {
    pub fn new(config: &SyncConfig) -> Self {
        let cache = NonZeroUsize::new(config.delivered_cache_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            timeout: config.delivery_timeout(),
            chunk_timeout: config.chunk_timeout(),
            max_checks: config.max_delivery_checks.max(1),
            window_len: config.unsolicited_window(),
            max_unsolicited_items: config.max_unsolicited_items,
            max_unsolicited_bytes: config.max_unsolicited_bytes,
            requested: HashMap::new(),
            delivered: LruCache::new(cache),
            windows: HashMap::new(),
            next_seq: 0,
        }
    }

    /// Record a first request of `id` to `peer`.
    ///
    /// Returns `false` and changes nothing if `id` is already outstanding.
    pub fn set_requested(&mut self, id: ArtifactId, peer: PeerId, now: Instant) -> bool {
        if self.requested.contains_key(&id) {
            return false;
        }
        trace!(id = %id, peer = %peer, "Requested");
        let seq = self.next_seq;
        self.next_seq += 1;
        self.requested.insert(
            id,
            DeliveryRecord {
                tried: BTreeSet::from([peer.clone()]),
                peer,
                requested_at: now,
                attempt: 1,
                sources: BTreeSet::new(),
                seq,
            },
        );
        true
    }

    /// Note that `peer` can also serve `id`. No-op unless `id` is outstanding.
    pub fn add_source(&mut self, id: &ArtifactId, peer: PeerId) {
        if let Some(record) = self.requested.get_mut(id) {
            record.sources.insert(peer);
        }
    }

    pub fn is_requested(&self, id: &ArtifactId) -> bool {
        self.requested.contains_key(id)
    }

    pub fn record(&self, id: &ArtifactId) -> Option<&DeliveryRecord> {
        self.requested.get(id)
    }

    /// Whether `id` was delivered recently.
    pub fn was_delivered(&self, id: &ArtifactId) -> bool {
        self.delivered.contains(id)
    }

    /// Classify a delivery of `id` by `peer` carrying `size` payload bytes.
    ///
    /// A peer asked on any attempt is accepted, which also cancels a
    /// re-request sent to someone else.
    pub fn on_received(
        &mut self,
        id: &ArtifactId,
        peer: &PeerId,
        size: usize,
        now: Instant,
    ) -> Receipt {
        let solicited = self
            .requested
            .get(id)
            .is_some_and(|record| record.tried.contains(peer));
        if solicited {
            if let Some(record) = self.requested.remove(id) {
                self.delivered.put(id.clone(), ());
                return Receipt::Accepted {
                    elapsed: now.saturating_duration_since(record.requested_at),
                    requested_from: record.peer,
                    attempt: record.attempt,
                };
            }
        }

        if self.delivered.contains(id) {
            trace!(id = %id, peer = %peer, "Duplicate delivery");
            return Receipt::Duplicate;
        }

        Receipt::Unsolicited {
            penalty: self.note_unsolicited(peer, size, now),
        }
    }

    /// Count an unsolicited delivery against `peer`'s window.
    ///
    /// Returns a penalty when the window's item or byte limit is crossed;
    /// the window then starts over.
    pub fn note_unsolicited(
        &mut self,
        peer: &PeerId,
        size: usize,
        now: Instant,
    ) -> Option<PenaltyReason> {
        let window = self
            .windows
            .entry(peer.clone())
            .or_insert(UnsolicitedWindow {
                started: now,
                items: 0,
                bytes: 0,
            });
        if now.saturating_duration_since(window.started) >= self.window_len {
            *window = UnsolicitedWindow {
                started: now,
                items: 0,
                bytes: 0,
            };
        }
        window.items = window.items.saturating_add(1);
        window.bytes = window.bytes.saturating_add(size as u64);

        if window.items > self.max_unsolicited_items || window.bytes > self.max_unsolicited_bytes {
            warn!(
                peer = %peer,
                items = window.items,
                bytes = window.bytes,
                "Unsolicited delivery threshold crossed"
            );
            *window = UnsolicitedWindow {
                started: now,
                items: 0,
                bytes: 0,
            };
            return Some(PenaltyReason::SpamDetected);
        }
        debug!(peer = %peer, items = window.items, "Unsolicited delivery");
        None
    }

    /// The oldest outstanding request of `kind` that `peer` was asked for.
    ///
    /// Manifest and chunk responses carry no id, so they are paired with
    /// requests in the order the requests were sent. This assumes the peer
    /// answers every request in order. A peer that silently skips one (as
    /// nodes do for subtrees they no longer hold) shifts the pairing: the
    /// next response is stored under the skipped id. Content checks happen
    /// when the manifest and subtrees are applied, outside this crate.
    pub fn oldest_requested(&self, peer: &PeerId, kind: ArtifactKind) -> Option<ArtifactId> {
        self.requested
            .iter()
            .filter(|(id, record)| id.kind() == kind && record.tried.contains(peer))
            .min_by_key(|(_, record)| record.seq)
            .map(|(id, _)| id.clone())
    }

    /// Expire records older than their timeout.
    ///
    /// `rank` returns the priority of a usable peer, or `None` for a peer
    /// that is gone or banned. An expired record moves to the best-ranked
    /// source not asked yet; without one, or once `max_delivery_checks`
    /// attempts are used, it fails.
    pub fn check_timeouts<F>(&mut self, now: Instant, rank: F) -> Vec<Expiry>
    where
        F: Fn(&PeerId) -> Option<f64>,
    {
        let mut expired: Vec<(ArtifactId, u64)> = self
            .requested
            .iter()
            .filter(|(id, record)| {
                now.saturating_duration_since(record.requested_at) >= self.timeout_for(id)
            })
            .map(|(id, record)| (id.clone(), record.seq))
            .collect();
        expired.sort_by_key(|(_, seq)| *seq);

        let mut result = Vec::with_capacity(expired.len());
        for (id, _) in expired {
            let Some(record) = self.requested.get_mut(&id) else {
                continue;
            };

            let alternative = if record.attempt < self.max_checks {
                record
                    .sources
                    .iter()
                    .filter(|peer| !record.tried.contains(*peer))
                    .filter_map(|peer| rank(peer).map(|score| (peer, score)))
                    .max_by(|a, b| {
                        a.1.partial_cmp(&b.1)
                            .unwrap_or(std::cmp::Ordering::Equal)
                            .then_with(|| b.0.cmp(a.0))
                    })
                    .map(|(peer, _)| peer.clone())
            } else {
                None
            };

            match alternative {
                Some(to) => {
                    let from = std::mem::replace(&mut record.peer, to.clone());
                    record.tried.insert(to.clone());
                    record.attempt += 1;
                    record.requested_at = now;
                    debug!(id = %id, from = %from, to = %to, attempt = record.attempt, "Re-requesting");
                    result.push(Expiry::Rerequest {
                        id,
                        from,
                        to,
                        attempt: record.attempt,
                    });
                }
                None => {
                    if let Some(record) = self.requested.remove(&id) {
                        debug!(id = %id, peer = %record.peer, attempts = record.attempt, "Delivery failed");
                        result.push(Expiry::Failed {
                            id,
                            peer: record.peer,
                            attempts: record.attempt,
                        });
                    }
                }
            }
        }
        result
    }

    /// Drop everything outstanding at `peer` and forget its window.
    ///
    /// Returns the ids whose current attempt went to `peer`.
    pub fn peer_disconnected(&mut self, peer: &PeerId) -> Vec<ArtifactId> {
        let mut dropped: Vec<(ArtifactId, u64)> = Vec::new();
        self.requested.retain(|id, record| {
            if &record.peer == peer {
                dropped.push((id.clone(), record.seq));
                false
            } else {
                record.sources.remove(peer);
                true
            }
        });
        self.windows.remove(peer);
        dropped.sort_by_key(|(_, seq)| *seq);
        dropped.into_iter().map(|(id, _)| id).collect()
    }

    /// Number of outstanding requests.
    pub fn len(&self) -> usize {
        self.requested.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requested.is_empty()
    }

    fn timeout_for(&self, id: &ArtifactId) -> Duration {
        match id.kind() {
            ArtifactKind::Manifest | ArtifactKind::Subtree => self.chunk_timeout,
            _ => self.timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(n: u8) -> PeerId {
        PeerId(vec![n])
    }

    fn modifier(n: u8) -> ArtifactId {
        ArtifactId::Modifier(NetworkObjectTypeId::HEADER, ModifierId([n; 32]))
    }

    fn tracker() -> DeliveryTracker {
        DeliveryTracker::new(&SyncConfig::default())
    }

    fn any_peer(_: &PeerId) -> Option<f64> {
        Some(0.5)
    }

    #[test]
    fn test_solicited_delivery_accepted() {
        let mut tracker = tracker();
        let start = Instant::now();
        assert!(tracker.set_requested(modifier(1), peer(1), start));
        assert!(!tracker.set_requested(modifier(1), peer(2), start));

        let receipt = tracker.on_received(&modifier(1), &peer(1), 10, start + Duration::from_secs(2));
        assert_eq!(
            receipt,
            Receipt::Accepted {
                requested_from: peer(1),
                elapsed: Duration::from_secs(2),
                attempt: 1,
            }
        );
        assert!(tracker.is_empty());
        assert!(tracker.was_delivered(&modifier(1)));
    }

    #[test]
    fn test_duplicate_after_delivery() {
        let mut tracker = tracker();
        let now = Instant::now();
        tracker.set_requested(modifier(1), peer(1), now);
        tracker.on_received(&modifier(1), &peer(1), 10, now);

        assert_eq!(tracker.on_received(&modifier(1), &peer(1), 10, now), Receipt::Duplicate);
        assert_eq!(tracker.on_received(&modifier(1), &peer(2), 10, now), Receipt::Duplicate);
    }

    #[test]
    fn test_unsolicited_tolerated_below_threshold() {
        let mut tracker = tracker();
        let now = Instant::now();
        for n in 0..32u8 {
            assert_eq!(
                tracker.on_received(&modifier(n), &peer(1), 100, now),
                Receipt::Unsolicited { penalty: None }
            );
        }
        assert_eq!(
            tracker.on_received(&modifier(200), &peer(1), 100, now),
            Receipt::Unsolicited {
                penalty: Some(PenaltyReason::SpamDetected)
            }
        );
        // Window restarted.
        assert_eq!(
            tracker.on_received(&modifier(201), &peer(1), 100, now),
            Receipt::Unsolicited { penalty: None }
        );
    }

    #[test]
    fn test_unsolicited_byte_limit() {
        let mut tracker = tracker();
        let now = Instant::now();
        assert_eq!(tracker.note_unsolicited(&peer(1), 1024 * 1024, now), None);
        assert_eq!(
            tracker.note_unsolicited(&peer(1), 1, now),
            Some(PenaltyReason::SpamDetected)
        );
    }

    #[test]
    fn test_unsolicited_window_expires() {
        let mut tracker = tracker();
        let start = Instant::now();
        for _ in 0..32 {
            tracker.note_unsolicited(&peer(1), 1, start);
        }
        let later = start + Duration::from_secs(60);
        assert_eq!(tracker.note_unsolicited(&peer(1), 1, later), None);
    }

    #[test]
    fn test_request_to_other_peer_is_unsolicited() {
        let mut tracker = tracker();
        let now = Instant::now();
        tracker.set_requested(modifier(1), peer(1), now);
        assert_eq!(
            tracker.on_received(&modifier(1), &peer(2), 10, now),
            Receipt::Unsolicited { penalty: None }
        );
        assert!(tracker.is_requested(&modifier(1)));
    }

    #[test]
    fn test_timeout_rerequests_from_alternative() {
        let mut tracker = tracker();
        let start = Instant::now();
        tracker.set_requested(modifier(1), peer(1), start);
        tracker.add_source(&modifier(1), peer(2));
        tracker.add_source(&modifier(1), peer(3));

        assert!(tracker.check_timeouts(start + Duration::from_secs(9), any_peer).is_empty());

        let rank = |p: &PeerId| if p == &peer(3) { Some(0.9) } else { Some(0.1) };
        let expiries = tracker.check_timeouts(start + Duration::from_secs(10), rank);
        assert_eq!(
            expiries,
            vec![Expiry::Rerequest {
                id: modifier(1),
                from: peer(1),
                to: peer(3),
                attempt: 2,
            }]
        );
        assert_eq!(tracker.record(&modifier(1)).unwrap().attempt, 2);
    }

    #[test]
    fn test_late_delivery_cancels_rerequest() {
        let mut tracker = tracker();
        let start = Instant::now();
        tracker.set_requested(modifier(1), peer(1), start);
        tracker.add_source(&modifier(1), peer(2));
        tracker.check_timeouts(start + Duration::from_secs(10), any_peer);

        let receipt = tracker.on_received(&modifier(1), &peer(1), 10, start + Duration::from_secs(11));
        assert!(matches!(receipt, Receipt::Accepted { attempt: 2, .. }));
        assert!(tracker.is_empty());
        assert_eq!(
            tracker.on_received(&modifier(1), &peer(2), 10, start + Duration::from_secs(12)),
            Receipt::Duplicate
        );
    }

    #[test]
    fn test_timeout_without_alternative_fails() {
        let mut tracker = tracker();
        let start = Instant::now();
        tracker.set_requested(modifier(1), peer(1), start);
        tracker.add_source(&modifier(1), peer(2));

        // The only alternative is gone.
        let expiries = tracker.check_timeouts(start + Duration::from_secs(10), |_| None);
        assert_eq!(
            expiries,
            vec![Expiry::Failed {
                id: modifier(1),
                peer: peer(1),
                attempts: 1,
            }]
        );
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_attempts_exhausted() {
        let config = SyncConfig {
            max_delivery_checks: 2,
            ..SyncConfig::default()
        };
        let mut tracker = DeliveryTracker::new(&config);
        let start = Instant::now();
        tracker.set_requested(modifier(1), peer(1), start);
        for n in 2..5 {
            tracker.add_source(&modifier(1), peer(n));
        }

        let first = tracker.check_timeouts(start + Duration::from_secs(10), any_peer);
        assert!(matches!(first[0], Expiry::Rerequest { attempt: 2, .. }));

        let second = tracker.check_timeouts(start + Duration::from_secs(20), any_peer);
        assert!(matches!(second[0], Expiry::Failed { attempts: 2, .. }));
    }

    #[test]
    fn test_chunks_use_longer_timeout() {
        let mut tracker = tracker();
        let start = Instant::now();
        let chunk = ArtifactId::Subtree(SubtreeId([1; 32]));
        tracker.set_requested(chunk.clone(), peer(1), start);

        assert!(tracker.check_timeouts(start + Duration::from_secs(39), any_peer).is_empty());
        assert_eq!(tracker.check_timeouts(start + Duration::from_secs(40), any_peer).len(), 1);
    }

    #[test]
    fn test_oldest_requested_is_fifo() {
        let mut tracker = tracker();
        let start = Instant::now();
        let first = ArtifactId::Subtree(SubtreeId([9; 32]));
        let second = ArtifactId::Subtree(SubtreeId([1; 32]));
        tracker.set_requested(first.clone(), peer(1), start);
        tracker.set_requested(second.clone(), peer(1), start);
        tracker.set_requested(modifier(1), peer(1), start);

        assert_eq!(tracker.oldest_requested(&peer(1), ArtifactKind::Subtree), Some(first.clone()));
        tracker.on_received(&first, &peer(1), 1, start);
        assert_eq!(tracker.oldest_requested(&peer(1), ArtifactKind::Subtree), Some(second));
        assert_eq!(tracker.oldest_requested(&peer(2), ArtifactKind::Subtree), None);
    }

    #[test]
    fn test_peer_disconnected_drops_records() {
        let mut tracker = tracker();
        let now = Instant::now();
        tracker.set_requested(modifier(1), peer(1), now);
        tracker.set_requested(modifier(2), peer(2), now);
        tracker.add_source(&modifier(2), peer(1));

        assert_eq!(tracker.peer_disconnected(&peer(1)), vec![modifier(1)]);
        assert_eq!(tracker.len(), 1);
        assert!(tracker.record(&modifier(2)).unwrap().sources.is_empty());
        assert!(tracker.peer_disconnected(&peer(9)).is_empty());
    }
}
