//! Peer identity and per-peer scoring book.

use crate::penalties::PenaltyReason;
use crate::scoring::PeerScore;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Unique peer identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub Vec<u8>);

impl PeerId {
    /// Create from bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Create from socket address.
    pub fn from_addr(addr: &SocketAddr) -> Self {
        Self(addr.to_string().into_bytes())
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

/// Scores of the peers a node is currently exchanging data with.
#[derive(Debug, Default)]
pub struct PeerBook {
    peers: DashMap<PeerId, PeerScore>,
}

impl PeerBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a peer. Existing scores are kept.
    pub fn connect(&self, id: PeerId, now: Instant) {
        self.peers.entry(id).or_insert_with(|| PeerScore::new(now));
    }

    /// Stop tracking a peer.
    pub fn disconnect(&self, id: &PeerId) -> Option<PeerScore> {
        self.peers.remove(id).map(|(_, score)| score)
    }

    pub fn contains(&self, id: &PeerId) -> bool {
        self.peers.contains_key(id)
    }

    pub fn score(&self, id: &PeerId) -> Option<PeerScore> {
        self.peers.get(id).map(|s| s.clone())
    }

    /// Apply a penalty.
    ///
    /// Returns `true` if the peer crossed the ban threshold.
    pub fn penalize(&self, id: &PeerId, reason: PenaltyReason, now: Instant) -> bool {
        let Some(mut score) = self.peers.get_mut(id) else {
            return false;
        };
        let should_ban = score.apply_penalty(reason, now);
        if should_ban {
            warn!(
                peer = %id,
                reason = %reason,
                penalty = score.current_penalty(now),
                "Peer crossed ban threshold"
            );
        } else {
            debug!(
                peer = %id,
                reason = %reason,
                penalty = score.current_penalty(now),
                "Penalized peer"
            );
        }
        should_ban
    }

    /// Record a timely delivery and its round-trip time.
    pub fn record_delivery(&self, id: &PeerId, elapsed: Duration, now: Instant) {
        if let Some(mut score) = self.peers.get_mut(id) {
            score.record_delivery(now);
            score.record_response_time(elapsed, now);
        }
    }

    /// Record a request that expired without an answer.
    pub fn record_failure(&self, id: &PeerId) {
        if let Some(mut score) = self.peers.get_mut(id) {
            score.record_failure();
        }
    }

    /// Priority of a connected peer, `None` if unknown.
    pub fn priority(&self, id: &PeerId, now: Instant) -> Option<f64> {
        self.peers.get(id).map(|s| s.priority(now))
    }

    /// Connected peers ordered by priority, best first, banned peers excluded.
    pub fn ranked(&self, now: Instant) -> Vec<PeerId> {
        let mut peers: Vec<(PeerId, f64)> = self
            .peers
            .iter()
            .filter(|entry| !entry.value().should_ban(now))
            .map(|entry| (entry.key().clone(), entry.value().priority(now)))
            .collect();
        peers.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        peers.into_iter().map(|(id, _)| id).collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
