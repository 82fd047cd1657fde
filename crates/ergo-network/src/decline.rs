//! Table of modifiers found invalid.
//!
//! Once the validator rejects a modifier its id is recorded here. It is never
//! requested again, and a peer that still delivers it is penalized.

use crate::types::ModifierId;
use dashmap::DashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct DeclineEntry {
    added_at: Instant,
    reason: String,
}

/// Declined modifier ids with expiry.
#[derive(Debug)]
pub struct DeclineTable {
    entries: DashMap<ModifierId, DeclineEntry>,
    ttl: Duration,
    max_size: usize,
}

impl DeclineTable {
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            max_size,
        }
    }

    /// 10,000 entries, 10 minute TTL.
    pub fn with_defaults() -> Self {
        Self::new(10_000, Duration::from_secs(600))
    }

    /// Record `id` as invalid.
    pub fn decline(&self, id: ModifierId, reason: impl Into<String>, now: Instant) {
        if self.entries.len() >= self.max_size {
            self.cleanup(now);
        }
        if self.entries.len() >= self.max_size {
            // Still full: evict the oldest entry.
            let oldest = self
                .entries
                .iter()
                .min_by_key(|e| e.value().added_at)
                .map(|e| *e.key());
            if let Some(oldest) = oldest {
                self.entries.remove(&oldest);
            }
        }
        self.entries.insert(
            id,
            DeclineEntry {
                added_at: now,
                reason: reason.into(),
            },
        );
    }

    /// Reason `id` was declined, if it still is.
    pub fn is_declined(&self, id: &ModifierId, now: Instant) -> Option<String> {
        self.entries
            .get(id)
            .filter(|entry| now.saturating_duration_since(entry.added_at) < self.ttl)
            .map(|entry| entry.reason.clone())
    }

    pub fn contains(&self, id: &ModifierId, now: Instant) -> bool {
        self.is_declined(id, now).is_some()
    }

    /// Remove expired entries.
    pub fn cleanup(&self, now: Instant) {
        let ttl = self.ttl;
        self.entries
            .retain(|_, entry| now.saturating_duration_since(entry.added_at) < ttl);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn remove(&self, id: &ModifierId) {
        self.entries.remove(id);
    }
}

impl Default for DeclineTable {
    fn default() -> Self {
        Self::with_defaults()
    }
}
