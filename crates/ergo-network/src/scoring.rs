//! Peer scoring with decay, response time tracking, and delivery metrics.
//!
//! All time-dependent methods take the current instant so the synchronizer
//! can drive scores from its own clock.

use crate::penalties::{Penalties, PenaltyReason, Rewards};
use std::time::{Duration, Instant};

/// Peer score with decay and detailed tracking.
#[derive(Debug, Clone)]
pub struct PeerScore {
    /// Accumulated penalty points (0 to MAX_PENALTY).
    penalty: u32,
    /// Last time penalty was updated (for decay calculation).
    last_penalty_time: Instant,
    /// Average response time in milliseconds (exponential moving average).
    avg_response_time_ms: u64,
    response_count: u64,
    delivered_count: u64,
    /// Requests that expired without an answer.
    failed_count: u64,
    reward_score: i32,
    last_success: Instant,
}

impl PeerScore {
    pub fn new(now: Instant) -> Self {
        Self {
            penalty: 0,
            last_penalty_time: now,
            avg_response_time_ms: 0,
            response_count: 0,
            delivered_count: 0,
            failed_count: 0,
            reward_score: 0,
            last_success: now,
        }
    }

    /// Current penalty after decay.
    pub fn current_penalty(&self, now: Instant) -> u32 {
        let minutes = now.saturating_duration_since(self.last_penalty_time).as_secs() / 60;
        let decay = (minutes as u32).saturating_mul(Penalties::DECAY_PER_MINUTE);
        self.penalty.saturating_sub(decay)
    }

    /// Apply a penalty.
    ///
    /// Returns `true` if the peer should now be banned.
    pub fn apply_penalty(&mut self, reason: PenaltyReason, now: Instant) -> bool {
        self.apply_penalty_amount(reason.penalty(), now)
    }

    pub fn apply_penalty_amount(&mut self, amount: u32, now: Instant) -> bool {
        let current = self.current_penalty(now);
        self.penalty = current.saturating_add(amount).min(Penalties::MAX_PENALTY);
        self.last_penalty_time = now;
        self.should_ban(now)
    }

    pub fn apply_reward(&mut self, amount: i32, now: Instant) {
        self.reward_score = (self.reward_score + amount).min(Rewards::MAX_SCORE);
        self.last_success = now;
    }

    pub fn record_delivery(&mut self, now: Instant) {
        self.delivered_count += 1;
        self.apply_reward(Rewards::SUCCESSFUL_DELIVERY, now);
    }

    pub fn record_failure(&mut self) {
        self.failed_count += 1;
    }

    /// Record a response time (EMA with alpha = 1/8).
    pub fn record_response_time(&mut self, duration: Duration, now: Instant) {
        let new_time = duration.as_millis() as u64;
        if self.response_count == 0 {
            self.avg_response_time_ms = new_time;
        } else {
            self.avg_response_time_ms = (self.avg_response_time_ms * 7 + new_time) / 8;
        }
        self.response_count += 1;

        if new_time < Rewards::FAST_RESPONSE_MS {
            self.apply_reward(Rewards::FAST_RESPONSE, now);
        }
    }

    pub fn should_ban(&self, now: Instant) -> bool {
        self.current_penalty(now) >= Penalties::BAN_THRESHOLD
    }

    /// Peer priority for picking a source, between 0.0 and 1.0.
    ///
    /// Weighs delivery reliability, response time, penalty and rewards.
    pub fn priority(&self, now: Instant) -> f64 {
        // 0ms -> 1.0, 1000ms -> 0.5, 10000ms -> 0.1
        let response_factor = if self.avg_response_time_ms == 0 {
            0.5
        } else {
            1.0 / (1.0 + (self.avg_response_time_ms as f64 / 1000.0))
        };

        let total_requests = self.delivered_count + self.failed_count;
        let reliability_factor = if total_requests == 0 {
            0.5
        } else {
            self.delivered_count as f64 / total_requests as f64
        };

        let penalty_factor =
            1.0 - (self.current_penalty(now) as f64 / Penalties::MAX_PENALTY as f64);

        let reward_factor = if self.reward_score <= 0 {
            0.5
        } else {
            0.5 + (self.reward_score as f64 / Rewards::MAX_SCORE as f64) * 0.5
        };

        (reliability_factor * 0.35
            + response_factor * 0.30
            + penalty_factor * 0.20
            + reward_factor * 0.15)
            .clamp(0.0, 1.0)
    }

    pub fn avg_response_time(&self) -> u64 {
        self.avg_response_time_ms
    }

    pub fn delivered_count(&self) -> u64 {
        self.delivered_count
    }

    pub fn failed_count(&self) -> u64 {
        self.failed_count
    }

    /// Delivery success rate (0.0 to 1.0).
    pub fn delivery_rate(&self) -> f64 {
        let total = self.delivered_count + self.failed_count;
        if total == 0 {
            0.0
        } else {
            self.delivered_count as f64 / total as f64
        }
    }

    pub fn reward_score(&self) -> i32 {
        self.reward_score
    }

    pub fn time_since_success(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_score() {
        let now = Instant::now();
        let score = PeerScore::new(now);
        assert_eq!(score.current_penalty(now), 0);
        assert!(!score.should_ban(now));
        assert_eq!(score.delivered_count(), 0);
    }

    #[test]
    fn test_penalties_accumulate_to_ban() {
        let now = Instant::now();
        let mut score = PeerScore::new(now);
        assert!(!score.apply_penalty(PenaltyReason::SpamDetected, now));
        assert!(!score.apply_penalty(PenaltyReason::SpamDetected, now));
        assert!(!score.apply_penalty(PenaltyReason::SpamDetected, now));
        assert!(score.apply_penalty(PenaltyReason::SpamDetected, now));
    }

    #[test]
    fn test_penalty_decay() {
        let start = Instant::now();
        let mut score = PeerScore::new(start);
        score.apply_penalty_amount(100, start);

        let later = start + Duration::from_secs(60 * 5);
        assert_eq!(score.current_penalty(later), 50);
        assert_eq!(score.current_penalty(start + Duration::from_secs(60 * 15)), 0);
    }

    #[test]
    fn test_response_time_ema() {
        let now = Instant::now();
        let mut score = PeerScore::new(now);
        score.record_response_time(Duration::from_millis(100), now);
        assert_eq!(score.avg_response_time(), 100);
        score.record_response_time(Duration::from_millis(500), now);
        assert_eq!(score.avg_response_time(), 150);
    }

    #[test]
    fn test_delivery_rate() {
        let now = Instant::now();
        let mut score = PeerScore::new(now);
        score.record_delivery(now);
        score.record_delivery(now);
        score.record_failure();
        assert!((score.delivery_rate() - 0.666).abs() < 0.01);
    }

    #[test]
    fn test_priority_prefers_good_peer() {
        let now = Instant::now();
        let mut good = PeerScore::new(now);
        good.record_response_time(Duration::from_millis(50), now);
        for _ in 0..10 {
            good.record_delivery(now);
        }

        let mut bad = PeerScore::new(now);
        bad.record_response_time(Duration::from_millis(5000), now);
        for _ in 0..10 {
            bad.record_failure();
        }
        bad.apply_penalty_amount(200, now);

        assert!(good.priority(now) > bad.priority(now));
    }

    #[test]
    fn test_rewards_capped() {
        let now = Instant::now();
        let mut score = PeerScore::new(now);
        score.apply_reward(10, now);
        assert_eq!(score.reward_score(), 10);
        score.apply_reward(200, now);
        assert_eq!(score.reward_score(), Rewards::MAX_SCORE);
    }
}
