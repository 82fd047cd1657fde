//! Penalty definitions for peer misbehavior.
//!
//! Penalties accumulate per peer and decay over time. A peer whose total
//! reaches the ban threshold is reported to the penalization sink for
//! disconnection. Slow or missing answers are never penalized: the
//! delivery tracker re-requests instead.

use crate::NetworkError;

/// Penalty amounts.
pub struct Penalties;

impl Penalties {
    // ========== Minor (1-10 points) ==========

    /// Frame failed its checksum.
    pub const INVALID_CHECKSUM: u32 = 5;

    // ========== Moderate (20-50 points) ==========

    /// Payload failed codec bounds checks.
    pub const INVALID_MESSAGE_FORMAT: u32 = 20;

    /// More items than the configured limit.
    pub const TOO_MANY_ITEMS: u32 = 30;

    /// Resent a modifier previously declined as invalid.
    pub const DECLINED_MODIFIER: u32 = 40;

    /// Modifier reported invalid by the validator.
    pub const INVALID_MODIFIER: u32 = 50;

    // ========== Severe (80-150 points) ==========

    /// Payload above the codec ceiling.
    pub const SIZE_LIMIT_EXCEEDED: u32 = 100;

    /// Unsolicited data beyond the tolerated window.
    pub const SPAM_DETECTED: u32 = 150;

    // ========== Critical (instant ban) ==========

    /// Wrong network magic.
    pub const PROTOCOL_VIOLATION: u32 = 500;

    // ========== Thresholds and decay ==========

    pub const BAN_THRESHOLD: u32 = 500;

    pub const DECAY_PER_MINUTE: u32 = 10;

    /// Penalties saturate at this value.
    pub const MAX_PENALTY: u32 = 1000;
}

/// Reward amounts for good behavior.
pub struct Rewards;

impl Rewards {
    /// Delivered a requested artifact.
    pub const SUCCESSFUL_DELIVERY: i32 = 1;

    /// Answered within `FAST_RESPONSE_MS`.
    pub const FAST_RESPONSE: i32 = 1;

    pub const FAST_RESPONSE_MS: u64 = 500;

    /// Cap for accumulated rewards.
    pub const MAX_SCORE: i32 = 100;
}

/// Reason a peer is penalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PenaltyReason {
    InvalidChecksum,
    InvalidMessageFormat,
    TooManyItems,
    DeclinedModifier,
    InvalidModifier,
    SizeLimitExceeded,
    SpamDetected,
    ProtocolViolation,
}

impl PenaltyReason {
    pub fn penalty(&self) -> u32 {
        match self {
            Self::InvalidChecksum => Penalties::INVALID_CHECKSUM,
            Self::InvalidMessageFormat => Penalties::INVALID_MESSAGE_FORMAT,
            Self::TooManyItems => Penalties::TOO_MANY_ITEMS,
            Self::DeclinedModifier => Penalties::DECLINED_MODIFIER,
            Self::InvalidModifier => Penalties::INVALID_MODIFIER,
            Self::SizeLimitExceeded => Penalties::SIZE_LIMIT_EXCEEDED,
            Self::SpamDetected => Penalties::SPAM_DETECTED,
            Self::ProtocolViolation => Penalties::PROTOCOL_VIOLATION,
        }
    }

    /// Whether a single occurrence is enough for a ban.
    pub fn is_critical(&self) -> bool {
        self.penalty() >= Penalties::BAN_THRESHOLD
    }

    /// Penalty for a decode error, `None` for errors that are not the
    /// peer's fault (unknown codes, local I/O).
    pub fn for_error(err: &NetworkError) -> Option<Self> {
        match err {
            NetworkError::MalformedMessage { .. } => Some(Self::InvalidMessageFormat),
            NetworkError::MessageTooLarge { .. } => Some(Self::SizeLimitExceeded),
            NetworkError::TooManyItems { .. } => Some(Self::TooManyItems),
            NetworkError::ChecksumMismatch(_) => Some(Self::InvalidChecksum),
            NetworkError::MagicMismatch { .. } => Some(Self::ProtocolViolation),
            _ => None,
        }
    }
}

impl std::fmt::Display for PenaltyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidChecksum => write!(f, "invalid checksum"),
            Self::InvalidMessageFormat => write!(f, "invalid message format"),
            Self::TooManyItems => write!(f, "too many items"),
            Self::DeclinedModifier => write!(f, "declined modifier resent"),
            Self::InvalidModifier => write!(f, "invalid modifier"),
            Self::SizeLimitExceeded => write!(f, "size limit exceeded"),
            Self::SpamDetected => write!(f, "spam detected"),
            Self::ProtocolViolation => write!(f, "protocol violation"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_penalty_ordering() {
        assert!(Penalties::INVALID_CHECKSUM < Penalties::INVALID_MESSAGE_FORMAT);
        assert!(Penalties::INVALID_MODIFIER <= 50);
        assert!(Penalties::SPAM_DETECTED >= 100);
        assert!(Penalties::SPAM_DETECTED < Penalties::BAN_THRESHOLD);
        assert!(Penalties::PROTOCOL_VIOLATION >= Penalties::BAN_THRESHOLD);
    }

    #[test]
    fn test_critical() {
        assert!(PenaltyReason::ProtocolViolation.is_critical());
        assert!(!PenaltyReason::SpamDetected.is_critical());
    }

    #[test]
    fn test_penalty_for_error() {
        let malformed = NetworkError::malformed("Inv", "empty");
        assert_eq!(
            PenaltyReason::for_error(&malformed),
            Some(PenaltyReason::InvalidMessageFormat)
        );
        let large = NetworkError::MessageTooLarge { size: 10, max: 5 };
        assert_eq!(
            PenaltyReason::for_error(&large),
            Some(PenaltyReason::SizeLimitExceeded)
        );
        assert_eq!(PenaltyReason::for_error(&NetworkError::UnknownCode(200)), None);
    }

    #[test]
    fn test_decay_allows_recovery() {
        let minutes = Penalties::BAN_THRESHOLD / Penalties::DECAY_PER_MINUTE;
        let decayed =
            Penalties::BAN_THRESHOLD.saturating_sub(minutes * Penalties::DECAY_PER_MINUTE);
        assert_eq!(decayed, 0);
    }
}
