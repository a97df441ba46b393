//! Transfer status state machines
//!
//! Status IDs are stored in PostgreSQL as SMALLINT. Negative IDs are failure
//! states, terminal success is 40, matching the convention used across the
//! ledger tables.

use std::fmt;

/// Internal transfer lifecycle
///
/// The synchronous path creates rows directly in COMPLETED; PENDING exists for
/// deferred flows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum InternalStatus {
    Pending = 0,
    Completed = 40,
    Failed = -10,
}

impl InternalStatus {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(InternalStatus::Pending),
            40 => Some(InternalStatus::Completed),
            -10 => Some(InternalStatus::Failed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InternalStatus::Pending => "PENDING",
            InternalStatus::Completed => "COMPLETED",
            InternalStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for InternalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Kind of internal value movement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i16)]
pub enum InternalKind {
    /// Ordinary user-to-user transfer
    Internal = 1,
    /// Referral reward grant
    ReferralReward = 2,
    /// Administrative grant
    AdminGrant = 3,
}

impl InternalKind {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(InternalKind::Internal),
            2 => Some(InternalKind::ReferralReward),
            3 => Some(InternalKind::AdminGrant),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InternalKind::Internal => "INTERNAL",
            InternalKind::ReferralReward => "REFERRAL_REWARD",
            InternalKind::AdminGrant => "ADMIN_GRANT",
        }
    }
}

impl fmt::Display for InternalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// External transfer (withdrawal) lifecycle
///
/// Driven by the settlement worker calling back into the repository:
/// PENDING -> (PROCESSING) -> SUBMITTED -> CONFIRMED -> COMPLETED.
/// FAILED and CANCELLED are reachable from any non-terminal state and both
/// refund the locked funds; terminal states are never reversible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum ExternalStatus {
    /// Created, funds locked, awaiting the settlement worker
    Pending = 0,
    /// Claimed by a settlement worker
    Processing = 10,
    /// Broadcast on chain, tx hash recorded
    Submitted = 20,
    /// Sufficient confirmations observed
    Confirmed = 30,
    /// Terminal: lock dropped, funds left the system
    Completed = 40,
    /// Terminal: locked funds refunded
    Failed = -10,
    /// Terminal: locked funds refunded
    Cancelled = -20,
}

impl ExternalStatus {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(ExternalStatus::Pending),
            10 => Some(ExternalStatus::Processing),
            20 => Some(ExternalStatus::Submitted),
            30 => Some(ExternalStatus::Confirmed),
            40 => Some(ExternalStatus::Completed),
            -10 => Some(ExternalStatus::Failed),
            -20 => Some(ExternalStatus::Cancelled),
            _ => None,
        }
    }

    /// Check if this is a terminal state (no more transitions possible)
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExternalStatus::Completed | ExternalStatus::Failed | ExternalStatus::Cancelled
        )
    }

    /// Whether the state machine permits `self -> next`
    pub fn can_transition(&self, next: ExternalStatus) -> bool {
        use ExternalStatus::*;
        match (*self, next) {
            // Failure paths from any non-terminal state
            (from, Failed) | (from, Cancelled) => !from.is_terminal(),
            (Pending, Processing) => true,
            (Pending, Submitted) | (Processing, Submitted) => true,
            (Submitted, Confirmed) => true,
            (Confirmed, Completed) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExternalStatus::Pending => "PENDING",
            ExternalStatus::Processing => "PROCESSING",
            ExternalStatus::Submitted => "SUBMITTED",
            ExternalStatus::Confirmed => "CONFIRMED",
            ExternalStatus::Completed => "COMPLETED",
            ExternalStatus::Failed => "FAILED",
            ExternalStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for ExternalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_EXTERNAL: [ExternalStatus; 7] = [
        ExternalStatus::Pending,
        ExternalStatus::Processing,
        ExternalStatus::Submitted,
        ExternalStatus::Confirmed,
        ExternalStatus::Completed,
        ExternalStatus::Failed,
        ExternalStatus::Cancelled,
    ];

    #[test]
    fn test_terminal_states() {
        assert!(ExternalStatus::Completed.is_terminal());
        assert!(ExternalStatus::Failed.is_terminal());
        assert!(ExternalStatus::Cancelled.is_terminal());

        assert!(!ExternalStatus::Pending.is_terminal());
        assert!(!ExternalStatus::Processing.is_terminal());
        assert!(!ExternalStatus::Submitted.is_terminal());
        assert!(!ExternalStatus::Confirmed.is_terminal());
    }

    #[test]
    fn test_confirmed_only_via_submitted() {
        for from in ALL_EXTERNAL {
            let allowed = from.can_transition(ExternalStatus::Confirmed);
            assert_eq!(allowed, from == ExternalStatus::Submitted, "{from:?}");
        }
    }

    #[test]
    fn test_failure_reachable_from_any_non_terminal() {
        for from in ALL_EXTERNAL {
            assert_eq!(
                from.can_transition(ExternalStatus::Failed),
                !from.is_terminal(),
                "{from:?} -> FAILED"
            );
            assert_eq!(
                from.can_transition(ExternalStatus::Cancelled),
                !from.is_terminal(),
                "{from:?} -> CANCELLED"
            );
        }
    }

    #[test]
    fn test_terminal_states_are_never_reversible() {
        for from in ALL_EXTERNAL.iter().filter(|s| s.is_terminal()) {
            for to in ALL_EXTERNAL {
                assert!(!from.can_transition(to), "{from:?} -> {to:?}");
            }
        }
    }

    #[test]
    fn test_state_id_roundtrip() {
        for state in ALL_EXTERNAL {
            assert_eq!(ExternalStatus::from_id(state.id()), Some(state));
        }
        for status in [
            InternalStatus::Pending,
            InternalStatus::Completed,
            InternalStatus::Failed,
        ] {
            assert_eq!(InternalStatus::from_id(status.id()), Some(status));
        }
        assert!(ExternalStatus::from_id(999).is_none());
        assert!(InternalStatus::from_id(-999).is_none());
    }

    #[test]
    fn test_display() {
        assert_eq!(ExternalStatus::Pending.to_string(), "PENDING");
        assert_eq!(ExternalStatus::Cancelled.to_string(), "CANCELLED");
        assert_eq!(InternalKind::ReferralReward.to_string(), "REFERRAL_REWARD");
    }
}
