//! Per-user violation counter and penalty escalation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::analyzer::ViolationType;

/// Escalating restriction on a user's chat privileges
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum PenaltyLevel {
    None,
    Warning,
    Restricted,
    Suspended,
}

impl PenaltyLevel {
    /// Fixed escalation table: 0 none, 1-2 warning, 3-4 restricted, 5+ suspended
    pub fn for_count(count: i64) -> Self {
        match count {
            i64::MIN..=0 => PenaltyLevel::None,
            1..=2 => PenaltyLevel::Warning,
            3..=4 => PenaltyLevel::Restricted,
            _ => PenaltyLevel::Suspended,
        }
    }

    pub fn can_send(&self) -> bool {
        !matches!(self, PenaltyLevel::Suspended)
    }

    /// Message shown to the sender next to the composer
    pub fn notice(&self) -> Option<&'static str> {
        match self {
            PenaltyLevel::None => None,
            PenaltyLevel::Warning => Some(
                "Sharing contact details before payment is not allowed. Repeated attempts restrict your account.",
            ),
            PenaltyLevel::Restricted => Some(
                "Your messages are under stricter review after repeated policy violations.",
            ),
            PenaltyLevel::Suspended => Some(
                "Messaging is suspended for your account. Contact support to review the suspension.",
            ),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ViolationRecord {
    pub conversation_id: String,
    pub violation_type: ViolationType,
    pub snippet: String,
    pub occurred_at: DateTime<Utc>,
}

/// Input for a newly detected violation
#[derive(Debug, Clone)]
pub struct NewViolation {
    pub conversation_id: String,
    pub violation_type: ViolationType,
    pub snippet: String,
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct UserViolationData {
    pub user_id: Uuid,
    pub violation_count: i64,
    pub violations: Vec<ViolationRecord>,
    pub last_violation_at: Option<DateTime<Utc>>,
    pub penalty_level: PenaltyLevel,
}

impl UserViolationData {
    pub fn empty(user_id: Uuid) -> Self {
        Self {
            user_id,
            violation_count: 0,
            violations: Vec::new(),
            last_violation_at: None,
            penalty_level: PenaltyLevel::None,
        }
    }

    /// Rebuild from persisted columns; the penalty is always derived, never stored
    pub fn from_parts(
        user_id: Uuid,
        violation_count: i64,
        violations: Vec<ViolationRecord>,
        last_violation_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            user_id,
            violation_count,
            violations,
            last_violation_at,
            penalty_level: PenaltyLevel::for_count(violation_count),
        }
    }

    /// Append a record; the count only grows
    pub fn record(&mut self, record: ViolationRecord) {
        self.violation_count += 1;
        self.last_violation_at = Some(record.occurred_at);
        self.violations.push(record);
        self.penalty_level = PenaltyLevel::for_count(self.violation_count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_penalty_table() {
        assert_eq!(PenaltyLevel::for_count(0), PenaltyLevel::None);
        assert_eq!(PenaltyLevel::for_count(1), PenaltyLevel::Warning);
        assert_eq!(PenaltyLevel::for_count(2), PenaltyLevel::Warning);
        assert_eq!(PenaltyLevel::for_count(3), PenaltyLevel::Restricted);
        assert_eq!(PenaltyLevel::for_count(4), PenaltyLevel::Restricted);
        assert_eq!(PenaltyLevel::for_count(5), PenaltyLevel::Suspended);
        assert_eq!(PenaltyLevel::for_count(50), PenaltyLevel::Suspended);
    }

    #[test]
    fn test_penalty_is_monotonic_in_count() {
        let mut previous = PenaltyLevel::for_count(0);
        for count in 1..20 {
            let level = PenaltyLevel::for_count(count);
            assert!(level >= previous);
            previous = level;
        }
    }

    #[test]
    fn test_only_suspended_blocks_sending() {
        assert!(PenaltyLevel::None.can_send());
        assert!(PenaltyLevel::Warning.can_send());
        assert!(PenaltyLevel::Restricted.can_send());
        assert!(!PenaltyLevel::Suspended.can_send());
    }

    #[test]
    fn test_record_escalates() {
        let mut data = UserViolationData::empty(Uuid::new_v4());
        for i in 0..5 {
            data.record(ViolationRecord {
                conversation_id: format!("conv-{}", i % 3),
                violation_type: ViolationType::PhoneNumber,
                snippet: "call me".to_string(),
                occurred_at: Utc::now(),
            });
        }
        assert_eq!(data.violation_count, 5);
        assert_eq!(data.violations.len(), 5);
        assert_eq!(data.penalty_level, PenaltyLevel::Suspended);
        assert!(data.last_violation_at.is_some());
    }
}
