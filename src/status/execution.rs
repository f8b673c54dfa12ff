//! Execution status reported by child regions for a work topic.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Per-region execution status of a push job.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionStatus {
    NotCreated,
    New,
    Started,
    Progress,
    StartOfIncrementalPushReceived,
    EndOfPushReceived,
    EndOfIncrementalPushReceived,
    Completed,
    Error,
    Warning,
    Archived,
    /// The region could not be queried; treated as a vote, not a failure.
    Unknown,
}

/// Reduction order for multi-region aggregation, most urgent (least resolved)
/// first. Sorting all reported statuses by this list and taking the head keeps
/// the aggregate non-terminal while any single region is still mid-push.
///
/// Edge case kept on purpose: if one region is stuck in `NotCreated` while
/// another moves from `Progress` to `Completed`, the aggregate regresses from
/// `Progress` back to `NotCreated`. Downstream pollers rely on the aggregate
/// staying non-terminal in that situation.
pub const STATUS_PRIORITY_ORDER: [ExecutionStatus; 12] = [
    ExecutionStatus::Progress,
    ExecutionStatus::Started,
    ExecutionStatus::StartOfIncrementalPushReceived,
    ExecutionStatus::Unknown,
    ExecutionStatus::New,
    ExecutionStatus::NotCreated,
    ExecutionStatus::EndOfPushReceived,
    ExecutionStatus::Error,
    ExecutionStatus::Warning,
    ExecutionStatus::Completed,
    ExecutionStatus::EndOfIncrementalPushReceived,
    ExecutionStatus::Archived,
];

impl ExecutionStatus {
    /// Terminal statuses need no further polling.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed
                | ExecutionStatus::Error
                | ExecutionStatus::Warning
                | ExecutionStatus::Archived
                | ExecutionStatus::EndOfIncrementalPushReceived
        )
    }

    /// Index into the fixed reduction order; lower is more urgent.
    pub fn priority(&self) -> usize {
        STATUS_PRIORITY_ORDER
            .iter()
            .position(|s| s == self)
            .unwrap_or(STATUS_PRIORITY_ORDER.len())
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutionStatus::NotCreated => "NOT_CREATED",
            ExecutionStatus::New => "NEW",
            ExecutionStatus::Started => "STARTED",
            ExecutionStatus::Progress => "PROGRESS",
            ExecutionStatus::StartOfIncrementalPushReceived => "START_OF_INCREMENTAL_PUSH_RECEIVED",
            ExecutionStatus::EndOfPushReceived => "END_OF_PUSH_RECEIVED",
            ExecutionStatus::EndOfIncrementalPushReceived => "END_OF_INCREMENTAL_PUSH_RECEIVED",
            ExecutionStatus::Completed => "COMPLETED",
            ExecutionStatus::Error => "ERROR",
            ExecutionStatus::Warning => "WARNING",
            ExecutionStatus::Archived => "ARCHIVED",
            ExecutionStatus::Unknown => "UNKNOWN",
        };
        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminality() {
        assert!(ExecutionStatus::Completed.is_terminal());
        assert!(ExecutionStatus::Error.is_terminal());
        assert!(ExecutionStatus::Archived.is_terminal());
        assert!(ExecutionStatus::EndOfIncrementalPushReceived.is_terminal());
        assert!(!ExecutionStatus::Progress.is_terminal());
        assert!(!ExecutionStatus::Unknown.is_terminal());
        assert!(!ExecutionStatus::EndOfPushReceived.is_terminal());
    }

    #[test]
    fn test_priority_order_is_total() {
        // Every status has a slot in the reduction order.
        for status in [
            ExecutionStatus::NotCreated,
            ExecutionStatus::New,
            ExecutionStatus::Started,
            ExecutionStatus::Progress,
            ExecutionStatus::StartOfIncrementalPushReceived,
            ExecutionStatus::EndOfPushReceived,
            ExecutionStatus::EndOfIncrementalPushReceived,
            ExecutionStatus::Completed,
            ExecutionStatus::Error,
            ExecutionStatus::Warning,
            ExecutionStatus::Archived,
            ExecutionStatus::Unknown,
        ] {
            assert!(status.priority() < STATUS_PRIORITY_ORDER.len());
        }
        assert!(ExecutionStatus::Progress.priority() < ExecutionStatus::Completed.priority());
        assert!(ExecutionStatus::Unknown.priority() < ExecutionStatus::Error.priority());
    }
}
