//! Terminal status vocabulary for one iteration of the loop.

use serde::{Deserialize, Serialize};

/// Terminal outcome tag persisted after each iteration.
///
/// The serialized names are a stable on-disk contract consumed by the
/// read-only status reporter; do not rename them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationStatus {
    /// The coding agent failed, timed out, or produced no commits.
    ClaudeFailed,
    /// No pull request could be created or located for the work branch.
    PrFailed,
    /// CI failed and remediation retries were exhausted.
    CiFailed,
    /// A mergeable (or merged) pull request was produced.
    Completed,
    /// Merge blocked awaiting approval; neither a success nor a failure.
    PendingMerge,
}

impl IterationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            IterationStatus::ClaudeFailed => "claude_failed",
            IterationStatus::PrFailed => "pr_failed",
            IterationStatus::CiFailed => "ci_failed",
            IterationStatus::Completed => "completed",
            IterationStatus::PendingMerge => "pending_merge",
        }
    }

    /// True for outcomes counted against the session failure tally.
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            IterationStatus::ClaudeFailed | IterationStatus::PrFailed | IterationStatus::CiFailed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialized_tags_are_stable() {
        for (status, tag) in [
            (IterationStatus::ClaudeFailed, "claude_failed"),
            (IterationStatus::PrFailed, "pr_failed"),
            (IterationStatus::CiFailed, "ci_failed"),
            (IterationStatus::Completed, "completed"),
            (IterationStatus::PendingMerge, "pending_merge"),
        ] {
            let value = serde_json::to_value(status).expect("serialize");
            assert_eq!(value, serde_json::Value::String(tag.to_string()));
            assert_eq!(status.as_str(), tag);
        }
    }

    #[test]
    fn pending_merge_is_not_a_failure() {
        assert!(!IterationStatus::PendingMerge.is_failure());
        assert!(!IterationStatus::Completed.is_failure());
        assert!(IterationStatus::CiFailed.is_failure());
    }
}
