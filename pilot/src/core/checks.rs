//! Classification of CI check results for a pull request head.

use serde::{Deserialize, Serialize};

/// Run state of a single check as reported by the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckRunState {
    Queued,
    InProgress,
    Pending,
    Completed,
}

/// Terminal conclusion of a completed check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckConclusion {
    Success,
    Failure,
    Cancelled,
    TimedOut,
    Neutral,
    Skipped,
}

/// One independent CI check reported against a PR's head commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub state: CheckRunState,
    /// Only meaningful once `state` is `Completed`.
    pub conclusion: Option<CheckConclusion>,
    pub details_url: Option<String>,
}

impl CheckResult {
    fn is_pending(&self) -> bool {
        self.state != CheckRunState::Completed
    }

    fn is_failed(&self) -> bool {
        // A completed check without a conclusion cannot be trusted as a pass.
        !matches!(
            self.conclusion,
            Some(CheckConclusion::Success | CheckConclusion::Neutral | CheckConclusion::Skipped)
        )
    }
}

/// A failed check with its detail link, used to build remediation prompts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckFailure {
    pub name: String,
    pub url: Option<String>,
}

/// Aggregate status derived from a set of individual check results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    /// No checks are configured; treated as vacuously passing.
    NoChecks,
    Pending,
    Passed,
    Failed,
}

/// Classify a set of check results.
///
/// Pending must be evaluated before failure so a currently re-running check
/// is not mistaken for a terminal failure.
pub fn classify(checks: &[CheckResult]) -> CheckStatus {
    if checks.is_empty() {
        return CheckStatus::NoChecks;
    }
    if checks.iter().any(CheckResult::is_pending) {
        return CheckStatus::Pending;
    }
    if checks.iter().any(CheckResult::is_failed) {
        return CheckStatus::Failed;
    }
    CheckStatus::Passed
}

/// Extract the failed checks (name + detail link) from a result set.
///
/// Pending checks are excluded: only terminal failures are actionable.
pub fn failures(checks: &[CheckResult]) -> Vec<CheckFailure> {
    checks
        .iter()
        .filter(|check| !check.is_pending() && check.is_failed())
        .map(|check| CheckFailure {
            name: check.name.clone(),
            url: check.details_url.clone(),
        })
        .collect()
}
