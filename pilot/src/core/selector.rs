//! Issue selection: label filtering and oldest-first ordering.

use crate::core::types::Issue;

/// Pick the next issue to work on.
///
/// An issue qualifies when it carries at least one include label (an empty
/// include set admits everything) and none of the exclude labels. Among the
/// qualifying issues the oldest-created wins, with the issue number as a
/// deterministic tie-breaker.
pub fn select_issue(issues: Vec<Issue>, include: &[String], exclude: &[String]) -> Option<Issue> {
    issues
        .into_iter()
        .filter(|issue| matches_labels(issue, include, exclude))
        .min_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.number.cmp(&b.number))
        })
}

fn matches_labels(issue: &Issue, include: &[String], exclude: &[String]) -> bool {
    if issue.labels.iter().any(|label| exclude.contains(label)) {
        return false;
    }
    include.is_empty() || issue.labels.iter().any(|label| include.contains(label))
}
