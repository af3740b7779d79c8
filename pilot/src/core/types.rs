//! Shared domain types for the issue loop.
//!
//! These types define stable contracts between the state machine and the
//! tracker/agent adapters. They carry no I/O and must stay deterministic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Immutable snapshot of an open issue, fetched once per iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    /// Tracker-assigned issue number.
    pub number: u64,
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
    /// Canonical issue URL.
    pub url: String,
    /// Creation time, used for oldest-first selection.
    pub created_at: DateTime<Utc>,
}

/// A pull request opened for a work branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub url: String,
}

/// Aggregated reviewer sign-off state for a pull request.
///
/// Anything other than an explicit `Approved` blocks the merge gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    Approved,
    ChangesRequested,
    ReviewRequired,
    /// The tracker reported no decision, or one we do not recognize.
    Unknown,
}

/// One piece of review feedback: a PR comment or a review body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feedback {
    pub author: String,
    pub body: String,
}
