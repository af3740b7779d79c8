//! Issue tracker client backed by the `gh` CLI.
//!
//! The [`IssueTracker`] trait decouples the state machine from the hosting
//! service. All textual parsing of `gh` output happens in this module; the
//! rest of the crate only ever sees typed results. Tests use scripted
//! trackers that return predetermined responses without spawning processes.

use std::path::PathBuf;
use std::process::{Command, Output};
use std::sync::LazyLock;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::core::checks::{CheckConclusion, CheckResult, CheckRunState};
use crate::core::types::{Feedback, Issue, PullRequest, ReviewDecision};

/// Abstraction over the issue tracker and its pull-request surface.
pub trait IssueTracker {
    /// List open issues with full detail; selection happens in core logic.
    fn open_issues(&self) -> Result<Vec<Issue>>;

    /// Create a pull request. Returns `None` when the tracker accepted the
    /// request but no PR number could be parsed from its response.
    fn create_pull_request(
        &self,
        title: &str,
        body: &str,
        base: &str,
        head: &str,
    ) -> Result<Option<PullRequest>>;

    /// Find an open pull request whose head is the given branch.
    fn find_open_pr_by_head(&self, head: &str) -> Result<Option<PullRequest>>;

    /// Fetch the aggregated reviewer decision for a pull request.
    fn review_decision(&self, number: u64) -> Result<ReviewDecision>;

    /// List the CI checks reported against a pull request's head commit.
    fn list_checks(&self, number: u64) -> Result<Vec<CheckResult>>;

    /// List PR comments and non-empty review bodies.
    fn list_feedback(&self, number: u64) -> Result<Vec<Feedback>>;

    /// Squash-merge a pull request and delete its source branch.
    fn merge_squash(&self, number: u64) -> Result<()>;
}

/// Tracker client shelling out to the `gh` CLI in a working directory.
#[derive(Debug, Clone)]
pub struct GhTracker {
    workdir: PathBuf,
}

impl GhTracker {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("gh {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("gh")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn gh {}", args.join(" ")))
    }
}

impl IssueTracker for GhTracker {
    #[instrument(skip_all)]
    fn open_issues(&self) -> Result<Vec<Issue>> {
        let raw = self.run_capture(&[
            "issue",
            "list",
            "--state",
            "open",
            "--limit",
            "100",
            "--json",
            "number,title,body,labels,url,createdAt",
        ])?;
        let issues = parse_issues(&raw)?;
        debug!(count = issues.len(), "listed open issues");
        Ok(issues)
    }

    #[instrument(skip_all, fields(base, head))]
    fn create_pull_request(
        &self,
        title: &str,
        body: &str,
        base: &str,
        head: &str,
    ) -> Result<Option<PullRequest>> {
        let raw = self.run_capture(&[
            "pr", "create", "--title", title, "--body", body, "--base", base, "--head", head,
        ])?;
        let parsed = parse_created_pr(&raw);
        if parsed.is_none() {
            warn!("pr create output had no parseable PR number");
        }
        Ok(parsed)
    }

    #[instrument(skip_all, fields(head))]
    fn find_open_pr_by_head(&self, head: &str) -> Result<Option<PullRequest>> {
        let raw = self.run_capture(&[
            "pr", "list", "--state", "open", "--head", head, "--json", "number,url",
        ])?;
        let prs: Vec<RawPr> = serde_json::from_str(&raw).context("parse gh pr list output")?;
        Ok(prs.into_iter().next().map(|pr| PullRequest {
            number: pr.number,
            url: pr.url,
        }))
    }

    #[instrument(skip_all, fields(number))]
    fn review_decision(&self, number: u64) -> Result<ReviewDecision> {
        let raw = self.run_capture(&[
            "pr",
            "view",
            &number.to_string(),
            "--json",
            "reviewDecision",
        ])?;
        parse_review_decision(&raw)
    }

    #[instrument(skip_all, fields(number))]
    fn list_checks(&self, number: u64) -> Result<Vec<CheckResult>> {
        let raw = self.run_capture(&[
            "pr",
            "view",
            &number.to_string(),
            "--json",
            "statusCheckRollup",
        ])?;
        parse_checks(&raw)
    }

    #[instrument(skip_all, fields(number))]
    fn list_feedback(&self, number: u64) -> Result<Vec<Feedback>> {
        let raw = self.run_capture(&[
            "pr",
            "view",
            &number.to_string(),
            "--json",
            "comments,reviews",
        ])?;
        parse_feedback(&raw)
    }

    #[instrument(skip_all, fields(number))]
    fn merge_squash(&self, number: u64) -> Result<()> {
        self.run_checked(&[
            "pr",
            "merge",
            &number.to_string(),
            "--squash",
            "--delete-branch",
        ])?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawIssue {
    number: u64,
    title: String,
    body: Option<String>,
    labels: Vec<RawLabel>,
    url: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct RawLabel {
    name: String,
}

#[derive(Debug, Deserialize)]
struct RawPr {
    number: u64,
    url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReviewDecision {
    review_decision: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRollup {
    status_check_rollup: Option<Vec<RawCheck>>,
}

/// One rollup entry. Check runs report `name`; commit statuses report
/// `context` instead, so both are accepted.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCheck {
    name: Option<String>,
    context: Option<String>,
    status: Option<String>,
    conclusion: Option<String>,
    state: Option<String>,
    details_url: Option<String>,
    target_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawThreads {
    comments: Option<Vec<RawComment>>,
    reviews: Option<Vec<RawComment>>,
}

#[derive(Debug, Deserialize)]
struct RawComment {
    author: Option<RawAuthor>,
    body: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawAuthor {
    login: Option<String>,
}

fn parse_issues(raw: &str) -> Result<Vec<Issue>> {
    let issues: Vec<RawIssue> = serde_json::from_str(raw).context("parse gh issue list output")?;
    Ok(issues
        .into_iter()
        .map(|issue| Issue {
            number: issue.number,
            title: issue.title,
            body: issue.body.unwrap_or_default(),
            labels: issue.labels.into_iter().map(|label| label.name).collect(),
            url: issue.url,
            created_at: issue.created_at,
        })
        .collect())
}

static PR_URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(https?://\S+/pull/(\d+))").unwrap());

/// Extract the PR url/number from `gh pr create` output.
///
/// `gh` prints the new PR's URL on success, but the surrounding output is
/// not a stable contract, so absence is tolerated and handled by the caller
/// via a head-branch lookup.
fn parse_created_pr(raw: &str) -> Option<PullRequest> {
    let caps = PR_URL_RE.captures(raw)?;
    let url = caps.get(1)?.as_str().to_string();
    let number = caps.get(2)?.as_str().parse::<u64>().ok()?;
    Some(PullRequest { number, url })
}

fn parse_review_decision(raw: &str) -> Result<ReviewDecision> {
    let parsed: RawReviewDecision =
        serde_json::from_str(raw).context("parse gh reviewDecision output")?;
    Ok(match parsed.review_decision.as_deref() {
        Some("APPROVED") => ReviewDecision::Approved,
        Some("CHANGES_REQUESTED") => ReviewDecision::ChangesRequested,
        Some("REVIEW_REQUIRED") => ReviewDecision::ReviewRequired,
        _ => ReviewDecision::Unknown,
    })
}

fn parse_checks(raw: &str) -> Result<Vec<CheckResult>> {
    let parsed: RawRollup = serde_json::from_str(raw).context("parse gh statusCheckRollup")?;
    let entries = parsed.status_check_rollup.unwrap_or_default();
    Ok(entries.into_iter().map(check_from_raw).collect())
}

fn check_from_raw(raw: RawCheck) -> CheckResult {
    let name = raw
        .name
        .or(raw.context)
        .unwrap_or_else(|| "unnamed".to_string());
    // Commit statuses carry a single `state`; check runs split it into
    // `status` + `conclusion`. Normalize both shapes.
    let (state, conclusion) = if let Some(state) = raw.state.as_deref() {
        match state {
            "SUCCESS" => (CheckRunState::Completed, Some(CheckConclusion::Success)),
            "FAILURE" | "ERROR" => (CheckRunState::Completed, Some(CheckConclusion::Failure)),
            "PENDING" | "EXPECTED" => (CheckRunState::Pending, None),
            other => {
                warn!(state = other, "unrecognized commit status state");
                (CheckRunState::Completed, Some(CheckConclusion::Failure))
            }
        }
    } else {
        let state = match raw.status.as_deref() {
            Some("COMPLETED") => CheckRunState::Completed,
            Some("IN_PROGRESS") => CheckRunState::InProgress,
            Some("QUEUED") | Some("WAITING") | Some("REQUESTED") => CheckRunState::Queued,
            _ => CheckRunState::Pending,
        };
        let conclusion = match raw.conclusion.as_deref() {
            Some("SUCCESS") => Some(CheckConclusion::Success),
            Some("FAILURE") => Some(CheckConclusion::Failure),
            Some("CANCELLED") => Some(CheckConclusion::Cancelled),
            Some("TIMED_OUT") => Some(CheckConclusion::TimedOut),
            Some("NEUTRAL") => Some(CheckConclusion::Neutral),
            Some("SKIPPED") => Some(CheckConclusion::Skipped),
            Some("") | None => None,
            Some(other) => {
                warn!(conclusion = other, "unrecognized check conclusion");
                Some(CheckConclusion::Failure)
            }
        };
        (state, conclusion)
    };
    CheckResult {
        name,
        state,
        conclusion,
        details_url: raw.details_url.or(raw.target_url),
    }
}

fn parse_feedback(raw: &str) -> Result<Vec<Feedback>> {
    let parsed: RawThreads = serde_json::from_str(raw).context("parse gh comments/reviews")?;
    let mut feedback = Vec::new();
    for entry in parsed
        .comments
        .into_iter()
        .flatten()
        .chain(parsed.reviews.into_iter().flatten())
    {
        let body = entry.body.unwrap_or_default();
        if body.trim().is_empty() {
            continue;
        }
        feedback.push(Feedback {
            author: entry
                .author
                .and_then(|author| author.login)
                .unwrap_or_else(|| "unknown".to_string()),
            body,
        });
    }
    Ok(feedback)
}
