//! Test-only scripted capabilities and git fixtures.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use anyhow::{Context, Result, anyhow};
use chrono::{TimeZone, Utc};

use crate::core::checks::CheckResult;
use crate::core::types::{Feedback, Issue, PullRequest, ReviewDecision};
use crate::io::agent::{AgentExit, AgentRequest, CodingAgent};
use crate::io::notify::{Notification, NotificationSink};
use crate::io::tracker::IssueTracker;

/// A temp git working copy with a bare `origin` remote, seeded with one
/// commit on `main`.
pub struct TestRepo {
    _temp: tempfile::TempDir,
    work: PathBuf,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir().context("tempdir")?;
        let origin = temp.path().join("origin.git");
        let work = temp.path().join("work");
        fs::create_dir(&origin).context("create origin dir")?;
        fs::create_dir(&work).context("create work dir")?;

        run_git(&origin, &["init", "--bare"])?;
        run_git(&work, &["init", "-b", "main"])?;
        run_git(&work, &["config", "user.email", "test@example.com"])?;
        run_git(&work, &["config", "user.name", "test"])?;
        fs::write(work.join("README.md"), "hi\n").context("write README")?;
        run_git(&work, &["add", "README.md"])?;
        run_git(&work, &["commit", "-m", "chore: init"])?;
        let origin_url = origin.display().to_string();
        run_git(&work, &["remote", "add", "origin", &origin_url])?;
        run_git(&work, &["push", "-u", "origin", "main"])?;

        Ok(Self { _temp: temp, work })
    }

    /// Root of the working copy.
    pub fn root(&self) -> &Path {
        &self.work
    }

    pub fn git(&self, args: &[&str]) -> Result<String> {
        run_git(&self.work, args)
    }
}

fn run_git(dir: &Path, args: &[&str]) -> Result<String> {
    let out = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .with_context(|| format!("spawn git {}", args.join(" ")))?;
    if !out.status.success() {
        return Err(anyhow!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&out.stderr).trim()
        ));
    }
    Ok(String::from_utf8_lossy(&out.stdout).to_string())
}

/// Build a deterministic issue snapshot.
pub fn issue(number: u64, title: &str, labels: &[&str]) -> Issue {
    Issue {
        number,
        title: title.to_string(),
        body: format!("body of issue {number}"),
        labels: labels.iter().map(|l| l.to_string()).collect(),
        url: format!("https://tracker.example/issues/{number}"),
        created_at: Utc.timestamp_opt(1_700_000_000 + number as i64, 0).unwrap(),
    }
}

/// A recorded `create_pull_request` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedPr {
    pub title: String,
    pub body: String,
    pub base: String,
    pub head: String,
    pub number: u64,
}

#[derive(Default)]
struct TrackerState {
    issues: Vec<Issue>,
    next_pr_number: u64,
    suppress_create_response: bool,
    fail_create: bool,
    created: Vec<CreatedPr>,
    open_prs: Vec<(String, PullRequest)>,
    checks: VecDeque<Vec<CheckResult>>,
    review_decision: Option<ReviewDecision>,
    feedback: Vec<Feedback>,
    merged: Vec<u64>,
}

/// Tracker returning scripted responses and recording every write.
pub struct ScriptedTracker {
    state: Mutex<TrackerState>,
}

impl ScriptedTracker {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TrackerState {
                next_pr_number: 100,
                review_decision: Some(ReviewDecision::Approved),
                ..TrackerState::default()
            }),
        }
    }

    pub fn add_issue(&self, issue: Issue) {
        self.state.lock().unwrap().issues.push(issue);
    }

    /// Queue one `list_checks` response. The final queued response repeats
    /// for all subsequent calls; an empty queue reports no checks.
    pub fn push_checks(&self, checks: Vec<CheckResult>) {
        self.state.lock().unwrap().checks.push_back(checks);
    }

    pub fn set_review_decision(&self, decision: ReviewDecision) {
        self.state.lock().unwrap().review_decision = Some(decision);
    }

    pub fn set_feedback(&self, feedback: Vec<Feedback>) {
        self.state.lock().unwrap().feedback = feedback;
    }

    /// Make `create_pull_request` return `Ok(None)` (unparseable response)
    /// while still registering the open PR, to exercise the head fallback.
    pub fn suppress_create_response(&self) {
        self.state.lock().unwrap().suppress_create_response = true;
    }

    /// Make `create_pull_request` fail outright without registering a PR.
    pub fn fail_create(&self) {
        self.state.lock().unwrap().fail_create = true;
    }

    pub fn created_prs(&self) -> Vec<CreatedPr> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn merged(&self) -> Vec<u64> {
        self.state.lock().unwrap().merged.clone()
    }
}

impl Default for ScriptedTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl IssueTracker for ScriptedTracker {
    fn open_issues(&self) -> Result<Vec<Issue>> {
        Ok(self.state.lock().unwrap().issues.clone())
    }

    fn create_pull_request(
        &self,
        title: &str,
        body: &str,
        base: &str,
        head: &str,
    ) -> Result<Option<PullRequest>> {
        let mut state = self.state.lock().unwrap();
        if state.fail_create {
            return Err(anyhow!("scripted create failure"));
        }
        state.next_pr_number += 1;
        let number = state.next_pr_number;
        let pr = PullRequest {
            number,
            url: format!("https://tracker.example/pull/{number}"),
        };
        state.created.push(CreatedPr {
            title: title.to_string(),
            body: body.to_string(),
            base: base.to_string(),
            head: head.to_string(),
            number,
        });
        state.open_prs.push((head.to_string(), pr.clone()));
        if state.suppress_create_response {
            return Ok(None);
        }
        Ok(Some(pr))
    }

    fn find_open_pr_by_head(&self, head: &str) -> Result<Option<PullRequest>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .open_prs
            .iter()
            .find(|(branch, _)| branch == head)
            .map(|(_, pr)| pr.clone()))
    }

    fn review_decision(&self, _number: u64) -> Result<ReviewDecision> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .review_decision
            .unwrap_or(ReviewDecision::Unknown))
    }

    fn list_checks(&self, _number: u64) -> Result<Vec<CheckResult>> {
        let mut state = self.state.lock().unwrap();
        Ok(if state.checks.len() > 1 {
            state.checks.pop_front().unwrap_or_default()
        } else {
            state.checks.front().cloned().unwrap_or_default()
        })
    }

    fn list_feedback(&self, _number: u64) -> Result<Vec<Feedback>> {
        Ok(self.state.lock().unwrap().feedback.clone())
    }

    fn merge_squash(&self, number: u64) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let Some(index) = state.open_prs.iter().position(|(_, pr)| pr.number == number) else {
            return Err(anyhow!("no open PR #{number}"));
        };
        let (head, _) = state.open_prs.remove(index);
        // Branch names follow `issue-<n>`; close the matching issue.
        if let Some(issue_number) = head.strip_prefix("issue-").and_then(|n| n.parse::<u64>().ok())
        {
            state.issues.retain(|issue| issue.number != issue_number);
        }
        state.merged.push(number);
        Ok(())
    }
}

/// One scripted agent invocation: how it exits and how many commits it
/// leaves behind in the working copy.
#[derive(Debug, Clone, Copy)]
pub struct ScriptedAgentRun {
    pub exit: AgentExit,
    pub commits: u32,
}

impl ScriptedAgentRun {
    pub fn commits(commits: u32) -> Self {
        Self {
            exit: AgentExit::Completed,
            commits,
        }
    }

    pub fn idle() -> Self {
        Self {
            exit: AgentExit::Completed,
            commits: 0,
        }
    }
}

/// Process-global so distinct agents committing into the same working copy
/// never collide on a filename (a repeated name with identical content stages
/// nothing and makes `git commit` fail with "nothing to commit").
static CHANGE_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Agent that commits real files via git instead of spawning a process.
pub struct ScriptedAgent {
    script: Mutex<VecDeque<ScriptedAgentRun>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedAgent {
    pub fn new(script: Vec<ScriptedAgentRun>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Prompts seen so far, in invocation order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn invocation_count(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

impl CodingAgent for ScriptedAgent {
    fn run(&self, request: &AgentRequest) -> Result<AgentExit> {
        self.prompts.lock().unwrap().push(request.prompt.clone());
        let run = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(ScriptedAgentRun::idle);

        for _ in 0..run.commits {
            let n = CHANGE_COUNTER.fetch_add(1, Ordering::SeqCst);
            let file = format!("agent_change_{n}.txt");
            fs::write(request.workdir.join(&file), "change\n")
                .with_context(|| format!("write {file}"))?;
            run_git(&request.workdir, &["add", &file])?;
            run_git(
                &request.workdir,
                &["commit", "-m", &format!("scripted change {n}")],
            )?;
        }

        if let Some(parent) = request.log_path.parent() {
            fs::create_dir_all(parent).context("create log dir")?;
        }
        fs::write(&request.log_path, "scripted agent transcript\n").context("write log")?;
        Ok(run.exit)
    }
}

/// Sink recording every notification for assertions.
#[derive(Default)]
pub struct RecordingSink {
    posted: Mutex<Vec<Notification>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn posted(&self) -> Vec<Notification> {
        self.posted.lock().unwrap().clone()
    }

    pub fn titles(&self) -> Vec<String> {
        self.posted
            .lock()
            .unwrap()
            .iter()
            .map(|n| n.title.clone())
            .collect()
    }
}

impl NotificationSink for RecordingSink {
    fn post(&self, notification: &Notification) {
        self.posted.lock().unwrap().push(notification.clone());
    }
}
