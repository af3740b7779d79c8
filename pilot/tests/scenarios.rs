//! End-to-end scenarios driving the full iteration engine over a real git
//! working copy, with scripted tracker/agent/notification capabilities.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;

use pilot::config::PilotConfig;
use pilot::core::checks::{CheckConclusion, CheckResult, CheckRunState};
use pilot::core::status::IterationStatus;
use pilot::core::types::{Feedback, Issue, PullRequest, ReviewDecision};
use pilot::io::paths::PilotPaths;
use pilot::io::state::load_record;
use pilot::io::stop::StopController;
use pilot::io::tracker::IssueTracker;
use pilot::iteration::{IterationEngine, IterationOutcome};
use pilot::session::SessionLoop;
use pilot::test_support::{
    RecordingSink, ScriptedAgent, ScriptedAgentRun, ScriptedTracker, TestRepo, issue,
};
use pilot::workspace::Workspace;

fn test_config() -> PilotConfig {
    let mut cfg = PilotConfig::default();
    cfg.review.wait_minutes = 0;
    cfg.ci.wait_minutes = 1;
    cfg.ci.check_interval_seconds = 1;
    cfg
}

fn passing_check() -> CheckResult {
    CheckResult {
        name: "build".to_string(),
        state: CheckRunState::Completed,
        conclusion: Some(CheckConclusion::Success),
        details_url: None,
    }
}

fn failing_check(name: &str) -> CheckResult {
    CheckResult {
        name: name.to_string(),
        state: CheckRunState::Completed,
        conclusion: Some(CheckConclusion::Failure),
        details_url: Some(format!("https://ci.example/{name}/1")),
    }
}

fn pending_check() -> CheckResult {
    CheckResult {
        name: "build".to_string(),
        state: CheckRunState::InProgress,
        conclusion: None,
        details_url: None,
    }
}

struct Harness {
    repo: TestRepo,
    paths: PilotPaths,
    cfg: PilotConfig,
    tracker: ScriptedTracker,
    sink: RecordingSink,
}

impl Harness {
    fn new(cfg: PilotConfig) -> Result<Self> {
        let repo = TestRepo::new()?;
        let paths = PilotPaths::new(repo.root());
        paths.ensure_layout()?;
        Ok(Self {
            repo,
            paths,
            cfg,
            tracker: ScriptedTracker::new(),
            sink: RecordingSink::new(),
        })
    }

    fn workspace(&self) -> Workspace {
        Workspace::new(self.repo.root(), "origin", "main")
    }

    fn stop(&self) -> StopController {
        StopController::new(self.paths.stop_path.clone())
    }
}

/// Scenario A: one open issue, agent makes 2 commits, CI passes, approval
/// not required, auto-merge enabled: completed, completed-count 1.
#[test]
fn scenario_a_clean_run_merges_and_completes() {
    let mut cfg = test_config();
    cfg.review.require_approval = false;
    let harness = Harness::new(cfg).expect("harness");
    harness.tracker.add_issue(issue(7, "Fix the widget", &[]));
    harness.tracker.push_checks(vec![passing_check()]);

    let agent = ScriptedAgent::new(vec![ScriptedAgentRun::commits(2)]);
    let workspace = harness.workspace();
    let stop = harness.stop();
    let engine = IterationEngine::new(
        &harness.cfg,
        &harness.paths,
        &harness.tracker,
        &workspace,
        &agent,
        &harness.sink,
        &stop,
    );
    let summary = SessionLoop::new(&harness.cfg, engine, &harness.sink, &stop)
        .run()
        .expect("session");

    assert_eq!(summary.completed, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.iterations, 1);
    assert!(!summary.stopped);

    let record = load_record(&harness.paths.record_path)
        .expect("load")
        .expect("record written");
    assert_eq!(record.status, IterationStatus::Completed);
    assert_eq!(record.issue, 7);
    assert_eq!(record.iteration, 1);

    let created = harness.tracker.created_prs();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].base, "main");
    assert_eq!(created[0].head, "issue-7");
    assert!(created[0].body.contains("Closes #7"));
    assert_eq!(harness.tracker.merged(), vec![created[0].number]);

    // Step 10: the workspace is back on the default branch.
    assert_eq!(workspace.current_branch().expect("branch"), "main");
}

/// Scenario B: agent exits cleanly but makes no commits: claude_failed,
/// failed-count 1, no PR created.
#[test]
fn scenario_b_zero_commit_agent_is_a_failure() {
    let mut cfg = test_config();
    cfg.max_iterations = 1;
    let harness = Harness::new(cfg).expect("harness");
    harness.tracker.add_issue(issue(9, "Do nothing", &[]));

    let agent = ScriptedAgent::new(vec![ScriptedAgentRun::idle()]);
    let workspace = harness.workspace();
    let stop = harness.stop();
    let engine = IterationEngine::new(
        &harness.cfg,
        &harness.paths,
        &harness.tracker,
        &workspace,
        &agent,
        &harness.sink,
        &stop,
    );
    let summary = SessionLoop::new(&harness.cfg, engine, &harness.sink, &stop)
        .run()
        .expect("session");

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.completed, 0);

    let record = load_record(&harness.paths.record_path)
        .expect("load")
        .expect("record written");
    assert_eq!(record.status, IterationStatus::ClaudeFailed);
    assert!(harness.tracker.created_prs().is_empty());
}

/// Scenario C: CI fails twice with retries enabled (max 2), the third
/// attempt passes: completed, exactly 2 remediation invocations.
#[test]
fn scenario_c_ci_remediation_retries_until_pass() {
    let mut cfg = test_config();
    cfg.review.require_approval = false;
    cfg.ci.max_retries = 2;
    cfg.ci.retry_on_failure = true;
    let harness = Harness::new(cfg).expect("harness");
    harness.tracker.add_issue(issue(4, "Flaky feature", &[]));
    // A failing round reads checks twice: classification, then failure
    // detail for the remediation prompt. Script both reads per round.
    harness.tracker.push_checks(vec![failing_check("build")]);
    harness.tracker.push_checks(vec![failing_check("build")]);
    harness.tracker.push_checks(vec![failing_check("test")]);
    harness.tracker.push_checks(vec![failing_check("test")]);
    harness.tracker.push_checks(vec![passing_check()]);

    let agent = ScriptedAgent::new(vec![
        ScriptedAgentRun::commits(1),
        ScriptedAgentRun::commits(1),
        ScriptedAgentRun::commits(1),
    ]);
    let workspace = harness.workspace();
    let stop = harness.stop();
    let engine = IterationEngine::new(
        &harness.cfg,
        &harness.paths,
        &harness.tracker,
        &workspace,
        &agent,
        &harness.sink,
        &stop,
    );
    let outcome = engine.run_iteration(1).expect("iteration");

    assert_eq!(
        outcome,
        IterationOutcome::Finished {
            issue: 4,
            status: IterationStatus::Completed
        }
    );
    assert_eq!(agent.invocation_count(), 3);
    let prompts = agent.prompts();
    assert!(prompts[1].contains("failing CI checks"));
    assert!(prompts[1].contains("build"));
    assert!(prompts[2].contains("test"));
    assert_eq!(harness.tracker.merged().len(), 1);
}

/// Scenario D (no approval obtained): retries exhausted with approval
/// gating on: flow reaches the merge gate and ends ci_failed, not merged.
#[test]
fn scenario_d_ci_failure_with_approval_gate_parks_as_ci_failed() {
    let mut cfg = test_config();
    cfg.ci.max_retries = 0;
    cfg.review.require_approval = true;
    let harness = Harness::new(cfg).expect("harness");
    harness.tracker.add_issue(issue(5, "Hard problem", &[]));
    harness.tracker.push_checks(vec![failing_check("build")]);
    harness
        .tracker
        .set_review_decision(ReviewDecision::ReviewRequired);

    let agent = ScriptedAgent::new(vec![ScriptedAgentRun::commits(1)]);
    let workspace = harness.workspace();
    let stop = harness.stop();
    let engine = IterationEngine::new(
        &harness.cfg,
        &harness.paths,
        &harness.tracker,
        &workspace,
        &agent,
        &harness.sink,
        &stop,
    );
    let outcome = engine.run_iteration(1).expect("iteration");

    assert_eq!(
        outcome,
        IterationOutcome::Finished {
            issue: 5,
            status: IterationStatus::CiFailed
        }
    );
    // Only the implement invocation; no remediation budget.
    assert_eq!(agent.invocation_count(), 1);
    assert!(harness.tracker.merged().is_empty());
    let record = load_record(&harness.paths.record_path)
        .expect("load")
        .expect("record written");
    assert_eq!(record.status, IterationStatus::CiFailed);
}

/// Scenario D (approval obtained): the same failure with a later approval
/// and auto-merge enabled ends completed. Preserves the configured policy
/// that approval can force a merge past unresolved CI failure.
#[test]
fn scenario_d_approval_forces_merge_despite_ci_failure() {
    let mut cfg = test_config();
    cfg.ci.max_retries = 0;
    cfg.review.require_approval = true;
    let harness = Harness::new(cfg).expect("harness");
    harness.tracker.add_issue(issue(6, "Approved anyway", &[]));
    harness.tracker.push_checks(vec![failing_check("build")]);
    harness.tracker.set_review_decision(ReviewDecision::Approved);

    let agent = ScriptedAgent::new(vec![ScriptedAgentRun::commits(1)]);
    let workspace = harness.workspace();
    let stop = harness.stop();
    let engine = IterationEngine::new(
        &harness.cfg,
        &harness.paths,
        &harness.tracker,
        &workspace,
        &agent,
        &harness.sink,
        &stop,
    );
    let outcome = engine.run_iteration(1).expect("iteration");

    assert_eq!(
        outcome,
        IterationOutcome::Finished {
            issue: 6,
            status: IterationStatus::Completed
        }
    );
    assert_eq!(harness.tracker.merged().len(), 1);
    let record = load_record(&harness.paths.record_path)
        .expect("load")
        .expect("record written");
    assert_eq!(record.status, IterationStatus::Completed);
}

/// A PR create response without a parseable number falls back to the
/// head-branch lookup.
#[test]
fn unparseable_create_response_falls_back_to_head_lookup() {
    let mut cfg = test_config();
    cfg.review.require_approval = false;
    cfg.ci.required = false;
    let harness = Harness::new(cfg).expect("harness");
    harness.tracker.add_issue(issue(8, "Fallback", &[]));
    harness.tracker.suppress_create_response();

    let agent = ScriptedAgent::new(vec![ScriptedAgentRun::commits(1)]);
    let workspace = harness.workspace();
    let stop = harness.stop();
    let engine = IterationEngine::new(
        &harness.cfg,
        &harness.paths,
        &harness.tracker,
        &workspace,
        &agent,
        &harness.sink,
        &stop,
    );
    let outcome = engine.run_iteration(1).expect("iteration");

    assert_eq!(
        outcome,
        IterationOutcome::Finished {
            issue: 8,
            status: IterationStatus::Completed
        }
    );
    assert_eq!(harness.tracker.merged().len(), 1);
}

/// Review feedback triggers a triage invocation and an unconditional push.
#[test]
fn review_feedback_runs_the_agent_even_without_new_commits() {
    let mut cfg = test_config();
    cfg.review.require_approval = false;
    cfg.ci.required = false;
    let harness = Harness::new(cfg).expect("harness");
    harness.tracker.add_issue(issue(11, "Nitpicked", &[]));
    harness.tracker.set_feedback(vec![Feedback {
        author: "alice".to_string(),
        body: "Please rename the helper.".to_string(),
    }]);

    // Implement commits; the feedback run makes no commits, which is
    // acceptable for step 7 (unlike step 3).
    let agent = ScriptedAgent::new(vec![ScriptedAgentRun::commits(1), ScriptedAgentRun::idle()]);
    let workspace = harness.workspace();
    let stop = harness.stop();
    let engine = IterationEngine::new(
        &harness.cfg,
        &harness.paths,
        &harness.tracker,
        &workspace,
        &agent,
        &harness.sink,
        &stop,
    );
    let outcome = engine.run_iteration(1).expect("iteration");

    assert_eq!(
        outcome,
        IterationOutcome::Finished {
            issue: 11,
            status: IterationStatus::Completed
        }
    );
    assert_eq!(agent.invocation_count(), 2);
    assert!(agent.prompts()[1].contains("review feedback"));
}

/// Missing approval without a CI failure parks the iteration as
/// pending_merge: blocked, counted neither success nor failure.
#[test]
fn missing_approval_parks_as_pending_merge() {
    let mut cfg = test_config();
    cfg.ci.required = false;
    cfg.review.require_approval = true;
    let harness = Harness::new(cfg).expect("harness");
    harness.tracker.add_issue(issue(13, "Needs eyes", &[]));
    harness
        .tracker
        .set_review_decision(ReviewDecision::ReviewRequired);

    let agent = ScriptedAgent::new(vec![ScriptedAgentRun::commits(1)]);
    let workspace = harness.workspace();
    let stop = harness.stop();
    let engine = IterationEngine::new(
        &harness.cfg,
        &harness.paths,
        &harness.tracker,
        &workspace,
        &agent,
        &harness.sink,
        &stop,
    );
    let outcome = engine.run_iteration(1).expect("iteration");

    assert_eq!(
        outcome,
        IterationOutcome::Finished {
            issue: 13,
            status: IterationStatus::PendingMerge
        }
    );
    assert!(harness.tracker.merged().is_empty());
    let record = load_record(&harness.paths.record_path)
        .expect("load")
        .expect("record written");
    assert_eq!(record.status, IterationStatus::PendingMerge);
}

/// Tracker that arms the stop sentinel from inside the first check poll,
/// simulating a stop request arriving mid-verification.
struct ArmingTracker {
    inner: ScriptedTracker,
    sentinel: PathBuf,
    check_calls: AtomicUsize,
}

impl IssueTracker for ArmingTracker {
    fn open_issues(&self) -> Result<Vec<Issue>> {
        self.inner.open_issues()
    }

    fn create_pull_request(
        &self,
        title: &str,
        body: &str,
        base: &str,
        head: &str,
    ) -> Result<Option<PullRequest>> {
        self.inner.create_pull_request(title, body, base, head)
    }

    fn find_open_pr_by_head(&self, head: &str) -> Result<Option<PullRequest>> {
        self.inner.find_open_pr_by_head(head)
    }

    fn review_decision(&self, number: u64) -> Result<ReviewDecision> {
        self.inner.review_decision(number)
    }

    fn list_checks(&self, number: u64) -> Result<Vec<CheckResult>> {
        self.check_calls.fetch_add(1, Ordering::SeqCst);
        std::fs::File::create(&self.sentinel)?;
        self.inner.list_checks(number)
    }

    fn list_feedback(&self, number: u64) -> Result<Vec<Feedback>> {
        self.inner.list_feedback(number)
    }

    fn merge_squash(&self, number: u64) -> Result<()> {
        self.inner.merge_squash(number)
    }
}

/// A stop request during CI polling halts within one interval and never
/// reaches the review/merge steps; no terminal record is written.
#[test]
fn stop_during_ci_poll_interrupts_the_iteration() {
    let cfg = test_config();
    let harness = Harness::new(cfg).expect("harness");
    let tracker = ArmingTracker {
        inner: ScriptedTracker::new(),
        sentinel: harness.paths.stop_path.clone(),
        check_calls: AtomicUsize::new(0),
    };
    tracker.inner.add_issue(issue(21, "Interrupted", &[]));
    tracker.inner.push_checks(vec![pending_check()]);

    let agent = ScriptedAgent::new(vec![ScriptedAgentRun::commits(1)]);
    let workspace = harness.workspace();
    let stop = harness.stop();
    let engine = IterationEngine::new(
        &harness.cfg,
        &harness.paths,
        &tracker,
        &workspace,
        &agent,
        &harness.sink,
        &stop,
    );
    let outcome = engine.run_iteration(1).expect("iteration");

    assert_eq!(outcome, IterationOutcome::Interrupted);
    // The pending probe ran once; cancellation preempted the next cycle.
    assert_eq!(tracker.check_calls.load(Ordering::SeqCst), 1);
    assert!(tracker.inner.merged().is_empty());
    assert!(
        load_record(&harness.paths.record_path).expect("load").is_none(),
        "an interrupted iteration must not persist a terminal record"
    );
}

/// A session that starts with the sentinel armed stops before any work and
/// consumes the sentinel on the way out.
#[test]
fn armed_sentinel_stops_the_session_before_any_iteration() {
    let cfg = test_config();
    let harness = Harness::new(cfg).expect("harness");
    harness.tracker.add_issue(issue(30, "Never started", &[]));
    std::fs::File::create(&harness.paths.stop_path).expect("arm sentinel");

    let agent = ScriptedAgent::new(Vec::new());
    let workspace = harness.workspace();
    let stop = harness.stop();
    let engine = IterationEngine::new(
        &harness.cfg,
        &harness.paths,
        &harness.tracker,
        &workspace,
        &agent,
        &harness.sink,
        &stop,
    );
    let summary = SessionLoop::new(&harness.cfg, engine, &harness.sink, &stop)
        .run()
        .expect("session");

    assert!(summary.stopped);
    assert_eq!(summary.iterations, 0);
    assert_eq!(agent.invocation_count(), 0);
    assert!(
        !harness.paths.stop_path.exists(),
        "honoring the stop consumes the sentinel"
    );
}
