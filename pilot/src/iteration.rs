//! The iteration state machine: drives one issue from discovery to
//! merge-or-park.
//!
//! Steps run strictly in sequence; the stop controller is consulted between
//! every step and inside every poll cycle. Every terminal branch persists an
//! IterationRecord before returning, and any single iteration's failure is
//! converted into a terminal status instead of aborting the run.

use std::thread;

use anyhow::Result;
use tracing::{debug, info, instrument, warn};

use crate::ci::{CiOutcome, CiWatcher};
use crate::config::PilotConfig;
use crate::core::selector::select_issue;
use crate::core::status::IterationStatus;
use crate::core::types::{Issue, PullRequest, ReviewDecision};
use crate::invoker::AgentInvoker;
use crate::io::agent::{AgentExit, CodingAgent};
use crate::io::notify::{Notification, NotificationSink, Severity};
use crate::io::paths::PilotPaths;
use crate::io::prompt::PromptEngine;
use crate::io::state::{IterationRecord, write_record};
use crate::io::stop::StopController;
use crate::io::tracker::IssueTracker;
use crate::workspace::{Workspace, reset_quietly};

/// How one call to [`IterationEngine::run_iteration`] ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IterationOutcome {
    /// No qualifying open issue was found (or discovery failed transiently).
    NoIssues,
    /// A stop request halted the iteration before completion.
    Interrupted,
    /// The issue reached a terminal status.
    Finished {
        issue: u64,
        status: IterationStatus,
    },
}

/// Result of the CI verification stage (step 5).
enum Verify {
    Success,
    Failed,
    Interrupted,
}

/// Result of the best-effort post-feedback verification (step 8).
#[derive(PartialEq)]
enum Reverify {
    Done,
    Interrupted,
}

pub struct IterationEngine<'a, T: IssueTracker, A: CodingAgent> {
    cfg: &'a PilotConfig,
    paths: &'a PilotPaths,
    tracker: &'a T,
    workspace: &'a Workspace,
    invoker: AgentInvoker<'a, A>,
    ci: CiWatcher<'a, T>,
    notify: &'a dyn NotificationSink,
    stop: &'a StopController,
    prompts: PromptEngine,
}

impl<'a, T: IssueTracker, A: CodingAgent> IterationEngine<'a, T, A> {
    pub fn new(
        cfg: &'a PilotConfig,
        paths: &'a PilotPaths,
        tracker: &'a T,
        workspace: &'a Workspace,
        agent: &'a A,
        notify: &'a dyn NotificationSink,
        stop: &'a StopController,
    ) -> Self {
        let invoker = AgentInvoker::new(
            agent,
            workspace,
            paths.logs_dir.clone(),
            cfg.agent_timeout(),
            cfg.agent.output_limit_bytes,
        );
        Self {
            cfg,
            paths,
            tracker,
            workspace,
            invoker,
            ci: CiWatcher::new(tracker),
            notify,
            stop,
            prompts: PromptEngine::new(),
        }
    }

    /// Process at most one issue. The workspace is returned to the default
    /// branch after every finished iteration, regardless of its status.
    #[instrument(skip(self))]
    pub fn run_iteration(&self, iteration: u32) -> Result<IterationOutcome> {
        let outcome = self.drive(iteration)?;
        if matches!(outcome, IterationOutcome::Finished { .. }) {
            reset_quietly(self.workspace);
        }
        Ok(outcome)
    }

    fn drive(&self, iteration: u32) -> Result<IterationOutcome> {
        if self.stop.should_stop() {
            return Ok(IterationOutcome::Interrupted);
        }

        // 1. Discover.
        let issue = match self.discover() {
            Ok(Some(issue)) => issue,
            Ok(None) => {
                debug!("no qualifying open issue");
                return Ok(IterationOutcome::NoIssues);
            }
            Err(err) => {
                warn!(err = %err, "issue discovery failed");
                self.notify.post(&Notification::warning(
                    "Issue discovery failed",
                    format!("{err:#}"),
                ));
                return Ok(IterationOutcome::NoIssues);
            }
        };
        info!(issue = issue.number, title = %issue.title, "iteration starting");
        self.notify.post(
            &Notification::info(
                format!("Iteration {iteration} started"),
                format!("Working on issue #{}: {}", issue.number, issue.title),
            )
            .with_link(issue.url.clone()),
        );

        if self.stop.should_stop() {
            return Ok(IterationOutcome::Interrupted);
        }

        // 2. Prepare a fresh work branch.
        let branch = match self.workspace.prepare(issue.number) {
            Ok(branch) => branch,
            Err(err) => {
                warn!(issue = issue.number, err = %err, "workspace preparation failed");
                return self.conclude(
                    iteration,
                    &issue,
                    IterationStatus::ClaudeFailed,
                    &format!("workspace preparation failed: {err:#}"),
                );
            }
        };

        if self.stop.should_stop() {
            return Ok(IterationOutcome::Interrupted);
        }

        // 3. Implement. Success requires a clean exit AND new commits.
        let prompt = self.prompts.implement(&issue, &branch)?;
        let run = match self.invoker.run(&prompt, iteration, "implement") {
            Ok(run) => run,
            Err(err) => {
                warn!(issue = issue.number, err = %err, "agent invocation failed");
                return self.conclude(
                    iteration,
                    &issue,
                    IterationStatus::ClaudeFailed,
                    &format!("agent invocation failed: {err:#}"),
                );
            }
        };
        if !run.made_progress() {
            let detail = match run.exit {
                AgentExit::TimedOut => "agent timed out".to_string(),
                AgentExit::Failed(code) => format!("agent exited non-zero (code {code:?})"),
                AgentExit::Completed => {
                    "agent exited cleanly but produced no commits".to_string()
                }
            };
            return self.conclude(iteration, &issue, IterationStatus::ClaudeFailed, &detail);
        }

        if self.stop.should_stop() {
            return Ok(IterationOutcome::Interrupted);
        }

        // 4. Publish: push and open a pull request.
        let pr = match self.publish(&issue, &branch) {
            Ok(Some(pr)) => pr,
            Ok(None) => {
                return self.conclude(
                    iteration,
                    &issue,
                    IterationStatus::PrFailed,
                    "no pull request could be created or located",
                );
            }
            Err(err) => {
                return self.conclude(
                    iteration,
                    &issue,
                    IterationStatus::PrFailed,
                    &format!("pull request creation failed: {err:#}"),
                );
            }
        };
        info!(pr = pr.number, url = %pr.url, "pull request ready");
        self.notify.post(
            &Notification::info(
                "Pull request opened",
                format!("PR #{} for issue #{}", pr.number, issue.number),
            )
            .with_link(pr.url.clone()),
        );

        if self.stop.should_stop() {
            return Ok(IterationOutcome::Interrupted);
        }

        // 5. Verify CI, with bounded remediation retries.
        let mut ci_failed = false;
        if self.cfg.ci.required {
            match self.verify_ci(iteration, &issue, &branch, &pr)? {
                Verify::Interrupted => return Ok(IterationOutcome::Interrupted),
                Verify::Success => {}
                Verify::Failed => {
                    ci_failed = true;
                    self.persist(iteration, issue.number, IterationStatus::CiFailed)?;
                    self.notify.post(
                        &Notification::warning(
                            "CI failed",
                            format!(
                                "Checks failed for PR #{} after exhausting retries",
                                pr.number
                            ),
                        )
                        .with_link(pr.url.clone()),
                    );
                    if !self.cfg.review.require_approval {
                        return Ok(IterationOutcome::Finished {
                            issue: issue.number,
                            status: IterationStatus::CiFailed,
                        });
                    }
                    // A human may still want to inspect or fix the PR, so
                    // approval gating keeps the iteration alive.
                    info!("approval required, continuing to review despite CI failure");
                }
            }
        }

        if self.stop.should_stop() {
            return Ok(IterationOutcome::Interrupted);
        }

        // 6. Await review. Interruptible only at the checkpoints around it.
        let wait = self.cfg.review_wait();
        if !wait.is_zero() {
            info!(minutes = self.cfg.review.wait_minutes, "waiting for review");
            thread::sleep(wait);
        }

        if self.stop.should_stop() {
            return Ok(IterationOutcome::Interrupted);
        }

        // 7. Incorporate feedback (best effort).
        self.incorporate_feedback(iteration, &issue, &branch, &pr);

        if self.stop.should_stop() {
            return Ok(IterationOutcome::Interrupted);
        }

        // 8. Re-verify if changed (best effort; never blocks the merge gate).
        if self.reverify(&branch, &pr) == Reverify::Interrupted {
            return Ok(IterationOutcome::Interrupted);
        }

        if self.stop.should_stop() {
            return Ok(IterationOutcome::Interrupted);
        }

        // 9. Merge gate.
        if self.cfg.review.require_approval {
            let decision = match self.tracker.review_decision(pr.number) {
                Ok(decision) => decision,
                Err(err) => {
                    warn!(err = %err, "review decision fetch failed, treating as not approved");
                    ReviewDecision::Unknown
                }
            };
            if decision != ReviewDecision::Approved {
                if ci_failed {
                    // The latched ci_failed record stands.
                    self.notify.post(
                        &Notification::warning(
                            "Merge blocked",
                            format!("PR #{} has failed CI and no approval", pr.number),
                        )
                        .with_link(pr.url.clone()),
                    );
                    return Ok(IterationOutcome::Finished {
                        issue: issue.number,
                        status: IterationStatus::CiFailed,
                    });
                }
                return self.conclude(
                    iteration,
                    &issue,
                    IterationStatus::PendingMerge,
                    &format!("PR #{} awaiting approval", pr.number),
                );
            }
        }

        if self.cfg.merge.auto_merge {
            if let Err(err) = self.tracker.merge_squash(pr.number) {
                warn!(pr = pr.number, err = %err, "merge failed");
                self.notify.post(
                    &Notification::error("Merge failed", format!("PR #{}: {err:#}", pr.number))
                        .with_link(pr.url.clone()),
                );
                return self.conclude(
                    iteration,
                    &issue,
                    IterationStatus::PendingMerge,
                    "merge failed, left for manual action",
                );
            }
            info!(pr = pr.number, "pull request merged");
        } else {
            info!(pr = pr.number, "auto-merge disabled, leaving pull request open");
        }
        self.conclude(
            iteration,
            &issue,
            IterationStatus::Completed,
            &format!("issue #{} resolved by PR #{}", issue.number, pr.number),
        )
    }

    fn discover(&self) -> Result<Option<Issue>> {
        let issues = self.tracker.open_issues()?;
        Ok(select_issue(
            issues,
            &self.cfg.include_labels,
            &self.cfg.exclude_labels,
        ))
    }

    fn publish(&self, issue: &Issue, branch: &str) -> Result<Option<PullRequest>> {
        self.workspace.push(branch, true)?;
        let body = format!(
            "Closes #{number}.\n\nAutomated change for issue #{number}.",
            number = issue.number
        );
        let created = match self.tracker.create_pull_request(
            &issue.title,
            &body,
            &self.cfg.default_branch,
            branch,
        ) {
            Ok(created) => created,
            Err(err) => {
                // The PR may exist despite the failed response; fall through
                // to the head-branch lookup before giving up.
                warn!(err = %err, "pull request creation errored, trying head lookup");
                None
            }
        };
        match created {
            Some(pr) => Ok(Some(pr)),
            None => self.tracker.find_open_pr_by_head(branch),
        }
    }

    fn verify_ci(
        &self,
        iteration: u32,
        issue: &Issue,
        branch: &str,
        pr: &PullRequest,
    ) -> Result<Verify> {
        let policy = self.cfg.ci_poll_policy();
        let mut remediations = 0u32;
        loop {
            let outcome = match self.ci.poll(pr.number, &policy, self.stop) {
                Ok(outcome) => outcome,
                Err(err) => {
                    warn!(err = %err, "check polling failed");
                    CiOutcome::Failed
                }
            };
            match outcome {
                CiOutcome::Interrupted => return Ok(Verify::Interrupted),
                CiOutcome::Passed | CiOutcome::NoChecks => return Ok(Verify::Success),
                CiOutcome::Failed | CiOutcome::TimedOut => {
                    if !self.cfg.ci.retry_on_failure || remediations >= self.cfg.ci.max_retries {
                        return Ok(Verify::Failed);
                    }
                    remediations += 1;
                    if self.stop.should_stop() {
                        return Ok(Verify::Interrupted);
                    }
                    let failures = self.ci.failure_detail(pr.number).unwrap_or_else(|err| {
                        warn!(err = %err, "failure detail fetch failed");
                        Vec::new()
                    });
                    info!(
                        attempt = remediations,
                        failing = failures.len(),
                        "attempting CI remediation"
                    );
                    self.notify.post(&Notification::info(
                        format!("CI remediation attempt {remediations}"),
                        format!("PR #{}: {} failing checks", pr.number, failures.len()),
                    ));
                    let prompt = self.prompts.ci_fix(issue.number, branch, &failures)?;
                    match self
                        .invoker
                        .run(&prompt, iteration, &format!("ci-fix-{remediations}"))
                    {
                        Ok(run) => debug!(commit_delta = run.commit_delta, "remediation finished"),
                        Err(err) => warn!(err = %err, "remediation invocation failed"),
                    }
                    if let Err(err) = self.workspace.push(branch, false) {
                        warn!(err = %err, "push after remediation failed");
                    }
                }
            }
        }
    }

    /// Step 7: apply review feedback. Unlike step 3 there is no strict
    /// progress requirement, and the branch is pushed even when the agent
    /// made no commits (an idempotent no-op push).
    fn incorporate_feedback(&self, iteration: u32, issue: &Issue, branch: &str, pr: &PullRequest) {
        let feedback = match self.tracker.list_feedback(pr.number) {
            Ok(feedback) => feedback,
            Err(err) => {
                warn!(pr = pr.number, err = %err, "feedback fetch failed, skipping");
                return;
            }
        };
        if feedback.is_empty() {
            debug!(pr = pr.number, "no review feedback");
            return;
        }
        info!(pr = pr.number, items = feedback.len(), "incorporating review feedback");
        if let Err(err) = self.workspace.sync(branch) {
            warn!(err = %err, "work branch re-sync failed");
        }
        let prompt = match self.prompts.review(issue.number, branch, &feedback) {
            Ok(prompt) => prompt,
            Err(err) => {
                warn!(err = %err, "review prompt rendering failed, skipping");
                return;
            }
        };
        match self.invoker.run(&prompt, iteration, "review") {
            Ok(run) => debug!(commit_delta = run.commit_delta, "feedback run finished"),
            Err(err) => warn!(err = %err, "feedback invocation failed"),
        }
        if let Err(err) = self.workspace.push(branch, false) {
            warn!(err = %err, "push after feedback failed");
        }
    }

    /// Step 8: one more check-status poll when new commits exist relative
    /// to the remote default branch. Best effort: any result other than an
    /// interrupt proceeds to the merge gate.
    fn reverify(&self, branch: &str, pr: &PullRequest) -> Reverify {
        if !self.cfg.ci.required {
            return Reverify::Done;
        }
        let delta = match self.workspace.commit_delta() {
            Ok(delta) => delta,
            Err(err) => {
                warn!(err = %err, "commit delta check failed, skipping re-verification");
                return Reverify::Done;
            }
        };
        if delta == 0 {
            return Reverify::Done;
        }
        if let Err(err) = self.workspace.push(branch, false) {
            warn!(err = %err, "push before re-verification failed");
        }
        match self.ci.poll(pr.number, &self.cfg.ci_poll_policy(), self.stop) {
            Ok(CiOutcome::Interrupted) => Reverify::Interrupted,
            Ok(outcome) if outcome.is_success() => Reverify::Done,
            Ok(outcome) => {
                warn!(?outcome, "post-feedback verification unsuccessful, proceeding to merge gate");
                Reverify::Done
            }
            Err(err) => {
                warn!(err = %err, "post-feedback verification errored, proceeding to merge gate");
                Reverify::Done
            }
        }
    }

    fn persist(&self, iteration: u32, issue: u64, status: IterationStatus) -> Result<()> {
        write_record(
            &self.paths.record_path,
            &IterationRecord::now(iteration, issue, status),
        )
    }

    /// Persist the terminal record, emit the matching notification, and
    /// wrap up the iteration.
    fn conclude(
        &self,
        iteration: u32,
        issue: &Issue,
        status: IterationStatus,
        detail: &str,
    ) -> Result<IterationOutcome> {
        self.persist(iteration, issue.number, status)?;
        let severity = match status {
            IterationStatus::Completed => Severity::Info,
            IterationStatus::PendingMerge => Severity::Warning,
            _ => Severity::Error,
        };
        self.notify.post(
            &Notification::new(
                severity,
                format!("Iteration {iteration}: {}", status.as_str()),
                detail,
            )
            .with_link(issue.url.clone())
            .with_field("issue", issue.number.to_string()),
        );
        Ok(IterationOutcome::Finished {
            issue: issue.number,
            status,
        })
    }
}
