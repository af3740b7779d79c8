//! CI watcher: polls check status for a pull request until terminal.

use anyhow::Result;
use tracing::{debug, info, instrument, warn};

use crate::core::checks::{self, CheckFailure, CheckStatus};
use crate::core::poll::{PollOutcome, PollPolicy, poll_until};
use crate::io::stop::StopController;
use crate::io::tracker::IssueTracker;

/// Terminal result of one verification round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CiOutcome {
    Passed,
    /// No checks are configured for the repository; vacuously passing.
    NoChecks,
    Failed,
    /// Checks never reached a terminal state within the budget.
    TimedOut,
    /// A stop request halted polling.
    Interrupted,
}

impl CiOutcome {
    pub fn is_success(self) -> bool {
        matches!(self, CiOutcome::Passed | CiOutcome::NoChecks)
    }
}

pub struct CiWatcher<'a, T: IssueTracker> {
    tracker: &'a T,
}

impl<'a, T: IssueTracker> CiWatcher<'a, T> {
    pub fn new(tracker: &'a T) -> Self {
        Self { tracker }
    }

    /// Poll classified check status until terminal, timeout, or stop.
    /// The stop signal is consulted on every poll cycle.
    #[instrument(skip_all, fields(pr = pr_number))]
    pub fn poll(
        &self,
        pr_number: u64,
        policy: &PollPolicy,
        stop: &StopController,
    ) -> Result<CiOutcome> {
        let outcome = poll_until(
            policy,
            || {
                let checks = self.tracker.list_checks(pr_number)?;
                let status = checks::classify(&checks);
                debug!(?status, count = checks.len(), "check status");
                Ok(match status {
                    CheckStatus::Pending => None,
                    CheckStatus::Passed => Some(CiOutcome::Passed),
                    CheckStatus::NoChecks => Some(CiOutcome::NoChecks),
                    CheckStatus::Failed => Some(CiOutcome::Failed),
                })
            },
            || stop.should_stop(),
        )?;

        Ok(match outcome {
            PollOutcome::Terminal(terminal) => {
                info!(?terminal, "check polling reached a terminal state");
                terminal
            }
            PollOutcome::Cancelled => {
                info!("check polling halted by stop request");
                CiOutcome::Interrupted
            }
            PollOutcome::TimedOut => {
                warn!("check polling timed out");
                CiOutcome::TimedOut
            }
        })
    }

    /// Names and detail links of the currently failed checks, used to build
    /// remediation prompts.
    pub fn failure_detail(&self, pr_number: u64) -> Result<Vec<CheckFailure>> {
        let results = self.tracker.list_checks(pr_number)?;
        Ok(checks::failures(&results))
    }
}
