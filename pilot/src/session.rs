//! Main loop: bounds total iterations and aggregates session results.

use std::thread;
use std::time::Duration;

use anyhow::Result;
use tracing::{error, info, warn};

use crate::config::PilotConfig;
use crate::core::status::IterationStatus;
use crate::io::agent::CodingAgent;
use crate::io::notify::{Notification, NotificationSink};
use crate::io::stop::StopController;
use crate::io::tracker::IssueTracker;
use crate::iteration::{IterationEngine, IterationOutcome};

/// Aggregated results of one session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSummary {
    /// Issues that reached a terminal status.
    pub iterations: u32,
    pub completed: u32,
    pub failed: u32,
    pub pending_merge: u32,
    /// True when the session ended on a stop request.
    pub stopped: bool,
}

pub struct SessionLoop<'a, T: IssueTracker, A: CodingAgent> {
    cfg: &'a PilotConfig,
    engine: IterationEngine<'a, T, A>,
    notify: &'a dyn NotificationSink,
    stop: &'a StopController,
}

impl<'a, T: IssueTracker, A: CodingAgent> SessionLoop<'a, T, A> {
    pub fn new(
        cfg: &'a PilotConfig,
        engine: IterationEngine<'a, T, A>,
        notify: &'a dyn NotificationSink,
        stop: &'a StopController,
    ) -> Self {
        Self {
            cfg,
            engine,
            notify,
            stop,
        }
    }

    /// Run iterations until the configured bound, an empty queue (when
    /// configured to stop on it), or a stop request. A single iteration's
    /// failure never aborts the session.
    pub fn run(&self) -> Result<SessionSummary> {
        info!(max_iterations = self.cfg.max_iterations, "session starting");
        self.notify.post(&Notification::info(
            "Session started",
            format!("Processing up to {} issues", self.cfg.max_iterations),
        ));

        let mut summary = SessionSummary::default();
        loop {
            if summary.iterations >= self.cfg.max_iterations {
                info!("iteration bound reached");
                break;
            }
            if self.stop.should_stop() {
                summary.stopped = true;
                break;
            }

            let iteration = summary.iterations + 1;
            match self.engine.run_iteration(iteration) {
                Ok(IterationOutcome::Interrupted) => {
                    summary.stopped = true;
                    break;
                }
                Ok(IterationOutcome::NoIssues) => {
                    if self.cfg.stop_when_idle {
                        info!("issue queue empty, ending session");
                        break;
                    }
                    if self.stop.should_stop() {
                        summary.stopped = true;
                        break;
                    }
                    info!(secs = self.cfg.idle_backoff_secs, "issue queue empty, backing off");
                    thread::sleep(Duration::from_secs(self.cfg.idle_backoff_secs));
                }
                Ok(IterationOutcome::Finished { issue, status }) => {
                    summary.iterations += 1;
                    match status {
                        IterationStatus::Completed => summary.completed += 1,
                        IterationStatus::PendingMerge => summary.pending_merge += 1,
                        _ => summary.failed += 1,
                    }
                    info!(iteration, issue, status = status.as_str(), "iteration finished");
                }
                Err(err) => {
                    // Infrastructure faults (e.g. the record file is not
                    // writable) count against the failure tally but must not
                    // abort the session.
                    summary.iterations += 1;
                    summary.failed += 1;
                    error!(iteration, err = %err, "iteration errored");
                    self.notify.post(&Notification::error(
                        format!("Iteration {iteration} errored"),
                        format!("{err:#}"),
                    ));
                }
            }
        }

        if summary.stopped {
            info!("stop requested, shutting down cleanly");
            self.stop.acknowledge();
            self.notify.post(&Notification::info(
                "Session stopped",
                "Stop request honored; shutting down cleanly",
            ));
        }
        self.notify.post(
            &Notification::info(
                "Session finished",
                format!(
                    "{} completed, {} failed, {} pending merge",
                    summary.completed, summary.failed, summary.pending_merge
                ),
            )
            .with_field("iterations", summary.iterations.to_string()),
        );
        info!(
            iterations = summary.iterations,
            completed = summary.completed,
            failed = summary.failed,
            pending_merge = summary.pending_merge,
            stopped = summary.stopped,
            "session finished"
        );
        Ok(summary)
    }
}
