//! Bounded agent invocation with commit-delta verification.
//!
//! Completion is verified by counting commits, never by trusting the
//! agent's own "done" signal: a clean exit with zero new commits is a
//! failure for the implement stage.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use tracing::{info, instrument, warn};

use crate::io::agent::{AgentExit, AgentRequest, CodingAgent};
use crate::workspace::Workspace;

/// Result of one invocation: how the process ended plus the number of new
/// commits it produced relative to the default branch tip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentRun {
    pub exit: AgentExit,
    pub commit_delta: u32,
}

impl AgentRun {
    /// Strict success: clean exit AND forward progress.
    pub fn made_progress(&self) -> bool {
        self.exit.is_clean() && self.commit_delta > 0
    }
}

pub struct AgentInvoker<'a, A: CodingAgent> {
    agent: &'a A,
    workspace: &'a Workspace,
    logs_dir: PathBuf,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl<'a, A: CodingAgent> AgentInvoker<'a, A> {
    pub fn new(
        agent: &'a A,
        workspace: &'a Workspace,
        logs_dir: PathBuf,
        timeout: Duration,
        output_limit_bytes: usize,
    ) -> Self {
        Self {
            agent,
            workspace,
            logs_dir,
            timeout,
            output_limit_bytes,
        }
    }

    /// Run the agent against a prompt. The transcript lands in
    /// `.pilot/logs/iter-<n>-<label>.log`.
    #[instrument(skip_all, fields(iteration, label))]
    pub fn run(&self, prompt: &str, iteration: u32, label: &str) -> Result<AgentRun> {
        let before = self.workspace.commit_delta()?;
        let request = AgentRequest {
            workdir: self.workspace.root().to_path_buf(),
            prompt: prompt.to_string(),
            log_path: self.logs_dir.join(format!("iter-{iteration}-{label}.log")),
            timeout: self.timeout,
            output_limit_bytes: self.output_limit_bytes,
        };
        let exit = self.agent.run(&request)?;
        let after = self.workspace.commit_delta()?;
        let run = AgentRun {
            exit,
            commit_delta: after.saturating_sub(before),
        };

        match run.exit {
            AgentExit::Completed => {
                info!(commit_delta = run.commit_delta, "agent finished")
            }
            AgentExit::Failed(code) => warn!(?code, "agent exited non-zero"),
            AgentExit::TimedOut => warn!("agent hit wall-clock timeout"),
        }
        Ok(run)
    }
}
