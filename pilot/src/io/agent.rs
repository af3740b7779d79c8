//! Coding-agent executor.
//!
//! The [`CodingAgent`] trait decouples the loop from the actual agent
//! backend (a prompted CLI subprocess). Tests use scripted agents that make
//! commits directly without spawning processes.

use std::fs;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::io::process::run_command_with_timeout;

/// Parameters for one agent invocation.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    /// Working directory for the agent process (the git checkout).
    pub workdir: PathBuf,
    /// Prompt text describing the task.
    pub prompt: String,
    /// Path to write the captured transcript.
    pub log_path: PathBuf,
    /// Hard wall-clock budget.
    pub timeout: Duration,
    /// Truncate the transcript beyond this many bytes.
    pub output_limit_bytes: usize,
}

/// How the agent process ended. Timeout and non-zero exit are both
/// failures but are reported distinctly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentExit {
    Completed,
    Failed(Option<i32>),
    TimedOut,
}

impl AgentExit {
    pub fn is_clean(self) -> bool {
        self == AgentExit::Completed
    }
}

/// Abstraction over coding-agent backends.
pub trait CodingAgent {
    /// Run the agent. `Err` means the invocation itself could not be
    /// carried out (spawn failure, log write failure); an unproductive or
    /// crashed agent is an `Ok` with a non-`Completed` exit.
    fn run(&self, request: &AgentRequest) -> Result<AgentExit>;
}

/// Agent backend spawning a configured command line, prompt appended as the
/// final argument.
#[derive(Debug, Clone)]
pub struct CommandAgent {
    command: Vec<String>,
}

impl CommandAgent {
    pub fn new(command: Vec<String>) -> Result<Self> {
        if command.is_empty() || command[0].trim().is_empty() {
            return Err(anyhow!("agent command must not be empty"));
        }
        Ok(Self { command })
    }
}

impl CodingAgent for CommandAgent {
    #[instrument(skip_all, fields(timeout_secs = request.timeout.as_secs()))]
    fn run(&self, request: &AgentRequest) -> Result<AgentExit> {
        info!(workdir = %request.workdir.display(), "starting coding agent");

        let mut cmd = Command::new(&self.command[0]);
        cmd.args(&self.command[1..])
            .arg(&request.prompt)
            .current_dir(&request.workdir);

        let output = run_command_with_timeout(
            cmd,
            None,
            request.timeout,
            request.output_limit_bytes,
        )
        .context("run coding agent")?;

        if let Some(parent) = request.log_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create agent log dir {}", parent.display()))?;
        }
        fs::write(
            &request.log_path,
            output.transcript("agent", request.output_limit_bytes),
        )
        .with_context(|| format!("write agent log {}", request.log_path.display()))?;

        if output.timed_out {
            warn!(timeout_secs = request.timeout.as_secs(), "coding agent timed out");
            return Ok(AgentExit::TimedOut);
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "coding agent exited non-zero");
            return Ok(AgentExit::Failed(output.status.code()));
        }

        debug!("coding agent completed");
        Ok(AgentExit::Completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(workdir: &std::path::Path, log: &std::path::Path) -> AgentRequest {
        AgentRequest {
            workdir: workdir.to_path_buf(),
            prompt: "do the thing".to_string(),
            log_path: log.to_path_buf(),
            timeout: Duration::from_secs(5),
            output_limit_bytes: 10_000,
        }
    }

    #[test]
    fn clean_exit_reports_completed_and_writes_transcript() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = temp.path().join("agent.log");
        let agent = CommandAgent::new(vec!["true".to_string()]).expect("agent");

        let exit = agent.run(&request(temp.path(), &log)).expect("run");
        assert_eq!(exit, AgentExit::Completed);
        assert!(log.is_file());
    }

    #[test]
    fn nonzero_exit_reports_failed_with_code() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = temp.path().join("agent.log");
        let agent =
            CommandAgent::new(vec!["sh".to_string(), "-c".to_string(), "exit 3; #".to_string()])
                .expect("agent");

        let exit = agent.run(&request(temp.path(), &log)).expect("run");
        assert_eq!(exit, AgentExit::Failed(Some(3)));
    }

    #[test]
    fn timeout_is_reported_distinctly() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = temp.path().join("agent.log");
        let agent =
            CommandAgent::new(vec!["sh".to_string(), "-c".to_string(), "sleep 10 #".to_string()])
                .expect("agent");

        let mut req = request(temp.path(), &log);
        req.timeout = Duration::from_millis(50);
        let exit = agent.run(&req).expect("run");
        assert_eq!(exit, AgentExit::TimedOut);
        let transcript = fs::read_to_string(&log).expect("log");
        assert!(transcript.contains("[agent timed out]"));
    }

    #[test]
    fn empty_command_is_rejected() {
        assert!(CommandAgent::new(Vec::new()).is_err());
    }
}
