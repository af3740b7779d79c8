//! Loop configuration stored under `.pilot/config.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Pilot configuration (TOML).
///
/// This file is intended to be edited by humans and must remain stable and
/// automatable. Missing fields default to sensible values; invalid values
/// abort startup before the first iteration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PilotConfig {
    /// Upstream base branch that issues are fixed against.
    pub default_branch: String,

    /// Remote holding the default branch and receiving work branches.
    pub remote: String,

    /// Labels an issue must carry (any of) to qualify. Empty admits all.
    pub include_labels: Vec<String>,

    /// Labels that disqualify an issue.
    pub exclude_labels: Vec<String>,

    /// Total issues processed before the session ends.
    pub max_iterations: u32,

    /// End the session when no issue qualifies. When false, sleep
    /// `idle_backoff_secs` and retry discovery.
    pub stop_when_idle: bool,

    pub idle_backoff_secs: u64,

    /// Webhook endpoint for status notifications. Empty disables delivery.
    pub webhook_url: String,

    pub agent: AgentConfig,
    pub ci: CiConfig,
    pub review: ReviewConfig,
    pub merge: MergeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Command line to execute the coding agent; the prompt is appended as
    /// the final argument.
    pub command: Vec<String>,

    /// Wall-clock budget for one agent invocation.
    pub timeout_minutes: u64,

    /// Truncate agent transcript logs beyond this many bytes.
    pub output_limit_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CiConfig {
    /// When false, pull requests are not gated on check status.
    pub required: bool,

    /// Total minutes to wait for checks to reach a terminal state.
    pub wait_minutes: u64,

    /// Sleep between check-status polls.
    pub check_interval_seconds: u64,

    /// Remediation attempts after a failed or timed-out verification,
    /// i.e. at most `max_retries + 1` verification rounds.
    pub max_retries: u32,

    /// When false, the first failed verification is terminal.
    pub retry_on_failure: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReviewConfig {
    /// Fixed wait before reading review feedback.
    pub wait_minutes: u64,

    /// Gate merging on an explicit approval decision.
    pub require_approval: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MergeConfig {
    /// Squash-merge approved pull requests; when false, leave them open.
    pub auto_merge: bool,
}

impl Default for PilotConfig {
    fn default() -> Self {
        Self {
            default_branch: "main".to_string(),
            remote: "origin".to_string(),
            include_labels: Vec::new(),
            exclude_labels: Vec::new(),
            max_iterations: 10,
            stop_when_idle: true,
            idle_backoff_secs: 300,
            webhook_url: String::new(),
            agent: AgentConfig::default(),
            ci: CiConfig::default(),
            review: ReviewConfig::default(),
            merge: MergeConfig::default(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "claude".to_string(),
                "-p".to_string(),
                "--dangerously-skip-permissions".to_string(),
            ],
            timeout_minutes: 30,
            output_limit_bytes: 100_000,
        }
    }
}

impl Default for CiConfig {
    fn default() -> Self {
        Self {
            required: true,
            wait_minutes: 30,
            check_interval_seconds: 30,
            max_retries: 2,
            retry_on_failure: true,
        }
    }
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            wait_minutes: 10,
            require_approval: true,
        }
    }
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self { auto_merge: true }
    }
}

impl PilotConfig {
    pub fn validate(&self) -> Result<()> {
        if self.default_branch.trim().is_empty() {
            return Err(anyhow!("default_branch must not be empty"));
        }
        if self.remote.trim().is_empty() {
            return Err(anyhow!("remote must not be empty"));
        }
        if self.max_iterations == 0 {
            return Err(anyhow!("max_iterations must be > 0"));
        }
        if !self.stop_when_idle && self.idle_backoff_secs == 0 {
            return Err(anyhow!("idle_backoff_secs must be > 0 when stop_when_idle is false"));
        }
        if self.agent.command.is_empty() || self.agent.command[0].trim().is_empty() {
            return Err(anyhow!("agent.command must be a non-empty array"));
        }
        if self.agent.timeout_minutes == 0 {
            return Err(anyhow!("agent.timeout_minutes must be > 0"));
        }
        if self.agent.output_limit_bytes == 0 {
            return Err(anyhow!("agent.output_limit_bytes must be > 0"));
        }
        if self.ci.required {
            if self.ci.wait_minutes == 0 {
                return Err(anyhow!("ci.wait_minutes must be > 0"));
            }
            if self.ci.check_interval_seconds == 0 {
                return Err(anyhow!("ci.check_interval_seconds must be > 0"));
            }
        }
        Ok(())
    }

    pub fn agent_timeout(&self) -> Duration {
        Duration::from_secs(self.agent.timeout_minutes * 60)
    }

    pub fn ci_poll_policy(&self) -> crate::core::poll::PollPolicy {
        crate::core::poll::PollPolicy::new(
            Duration::from_secs(self.ci.wait_minutes * 60),
            Duration::from_secs(self.ci.check_interval_seconds),
        )
    }

    pub fn review_wait(&self) -> Duration {
        Duration::from_secs(self.review.wait_minutes * 60)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `PilotConfig::default()`.
pub fn load_config(path: &Path) -> Result<PilotConfig> {
    if !path.exists() {
        let cfg = PilotConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: PilotConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &PilotConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, &buf).with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
