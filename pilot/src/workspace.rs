//! Workspace controller: owns the single on-disk working copy.
//!
//! Branch policy invariant: a work branch is never reused across iterations.
//! `prepare` destroys any same-named local or remote branch and recreates it
//! from the upstream default branch, so an iteration can always start from a
//! known-clean state even after a prior crash.

use std::path::Path;

use anyhow::Result;
use tracing::{debug, info, instrument, warn};

use crate::io::git::Git;

pub struct Workspace {
    git: Git,
    remote: String,
    default_branch: String,
}

impl Workspace {
    pub fn new(root: &Path, remote: impl Into<String>, default_branch: impl Into<String>) -> Self {
        Self {
            git: Git::new(root),
            remote: remote.into(),
            default_branch: default_branch.into(),
        }
    }

    /// Deterministic branch name for an issue.
    pub fn branch_name(issue: u64) -> String {
        format!("issue-{issue}")
    }

    fn upstream(&self) -> String {
        format!("{}/{}", self.remote, self.default_branch)
    }

    /// Create a fresh work branch for an issue on top of the latest
    /// upstream default branch. Idempotent: safe to re-run for the same
    /// issue regardless of leftover branch state.
    #[instrument(skip(self))]
    pub fn prepare(&self, issue: u64) -> Result<String> {
        let branch = Self::branch_name(issue);
        self.git.fetch(&self.remote)?;
        self.git.checkout(&self.default_branch)?;
        self.git.reset_hard(&self.upstream())?;
        if self.git.branch_exists(&branch)? {
            self.git.delete_local_branch(&branch)?;
        }
        if self.git.remote_branch_exists(&self.remote, &branch)? {
            self.git.delete_remote_branch(&self.remote, &branch)?;
        }
        self.git.checkout_new(&branch)?;
        info!(issue, branch, "workspace prepared");
        Ok(branch)
    }

    /// Push a work branch. Force-push is safe for freshly prepared branches
    /// (they are never shared across iterations).
    pub fn push(&self, branch: &str, force: bool) -> Result<()> {
        self.git.push(&self.remote, branch, force)
    }

    /// Re-synchronize a work branch with its remote counterpart, picking up
    /// commits pushed by reviewers. Fast-forward only; a diverged branch is
    /// left alone (the caller treats this as best effort).
    pub fn sync(&self, branch: &str) -> Result<()> {
        self.git.fetch(&self.remote)?;
        self.git.pull_ff(&self.remote, branch)
    }

    /// Commits on the current HEAD not reachable from the remote default
    /// branch tip.
    pub fn commit_delta(&self) -> Result<u32> {
        self.git.commits_ahead(&self.upstream())
    }

    /// Return to the default branch and fast-forward it. Runs after every
    /// iteration regardless of outcome.
    #[instrument(skip(self))]
    pub fn reset(&self) -> Result<()> {
        self.git.checkout(&self.default_branch)?;
        self.git.pull_ff(&self.remote, &self.default_branch)?;
        debug!("workspace reset to default branch");
        Ok(())
    }

    pub fn current_branch(&self) -> Result<String> {
        self.git.current_branch()
    }

    /// Root of the working copy, used as the agent's working directory.
    pub fn root(&self) -> &Path {
        self.git.workdir()
    }
}

/// Best-effort reset used on non-fatal paths; failures only warn.
pub fn reset_quietly(workspace: &Workspace) {
    if let Err(err) = workspace.reset() {
        warn!(err = %err, "workspace reset failed");
    }
}
