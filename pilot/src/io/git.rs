//! Git adapter for the workspace controller.
//!
//! The loop owns a single working copy and mutates it across iterations, so
//! we keep a small, explicit wrapper around `git` subprocess calls instead
//! of parsing output at call sites.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Return the current branch name (errors on detached HEAD).
    #[instrument(skip_all)]
    pub fn current_branch(&self) -> Result<String> {
        let out = self.run_capture(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        let name = out.trim().to_string();
        if name == "HEAD" {
            warn!("detached HEAD detected");
            return Err(anyhow!("detached HEAD (refuse to run)"));
        }
        debug!(branch = %name, "current branch");
        Ok(name)
    }

    /// Fetch all branches (and prune deleted ones) from a remote.
    #[instrument(skip_all, fields(remote))]
    pub fn fetch(&self, remote: &str) -> Result<()> {
        self.run_checked(&["fetch", "--prune", remote])?;
        Ok(())
    }

    /// Checkout an existing branch.
    #[instrument(skip_all, fields(branch))]
    pub fn checkout(&self, branch: &str) -> Result<()> {
        debug!(branch, "checking out branch");
        self.run_checked(&["checkout", branch])?;
        Ok(())
    }

    /// Create and checkout a new branch at current HEAD.
    #[instrument(skip_all, fields(branch))]
    pub fn checkout_new(&self, branch: &str) -> Result<()> {
        debug!(branch, "creating and checking out new branch");
        self.run_checked(&["checkout", "-b", branch])?;
        Ok(())
    }

    /// Hard-reset the worktree to a reference.
    #[instrument(skip_all, fields(target))]
    pub fn reset_hard(&self, target: &str) -> Result<()> {
        self.run_checked(&["reset", "--hard", target])?;
        Ok(())
    }

    /// Fast-forward the current branch from a remote branch.
    #[instrument(skip_all, fields(remote, branch))]
    pub fn pull_ff(&self, remote: &str, branch: &str) -> Result<()> {
        self.run_checked(&["pull", "--ff-only", remote, branch])?;
        Ok(())
    }

    /// Check whether a local branch exists.
    pub fn branch_exists(&self, branch: &str) -> Result<bool> {
        let status = self
            .run(&[
                "show-ref",
                "--verify",
                "--quiet",
                &format!("refs/heads/{branch}"),
            ])?
            .status;
        Ok(status.success())
    }

    /// Check whether a branch exists on a remote.
    ///
    /// Queries the remote directly so the answer does not depend on the
    /// freshness of local remote-tracking refs.
    pub fn remote_branch_exists(&self, remote: &str, branch: &str) -> Result<bool> {
        let out = self.run(&[
            "ls-remote",
            "--exit-code",
            "--heads",
            remote,
            &format!("refs/heads/{branch}"),
        ])?;
        match out.status.code() {
            Some(0) => Ok(true),
            Some(2) => Ok(false),
            _ => {
                let stderr = String::from_utf8_lossy(&out.stderr);
                Err(anyhow!("git ls-remote {remote} failed: {}", stderr.trim()))
            }
        }
    }

    /// Delete a local branch, discarding unmerged commits.
    #[instrument(skip_all, fields(branch))]
    pub fn delete_local_branch(&self, branch: &str) -> Result<()> {
        debug!(branch, "deleting local branch");
        self.run_checked(&["branch", "-D", branch])?;
        Ok(())
    }

    /// Delete a branch on a remote.
    #[instrument(skip_all, fields(remote, branch))]
    pub fn delete_remote_branch(&self, remote: &str, branch: &str) -> Result<()> {
        debug!(remote, branch, "deleting remote branch");
        self.run_checked(&["push", remote, "--delete", branch])?;
        Ok(())
    }

    /// Push a branch to a remote, optionally forced.
    #[instrument(skip_all, fields(remote, branch, force))]
    pub fn push(&self, remote: &str, branch: &str, force: bool) -> Result<()> {
        debug!(remote, branch, force, "pushing branch");
        if force {
            self.run_checked(&["push", "--force", "--set-upstream", remote, branch])?;
        } else {
            self.run_checked(&["push", "--set-upstream", remote, branch])?;
        }
        Ok(())
    }

    /// Count commits on the current HEAD that are not reachable from `base`.
    pub fn commits_ahead(&self, base: &str) -> Result<u32> {
        let range = format!("{base}..HEAD");
        let out = self.run_capture(&["rev-list", "--count", &range])?;
        out.trim()
            .parse::<u32>()
            .with_context(|| format!("parse rev-list count '{}'", out.trim()))
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}
