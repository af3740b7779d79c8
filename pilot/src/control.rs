//! Control surface for an already-running (or stopped) loop.
//!
//! These operations act only on the shared on-disk state (lock, sentinel,
//! latest record); they never touch the working copy, so they are safe to
//! run concurrently with the loop itself.

use std::fs;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use crate::core::poll::{PollOutcome, PollPolicy, poll_until};
use crate::io::lock::{pid_alive, read_owner};
use crate::io::paths::PilotPaths;
use crate::io::state::{IterationRecord, load_record};

/// Point-in-time view of the loop, for the status reporter.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub running: bool,
    pub pid: Option<u32>,
    pub stop_pending: bool,
    pub last_iteration: Option<IterationRecord>,
}

/// Request a graceful stop by arming the sentinel. Idempotent and safe to
/// call while the loop is not running. Returns false when a stop was
/// already pending.
pub fn request_stop(paths: &PilotPaths) -> Result<bool> {
    if paths.stop_path.exists() {
        return Ok(false);
    }
    if let Some(parent) = paths.stop_path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    fs::File::create(&paths.stop_path)
        .with_context(|| format!("create stop sentinel {}", paths.stop_path.display()))?;
    info!("stop requested");
    Ok(true)
}

/// Cancel a pending stop request. Returns false when none was pending.
pub fn cancel_stop(paths: &PilotPaths) -> Result<bool> {
    match fs::remove_file(&paths.stop_path) {
        Ok(()) => {
            info!("pending stop cancelled");
            Ok(true)
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err).with_context(|| {
            format!("remove stop sentinel {}", paths.stop_path.display())
        }),
    }
}

/// Current status: lock ownership, pending stop, and the latest record.
pub fn status(paths: &PilotPaths) -> Result<StatusReport> {
    let pid = read_owner(&paths.lock_path)?;
    let running = pid.is_some_and(pid_alive);
    Ok(StatusReport {
        running,
        pid,
        stop_pending: paths.stop_path.exists(),
        last_iteration: load_record(&paths.record_path)?,
    })
}

/// Forcefully terminate the recorded owner and its child subprocess tree,
/// bypassing graceful shutdown. Returns false when no live owner exists.
#[cfg(unix)]
pub fn force_kill(paths: &PilotPaths) -> Result<bool> {
    use nix::sys::signal::{Signal, kill, killpg};
    use nix::unistd::{Pid, getpgid};

    let Some(pid) = read_owner(&paths.lock_path)? else {
        return Ok(false);
    };
    if !pid_alive(pid) {
        warn!(pid, "recorded owner is already dead");
        remove_stale_lock(paths);
        return Ok(false);
    }

    let target = Pid::from_raw(pid as i32);
    // Prefer the process group so the agent subprocess tree dies with the
    // loop; fall back to the single pid when the group is not its own.
    let signalled = match getpgid(Some(target)) {
        Ok(pgid) if pgid == target => killpg(pgid, Signal::SIGKILL).is_ok(),
        _ => kill(target, Signal::SIGKILL).is_ok(),
    };
    if !signalled {
        warn!(pid, "failed to signal owner process");
        return Ok(false);
    }
    info!(pid, "owner force-killed");
    remove_stale_lock(paths);
    Ok(true)
}

#[cfg(not(unix))]
pub fn force_kill(_paths: &PilotPaths) -> Result<bool> {
    anyhow::bail!("force-kill is only supported on unix")
}

/// How a bounded stop-wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// No live instance was running in the first place.
    NotRunning,
    /// The loop observed the stop request and exited.
    Stopped,
    /// The wait expired and the owner was force-killed.
    Escalated,
    /// The wait expired; the owner is still running.
    TimedOut,
}

/// Request a graceful stop and wait (bounded) for the loop to exit,
/// optionally escalating to a force-kill on timeout.
pub fn wait_stop(paths: &PilotPaths, timeout: Duration, escalate: bool) -> Result<WaitOutcome> {
    let report = status(paths)?;
    if !report.running {
        return Ok(WaitOutcome::NotRunning);
    }
    request_stop(paths)?;

    let policy = PollPolicy::new(timeout, Duration::from_secs(1));
    let outcome = poll_until(
        &policy,
        || {
            let report = status(paths)?;
            Ok(if report.running { None } else { Some(()) })
        },
        || false,
    )?;

    match outcome {
        PollOutcome::Terminal(()) => Ok(WaitOutcome::Stopped),
        PollOutcome::Cancelled | PollOutcome::TimedOut => {
            if escalate {
                force_kill(paths)?;
                Ok(WaitOutcome::Escalated)
            } else {
                Ok(WaitOutcome::TimedOut)
            }
        }
    }
}

fn remove_stale_lock(paths: &PilotPaths) {
    match fs::remove_file(&paths.lock_path) {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => warn!(err = %err, "failed to remove lock after kill"),
    }
}
