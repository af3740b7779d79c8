//! Single-instance lock keyed by process identity.
//!
//! The working copy is an unsynchronized shared resource: two instances
//! interleaving git operations against it would corrupt state. The lock file
//! records the owning pid; a live owner blocks acquisition, a dead owner is
//! reclaimed automatically.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};

/// Returned when a live instance already holds the lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlreadyRunningError {
    pub pid: u32,
}

impl fmt::Display for AlreadyRunningError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "another instance is running (pid {})", self.pid)
    }
}

impl std::error::Error for AlreadyRunningError {}

/// Exclusive lock held for the lifetime of the guard; released on `Drop`
/// on every exit path, including cooperative shutdown.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
}

/// Acquire the singleton lock.
///
/// A recorded owner that is still alive fails the acquisition without
/// touching any shared state; a dead owner is reclaimed with a warning.
pub fn acquire(path: &Path) -> Result<LockGuard> {
    if let Some(owner) = read_owner(path)? {
        if pid_alive(owner) {
            return Err(AlreadyRunningError { pid: owner }.into());
        }
        warn!(stale_pid = owner, "reclaiming lock from dead process");
    }

    let pid = std::process::id();
    let parent = path
        .parent()
        .with_context(|| format!("lock path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("lock.tmp");
    fs::write(&tmp_path, format!("{pid}\n"))
        .with_context(|| format!("write temp lock {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace lock {}", path.display()))?;

    debug!(pid, path = %path.display(), "lock acquired");
    Ok(LockGuard {
        path: path.to_path_buf(),
    })
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "lock released"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!(path = %self.path.display(), err = %err, "failed to release lock"),
        }
    }
}

/// Read the recorded owner pid, if any. Unreadable contents are treated as
/// a stale lock (warned, reclaimable).
pub fn read_owner(path: &Path) -> Result<Option<u32>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents =
        fs::read_to_string(path).with_context(|| format!("read lock {}", path.display()))?;
    match contents.trim().parse::<u32>() {
        Ok(pid) => Ok(Some(pid)),
        Err(_) => {
            warn!(path = %path.display(), "lock file holds no valid pid, treating as stale");
            Ok(None)
        }
    }
}

/// Probe whether a process with the given pid is alive.
#[cfg(unix)]
pub fn pid_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    match kill(Pid::from_raw(pid as i32), None) {
        Ok(()) => true,
        Err(nix::errno::Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
pub fn pid_alive(_pid: u32) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    fn dead_pid() -> u32 {
        // Spawn and reap a short-lived child; its pid is no longer alive.
        let child = Command::new("true").spawn().expect("spawn");
        let pid = child.id();
        let mut child = child;
        child.wait().expect("wait");
        pid
    }

    #[test]
    fn acquire_writes_own_pid_and_releases_on_drop() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("pilot.lock");

        {
            let _guard = acquire(&path).expect("acquire");
            assert_eq!(read_owner(&path).expect("read"), Some(std::process::id()));
        }
        assert!(!path.exists(), "lock must be released on drop");
    }

    #[test]
    fn live_owner_blocks_second_acquisition_without_mutating_state() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("pilot.lock");
        let _guard = acquire(&path).expect("first acquire");

        let err = acquire(&path).expect_err("second acquire must fail");
        let already = err
            .downcast_ref::<AlreadyRunningError>()
            .expect("typed error");
        assert_eq!(already.pid, std::process::id());
        // The original owner's lock is untouched.
        assert_eq!(read_owner(&path).expect("read"), Some(std::process::id()));
    }

    #[test]
    fn dead_owner_is_reclaimed() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("pilot.lock");
        fs::write(&path, format!("{}\n", dead_pid())).expect("seed stale lock");

        let _guard = acquire(&path).expect("reclaim");
        assert_eq!(read_owner(&path).expect("read"), Some(std::process::id()));
    }

    #[test]
    fn garbage_lock_contents_are_reclaimable() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("pilot.lock");
        fs::write(&path, "not-a-pid\n").expect("seed garbage");

        assert_eq!(read_owner(&path).expect("read"), None);
        let _guard = acquire(&path).expect("acquire over garbage");
    }
}
