//! On-disk layout under `.pilot/` in the working copy root.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Resolved paths for all pilot-owned files in a working copy.
#[derive(Debug, Clone)]
pub struct PilotPaths {
    pub root: PathBuf,
    pub pilot_dir: PathBuf,
    pub config_path: PathBuf,
    pub lock_path: PathBuf,
    pub stop_path: PathBuf,
    pub state_dir: PathBuf,
    pub record_path: PathBuf,
    pub logs_dir: PathBuf,
}

impl PilotPaths {
    pub fn new(root: &Path) -> Self {
        let pilot_dir = root.join(".pilot");
        let state_dir = pilot_dir.join("state");
        Self {
            root: root.to_path_buf(),
            config_path: pilot_dir.join("config.toml"),
            lock_path: pilot_dir.join("pilot.lock"),
            stop_path: pilot_dir.join("stop"),
            record_path: state_dir.join("last_iteration.json"),
            logs_dir: pilot_dir.join("logs"),
            state_dir,
            pilot_dir,
        }
    }

    /// Create the `.pilot/` directory tree and keep it out of version
    /// control, so workspace resets and agent commits never touch it.
    pub fn ensure_layout(&self) -> Result<()> {
        for dir in [&self.pilot_dir, &self.state_dir, &self.logs_dir] {
            fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
        }
        let gitignore = self.pilot_dir.join(".gitignore");
        if !gitignore.exists() {
            fs::write(&gitignore, "*\n")
                .with_context(|| format!("write {}", gitignore.display()))?;
        }
        Ok(())
    }
}
