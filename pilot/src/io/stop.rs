//! Cooperative cancellation via a stop sentinel.
//!
//! An interrupt never kills mid-operation: the signal handler only arms the
//! stop request (flag + sentinel file), and the loop observes it at
//! well-defined suspension points, finishing the current unit of work first.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use tracing::{info, warn};

/// Watches the stop sentinel and the in-process interrupt flag.
#[derive(Debug, Clone)]
pub struct StopController {
    sentinel: PathBuf,
    interrupted: Arc<AtomicBool>,
}

impl StopController {
    pub fn new(sentinel: PathBuf) -> Self {
        Self {
            sentinel,
            interrupted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Install the interrupt handler. The handler performs no unsafe work:
    /// it sets the flag and touches the sentinel so the request survives a
    /// restart, then returns.
    pub fn install_interrupt_handler(&self) -> Result<()> {
        let interrupted = Arc::clone(&self.interrupted);
        let sentinel = self.sentinel.clone();
        ctrlc::set_handler(move || {
            interrupted.store(true, Ordering::SeqCst);
            if let Err(err) = fs::File::create(&sentinel) {
                warn!(err = %err, "failed to arm stop sentinel from interrupt");
            }
        })
        .context("install interrupt handler")?;
        Ok(())
    }

    /// Whether a stop has been requested. Checked at every suspension point
    /// and between state-machine steps.
    pub fn should_stop(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst) || self.sentinel.exists()
    }

    /// Consume the sentinel after honoring it. Part of the cooperative
    /// shutdown path, distinct from any error exit.
    pub fn acknowledge(&self) {
        match fs::remove_file(&self.sentinel) {
            Ok(()) => info!("stop sentinel consumed"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!(err = %err, "failed to consume stop sentinel"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_presence_requests_stop() {
        let temp = tempfile::tempdir().expect("tempdir");
        let sentinel = temp.path().join("stop");
        let stop = StopController::new(sentinel.clone());

        assert!(!stop.should_stop());
        fs::File::create(&sentinel).expect("arm");
        assert!(stop.should_stop());
    }

    #[test]
    fn acknowledge_consumes_the_sentinel() {
        let temp = tempfile::tempdir().expect("tempdir");
        let sentinel = temp.path().join("stop");
        fs::File::create(&sentinel).expect("arm");
        let stop = StopController::new(sentinel.clone());

        stop.acknowledge();
        assert!(!sentinel.exists());
        // Idempotent when already consumed.
        stop.acknowledge();
    }

    #[test]
    fn interrupt_flag_requests_stop_without_a_sentinel() {
        let temp = tempfile::tempdir().expect("tempdir");
        let stop = StopController::new(temp.path().join("stop"));
        stop.interrupted.store(true, Ordering::SeqCst);
        assert!(stop.should_stop());
    }
}
