//! Generic poll-until-terminal primitive.
//!
//! One loop serves every bounded wait in the system (CI checks, stop-wait in
//! the control surface) so the timeout/interval/cancellation discipline is
//! written exactly once.

use std::time::{Duration, Instant};

use anyhow::Result;

/// Timeout and sleep granularity for one polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub max_wait: Duration,
    pub interval: Duration,
}

impl PollPolicy {
    pub fn new(max_wait: Duration, interval: Duration) -> Self {
        Self { max_wait, interval }
    }
}

/// How a polling loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome<T> {
    /// The probe reported a terminal value.
    Terminal(T),
    /// Cancellation was requested; polling halted within one interval.
    Cancelled,
    /// The policy budget elapsed without a terminal probe result.
    TimedOut,
}

/// Run `probe` until it yields a terminal value, `cancelled` reports true,
/// or `policy.max_wait` elapses.
///
/// `cancelled` is consulted before every probe and again before every sleep,
/// so a stop request takes effect within a single interval. The probe runs
/// at least once even with a zero budget.
pub fn poll_until<T>(
    policy: &PollPolicy,
    mut probe: impl FnMut() -> Result<Option<T>>,
    mut cancelled: impl FnMut() -> bool,
) -> Result<PollOutcome<T>> {
    let deadline = Instant::now() + policy.max_wait;
    loop {
        if cancelled() {
            return Ok(PollOutcome::Cancelled);
        }
        if let Some(value) = probe()? {
            return Ok(PollOutcome::Terminal(value));
        }
        if Instant::now() >= deadline {
            return Ok(PollOutcome::TimedOut);
        }
        if cancelled() {
            return Ok(PollOutcome::Cancelled);
        }
        std::thread::sleep(policy.interval);
    }
}
