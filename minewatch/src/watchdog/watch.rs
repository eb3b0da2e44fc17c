//! The `Watch` trait and its bookkeeping.

use std::time::Duration;

use tokio::time::Instant;

use super::{TickInput, Validity};

/// How the chain treats one watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchPolicy {
    /// Continuous unhealthy time tolerated before acting.
    pub interval: Duration,
    /// When unhealthy, later watches are skipped for the tick.
    pub break_chain: bool,
    /// Restart the miner when `interval` elapses; otherwise only reset.
    pub restart_on_timeout: bool,
}

/// One independently clocked health check.
pub trait Watch: Send {
    fn name(&self) -> &'static str;

    fn policy(&self) -> WatchPolicy;

    /// Evaluate this tick's input and return whether the check is healthy.
    fn evaluate(&mut self, now: Instant, input: &TickInput<'_>) -> bool;

    /// Drop any rate-tracking samples.
    fn clear_history(&mut self) {}

    /// Short human-readable status for logs and reports.
    fn status_text(&self, validity: Validity) -> String {
        match validity {
            Validity::Healthy => "VALID".into(),
            Validity::Unhealthy => "INVALID".into(),
            Validity::Unknown => "N/A".into(),
        }
    }
}

/// A watch plus the chain's verdict about it.
pub(super) struct WatchEntry {
    pub watch: Box<dyn Watch>,
    pub valid: Validity,
    /// Last healthy tick, or the first evaluated tick if never healthy.
    pub last_valid: Option<Instant>,
}

impl WatchEntry {
    pub fn new(watch: Box<dyn Watch>) -> Self {
        Self {
            watch,
            valid: Validity::Unknown,
            last_valid: None,
        }
    }

    /// Forget the verdict but keep history.
    pub fn reset(&mut self) {
        self.valid = Validity::Unknown;
        self.last_valid = None;
    }

    /// Forget the verdict and the history.
    pub fn reset_all(&mut self) {
        self.reset();
        self.watch.clear_history();
    }

    pub fn invalid_for(&self, now: Instant) -> Option<Duration> {
        match (self.valid, self.last_valid) {
            (Validity::Unhealthy, Some(since)) => Some(now.saturating_duration_since(since)),
            _ => None,
        }
    }
}
