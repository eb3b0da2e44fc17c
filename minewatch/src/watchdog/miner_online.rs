use std::time::Duration;

use tokio::time::Instant;

use super::watch::{Watch, WatchPolicy};
use super::{TickInput, Validity};

/// Healthy while the miner answers and reports at least one currency.
pub struct MinerOnlineWatch {
    interval: Duration,
}

impl MinerOnlineWatch {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl Watch for MinerOnlineWatch {
    fn name(&self) -> &'static str {
        "Miner"
    }

    fn policy(&self) -> WatchPolicy {
        WatchPolicy {
            interval: self.interval,
            break_chain: true,
            restart_on_timeout: true,
        }
    }

    fn evaluate(&mut self, _now: Instant, input: &TickInput<'_>) -> bool {
        input.miner.is_mining()
    }

    fn status_text(&self, validity: Validity) -> String {
        match validity {
            Validity::Healthy => "ONLINE".into(),
            Validity::Unhealthy => "OFFLINE".into(),
            Validity::Unknown => "N/A".into(),
        }
    }
}
