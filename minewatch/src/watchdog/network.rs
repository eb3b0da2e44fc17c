use std::time::Duration;

use tokio::time::Instant;

use super::watch::{Watch, WatchPolicy};
use super::{TickInput, Validity};

/// Healthy while the reachability probe succeeds.
///
/// Breaks the chain and never restarts the miner: a local network outage
/// is not the miner's fault.
pub struct NetworkWatch {
    interval: Duration,
}

impl NetworkWatch {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl Watch for NetworkWatch {
    fn name(&self) -> &'static str {
        "Network"
    }

    fn policy(&self) -> WatchPolicy {
        WatchPolicy {
            interval: self.interval,
            break_chain: true,
            restart_on_timeout: false,
        }
    }

    fn evaluate(&mut self, _now: Instant, input: &TickInput<'_>) -> bool {
        input.online
    }

    fn status_text(&self, validity: Validity) -> String {
        match validity {
            Validity::Healthy => "ONLINE".into(),
            Validity::Unhealthy => "OFFLINE".into(),
            Validity::Unknown => "N/A".into(),
        }
    }
}
