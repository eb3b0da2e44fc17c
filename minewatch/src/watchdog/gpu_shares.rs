//! Net-share progress per GPU and currency.

use std::time::Duration;

use tokio::time::Instant;

use super::shares::Window;
use super::watch::{Watch, WatchPolicy};
use super::{TickInput, Validity};
use crate::types::Elapsed;

/// Per-currency net shares, indexed by GPU.
type NetShares = Vec<(String, Vec<i64>)>;

/// Healthy while every GPU makes net progress (accepted minus invalid
/// minus rejected) in every currency across the window.
///
/// A zero delta is stale. A negative delta means the counters went
/// backwards, i.e. the miner restarted inside the window.
pub struct GpuSharesWatch {
    interval: Duration,
    window: Window<NetShares>,
    deltas: Option<NetShares>,
}

impl GpuSharesWatch {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            window: Window::default(),
            deltas: None,
        }
    }

    fn increase(&self) -> Option<NetShares> {
        let (first, last) = self.window.endpoints()?;
        Some(
            last.iter()
                .filter_map(|(currency, newest)| {
                    let (_, oldest) = first.iter().find(|(c, _)| c == currency)?;
                    let deltas = newest.iter().zip(oldest).map(|(n, o)| n - o).collect();
                    Some((currency.clone(), deltas))
                })
                .collect(),
        )
    }

    fn any_delta(&self, pred: impl Fn(i64) -> bool) -> bool {
        self.deltas
            .iter()
            .flatten()
            .flat_map(|(_, gpus)| gpus.iter())
            .any(|&delta| pred(delta))
    }
}

impl Watch for GpuSharesWatch {
    fn name(&self) -> &'static str {
        "GPU shares"
    }

    fn policy(&self) -> WatchPolicy {
        WatchPolicy {
            interval: self.interval,
            break_chain: false,
            restart_on_timeout: true,
        }
    }

    fn evaluate(&mut self, now: Instant, input: &TickInput<'_>) -> bool {
        let sample = input
            .miner
            .mining
            .iter()
            .map(|stats| {
                let net = (0..stats.gpu_count())
                    .map(|gpu| stats.gpu_net_shares(gpu).unwrap_or(0))
                    .collect();
                (stats.currency.clone(), net)
            })
            .collect();
        self.window.push(now, sample, self.interval);

        self.deltas = self.increase();
        !self.any_delta(|delta| delta <= 0)
    }

    fn clear_history(&mut self) {
        self.window.clear();
        self.deltas = None;
    }

    fn status_text(&self, validity: Validity) -> String {
        let state = match validity {
            Validity::Unknown => return "N/A".into(),
            Validity::Healthy => "INCREASING",
            Validity::Unhealthy if self.any_delta(|delta| delta < 0) => "RESET",
            Validity::Unhealthy => "STALE",
        };
        let Some(deltas) = &self.deltas else {
            return state.into();
        };
        let per_currency: Vec<String> = deltas
            .iter()
            .map(|(currency, gpus)| {
                let gpus: Vec<String> = gpus.iter().map(i64::to_string).collect();
                format!("{currency} {}", gpus.join(","))
            })
            .collect();
        format!(
            "{state} ({} in last {})",
            per_currency.join("; "),
            Elapsed::from(self.interval)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::miner_protocol::{MinerSnapshot, MiningStats};

    fn snapshot(accepted: Vec<u64>, rejected: Vec<u64>, invalid: Vec<u64>) -> MinerSnapshot {
        MinerSnapshot {
            miner_online: true,
            uptime: Some(60),
            mining: vec![MiningStats {
                currency: "ETH".into(),
                gpu_hashrates: vec![1.0; accepted.len()],
                gpu_accepted_shares: accepted,
                gpu_rejected_shares: rejected,
                gpu_invalid_shares: invalid,
                ..Default::default()
            }],
        }
    }

    fn feed(watch: &mut GpuSharesWatch, at: Instant, miner: MinerSnapshot) -> bool {
        watch.evaluate(
            at,
            &TickInput {
                online: true,
                miner: &miner,
            },
        )
    }

    #[test]
    fn all_gpus_progressing_is_healthy() {
        let t0 = Instant::now();
        let mut watch = GpuSharesWatch::new(Duration::from_secs(180));
        feed(&mut watch, t0, snapshot(vec![10, 20], vec![0, 0], vec![0, 0]));
        let healthy = feed(
            &mut watch,
            t0 + Duration::from_secs(10),
            snapshot(vec![12, 25], vec![1, 0], vec![0, 0]),
        );
        assert!(healthy);
        assert_eq!(
            watch.status_text(Validity::Healthy),
            "INCREASING (ETH 1,5 in last 3m0s)"
        );
    }

    #[test]
    fn rejects_can_cancel_progress() {
        let t0 = Instant::now();
        let mut watch = GpuSharesWatch::new(Duration::from_secs(180));
        feed(&mut watch, t0, snapshot(vec![10, 20], vec![0, 0], vec![0, 0]));
        let healthy = feed(
            &mut watch,
            t0 + Duration::from_secs(10),
            snapshot(vec![12, 25], vec![1, 0], vec![1, 0]),
        );
        assert!(!healthy);
        assert!(watch.status_text(Validity::Unhealthy).starts_with("STALE"));
    }

    #[test]
    fn falling_counters_read_as_reset() {
        let t0 = Instant::now();
        let mut watch = GpuSharesWatch::new(Duration::from_secs(180));
        feed(&mut watch, t0, snapshot(vec![100], vec![0], vec![0]));
        let healthy = feed(
            &mut watch,
            t0 + Duration::from_secs(10),
            snapshot(vec![3], vec![0], vec![0]),
        );
        assert!(!healthy);
        assert_eq!(
            watch.status_text(Validity::Unhealthy),
            "RESET (ETH -97 in last 3m0s)"
        );
    }

    #[test]
    fn single_sample_is_healthy() {
        let mut watch = GpuSharesWatch::new(Duration::from_secs(180));
        assert!(feed(
            &mut watch,
            Instant::now(),
            snapshot(vec![0], vec![0], vec![0])
        ));
    }
}
