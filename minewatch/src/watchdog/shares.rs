//! Accepted-share progress per currency.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

use super::watch::{Watch, WatchPolicy};
use super::{TickInput, Validity};
use crate::types::Elapsed;

/// Time-bounded sample window shared by the share watches.
#[derive(Debug)]
pub(super) struct Window<V> {
    samples: VecDeque<(Instant, V)>,
}

impl<V> Default for Window<V> {
    fn default() -> Self {
        Self {
            samples: VecDeque::new(),
        }
    }
}

impl<V> Window<V> {
    /// Append a sample and drop those older than `span`.
    pub fn push(&mut self, now: Instant, value: V, span: Duration) {
        self.samples.push_back((now, value));
        while let Some((at, _)) = self.samples.front() {
            if now.saturating_duration_since(*at) > span {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Oldest and newest samples, once there are at least two.
    pub fn endpoints(&self) -> Option<(&V, &V)> {
        if self.samples.len() < 2 {
            return None;
        }
        let (_, first) = self.samples.front()?;
        let (_, last) = self.samples.back()?;
        Some((first, last))
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.samples.len()
    }
}

/// Healthy while every currency's accepted-share count grows across the
/// window.
///
/// Fewer than two samples count as healthy.
pub struct SharesWatch {
    interval: Duration,
    window: Window<Vec<(String, u64)>>,
    /// Per-currency increase across the window, from the last evaluation.
    deltas: Option<Vec<(String, i64)>>,
}

impl SharesWatch {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            window: Window::default(),
            deltas: None,
        }
    }

    fn increase(&self) -> Option<Vec<(String, i64)>> {
        let (first, last) = self.window.endpoints()?;
        Some(
            last.iter()
                .filter_map(|(currency, newest)| {
                    let (_, oldest) = first.iter().find(|(c, _)| c == currency)?;
                    Some((currency.clone(), *newest as i64 - *oldest as i64))
                })
                .collect(),
        )
    }
}

impl Watch for SharesWatch {
    fn name(&self) -> &'static str {
        "Shares"
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
            .map(|stats| (stats.currency.clone(), stats.accepted_shares))
            .collect();
        self.window.push(now, sample, self.interval);

        self.deltas = self.increase();
        self.deltas
            .as_ref()
            .is_none_or(|deltas| deltas.iter().all(|(_, delta)| *delta > 0))
    }

    fn clear_history(&mut self) {
        self.window.clear();
        self.deltas = None;
    }

    fn status_text(&self, validity: Validity) -> String {
        let state = match validity {
            Validity::Healthy => "INCREASING",
            Validity::Unhealthy => "STALE",
            Validity::Unknown => return "N/A".into(),
        };
        match &self.deltas {
            Some(deltas) => {
                let deltas: Vec<String> = deltas.iter().map(|(_, d)| d.to_string()).collect();
                format!(
                    "{state} ({} in last {})",
                    deltas.join(","),
                    Elapsed::from(self.interval)
                )
            }
            None => state.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::miner_protocol::{MinerSnapshot, MiningStats};

    fn snapshot(accepted: &[(&str, u64)]) -> MinerSnapshot {
        MinerSnapshot {
            miner_online: true,
            uptime: Some(60),
            mining: accepted
                .iter()
                .map(|(currency, shares)| MiningStats {
                    currency: currency.to_string(),
                    accepted_shares: *shares,
                    ..Default::default()
                })
                .collect(),
        }
    }

    fn feed(watch: &mut SharesWatch, at: Instant, accepted: &[(&str, u64)]) -> bool {
        let miner = snapshot(accepted);
        watch.evaluate(
            at,
            &TickInput {
                online: true,
                miner: &miner,
            },
        )
    }

    #[test]
    fn increasing_shares_are_healthy() {
        let t0 = Instant::now();
        let mut watch = SharesWatch::new(Duration::from_secs(180));
        assert!(feed(&mut watch, t0, &[("ETH", 100)]));
        assert!(feed(&mut watch, t0 + Duration::from_secs(10), &[("ETH", 105)]));
        assert_eq!(
            watch.status_text(Validity::Healthy),
            "INCREASING (5 in last 3m0s)"
        );
    }

    #[test]
    fn flat_shares_are_unhealthy() {
        let t0 = Instant::now();
        let mut watch = SharesWatch::new(Duration::from_secs(180));
        feed(&mut watch, t0, &[("ETH", 100)]);
        assert!(!feed(&mut watch, t0 + Duration::from_secs(10), &[("ETH", 100)]));
        assert_eq!(
            watch.status_text(Validity::Unhealthy),
            "STALE (0 in last 3m0s)"
        );
    }

    #[test]
    fn single_sample_is_healthy() {
        let mut watch = SharesWatch::new(Duration::from_secs(180));
        assert!(feed(&mut watch, Instant::now(), &[("ETH", 100)]));
        assert_eq!(watch.status_text(Validity::Healthy), "INCREASING");
    }

    #[test]
    fn every_currency_must_increase() {
        let t0 = Instant::now();
        let mut watch = SharesWatch::new(Duration::from_secs(180));
        feed(&mut watch, t0, &[("ETH", 100), ("DCR", 40)]);
        assert!(!feed(
            &mut watch,
            t0 + Duration::from_secs(10),
            &[("ETH", 110), ("DCR", 40)]
        ));
    }

    #[test]
    fn old_samples_leave_the_window() {
        let t0 = Instant::now();
        let mut watch = SharesWatch::new(Duration::from_secs(60));
        feed(&mut watch, t0, &[("ETH", 100)]);
        feed(&mut watch, t0 + Duration::from_secs(30), &[("ETH", 120)]);
        // The first sample is now older than the window.
        assert!(!feed(&mut watch, t0 + Duration::from_secs(70), &[("ETH", 120)]));
        assert_eq!(watch.window.len(), 2);
    }

    #[test]
    fn clearing_history_restarts_the_window() {
        let t0 = Instant::now();
        let mut watch = SharesWatch::new(Duration::from_secs(180));
        feed(&mut watch, t0, &[("ETH", 100)]);
        watch.clear_history();
        assert!(feed(&mut watch, t0 + Duration::from_secs(10), &[("ETH", 100)]));
    }
}
