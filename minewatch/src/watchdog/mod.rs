//! Watchdog chain.
//!
//! An ordered list of [`Watch`]es is evaluated once per tick. A watch that
//! stays unhealthy longer than its interval either restarts the miner
//! (through [`MinerControl`]) or is reset on its own, depending on its
//! policy. Unhealthy chain-breaking watches leave later watches `Unknown`
//! for that tick.
//!
//! Phases advance on deadlines checked at the start of each tick:
//!
//! ```text
//! New --start--> Sleeping --delay--> Running --restart--> Restarting
//!                    ^                                        |
//!                    +----------------next tick---------------+
//! ```
//!
//! The watchdog itself never blocks: ticks are plain synchronous calls
//! and a restart is only a request handed to the supervisor.

mod gpu_shares;
mod miner_online;
mod network;
mod shares;
mod watch;

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use strum::Display;
use tokio::time::Instant;
use utoipa::ToSchema;

use crate::config::WatchdogConfig;
use crate::miner_protocol::MinerSnapshot;
use crate::tracing::prelude::*;

pub use gpu_shares::GpuSharesWatch;
pub use miner_online::MinerOnlineWatch;
pub use network::NetworkWatch;
pub use shares::SharesWatch;
pub use watch::{Watch, WatchPolicy};

use watch::WatchEntry;

/// Remediation the watchdog can request.
pub trait MinerControl: Send + Sync {
    /// Ask for a miner restart. Must return immediately.
    fn request_restart(&self);
}

/// A watch's verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Validity {
    #[default]
    Unknown,
    Healthy,
    Unhealthy,
}

impl From<bool> for Validity {
    fn from(healthy: bool) -> Self {
        if healthy {
            Validity::Healthy
        } else {
            Validity::Unhealthy
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum WatchdogPhase {
    #[default]
    New,
    Sleeping,
    Running,
    Restarting,
}

/// One tick's inputs.
#[derive(Debug, Clone, Copy)]
pub struct TickInput<'a> {
    pub online: bool,
    pub miner: &'a MinerSnapshot,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, ToSchema)]
pub struct WatchReport {
    pub name: String,
    pub valid: Validity,
    pub status: String,
    /// Seconds spent unhealthy, while unhealthy.
    pub invalid_for_secs: Option<u64>,
}

/// Read-only projection of the watchdog for status sinks.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, ToSchema)]
pub struct WatchdogReport {
    pub phase: WatchdogPhase,
    /// Last tick, Unix milliseconds.
    pub last_update: Option<u64>,
    pub watches: Vec<WatchReport>,
}

pub struct Watchdog {
    phase: WatchdogPhase,
    /// Deadline for leaving `Sleeping`.
    resume_at: Option<Instant>,
    delay: Duration,
    restart_enabled: bool,
    last_update: Option<u64>,
    watches: Vec<WatchEntry>,
    miner: Arc<dyn MinerControl>,
}

impl Watchdog {
    /// Watchdog with the built-in chain: network, miner, shares, GPU shares.
    pub fn new(config: &WatchdogConfig, miner: Arc<dyn MinerControl>) -> Self {
        let watches: Vec<Box<dyn Watch>> = vec![
            Box::new(NetworkWatch::new(config.interval())),
            Box::new(MinerOnlineWatch::new(config.interval())),
            Box::new(SharesWatch::new(config.shares_interval())),
            Box::new(GpuSharesWatch::new(config.gpu_shares_interval())),
        ];
        Self::with_watches(config, miner, watches)
    }

    pub fn with_watches(
        config: &WatchdogConfig,
        miner: Arc<dyn MinerControl>,
        watches: Vec<Box<dyn Watch>>,
    ) -> Self {
        Self {
            phase: WatchdogPhase::New,
            resume_at: None,
            delay: config.delay(),
            restart_enabled: config.restart,
            last_update: None,
            watches: watches.into_iter().map(WatchEntry::new).collect(),
            miner,
        }
    }

    pub fn phase(&self) -> WatchdogPhase {
        self.phase
    }

    /// Enter `Sleeping` for the start-up delay.
    pub fn start(&mut self, now: Instant) {
        info!(delay_secs = self.delay.as_secs(), "Watchdog starting");
        self.sleep_until(now + self.delay);
    }

    /// Evaluate the chain once.
    pub fn tick(&mut self, now: Instant, input: &TickInput<'_>) {
        self.last_update = Some(unix_millis(SystemTime::now()));
        self.advance(now);
        if self.phase != WatchdogPhase::Running {
            return;
        }

        let mut chain_broken = false;
        let mut restart_due = false;

        for entry in &mut self.watches {
            if chain_broken {
                entry.reset();
                continue;
            }

            let before = entry.valid;
            let healthy = entry.watch.evaluate(now, input);
            entry.valid = Validity::from(healthy);
            let name = entry.watch.name();

            match (before, entry.valid) {
                (Validity::Healthy, Validity::Unhealthy) => {
                    warn!(
                        watch = name,
                        status = %entry.watch.status_text(entry.valid),
                        "Watch became unhealthy"
                    );
                }
                (Validity::Unhealthy, Validity::Healthy) => {
                    let invalid_for = entry
                        .last_valid
                        .map_or(0, |since| now.saturating_duration_since(since).as_secs());
                    info!(
                        watch = name,
                        status = %entry.watch.status_text(entry.valid),
                        invalid_for_secs = invalid_for,
                        "Watch back to normal"
                    );
                }
                _ => {}
            }

            if healthy || entry.last_valid.is_none() {
                entry.last_valid = Some(now);
            }
            if healthy {
                continue;
            }

            let policy = entry.watch.policy();
            let invalid_for = entry.invalid_for(now).unwrap_or_default();
            if invalid_for > policy.interval {
                if policy.restart_on_timeout && self.restart_enabled {
                    error!(
                        watch = name,
                        invalid_for_secs = invalid_for.as_secs(),
                        interval_secs = policy.interval.as_secs(),
                        "Restarting miner, watch unhealthy for too long"
                    );
                    restart_due = true;
                    break;
                }
                warn!(
                    watch = name,
                    invalid_for_secs = invalid_for.as_secs(),
                    interval_secs = policy.interval.as_secs(),
                    "Watch grace period elapsed, resetting without restart"
                );
                entry.reset();
            }

            if policy.break_chain {
                chain_broken = true;
            }
        }

        if restart_due {
            self.restart(now);
        }
    }

    /// Reset every watch and its history, request a miner restart and
    /// sleep for the start-up delay before running again.
    pub fn restart(&mut self, now: Instant) {
        for entry in &mut self.watches {
            entry.reset_all();
        }
        self.miner.request_restart();
        self.phase = WatchdogPhase::Restarting;
        self.resume_at = Some(now + self.delay);
    }

    pub fn report(&self, now: Instant) -> WatchdogReport {
        WatchdogReport {
            phase: self.phase,
            last_update: self.last_update,
            watches: self
                .watches
                .iter()
                .map(|entry| WatchReport {
                    name: entry.watch.name().to_string(),
                    valid: entry.valid,
                    status: entry.watch.status_text(entry.valid),
                    invalid_for_secs: entry.invalid_for(now).map(|d| d.as_secs()),
                })
                .collect(),
        }
    }

    fn sleep_until(&mut self, deadline: Instant) {
        self.phase = WatchdogPhase::Sleeping;
        self.resume_at = Some(deadline);
    }

    fn advance(&mut self, now: Instant) {
        if self.phase == WatchdogPhase::Restarting {
            self.phase = WatchdogPhase::Sleeping;
        }
        if self.phase == WatchdogPhase::Sleeping && self.resume_at.is_none_or(|at| now >= at) {
            self.run();
        }
    }

    fn run(&mut self) {
        for entry in &mut self.watches {
            entry.reset();
        }
        self.resume_at = None;
        self.phase = WatchdogPhase::Running;
        debug!("Watchdog running");
    }
}

fn unix_millis(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
