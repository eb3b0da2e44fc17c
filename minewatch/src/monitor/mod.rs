//! Per-cycle status aggregation.
//!
//! [`aggregate`] merges one miner snapshot, one GPU telemetry reading and
//! the reachability flag into an immutable [`RigStatus`]. It performs no
//! I/O and reads the clock only through its input, so the same input
//! always produces the same snapshot.

pub mod threshold;

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::config::MonitorConfig;
use crate::miner_protocol::{MinerSnapshot, MiningStats};
use crate::telemetry::{GpuAttributes, GpuReport};
use crate::watchdog::WatchdogReport;

pub use threshold::{Level, Policy, Thresholds};

/// Static facts about this rig and its software.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RigIdentity {
    pub app_version: String,
    pub worker_name: String,
    pub miner_name: String,
    pub miner_version: String,
}

/// Everything one aggregation cycle consumes.
#[derive(Debug, Clone, Copy)]
pub struct AggregateInput<'a> {
    pub miner: &'a MinerSnapshot,
    pub gpus: &'a GpuReport,
    pub online: bool,
    pub identity: &'a RigIdentity,
    /// When this process started.
    pub started_at: SystemTime,
    /// Wall-clock time of this cycle.
    pub now: SystemTime,
}

/// One currency's statistics plus per-GPU hashrate health.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, ToSchema)]
pub struct CurrencyStatus {
    #[serde(flatten)]
    pub stats: MiningStats,
    /// Short pool name, see [`MiningStats::pool_name`].
    pub pool_name: String,
    pub gpu_hashrates_state: Vec<Level>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, ToSchema)]
pub struct OverclockFlags {
    /// Power limit differs from the board default.
    pub power_limit: bool,
    pub gpu_clock: bool,
    pub sm_clock: bool,
    pub mem_clock: bool,
    pub video_clock: bool,
}

/// One GPU's attributes and their classification.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, ToSchema)]
pub struct GpuStatus {
    #[serde(flatten)]
    pub attributes: GpuAttributes,
    pub oc: OverclockFlags,
    pub state_fan: Level,
    pub state_temp: Level,
    pub state_power: Level,
}

/// One cycle's fully aggregated rig status.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, ToSchema)]
pub struct RigStatus {
    pub app_version: String,
    pub worker_name: String,
    pub miner_name: String,
    pub miner_version: String,
    /// Process start, Unix milliseconds.
    pub start: u64,
    /// This cycle, Unix milliseconds.
    pub update: u64,
    /// Miner uptime in seconds, or process uptime when the miner reports none.
    pub uptime: u64,
    pub online: bool,
    pub miner_online: bool,
    pub driver_version: Option<String>,
    pub gpu_count: usize,
    pub mining: Vec<CurrencyStatus>,
    pub gpus: Vec<GpuStatus>,
    pub watchdog: Option<WatchdogReport>,
}

/// Build this cycle's [`RigStatus`].
///
/// `previous` supplies static GPU attributes the telemetry tool did not
/// report this time.
pub fn aggregate(
    input: &AggregateInput<'_>,
    previous: Option<&RigStatus>,
    config: &MonitorConfig,
) -> RigStatus {
    let start = unix_millis(input.started_at);
    let update = unix_millis(input.now);
    // Under a minute the miner reports zero, which counts as unknown.
    let uptime = input.miner.uptime.filter(|&secs| secs > 0).unwrap_or_else(|| {
        input
            .now
            .duration_since(input.started_at)
            .unwrap_or(Duration::ZERO)
            .as_secs()
    });

    let mining = input
        .miner
        .mining
        .iter()
        .map(|stats| currency_status(stats, &config.thresholds))
        .collect();

    let gpus = input
        .gpus
        .gpus
        .iter()
        .map(|attributes| {
            let carried = previous.and_then(|p| p.gpus.iter().find(|g| g.attributes.id == attributes.id));
            gpu_status(attributes, carried, &config.thresholds)
        })
        .collect();

    RigStatus {
        app_version: input.identity.app_version.clone(),
        worker_name: input.identity.worker_name.clone(),
        miner_name: input.identity.miner_name.clone(),
        miner_version: input.identity.miner_version.clone(),
        start,
        update,
        uptime,
        online: input.online,
        miner_online: input.miner.miner_online,
        driver_version: input
            .gpus
            .driver_version
            .clone()
            .or_else(|| previous.and_then(|p| p.driver_version.clone())),
        gpu_count: input.gpus.gpus.len(),
        mining,
        gpus,
        watchdog: None,
    }
}

fn currency_status(stats: &MiningStats, thresholds: &Thresholds) -> CurrencyStatus {
    let gpu_hashrates_state = stats
        .gpu_hashrates
        .iter()
        .enumerate()
        .map(|(gpu, &hashrate)| {
            thresholds
                .hashrate_policy(&stats.currency, gpu)
                .classify(normalize_hashrate(hashrate))
        })
        .collect();

    CurrencyStatus {
        pool_name: stats.pool_name(),
        stats: stats.clone(),
        gpu_hashrates_state,
    }
}

fn gpu_status(
    attributes: &GpuAttributes,
    previous: Option<&GpuStatus>,
    thresholds: &Thresholds,
) -> GpuStatus {
    let mut attributes = attributes.clone();
    attributes.product = match attributes.product.as_deref() {
        Some(product) => Some(normalize_product(product)),
        None => previous.and_then(|p| p.attributes.product.clone()),
    };

    let a = &attributes;
    let oc = OverclockFlags {
        power_limit: a.power_limit.is_some() && a.power_limit != a.power_limit_default,
        gpu_clock: exceeds(a.gpu_clock, a.gpu_clock_max),
        sm_clock: exceeds(a.sm_clock, a.sm_clock_max),
        mem_clock: exceeds(a.mem_clock, a.mem_clock_max),
        video_clock: exceeds(a.video_clock, a.video_clock_max),
    };

    GpuStatus {
        state_fan: thresholds.classify("fan", a.fan.map(f64::from)),
        state_temp: thresholds.classify("temp", a.temp.map(f64::from)),
        state_power: thresholds.classify("power", a.power),
        oc,
        attributes,
    }
}

fn exceeds(clock: Option<u32>, max: Option<u32>) -> bool {
    matches!((clock, max), (Some(clock), Some(max)) if clock > max)
}

/// Hashes per second to MH/s, rounded to two decimals.
pub fn normalize_hashrate(hashrate: f64) -> f64 {
    (hashrate / 1_000_000.0 * 100.0).round() / 100.0
}

/// `GeForce GTX 1080 Ti` becomes `gtx1080ti`.
pub fn normalize_product(product: &str) -> String {
    product
        .replace("GeForce ", "")
        .replace(' ', "")
        .to_lowercase()
}

fn unix_millis(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
