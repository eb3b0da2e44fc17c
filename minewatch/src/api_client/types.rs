//! API data transfer objects.
//!
//! These types define the API contract shared between the server and
//! clients. The full snapshot types live with the code that builds them
//! and are re-exported here.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub use crate::monitor::{CurrencyStatus, GpuStatus, Level, OverclockFlags, RigStatus};
pub use crate::watchdog::{Validity, WatchReport, WatchdogPhase, WatchdogReport};

/// Compact rig summary, also written as `rig_state.json`.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, ToSchema)]
pub struct RigState {
    pub rig_id: String,
    pub uptime: u64,
    /// Unix seconds, as a string.
    pub last_update: String,
    pub gpus_installed: usize,
    pub gpus_in_use: usize,
    pub driver_version: Option<String>,
    pub mining_software: String,
    pub mined_coins: Vec<MinedCoin>,
    pub gpu_info: Vec<RigGpu>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, ToSchema)]
pub struct MinedCoin {
    pub coin: String,
    pub mining_pool: String,
    /// Hashes per second.
    pub avg_hashrate: f64,
    pub accepted_shares: u64,
    pub rejected_shares: u64,
    pub gpu_hashrates: Vec<f64>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, ToSchema)]
pub struct RigGpu {
    #[serde(rename = "ID")]
    pub id: usize,
    pub temp: Option<u32>,
    pub power: Option<f64>,
    pub power_limit: Option<f64>,
    pub mem_clk: Option<u32>,
    pub core_clk: Option<u32>,
    pub fan: Option<u32>,
}

impl From<&RigStatus> for RigState {
    fn from(status: &RigStatus) -> Self {
        Self {
            rig_id: status.worker_name.clone(),
            uptime: status.uptime,
            last_update: (status.update / 1000).to_string(),
            gpus_installed: status.gpu_count,
            gpus_in_use: status.gpu_count,
            driver_version: status.driver_version.clone(),
            mining_software: format!("{} {}", status.miner_name, status.miner_version),
            mined_coins: status
                .mining
                .iter()
                .map(|currency| MinedCoin {
                    coin: currency.stats.currency.clone(),
                    mining_pool: currency.pool_name.clone(),
                    avg_hashrate: currency.stats.hashrate,
                    accepted_shares: currency.stats.accepted_shares,
                    rejected_shares: currency.stats.rejected_shares,
                    gpu_hashrates: currency.stats.gpu_hashrates.clone(),
                })
                .collect(),
            gpu_info: status
                .gpus
                .iter()
                .map(|gpu| RigGpu {
                    id: gpu.attributes.id,
                    temp: gpu.attributes.temp,
                    power: gpu.attributes.power,
                    power_limit: gpu.attributes.power_limit,
                    mem_clk: gpu.attributes.mem_clock,
                    core_clk: gpu.attributes.gpu_clock,
                    fan: gpu.attributes.fan,
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::miner_protocol::MiningStats;
    use crate::telemetry::GpuAttributes;

    #[test]
    fn rig_state_summarises_a_snapshot() {
        let status = RigStatus {
            worker_name: "rig1".into(),
            miner_name: "claymore".into(),
            miner_version: "11.5".into(),
            update: 1_520_000_123_456,
            uptime: 3600,
            gpu_count: 1,
            driver_version: Some("390.77".into()),
            mining: vec![CurrencyStatus {
                stats: MiningStats {
                    currency: "ETH".into(),
                    hashrate: 30e6,
                    accepted_shares: 2615,
                    pool: "eu1.ethermine.org:4444".into(),
                    gpu_hashrates: vec![30e6],
                    ..Default::default()
                },
                pool_name: "Ethermine".into(),
                gpu_hashrates_state: vec![Level::Ok],
            }],
            gpus: vec![GpuStatus {
                attributes: GpuAttributes {
                    id: 0,
                    temp: Some(61),
                    gpu_clock: Some(1771),
                    mem_clock: Some(4404),
                    ..Default::default()
                },
                ..Default::default()
            }],
            ..Default::default()
        };

        let state = RigState::from(&status);
        assert_eq!(state.rig_id, "rig1");
        assert_eq!(state.last_update, "1520000123");
        assert_eq!(state.mining_software, "claymore 11.5");
        assert_eq!(state.mined_coins[0].mining_pool, "Ethermine");
        assert_eq!(state.gpu_info[0].core_clk, Some(1771));

        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["gpu_info"][0]["ID"], 0);
        assert_eq!(json["gpu_info"][0]["mem_clk"], 4404);
    }

    #[test]
    fn snapshot_json_flattens_nested_stats() {
        let currency = CurrencyStatus {
            stats: MiningStats {
                currency: "ETH".into(),
                accepted_shares: 7,
                ..Default::default()
            },
            pool_name: "Ethermine".into(),
            gpu_hashrates_state: vec![Level::Warn],
        };
        let json = serde_json::to_value(&currency).unwrap();
        assert_eq!(json["currency"], "ETH");
        assert_eq!(json["accepted_shares"], 7);
        assert_eq!(json["gpu_hashrates_state"][0], "warn");

        let back: CurrencyStatus = serde_json::from_value(json).unwrap();
        assert_eq!(back, currency);
    }
}
