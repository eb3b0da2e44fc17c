//! Miner status protocol.
//!
//! A [`MinerProtocol`] turns one status query against the local miner into
//! a [`MinerSnapshot`]. Implementations never fail: unreachable miners and
//! malformed replies both yield [`MinerSnapshot::offline`].

pub mod claymore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub use claymore::ClaymoreClient;

/// Known pool hostnames and the short names shown for them.
const KNOWN_POOLS: [(&str, &str); 3] = [
    ("suprnova", "Suprnova"),
    ("ethermine", "Ethermine"),
    ("coinmine", "Coinmine"),
];

/// Mining statistics for one currency.
///
/// Share counters are cumulative since the miner process started. Per-GPU
/// vectors are index-aligned and all have the same length.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, ToSchema)]
pub struct MiningStats {
    pub currency: String,
    /// Aggregate hashrate in hashes per second.
    pub hashrate: f64,
    pub accepted_shares: u64,
    pub rejected_shares: u64,
    pub invalid_shares: u64,
    /// Pool endpoint as reported by the miner.
    pub pool: String,
    /// Per-GPU hashrates in hashes per second.
    pub gpu_hashrates: Vec<f64>,
    pub gpu_accepted_shares: Vec<u64>,
    pub gpu_rejected_shares: Vec<u64>,
    pub gpu_invalid_shares: Vec<u64>,
}

impl MiningStats {
    pub fn gpu_count(&self) -> usize {
        self.gpu_hashrates.len()
    }

    /// Short pool name when the endpoint belongs to a known pool,
    /// otherwise the endpoint itself.
    pub fn pool_name(&self) -> String {
        normalize_pool(&self.pool)
    }

    /// Accepted minus invalid minus rejected shares for one GPU.
    pub fn gpu_net_shares(&self, gpu: usize) -> Option<i64> {
        let accepted = *self.gpu_accepted_shares.get(gpu)? as i64;
        let rejected = *self.gpu_rejected_shares.get(gpu)? as i64;
        let invalid = *self.gpu_invalid_shares.get(gpu)? as i64;
        Some(accepted - invalid - rejected)
    }
}

/// One status reading from the miner.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, ToSchema)]
pub struct MinerSnapshot {
    pub miner_online: bool,
    /// Miner-reported uptime in seconds.
    pub uptime: Option<u64>,
    pub mining: Vec<MiningStats>,
}

impl MinerSnapshot {
    /// Snapshot for an unreachable or unintelligible miner.
    pub fn offline() -> Self {
        Self::default()
    }

    /// Online and reporting at least one currency.
    pub fn is_mining(&self) -> bool {
        self.miner_online && !self.mining.is_empty()
    }
}

/// Source of miner status snapshots.
#[async_trait]
pub trait MinerProtocol: Send + Sync {
    /// Query the miner once. Never fails; see the module docs.
    async fn query_status(&self) -> MinerSnapshot;
}

pub fn normalize_pool(pool: &str) -> String {
    KNOWN_POOLS
        .iter()
        .find(|(needle, _)| pool.contains(needle))
        .map(|(_, name)| name.to_string())
        .unwrap_or_else(|| pool.to_string())
}
