//! Daemon configuration.
//!
//! Configuration is a single JSON document named by `MINEWATCH_CONFIG`.
//! Every field has a default, so an absent file (or an empty object)
//! yields a dry-run-capable setup. A handful of environment variables
//! override individual fields for quick experiments.

use std::env;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::monitor::Thresholds;

/// Path of the JSON configuration file.
pub const CONFIG_ENV: &str = "MINEWATCH_CONFIG";

const WORKER_ENV: &str = "MINEWATCH_WORKER";
const API_ADDR_ENV: &str = "MINEWATCH_API_ADDR";
const DRY_RUN_ENV: &str = "MINEWATCH_DRY_RUN";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Rig identity used in snapshots and notifications.
    pub worker_name: String,

    /// Directory receiving `status.json` and `rig_state.json`.
    pub run_dir: PathBuf,

    pub miner: MinerConfig,
    pub monitor: MonitorConfig,
    pub telemetry: TelemetryConfig,
    pub network: NetworkConfig,
    pub watchdog: WatchdogConfig,
    pub api: ApiConfig,
    pub notify: NotifyConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MinerConfig {
    pub name: String,
    pub version: String,
    /// Miner executable. Required unless `dry_run` is set.
    pub binary: Option<PathBuf>,
    /// Working directory for the miner process.
    pub dir: Option<PathBuf>,
    /// Whitespace-separated command-line arguments.
    pub args: String,
    /// Wait between killing the old instance and spawning the new one.
    pub delay_secs: u64,
    /// Log the command instead of running it.
    pub dry_run: bool,
    /// Host and port of the miner's status API.
    pub api_host: String,
    pub api_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub delay_secs: u64,
    pub interval_secs: u64,
    /// Metric thresholds, e.g. `temp_warn`, `temp_max`, `fan_min`,
    /// `hashrate_eth_warn`, `hashrate_eth_2_min`.
    pub thresholds: Thresholds,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub smi_path: PathBuf,
    /// Upper bound for one telemetry tool invocation.
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// `host:port` resolved to decide whether the rig is online.
    pub probe_host: String,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    /// Feed the watchdog every Nth polling cycle.
    pub tick_every: u32,
    /// Default grace interval for watches.
    pub interval_secs: u64,
    /// Sleep after start-up and after each restart before watching.
    pub delay_secs: u64,
    /// Master switch for watchdog-initiated miner restarts.
    pub restart: bool,
    /// Grace interval of the Shares watch (default: twice `interval_secs`).
    pub shares_interval_secs: Option<u64>,
    /// Grace interval of the GPU shares watch (default: twice `interval_secs`).
    pub gpu_shares_interval_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Listen address, or `None` to disable the HTTP API.
    pub listen: Option<SocketAddr>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub pushover_token: Option<String>,
    pub pushover_user: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            worker_name: default_worker_name(),
            run_dir: PathBuf::from("run"),
            miner: MinerConfig::default(),
            monitor: MonitorConfig::default(),
            telemetry: TelemetryConfig::default(),
            network: NetworkConfig::default(),
            watchdog: WatchdogConfig::default(),
            api: ApiConfig::default(),
            notify: NotifyConfig::default(),
        }
    }
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            name: "claymore".to_string(),
            version: "11.5".to_string(),
            binary: None,
            dir: None,
            args: String::new(),
            delay_secs: 15,
            dry_run: false,
            api_host: "127.0.0.1".to_string(),
            api_port: crate::miner_protocol::claymore::DEFAULT_PORT,
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            delay_secs: 15,
            interval_secs: 2,
            thresholds: Thresholds::default(),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            smi_path: PathBuf::from("nvidia-smi"),
            timeout_secs: 5,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            probe_host: "google.com:80".to_string(),
            timeout_ms: 1000,
        }
    }
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            tick_every: 2,
            interval_secs: 90,
            delay_secs: 60,
            restart: true,
            shares_interval_secs: None,
            gpu_shares_interval_secs: None,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: Some(SocketAddr::from(([127, 0, 0, 1], 8181))),
        }
    }
}

impl MinerConfig {
    /// Process title tag identifying miners spawned by this supervisor.
    pub fn process_tag(&self) -> String {
        format!("minewatch-miner {} {}", self.name, self.version)
    }

    pub fn arg_list(&self) -> Vec<String> {
        self.args.split_whitespace().map(str::to_string).collect()
    }

    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_secs)
    }
}

impl MonitorConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl TelemetryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl NetworkConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl WatchdogConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_secs)
    }

    pub fn shares_interval(&self) -> Duration {
        self.shares_interval_secs
            .map(Duration::from_secs)
            .unwrap_or(self.interval() * 2)
    }

    pub fn gpu_shares_interval(&self) -> Duration {
        self.gpu_shares_interval_secs
            .map(Duration::from_secs)
            .unwrap_or(self.interval() * 2)
    }
}

impl Config {
    /// Load from `MINEWATCH_CONFIG` (if set), apply environment
    /// overrides and validate.
    pub fn load() -> Result<Self> {
        let mut config = match env::var_os(CONFIG_ENV) {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(worker) = env::var(WORKER_ENV) {
            self.worker_name = worker;
        }
        if let Ok(addr) = env::var(API_ADDR_ENV) {
            let addr = addr
                .parse()
                .map_err(|e| Error::Config(format!("{API_ADDR_ENV}={addr}: {e}")))?;
            self.api.listen = Some(addr);
        }
        if let Ok(value) = env::var(DRY_RUN_ENV) {
            self.miner.dry_run = matches!(value.as_str(), "1" | "true" | "yes");
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.miner.binary.is_none() && !self.miner.dry_run {
            return Err(Error::Config(
                "miner.binary is required unless miner.dry_run is set".into(),
            ));
        }
        if self.monitor.interval_secs == 0 {
            return Err(Error::Config("monitor.interval_secs must be positive".into()));
        }
        if self.watchdog.tick_every == 0 {
            return Err(Error::Config("watchdog.tick_every must be positive".into()));
        }
        if self.watchdog.interval_secs == 0 {
            return Err(Error::Config("watchdog.interval_secs must be positive".into()));
        }
        if self.telemetry.timeout_secs == 0 {
            return Err(Error::Config("telemetry.timeout_secs must be positive".into()));
        }
        if self.network.timeout_ms == 0 {
            return Err(Error::Config("network.timeout_ms must be positive".into()));
        }
        Ok(())
    }
}

fn default_worker_name() -> String {
    env::var("HOSTNAME")
        .ok()
        .filter(|name| !name.is_empty())
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty())
        })
        .unwrap_or_else(|| "rig".to_string())
}
