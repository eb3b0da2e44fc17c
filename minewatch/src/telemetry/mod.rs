//! GPU telemetry and network reachability inputs.
//!
//! Both are external collaborators of the polling loop: the loop bounds
//! every call with its own timeout and degrades failures to empty values.

pub mod network;
pub mod nvidia_smi;

use std::io;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub use network::{NetworkProbe, Reachability};
pub use nvidia_smi::NvidiaSmi;

/// Attributes of one physical GPU as reported by the telemetry tool.
///
/// Readings the tool could not provide are `None`.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, ToSchema)]
pub struct GpuAttributes {
    pub id: usize,
    pub product: Option<String>,
    /// Fan speed, percent.
    pub fan: Option<u32>,
    /// Core temperature, °C.
    pub temp: Option<u32>,
    /// Power draw, W.
    pub power: Option<f64>,
    pub power_limit: Option<f64>,
    pub power_limit_default: Option<f64>,
    /// Clocks in MHz.
    pub gpu_clock: Option<u32>,
    pub gpu_clock_max: Option<u32>,
    pub sm_clock: Option<u32>,
    pub sm_clock_max: Option<u32>,
    pub mem_clock: Option<u32>,
    pub mem_clock_max: Option<u32>,
    pub video_clock: Option<u32>,
    pub video_clock_max: Option<u32>,
}

/// One telemetry tool reading covering all GPUs.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct GpuReport {
    pub driver_version: Option<String>,
    pub gpus: Vec<GpuAttributes>,
}

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("failed to run telemetry tool: {0}")]
    Io(#[from] io::Error),

    #[error("telemetry tool exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("unparseable telemetry line {line}: {reason}")]
    Parse { line: usize, reason: String },
}

/// Source of per-GPU attribute readings.
#[async_trait]
pub trait GpuTelemetry: Send + Sync {
    async fn read(&self) -> Result<GpuReport, TelemetryError>;
}
