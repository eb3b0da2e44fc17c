//! Self-healing supervisor for a GPU mining worker.
//!
//! The daemon polls the miner's status protocol, GPU telemetry and
//! network reachability, aggregates them into a [`monitor::RigStatus`]
//! snapshot, and feeds a [`watchdog::Watchdog`] chain that restarts the
//! miner through the [`supervisor`] when a check stays unhealthy too long.

pub mod api;
pub mod api_client;
pub mod config;
pub mod error;
pub mod miner_protocol;
pub mod monitor;
pub mod notify;
pub mod poller;
pub mod report;
pub mod supervisor;
pub mod telemetry;
pub mod tracing;
pub mod types;
pub mod watchdog;
