//! Claymore-compatible `miner_getstat2` client.
//!
//! The miner answers a one-line JSON-RPC request with an array of strings,
//! most of them `;`-separated lists:
//!
//! ```text
//!  0  "11.5 - ETH"                         version
//!  1  "5380"                               running time, minutes
//!  2  "258854;20568;0"                     primary kH/s; shares; rejected
//!  3  "32375;32344;..."                    primary kH/s per GPU
//!  4  "0;0;0"                              secondary kH/s; shares; rejected
//!  5  "off;off;..."                        secondary kH/s per GPU
//!  6  "64;51;61;47;..."                    temperature; fan per GPU
//!  7  "eu2.ethermine.org:4444"             pools, one per currency
//!  8  "0;0;0;0"                            primary invalid; switches;
//!                                          secondary invalid; switches
//!  9-11  "2615;2543;..."                   primary accepted/rejected/invalid per GPU
//! 12-14  "0;0;..."                         secondary accepted/rejected/invalid per GPU
//! ```

use std::io;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use super::{MinerProtocol, MinerSnapshot, MiningStats};
use crate::tracing::prelude::*;

/// Status API port of the reference miner.
pub const DEFAULT_PORT: u16 = 3333;

/// Bound on connect, write and read combined.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

const STATUS_REQUEST: &[u8] = b"{\"id\":0,\"jsonrpc\":\"2.0\",\"method\":\"miner_getstat2\"}\n";

/// Vendor hashrates are kH/s.
const HASHRATE_MULTIPLIER: f64 = 1000.0;

const PRIMARY_CURRENCY: &str = "ETH";
const UNKNOWN_CURRENCY: &str = "???";

const RUNNING_MINUTES: usize = 1;
const POOLS: usize = 7;
const INVALID_SHARES: usize = 8;

static SECONDARY_COIN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-dcoin ([a-zA-Z]+)").expect("static regex is valid"));

/// Where one currency's values live in the field array.
struct Layout {
    aggregate: usize,
    gpu_hashrates: usize,
    invalid_position: usize,
    pool_position: usize,
    gpu_accepted: usize,
    gpu_rejected: usize,
    gpu_invalid: usize,
}

const PRIMARY: Layout = Layout {
    aggregate: 2,
    gpu_hashrates: 3,
    invalid_position: 0,
    pool_position: 0,
    gpu_accepted: 9,
    gpu_rejected: 10,
    gpu_invalid: 11,
};

const SECONDARY: Layout = Layout {
    aggregate: 4,
    gpu_hashrates: 5,
    invalid_position: 2,
    pool_position: 1,
    gpu_accepted: 12,
    gpu_rejected: 13,
    gpu_invalid: 14,
};

/// Reasons a status reply could not be used.
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed JSON reply: {0}")]
    Json(String),

    #[error("reply has no field {0}")]
    MissingField(usize),

    #[error("field {field} has no entry {position}")]
    MissingEntry { field: usize, position: usize },

    #[error("field {field} holds non-numeric value {value:?}")]
    NotANumber { field: usize, value: String },

    #[error("field {field} lists {found} GPUs, expected {expected}")]
    GpuCountMismatch {
        field: usize,
        expected: usize,
        found: usize,
    },
}

#[derive(Deserialize)]
struct StatusReply {
    #[serde(default)]
    result: Option<Vec<String>>,
}

/// Client for the miner's TCP status API.
#[derive(Debug, Clone)]
pub struct ClaymoreClient {
    host: String,
    port: u16,
    /// Miner command line, consulted for the secondary currency symbol.
    miner_args: String,
    timeout: Duration,
}

impl ClaymoreClient {
    pub fn new(host: impl Into<String>, port: u16, miner_args: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            miner_args: miner_args.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Send the request and collect one reply line (or everything up to EOF).
    async fn exchange(&self) -> io::Result<Vec<u8>> {
        let mut stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
        stream.write_all(STATUS_REQUEST).await?;

        let mut reply = Vec::new();
        BufReader::new(stream).read_until(b'\n', &mut reply).await?;
        Ok(reply)
    }
}

#[async_trait]
impl MinerProtocol for ClaymoreClient {
    async fn query_status(&self) -> MinerSnapshot {
        let reply = match tokio::time::timeout(self.timeout, self.exchange()).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                warn!(host = %self.host, port = self.port, error = %e, "Miner status request failed");
                return MinerSnapshot::offline();
            }
            Err(_) => {
                warn!(
                    host = %self.host,
                    port = self.port,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Miner status request timed out"
                );
                return MinerSnapshot::offline();
            }
        };

        match parse_reply(&reply, &self.miner_args) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "Unusable miner status reply");
                MinerSnapshot::offline()
            }
        }
    }
}

/// Parse a raw reply. An empty reply or empty result means "no data".
pub fn parse_reply(reply: &[u8], miner_args: &str) -> Result<MinerSnapshot, ProtocolError> {
    if reply.iter().all(u8::is_ascii_whitespace) {
        return Ok(MinerSnapshot::offline());
    }

    let reply: StatusReply =
        serde_json::from_slice(reply).map_err(|e| ProtocolError::Json(e.to_string()))?;

    match reply.result {
        Some(fields) if !fields.is_empty() => parse_fields(&fields, miner_args),
        _ => Ok(MinerSnapshot::offline()),
    }
}

/// Build a snapshot from the `result` array. All-or-nothing: any missing
/// or malformed value fails the whole reply.
pub fn parse_fields(fields: &[String], miner_args: &str) -> Result<MinerSnapshot, ProtocolError> {
    let fields = Fields(fields);

    let running_minutes: u64 = fields.number(RUNNING_MINUTES, fields.get(RUNNING_MINUTES)?)?;
    let pools = fields.entries(POOLS)?;

    let primary = fields.stats(&PRIMARY, PRIMARY_CURRENCY.to_string())?;
    let mut mining = vec![primary];

    if pools.len() == 2 {
        let secondary = fields.stats(&SECONDARY, secondary_currency(miner_args))?;
        if secondary.gpu_count() != mining[0].gpu_count() {
            return Err(ProtocolError::GpuCountMismatch {
                field: SECONDARY.gpu_hashrates,
                expected: mining[0].gpu_count(),
                found: secondary.gpu_count(),
            });
        }
        mining.push(secondary);
    }

    Ok(MinerSnapshot {
        miner_online: true,
        uptime: Some(running_minutes * 60),
        mining,
    })
}

/// Secondary currency symbol from the `-dcoin` miner argument.
fn secondary_currency(miner_args: &str) -> String {
    SECONDARY_COIN
        .captures(miner_args)
        .and_then(|caps| caps.get(1))
        .map(|coin| coin.as_str().to_uppercase())
        .unwrap_or_else(|| UNKNOWN_CURRENCY.to_string())
}

struct Fields<'a>(&'a [String]);

impl Fields<'_> {
    fn get(&self, field: usize) -> Result<&str, ProtocolError> {
        self.0
            .get(field)
            .map(|s| s.trim())
            .ok_or(ProtocolError::MissingField(field))
    }

    fn entries(&self, field: usize) -> Result<Vec<&str>, ProtocolError> {
        Ok(self.get(field)?.split(';').map(str::trim).collect())
    }

    fn entry(&self, field: usize, position: usize) -> Result<&str, ProtocolError> {
        self.entries(field)?
            .get(position)
            .copied()
            .ok_or(ProtocolError::MissingEntry { field, position })
    }

    fn number<T: std::str::FromStr>(&self, field: usize, value: &str) -> Result<T, ProtocolError> {
        value.parse().map_err(|_| ProtocolError::NotANumber {
            field,
            value: value.to_string(),
        })
    }

    fn hashrate(&self, field: usize, value: &str) -> Result<f64, ProtocolError> {
        let raw: f64 = self.number(field, value)?;
        if raw.is_finite() {
            Ok(raw * HASHRATE_MULTIPLIER)
        } else {
            Err(ProtocolError::NotANumber {
                field,
                value: value.to_string(),
            })
        }
    }

    fn hashrates(&self, field: usize) -> Result<Vec<f64>, ProtocolError> {
        self.entries(field)?
            .into_iter()
            .map(|value| self.hashrate(field, value))
            .collect()
    }

    fn counters(&self, field: usize, expected: usize) -> Result<Vec<u64>, ProtocolError> {
        let counters = self
            .entries(field)?
            .into_iter()
            .map(|value| self.number(field, value))
            .collect::<Result<Vec<u64>, _>>()?;
        if counters.len() != expected {
            return Err(ProtocolError::GpuCountMismatch {
                field,
                expected,
                found: counters.len(),
            });
        }
        Ok(counters)
    }

    fn stats(&self, layout: &Layout, currency: String) -> Result<MiningStats, ProtocolError> {
        let aggregate = layout.aggregate;
        let gpu_hashrates = self.hashrates(layout.gpu_hashrates)?;
        let gpus = gpu_hashrates.len();

        Ok(MiningStats {
            currency,
            hashrate: self.hashrate(aggregate, self.entry(aggregate, 0)?)?,
            accepted_shares: self.number(aggregate, self.entry(aggregate, 1)?)?,
            rejected_shares: self.number(aggregate, self.entry(aggregate, 2)?)?,
            invalid_shares: self.number(
                INVALID_SHARES,
                self.entry(INVALID_SHARES, layout.invalid_position)?,
            )?,
            pool: self.entry(POOLS, layout.pool_position)?.to_string(),
            gpu_hashrates,
            gpu_accepted_shares: self.counters(layout.gpu_accepted, gpus)?,
            gpu_rejected_shares: self.counters(layout.gpu_rejected, gpus)?,
            gpu_invalid_shares: self.counters(layout.gpu_invalid, gpus)?,
        })
    }
}
