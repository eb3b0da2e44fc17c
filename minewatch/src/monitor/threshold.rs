use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum::Display;
use utoipa::ToSchema;

/// Health level of one metric reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Level {
    #[default]
    Ok,
    Warn,
    Error,
}

/// Bounds for one metric.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Policy {
    /// Must stay below `warn` and `max` (temperature, power).
    Max { warn: Option<f64>, max: Option<f64> },
    /// Must stay above `warn` and `min` (fan speed, hashrate).
    Min { warn: Option<f64>, min: Option<f64> },
}

impl Policy {
    /// Classify `value`. Unset bounds never fire.
    pub fn classify(self, value: f64) -> Level {
        match self {
            Policy::Max { warn, max } => {
                if max.is_some_and(|max| value >= max) {
                    Level::Error
                } else if warn.is_some_and(|warn| value >= warn) {
                    Level::Warn
                } else {
                    Level::Ok
                }
            }
            Policy::Min { warn, min } => {
                if min.is_some_and(|min| value <= min) {
                    Level::Error
                } else if warn.is_some_and(|warn| value <= warn) {
                    Level::Warn
                } else {
                    Level::Ok
                }
            }
        }
    }
}

/// Configured metric bounds, keyed `<metric>_warn`, `<metric>_max` and
/// `<metric>_min`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct Thresholds(BTreeMap<String, f64>);

impl Thresholds {
    pub fn get(&self, key: &str) -> Option<f64> {
        self.0.get(key).copied()
    }

    pub fn set(&mut self, key: impl Into<String>, value: f64) {
        self.0.insert(key.into(), value);
    }

    /// Bounds for `metric`: max-bounded when `<metric>_max` is configured,
    /// min-bounded otherwise.
    pub fn policy(&self, metric: &str) -> Policy {
        let warn = self.get(&format!("{metric}_warn"));
        match self.get(&format!("{metric}_max")) {
            Some(max) => Policy::Max {
                warn,
                max: Some(max),
            },
            None => Policy::Min {
                warn,
                min: self.get(&format!("{metric}_min")),
            },
        }
    }

    /// Classify an optional reading; a missing reading is `Ok`.
    pub fn classify(&self, metric: &str, value: Option<f64>) -> Level {
        value.map_or(Level::Ok, |value| self.policy(metric).classify(value))
    }

    /// Min-bounded hashrate policy for one GPU. GPU-specific keys
    /// (`hashrate_eth_2_warn`) take precedence over currency-wide ones
    /// (`hashrate_eth_warn`).
    pub fn hashrate_policy(&self, currency: &str, gpu: usize) -> Policy {
        let currency = currency.to_lowercase();
        let lookup = |bound: &str| {
            self.get(&format!("hashrate_{currency}_{gpu}_{bound}"))
                .or_else(|| self.get(&format!("hashrate_{currency}_{bound}")))
        };
        Policy::Min {
            warn: lookup("warn"),
            min: lookup("min"),
        }
    }
}

impl<K: Into<String>> FromIterator<(K, f64)> for Thresholds {
    fn from_iter<I: IntoIterator<Item = (K, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}
