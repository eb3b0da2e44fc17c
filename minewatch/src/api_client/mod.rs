//! HTTP client for the daemon's API.

pub mod types;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;

use types::{RigState, RigStatus, WatchdogReport};

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8181";

pub struct Client {
    http: reqwest::Client,
    base_url: String,
}

impl Client {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub async fn get_status(&self) -> Result<RigStatus> {
        self.get("/api/v0/status").await
    }

    pub async fn get_rig(&self) -> Result<RigState> {
        self.get("/api/v0/rig").await
    }

    pub async fn get_watchdog(&self) -> Result<WatchdogReport> {
        self.get("/api/v0/watchdog").await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("failed to reach {url}"))?
            .error_for_status()
            .with_context(|| format!("{url} returned an error"))?;
        response
            .json()
            .await
            .with_context(|| format!("unexpected response from {url}"))
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slash_is_trimmed() {
        let client = Client::with_base_url("http://rig1:8181/");
        assert_eq!(client.base_url, "http://rig1:8181");
    }

    #[tokio::test]
    async fn unreachable_daemon_is_an_error() {
        let client = Client::with_base_url("http://127.0.0.1:1");
        assert!(client.get_watchdog().await.is_err());
    }
}
