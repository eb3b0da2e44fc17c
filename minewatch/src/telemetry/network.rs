//! Internet reachability probe.

use std::time::Duration;

use async_trait::async_trait;

use crate::tracing::prelude::*;

#[async_trait]
pub trait Reachability: Send + Sync {
    /// Whether the rig can currently reach the outside world.
    async fn online(&self) -> bool;
}

/// Declares the rig online when a well-known hostname resolves in time.
#[derive(Debug, Clone)]
pub struct NetworkProbe {
    host: String,
    timeout: Duration,
}

impl NetworkProbe {
    /// `host` is a `host:port` pair, e.g. `google.com:80`.
    pub fn new(host: impl Into<String>, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            timeout,
        }
    }
}

#[async_trait]
impl Reachability for NetworkProbe {
    async fn online(&self) -> bool {
        match tokio::time::timeout(self.timeout, tokio::net::lookup_host(self.host.as_str())).await
        {
            Ok(Ok(mut addrs)) => addrs.next().is_some(),
            Ok(Err(e)) => {
                warn!(host = %self.host, error = %e, "Reachability lookup failed");
                false
            }
            Err(_) => {
                warn!(host = %self.host, "Reachability lookup timed out");
                false
            }
        }
    }
}
