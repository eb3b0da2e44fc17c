//! Status files.
//!
//! After every published snapshot, `status.json` (the full snapshot) and
//! `rig_state.json` (the compact summary) are rewritten in the run
//! directory. Files are replaced atomically via a temporary sibling.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::api_client::types::RigState;
use crate::error::Result;
use crate::monitor::RigStatus;
use crate::poller::StatusReceiver;
use crate::tracing::prelude::*;

pub const STATUS_FILE: &str = "status.json";
pub const RIG_STATE_FILE: &str = "rig_state.json";

pub struct ReportWriter {
    run_dir: PathBuf,
}

impl ReportWriter {
    pub fn new(run_dir: impl Into<PathBuf>) -> Self {
        Self {
            run_dir: run_dir.into(),
        }
    }

    /// Write both files for every new snapshot until cancelled.
    pub async fn run(self, mut rx: StatusReceiver, cancel: CancellationToken) {
        if let Err(e) = tokio::fs::create_dir_all(&self.run_dir).await {
            warn!(dir = %self.run_dir.display(), error = %e, "Cannot create run directory");
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                changed = rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }

            let status = rx.borrow_and_update().clone();
            if let Some(status) = status {
                if let Err(e) = self.write(&status).await {
                    warn!(dir = %self.run_dir.display(), error = %e, "Failed to write status files");
                }
            }
        }
    }

    pub async fn write(&self, status: &RigStatus) -> Result<()> {
        write_json(&self.run_dir.join(STATUS_FILE), status).await?;
        write_json(&self.run_dir.join(RIG_STATE_FILE), &RigState::from(status)).await
    }
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::sync::watch;

    use super::*;

    fn status() -> RigStatus {
        RigStatus {
            worker_name: "rig1".into(),
            miner_name: "claymore".into(),
            miner_version: "11.5".into(),
            update: 1_520_000_000_000,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn writes_both_files() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path();
        let writer = ReportWriter::new(dir);

        writer.write(&status()).await.unwrap();

        let full: RigStatus =
            serde_json::from_slice(&std::fs::read(dir.join(STATUS_FILE)).unwrap()).unwrap();
        assert_eq!(full, status());
        let rig: RigState =
            serde_json::from_slice(&std::fs::read(dir.join(RIG_STATE_FILE)).unwrap()).unwrap();
        assert_eq!(rig.rig_id, "rig1");
        assert!(!dir.join("status.json.tmp").exists());
    }

    #[tokio::test]
    async fn follows_published_snapshots() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("run");
        let (tx, rx) = watch::channel(None);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(ReportWriter::new(&dir).run(rx, cancel.clone()));

        tx.send_replace(Some(Arc::new(status())));

        let path = dir.join(RIG_STATE_FILE);
        for _ in 0..100 {
            if path.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(path.exists());

        cancel.cancel();
        task.await.unwrap();
    }
}
