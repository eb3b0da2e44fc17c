//! Process control on the host.

use std::io;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use parking_lot::Mutex;

use crate::tracing::prelude::*;

/// What to run and how to recognise it later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Stable `argv[0]` shared by every miner this supervisor starts.
    pub tag: String,
    pub binary: PathBuf,
    pub args: Vec<String>,
    pub dir: Option<PathBuf>,
}

impl LaunchSpec {
    /// Shell-like rendering for logs.
    pub fn command_line(&self) -> String {
        let mut line = self.binary.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Kill and spawn primitives used by the supervisor.
#[async_trait]
pub trait ProcessHost: Send + Sync {
    /// Forcibly terminate every process carrying `tag`. Succeeds when none
    /// is running.
    async fn kill_tagged(&self, tag: &str) -> io::Result<()>;

    /// Start `spec` detached in its own process group, returning its pid.
    async fn spawn_detached(&self, spec: &LaunchSpec) -> io::Result<u32>;
}

/// [`ProcessHost`] for the local machine.
///
/// Process groups spawned here are killed directly. Miners left behind by
/// an earlier supervisor instance are found by their `argv[0]` tag.
#[derive(Debug, Default)]
pub struct SystemHost {
    groups: Mutex<Vec<i32>>,
}

impl SystemHost {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProcessHost for SystemHost {
    async fn kill_tagged(&self, tag: &str) -> io::Result<()> {
        let groups: Vec<i32> = self.groups.lock().drain(..).collect();
        for pgid in groups {
            match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
                Ok(()) => debug!(pgid, "Killed miner process group"),
                Err(Errno::ESRCH) => {}
                Err(e) => return Err(io::Error::from(e)),
            }
        }

        let pattern = format!("^{}", regex::escape(tag));
        let status = tokio::process::Command::new("pkill")
            .args(["-KILL", "-f", &pattern])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        match status {
            // Exit code 1 means nothing matched.
            Ok(status) if status.success() || status.code() == Some(1) => Ok(()),
            Ok(status) => Err(io::Error::other(format!("pkill exited with {status}"))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("pkill unavailable, skipping tag sweep");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn spawn_detached(&self, spec: &LaunchSpec) -> io::Result<u32> {
        let mut command = tokio::process::Command::new(&spec.binary);
        command
            .arg0(&spec.tag)
            .args(&spec.args)
            .process_group(0)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if let Some(dir) = &spec.dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn()?;
        let pid = child
            .id()
            .ok_or_else(|| io::Error::other("spawned miner has no pid"))?;
        self.groups.lock().push(pid as i32);

        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => info!(pid, %status, "Miner exited"),
                Err(e) => warn!(pid, error = %e, "Failed to wait for miner"),
            }
        });

        Ok(pid)
    }
}
