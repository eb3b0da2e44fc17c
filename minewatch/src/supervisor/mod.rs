//! Miner process supervisor.
//!
//! A single task owns the miner process. Callers talk to it through a
//! cloneable [`MinerHandle`]. Every start is kill, then delay, then spawn.
//! A start arriving during the delay restarts the sequence, so bursts of
//! restart requests spawn the miner once.

mod host;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::MinerConfig;
use crate::error::{Error, Result};
use crate::tracing::prelude::*;
use crate::watchdog::MinerControl;

pub use host::{LaunchSpec, ProcessHost, SystemHost};

/// Pause between killing the old miner and spawning a new one, even with
/// no configured delay.
const KILL_SETTLE: Duration = Duration::from_millis(500);

const COMMAND_QUEUE: usize = 16;

pub enum SupervisorCommand {
    /// Kill any running miner and schedule a spawn.
    Start {
        silent: bool,
        /// Receives the spawn result once the delay has elapsed.
        reply: Option<oneshot::Sender<Result<()>>>,
    },

    /// Kill the miner and cancel any scheduled spawn.
    Kill { reply: oneshot::Sender<()> },
}

/// Cloneable front end of the supervisor task.
#[derive(Debug, Clone)]
pub struct MinerHandle {
    tx: mpsc::Sender<SupervisorCommand>,
}

impl MinerHandle {
    /// Start the miner and wait until it has been spawned.
    pub async fn start(&self, silent: bool) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SupervisorCommand::Start {
                silent,
                reply: Some(reply),
            })
            .await
            .map_err(|_| Error::SupervisorGone)?;
        rx.await.map_err(|_| Error::SupervisorGone)?
    }

    /// Schedule a restart without waiting for it.
    pub fn restart(&self, silent: bool) {
        let command = SupervisorCommand::Start {
            silent,
            reply: None,
        };
        if let Err(e) = self.tx.try_send(command) {
            warn!(error = %e, "Miner restart request dropped");
        }
    }

    pub async fn kill(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SupervisorCommand::Kill { reply })
            .await
            .map_err(|_| Error::SupervisorGone)?;
        rx.await.map_err(|_| Error::SupervisorGone)
    }
}

impl MinerControl for MinerHandle {
    fn request_restart(&self) {
        self.restart(false);
    }
}

#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub spec: LaunchSpec,
    pub delay: Duration,
    /// Log commands instead of running them.
    pub dry_run: bool,
    pub name: String,
    pub version: String,
}

impl SupervisorSettings {
    pub fn from_config(config: &MinerConfig) -> Result<Self> {
        let binary = match (&config.binary, config.dry_run) {
            (Some(binary), _) => binary.clone(),
            (None, true) => config.name.clone().into(),
            (None, false) => return Err(Error::Config("miner.binary is required".into())),
        };
        Ok(Self {
            spec: LaunchSpec {
                tag: config.process_tag(),
                binary,
                args: config.arg_list(),
                dir: config.dir.clone(),
            },
            delay: config.delay(),
            dry_run: config.dry_run,
            name: config.name.clone(),
            version: config.version.clone(),
        })
    }
}

/// A spawn waiting for its delay.
struct Pending {
    at: Instant,
    reply: Option<oneshot::Sender<Result<()>>>,
}

pub struct Supervisor {
    settings: SupervisorSettings,
    host: Arc<dyn ProcessHost>,
    rx: mpsc::Receiver<SupervisorCommand>,
}

impl Supervisor {
    pub fn new(settings: SupervisorSettings, host: Arc<dyn ProcessHost>) -> (Self, MinerHandle) {
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE);
        (Self { settings, host, rx }, MinerHandle { tx })
    }

    /// Serve commands until cancelled or every handle is dropped, then
    /// kill the miner.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut pending: Option<Pending> = None;

        loop {
            let spawn_at = pending.as_ref().map(|p| p.at);

            tokio::select! {
                _ = cancel.cancelled() => break,

                command = self.rx.recv() => match command {
                    Some(SupervisorCommand::Start { silent, reply }) => {
                        // A waiting caller is answered by whichever spawn follows.
                        let previous = pending.take().and_then(|p| p.reply);
                        let reply = match (reply, previous) {
                            (Some(reply), Some(previous)) => {
                                let _ = previous.send(Err(Error::Other("start superseded".into())));
                                Some(reply)
                            }
                            (reply, previous) => reply.or(previous),
                        };
                        pending = self.begin_start(silent, reply).await;
                    }
                    Some(SupervisorCommand::Kill { reply }) => {
                        if let Some(previous) = pending.take().and_then(|p| p.reply) {
                            let _ = previous.send(Err(Error::Other("start cancelled by kill".into())));
                        }
                        self.kill().await;
                        let _ = reply.send(());
                    }
                    None => break,
                },

                _ = tokio::time::sleep_until(spawn_at.unwrap_or_else(Instant::now)), if spawn_at.is_some() => {
                    let reply = pending.take().and_then(|p| p.reply);
                    let result = self.spawn().await;
                    match reply {
                        Some(reply) => {
                            let _ = reply.send(result);
                        }
                        None => {
                            if let Err(e) = result {
                                error!(error = %e, "Miner restart failed, retrying on next trigger");
                            }
                        }
                    }
                }
            }
        }

        if let Some(previous) = pending.take().and_then(|p| p.reply) {
            let _ = previous.send(Err(Error::SupervisorGone));
        }
        self.kill().await;
        debug!("Supervisor stopped");
    }

    /// Kill, announce and schedule. Dry runs complete immediately.
    async fn begin_start(
        &self,
        silent: bool,
        reply: Option<oneshot::Sender<Result<()>>>,
    ) -> Option<Pending> {
        if self.settings.dry_run {
            info!(
                command = %self.settings.spec.command_line(),
                "Dry run, not starting miner"
            );
            if let Some(reply) = reply {
                let _ = reply.send(Ok(()));
            }
            return None;
        }

        self.kill().await;
        if !silent {
            info!(
                notice = true,
                miner = %self.settings.name,
                version = %self.settings.version,
                delay_secs = self.settings.delay.as_secs(),
                "Starting miner"
            );
        }
        Some(Pending {
            at: Instant::now() + self.settings.delay.max(KILL_SETTLE),
            reply,
        })
    }

    async fn kill(&self) {
        if self.settings.dry_run {
            return;
        }
        if let Err(e) = self.host.kill_tagged(&self.settings.spec.tag).await {
            warn!(error = %e, tag = %self.settings.spec.tag, "Failed to kill miner");
        }
    }

    async fn spawn(&self) -> Result<()> {
        let spec = &self.settings.spec;
        let pid = self
            .host
            .spawn_detached(spec)
            .await
            .map_err(|source| Error::Spawn {
                binary: spec.binary.display().to_string(),
                source,
            })?;
        info!(pid, command = %spec.command_line(), "Miner spawned");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::path::PathBuf;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Kill(String),
        Spawn(String),
    }

    #[derive(Default)]
    struct FakeHost {
        calls: Mutex<Vec<(Call, Instant)>>,
        fail_spawn: Mutex<bool>,
    }

    impl FakeHost {
        fn calls(&self) -> Vec<Call> {
            self.calls.lock().iter().map(|(c, _)| c.clone()).collect()
        }

        fn spawns(&self) -> Vec<Instant> {
            self.calls
                .lock()
                .iter()
                .filter(|(c, _)| matches!(c, Call::Spawn(_)))
                .map(|(_, at)| *at)
                .collect()
        }
    }

    #[async_trait]
    impl ProcessHost for FakeHost {
        async fn kill_tagged(&self, tag: &str) -> io::Result<()> {
            self.calls
                .lock()
                .push((Call::Kill(tag.to_string()), Instant::now()));
            Ok(())
        }

        async fn spawn_detached(&self, spec: &LaunchSpec) -> io::Result<u32> {
            if *self.fail_spawn.lock() {
                return Err(io::Error::from(io::ErrorKind::NotFound));
            }
            self.calls
                .lock()
                .push((Call::Spawn(spec.command_line()), Instant::now()));
            Ok(4242)
        }
    }

    fn settings(dry_run: bool) -> SupervisorSettings {
        SupervisorSettings {
            spec: LaunchSpec {
                tag: "minewatch-miner claymore 11.5".into(),
                binary: PathBuf::from("/opt/miner"),
                args: vec!["-mode".into(), "1".into()],
                dir: None,
            },
            delay: Duration::from_secs(15),
            dry_run,
            name: "claymore".into(),
            version: "11.5".into(),
        }
    }

    fn launch(dry_run: bool) -> (Arc<FakeHost>, MinerHandle, CancellationToken) {
        let host = Arc::new(FakeHost::default());
        let (supervisor, handle) = Supervisor::new(settings(dry_run), host.clone());
        let cancel = CancellationToken::new();
        tokio::spawn(supervisor.run(cancel.clone()));
        (host, handle, cancel)
    }

    #[tokio::test(start_paused = true)]
    async fn start_kills_then_waits_then_spawns() {
        let (host, handle, _cancel) = launch(false);
        let t0 = Instant::now();

        handle.start(true).await.unwrap();

        assert_eq!(
            host.calls(),
            vec![
                Call::Kill("minewatch-miner claymore 11.5".into()),
                Call::Spawn("/opt/miner -mode 1".into()),
            ]
        );
        assert!(host.spawns()[0] - t0 >= Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn restarts_during_delay_are_debounced() {
        let (host, handle, _cancel) = launch(false);
        let t0 = Instant::now();

        handle.restart(true);
        tokio::time::sleep(Duration::from_secs(10)).await;
        handle.restart(true);
        tokio::time::sleep(Duration::from_secs(30)).await;

        let spawns = host.spawns();
        assert_eq!(spawns.len(), 1);
        assert!(spawns[0] - t0 >= Duration::from_secs(25));
        let kills = host
            .calls()
            .iter()
            .filter(|c| matches!(c, Call::Kill(_)))
            .count();
        assert_eq!(kills, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn superseded_start_still_gets_the_result() {
        let (host, handle, _cancel) = launch(false);

        let waiter = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.start(false).await })
        };
        tokio::time::sleep(Duration::from_secs(5)).await;
        handle.restart(true);

        waiter.await.unwrap().unwrap();
        assert_eq!(host.spawns().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dry_run_neither_kills_nor_spawns() {
        let (host, handle, _cancel) = launch(true);
        let t0 = Instant::now();

        handle.start(false).await.unwrap();

        assert!(host.calls().is_empty());
        assert_eq!(Instant::now(), t0);
    }

    #[tokio::test(start_paused = true)]
    async fn initial_spawn_failure_is_reported() {
        let (host, handle, _cancel) = launch(false);
        *host.fail_spawn.lock() = true;

        let err = handle.start(false).await.unwrap_err();
        assert!(matches!(err, Error::Spawn { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn restart_failure_does_not_stop_the_supervisor() {
        let (host, handle, _cancel) = launch(false);
        *host.fail_spawn.lock() = true;

        handle.restart(false);
        tokio::time::sleep(Duration::from_secs(20)).await;
        *host.fail_spawn.lock() = false;

        handle.start(true).await.unwrap();
        assert_eq!(host.spawns().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn kill_cancels_a_scheduled_spawn() {
        let (host, handle, _cancel) = launch(false);

        handle.restart(true);
        tokio::time::sleep(Duration::from_secs(1)).await;
        handle.kill().await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert!(host.spawns().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_kills_the_miner() {
        let (host, handle, cancel) = launch(false);
        handle.start(true).await.unwrap();

        cancel.cancel();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(matches!(host.calls().last(), Some(Call::Kill(_))));
        assert!(matches!(
            handle.start(true).await,
            Err(Error::SupervisorGone)
        ));
    }
}
