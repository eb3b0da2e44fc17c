//! Polling loop.
//!
//! Each cycle fetches the miner snapshot, GPU telemetry and reachability
//! concurrently, feeds the watchdog every `tick_every` cycles, aggregates
//! and publishes the result. The next cycle starts `monitor.interval`
//! after the previous one finished, so slow cycles never overlap.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, MonitorConfig};
use crate::miner_protocol::MinerProtocol;
use crate::monitor::{AggregateInput, RigIdentity, RigStatus, aggregate};
use crate::telemetry::{GpuReport, GpuTelemetry, Reachability};
use crate::tracing::prelude::*;
use crate::watchdog::{TickInput, Watchdog};

/// Latest published snapshot; `None` until the first cycle completes.
pub type StatusSender = watch::Sender<Option<Arc<RigStatus>>>;
pub type StatusReceiver = watch::Receiver<Option<Arc<RigStatus>>>;

/// The three per-cycle inputs.
#[derive(Clone)]
pub struct Sources {
    pub miner: Arc<dyn MinerProtocol>,
    pub gpus: Arc<dyn GpuTelemetry>,
    pub network: Arc<dyn Reachability>,
}

pub struct Poller {
    sources: Sources,
    watchdog: Watchdog,
    monitor: MonitorConfig,
    telemetry_timeout: Duration,
    tick_every: u64,
    identity: RigIdentity,
    started_at: SystemTime,
    cycles: u64,
    previous: Option<Arc<RigStatus>>,
    tx: StatusSender,
}

impl Poller {
    pub fn new(
        config: &Config,
        sources: Sources,
        watchdog: Watchdog,
        identity: RigIdentity,
        tx: StatusSender,
    ) -> Self {
        Self {
            sources,
            watchdog,
            monitor: config.monitor.clone(),
            telemetry_timeout: config.telemetry.timeout(),
            tick_every: u64::from(config.watchdog.tick_every.max(1)),
            identity,
            started_at: SystemTime::now(),
            cycles: 0,
            previous: None,
            tx,
        }
    }

    /// Start the watchdog, wait out the monitor delay, then poll until
    /// cancelled.
    pub async fn run(mut self, cancel: CancellationToken) {
        self.watchdog.start(Instant::now());
        info!(delay_secs = self.monitor.delay_secs, "Starting monitor");

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(self.monitor.delay()) => {}
        }

        loop {
            self.cycle().await;
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.monitor.interval()) => {}
            }
        }
        debug!(cycles = self.cycles, "Monitor stopped");
    }

    /// Run one polling cycle and publish its snapshot.
    pub async fn cycle(&mut self) -> Arc<RigStatus> {
        let (miner, gpus, online) = tokio::join!(
            self.sources.miner.query_status(),
            tokio::time::timeout(self.telemetry_timeout, self.sources.gpus.read()),
            self.sources.network.online(),
        );

        let gpus = match gpus {
            Ok(Ok(report)) => report,
            Ok(Err(e)) => {
                warn!(error = %e, "GPU telemetry unavailable");
                GpuReport::default()
            }
            Err(_) => {
                warn!(
                    timeout_secs = self.telemetry_timeout.as_secs(),
                    "GPU telemetry timed out"
                );
                GpuReport::default()
            }
        };

        if self.cycles % self.tick_every == 0 {
            self.watchdog.tick(
                Instant::now(),
                &TickInput {
                    online,
                    miner: &miner,
                },
            );
        }
        self.cycles += 1;

        let input = AggregateInput {
            miner: &miner,
            gpus: &gpus,
            online,
            identity: &self.identity,
            started_at: self.started_at,
            now: SystemTime::now(),
        };
        let mut status = aggregate(&input, self.previous.as_deref(), &self.monitor);
        status.watchdog = Some(self.watchdog.report(Instant::now()));

        let status = Arc::new(status);
        self.previous = Some(status.clone());
        self.tx.send_replace(Some(status.clone()));
        status
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::config::WatchdogConfig;
    use crate::miner_protocol::{MinerSnapshot, MiningStats};
    use crate::telemetry::{GpuAttributes, TelemetryError};
    use crate::watchdog::{MinerControl, WatchdogPhase};

    struct FakeMiner(AtomicUsize);

    #[async_trait]
    impl MinerProtocol for FakeMiner {
        async fn query_status(&self) -> MinerSnapshot {
            let accepted = 2615 + self.0.fetch_add(1, Ordering::SeqCst) as u64;
            MinerSnapshot {
                miner_online: true,
                uptime: Some(120),
                mining: vec![MiningStats {
                    currency: "ETH".into(),
                    hashrate: 30e6,
                    accepted_shares: accepted,
                    pool: "eu1.ethermine.org:4444".into(),
                    gpu_hashrates: vec![30e6],
                    gpu_accepted_shares: vec![accepted],
                    gpu_rejected_shares: vec![0],
                    gpu_invalid_shares: vec![0],
                    ..Default::default()
                }],
            }
        }
    }

    struct FakeGpus {
        hang: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl GpuTelemetry for FakeGpus {
        async fn read(&self) -> Result<GpuReport, TelemetryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.hang {
                std::future::pending::<()>().await;
            }
            Ok(GpuReport {
                driver_version: Some("390.77".into()),
                gpus: vec![GpuAttributes {
                    id: 0,
                    product: Some("GeForce GTX 1070".into()),
                    fan: Some(60),
                    temp: Some(60),
                    power: Some(120.0),
                    ..Default::default()
                }],
            })
        }
    }

    struct FakeNetwork(AtomicBool);

    #[async_trait]
    impl Reachability for FakeNetwork {
        async fn online(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[derive(Default)]
    struct NoRestart;

    impl MinerControl for NoRestart {
        fn request_restart(&self) {}
    }

    fn config() -> Config {
        let mut config = Config::default();
        config.monitor.delay_secs = 15;
        config.monitor.interval_secs = 2;
        config.watchdog = WatchdogConfig {
            tick_every: 2,
            delay_secs: 0,
            ..Default::default()
        };
        config
    }

    fn poller(config: &Config, hang: bool) -> (Poller, StatusReceiver, Arc<FakeGpus>) {
        let gpus = Arc::new(FakeGpus {
            hang,
            calls: AtomicUsize::new(0),
        });
        let sources = Sources {
            miner: Arc::new(FakeMiner(AtomicUsize::new(0))),
            gpus: gpus.clone(),
            network: Arc::new(FakeNetwork(AtomicBool::new(true))),
        };
        let watchdog = Watchdog::new(&config.watchdog, Arc::new(NoRestart));
        let (tx, rx) = watch::channel(None);
        let identity = RigIdentity {
            worker_name: "rig1".into(),
            ..Default::default()
        };
        (Poller::new(config, sources, watchdog, identity, tx), rx, gpus)
    }

    #[tokio::test(start_paused = true)]
    async fn cycle_publishes_an_aggregated_snapshot() {
        let config = config();
        let (mut poller, rx, _) = poller(&config, false);
        poller.watchdog.start(Instant::now());

        let status = poller.cycle().await;

        assert!(status.miner_online);
        assert!(status.online);
        assert_eq!(status.gpu_count, 1);
        assert_eq!(status.worker_name, "rig1");
        assert_eq!(status.gpus[0].attributes.product.as_deref(), Some("gtx1070"));
        let watchdog = status.watchdog.as_ref().unwrap();
        assert_eq!(watchdog.phase, WatchdogPhase::Running);

        let published = rx.borrow().clone().unwrap();
        assert!(Arc::ptr_eq(&published, &status));
    }

    #[tokio::test(start_paused = true)]
    async fn watchdog_ticks_every_nth_cycle() {
        let config = config();
        let (mut poller, _rx, _) = poller(&config, false);
        poller.watchdog.start(Instant::now());

        let first = poller.cycle().await;
        let second = poller.cycle().await;
        let third = poller.cycle().await;

        let updated = |s: &RigStatus| s.watchdog.as_ref().and_then(|w| w.last_update);
        assert!(updated(&first).is_some());
        assert_eq!(updated(&first), updated(&second));
        assert!(updated(&third) >= updated(&second));
    }

    #[tokio::test(start_paused = true)]
    async fn hung_telemetry_is_bounded() {
        let config = config();
        let (mut poller, _rx, _) = poller(&config, true);
        let t0 = Instant::now();

        let status = poller.cycle().await;

        assert_eq!(Instant::now() - t0, config.telemetry.timeout());
        assert_eq!(status.gpu_count, 0);
        assert!(status.miner_online);
    }

    #[tokio::test(start_paused = true)]
    async fn run_waits_for_delay_and_stops_on_cancel() {
        let config = config();
        let (poller, mut rx, gpus) = poller(&config, false);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(poller.run(cancel.clone()));

        tokio::time::sleep(Duration::from_secs(14)).await;
        assert_eq!(gpus.calls.load(Ordering::SeqCst), 0);

        rx.changed().await.unwrap();
        assert!(rx.borrow().is_some());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(gpus.calls.load(Ordering::SeqCst) >= 3);

        cancel.cancel();
        task.await.unwrap();
    }
}
