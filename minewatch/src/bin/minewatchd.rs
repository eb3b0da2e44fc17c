//! minewatch daemon.
//!
//! Starts the miner, then runs the polling loop, watchdog, status files
//! and HTTP API until SIGINT or SIGTERM.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use minewatch::api;
use minewatch::config::Config;
use minewatch::miner_protocol::ClaymoreClient;
use minewatch::monitor::RigIdentity;
use minewatch::notify;
use minewatch::poller::{Poller, Sources};
use minewatch::report::ReportWriter;
use minewatch::supervisor::{Supervisor, SupervisorSettings, SystemHost};
use minewatch::telemetry::{NetworkProbe, NvidiaSmi};
use minewatch::tracing::{self, prelude::*};
use minewatch::watchdog::Watchdog;

#[tokio::main]
async fn main() -> Result<()> {
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            tracing::init(None);
            error!(error = %e, "Cannot load configuration");
            return Err(e.into());
        }
    };

    let (notify_layer, pushover) = match notify::pushover(&config.notify, &config.worker_name) {
        Some((layer, task)) => (Some(layer), Some(task)),
        None => (None, None),
    };
    tracing::init(notify_layer);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        worker = %config.worker_name,
        dry_run = config.miner.dry_run,
        "minewatch starting"
    );

    let cancel = CancellationToken::new();
    let tracker = TaskTracker::new();

    if let Some(pushover) = pushover {
        tracker.spawn(pushover.run(cancel.clone()));
    }

    let settings = SupervisorSettings::from_config(&config.miner)?;
    let (supervisor, miner) = Supervisor::new(settings, Arc::new(SystemHost::new()));
    tracker.spawn(supervisor.run(cancel.clone()));

    let listener = match config.api.listen {
        Some(addr) => match api::bind(addr).await {
            Ok(listener) => Some(listener),
            Err(e) => {
                error!(%addr, error = %e, "Cannot bind API");
                shutdown(&cancel, &tracker).await;
                return Err(e).context("API bind failed");
            }
        },
        None => None,
    };

    let (status_tx, status_rx) = watch::channel(None);

    let sources = Sources {
        miner: Arc::new(ClaymoreClient::new(
            config.miner.api_host.clone(),
            config.miner.api_port,
            config.miner.args.clone(),
        )),
        gpus: Arc::new(NvidiaSmi::new(config.telemetry.smi_path.clone())),
        network: Arc::new(NetworkProbe::new(
            config.network.probe_host.clone(),
            config.network.timeout(),
        )),
    };
    let identity = RigIdentity {
        app_version: env!("CARGO_PKG_VERSION").to_string(),
        worker_name: config.worker_name.clone(),
        miner_name: config.miner.name.clone(),
        miner_version: config.miner.version.clone(),
    };
    let watchdog = Watchdog::new(&config.watchdog, Arc::new(miner.clone()));
    let poller = Poller::new(&config, sources, watchdog, identity, status_tx);
    tracker.spawn(poller.run(cancel.clone()));

    tracker.spawn(ReportWriter::new(config.run_dir.clone()).run(status_rx.clone(), cancel.clone()));

    if let Some(listener) = listener {
        let state = api::SharedState::new(status_rx);
        let api_cancel = cancel.clone();
        tracker.spawn(async move {
            if let Err(e) = api::serve(listener, state, api_cancel.clone()).await {
                error!(error = %e, "API server failed");
                api_cancel.cancel();
            }
        });
    }

    // Monitoring runs while the first spawn waits out the miner delay.
    tokio::select! {
        result = miner.start(false) => {
            if let Err(e) = result {
                error!(error = %e, "Cannot start miner");
                shutdown(&cancel, &tracker).await;
                return Err(e).context("initial miner start failed");
            }
        }
        result = wait_for_signal() => {
            result?;
            info!(notice = true, "minewatch stopping");
            shutdown(&cancel, &tracker).await;
            return Ok(());
        }
    }

    tokio::select! {
        result = wait_for_signal() => result?,
        _ = cancel.cancelled() => {}
    }

    info!(notice = true, "minewatch stopping");
    shutdown(&cancel, &tracker).await;
    Ok(())
}

async fn wait_for_signal() -> Result<()> {
    let mut terminate = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("waiting for SIGINT")?,
        _ = terminate.recv() => {}
    }
    Ok(())
}

/// Cancel every task and wait for them, including the miner kill.
async fn shutdown(cancel: &CancellationToken, tracker: &TaskTracker) {
    cancel.cancel();
    tracker.close();
    tracker.wait().await;
}
