//! Command-line interface for minewatch.
//!
//! This binary queries a running daemon through its HTTP API and prints a
//! plain-text summary.

use std::env;

use anyhow::{Result, bail};

use minewatch::api_client::{Client, DEFAULT_BASE_URL, types::WatchdogReport};
use minewatch::monitor::normalize_hashrate;
use minewatch::types::Elapsed;

const USAGE: &str = "\
usage: minewatch-cli status|watchdog

  status     latest rig snapshot with per-GPU levels
  watchdog   watchdog phase and per-watch verdicts

MINEWATCH_API_URL overrides the daemon address";

#[tokio::main]
async fn main() -> Result<()> {
    let client = match env::var("MINEWATCH_API_URL") {
        Ok(url) => Client::with_base_url(url),
        Err(_) => Client::new(),
    };

    match env::args().nth(1).as_deref() {
        Some("status") => cmd_status(&client).await,
        Some("watchdog") => cmd_watchdog(&client).await,
        Some(other) => bail!("unknown command {other:?}\n\n{USAGE}"),
        None => {
            eprintln!("{USAGE} (default {DEFAULT_BASE_URL})");
            std::process::exit(2);
        }
    }
}

/// Print a summary of the latest rig snapshot.
async fn cmd_status(client: &Client) -> Result<()> {
    let status = client.get_status().await?;

    println!(
        "{}  minewatch v{}, {} v{}",
        status.worker_name, status.app_version, status.miner_name, status.miner_version
    );
    println!(
        "GPUs:    {} (driver {})",
        status.gpu_count,
        status.driver_version.as_deref().unwrap_or("unknown")
    );
    println!("Uptime:  {}", Elapsed(status.uptime));
    println!(
        "Network: {}  Miner: {}",
        if status.online { "online" } else { "offline" },
        if status.miner_online { "online" } else { "offline" }
    );

    for currency in &status.mining {
        let stats = &currency.stats;
        println!(
            "{} @ {}: {:.2} MH/s, shares {}/{}/{}",
            stats.currency,
            currency.pool_name,
            normalize_hashrate(stats.hashrate),
            stats.accepted_shares,
            stats.rejected_shares,
            stats.invalid_shares
        );
    }

    if !status.gpus.is_empty() {
        println!("GPUs:");
        for gpu in &status.gpus {
            let a = &gpu.attributes;
            println!(
                "  #{} {:<12} fan {:>3}% [{}]  temp {:>3}C [{}]  power {:>7}W [{}]",
                a.id,
                a.product.as_deref().unwrap_or("-"),
                show(a.fan),
                gpu.state_fan,
                show(a.temp),
                gpu.state_temp,
                a.power.map_or_else(|| "-".to_string(), |p| format!("{p:.2}")),
                gpu.state_power
            );
        }
    }

    if let Some(watchdog) = &status.watchdog {
        print_watchdog(watchdog);
    }

    Ok(())
}

async fn cmd_watchdog(client: &Client) -> Result<()> {
    let report = client.get_watchdog().await?;
    print_watchdog(&report);
    Ok(())
}

fn print_watchdog(report: &WatchdogReport) {
    println!("Watchdog {}", report.phase);
    for watch in &report.watches {
        match watch.invalid_for_secs {
            Some(secs) => println!("  {:<10} {} ({})", watch.name, watch.status, Elapsed(secs)),
            None => println!("  {:<10} {}", watch.name, watch.status),
        }
    }
}

fn show<T: ToString>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}
