//! The core facade.
//!
//! An [`ArpManager`] is a handle value owned by the caller (typically the
//! RPC/IPC layer of the application above): it wires the platform port,
//! topology, engine, and poisoning controller together and exposes the
//! operation surface. Construction is cheap; `initialize` binds the
//! manager to one adapter and opens the capture handle.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use pnet::util::MacAddr;
use tracing::{debug, info, warn};

use crate::engine::{ArpEngine, HostInfo, SharedHandle, SharedTopology};
use crate::error::{NetError, Result};
use crate::network::{NetworkAdapter, Platform, frame, map_capture_device};
use crate::poison::{PoisonTarget, Poisoner};
use crate::stats::{PerformanceStats, StatsRecorder};
use crate::topology::{self, NetworkTopology};

/// How long `scan` waits for replies after the sweep.
const SCAN_WAIT: Duration = Duration::from_millis(500);

/// Frames drained per scan poll.
const SCAN_POLL_BUDGET: usize = 4096;

/// Subnets shorter than this are refused by `scan`.
const MIN_SCAN_PREFIX: u8 = 16;

fn default_gateway_backoff() -> Vec<Duration> {
    vec![
        Duration::from_millis(500),
        Duration::from_millis(1000),
        Duration::from_millis(2000),
    ]
}

/// Tunables for the manager lifecycle.
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    /// Re-emit spoof pairs for active victims at this interval.
    /// `None` disables the background re-poisoner.
    pub repoison_interval: Option<Duration>,
    /// Backoffs between gateway-MAC resolution attempts during
    /// `initialize`. One attempt per entry.
    pub gateway_retry_backoff: Vec<Duration>,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            repoison_interval: None,
            gateway_retry_backoff: default_gateway_backoff(),
        }
    }
}

pub struct ArpManager<P: Platform> {
    platform: Arc<P>,
    handle: SharedHandle,
    topology: SharedTopology,
    stats: StatsRecorder,
    engine: ArpEngine<P>,
    poisoner: Poisoner<P>,
    options: ManagerOptions,
    initialized: bool,
}

impl<P: Platform> ArpManager<P> {
    pub fn new(platform: P) -> Self {
        Self::with_options(platform, ManagerOptions::default())
    }

    pub fn with_options(platform: P, options: ManagerOptions) -> Self {
        let platform = Arc::new(platform);
        let handle: SharedHandle = Arc::new(Mutex::new(None));
        let topology: SharedTopology = Arc::new(RwLock::new(None));
        let stats = StatsRecorder::new();
        let engine = ArpEngine::new(
            Arc::clone(&platform),
            Arc::clone(&handle),
            Arc::clone(&topology),
            stats.clone(),
        );
        let poisoner = Poisoner::new(engine.clone());

        Self {
            platform,
            handle,
            topology,
            stats,
            engine,
            poisoner,
            options,
            initialized: false,
        }
    }

    /// Enumerate network adapters.
    pub fn adapters(&self) -> Result<Vec<NetworkAdapter>> {
        self.platform.adapters()
    }

    /// Enumerate capture-library device names.
    pub fn capture_devices(&self) -> Result<Vec<String>> {
        self.platform.capture_devices()
    }

    /// Release the capture handle, restoring any active victims first.
    ///
    /// Idempotent; the handle is closed exactly once. When the handle is
    /// already gone, restoration is skipped silently.
    pub fn cleanup(&mut self) {
        self.poisoner.stop_refresher();

        if self.handle.lock().is_some() {
            self.poisoner.stop_all();
        } else {
            self.poisoner.deactivate_all();
        }

        *self.handle.lock() = None;
        self.initialized = false;
    }

    /// The topology cached by the last successful `initialize`.
    pub fn topology(&self) -> Option<NetworkTopology> {
        self.topology.read().clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Broadcast an ARP request for `target_ip`.
    pub fn send_arp_request(&self, target_ip: &str) -> Result<()> {
        let ip = frame::parse_ipv4(target_ip)?;
        if !self.initialized {
            return Err(NetError::NotInitialized.into());
        }
        self.engine.send_request(ip)
    }

    /// Begin poisoning the victim at `target_ip`/`target_mac`.
    pub fn start_poisoning(&self, target_ip: &str, target_mac: &str) -> Result<()> {
        let ip = frame::parse_ipv4(target_ip)?;
        let mac = frame::parse_mac(target_mac)?;

        if !self.initialized || self.handle.lock().is_none() {
            return Err(NetError::NotInitialized.into());
        }

        self.poisoner.start(ip, mac)
    }

    /// Stop poisoning the victim at `target_ip`. Returns `false` when no
    /// active record exists.
    pub fn stop_poisoning(&self, target_ip: &str) -> Result<bool> {
        let ip = frame::parse_ipv4(target_ip)?;
        self.poisoner.stop(ip)
    }

    pub fn is_poisoning(&self) -> bool {
        self.poisoner.is_poisoning()
    }

    pub fn poison_targets(&self) -> Vec<PoisonTarget> {
        self.poisoner.targets()
    }

    /// Sweep the local subnet for live hosts.
    ///
    /// Sends one broadcast request per host address, then merges the
    /// replies that came back with valid neighbor-table entries inside
    /// the subnet.
    pub fn scan(&self) -> Result<Vec<HostInfo>> {
        if !self.initialized {
            return Err(NetError::NotInitialized.into());
        }
        let Some(topology) = self.topology.read().clone() else {
            return Err(NetError::NotInitialized.into());
        };
        if self.handle.lock().is_none() {
            return Err(NetError::NotTransmitted.into());
        }
        if topology.prefix_len < MIN_SCAN_PREFIX {
            return Err(NetError::Platform(format!(
                "refusing to sweep a /{} subnet",
                topology.prefix_len
            ))
            .into());
        }

        let mask = u32::from(topology.netmask);
        let network = u32::from(topology.local_ip) & mask;
        let broadcast = network | !mask;

        for raw in network + 1..broadcast {
            let ip = Ipv4Addr::from(raw);
            if ip == topology.local_ip {
                continue;
            }
            if let Err(e) = self.engine.send_request(ip) {
                if e.is_not_transmitted() {
                    return Err(e);
                }
                debug!("scan request to {ip} failed: {e}");
            }
        }

        thread::sleep(SCAN_WAIT);

        let mut found: BTreeMap<Ipv4Addr, MacAddr> = BTreeMap::new();
        for host in self.engine.poll_frames(SCAN_POLL_BUDGET) {
            if topology.contains(host.ip) && host.ip != topology.local_ip {
                found.insert(host.ip, host.mac);
            }
        }
        if let Ok(entries) = self.platform.neighbors() {
            for entry in entries {
                if entry.is_valid
                    && entry.mac != MacAddr::zero()
                    && topology.contains(entry.ip)
                    && entry.ip != topology.local_ip
                {
                    found.entry(entry.ip).or_insert(entry.mac);
                }
            }
        }

        info!("scan found {} hosts", found.len());
        Ok(found
            .into_iter()
            .map(|(ip, mac)| HostInfo { ip, mac })
            .collect())
    }

    pub fn performance_stats(&self) -> PerformanceStats {
        self.stats.snapshot()
    }

    pub fn reset_performance_stats(&self) {
        self.stats.reset();
    }

    fn open_capture_for(&self, adapter: &NetworkAdapter) {
        let device = adapter.capture_device.clone().or_else(|| {
            let devices = self.platform.capture_devices().unwrap_or_default();
            map_capture_device(&adapter.name, &devices).map(str::to_string)
        });

        match device {
            Some(device) => match self.platform.open_capture(&device) {
                Ok(handle) => {
                    info!("capture open on {device}");
                    *self.handle.lock() = Some(handle);
                }
                Err(e) => {
                    warn!("capture open failed, continuing degraded: {e}");
                }
            },
            None => {
                warn!(
                    "no capture device maps to adapter {:?}, continuing degraded",
                    adapter.name
                );
            }
        }
    }

    /// Resolve the gateway MAC under the configured retry budget. Probing
    /// needs an open handle; in a degraded core a single neighbor-table
    /// lookup is all that can be done.
    fn resolve_gateway_mac_with_retry(&self) {
        let unresolved = self
            .topology
            .read()
            .as_ref()
            .is_some_and(|t| t.gateway_mac.is_none() && t.gateway_ip != Ipv4Addr::UNSPECIFIED);
        if !unresolved {
            return;
        }

        if self.handle.lock().is_none() {
            self.engine.refresh_gateway_mac();
            return;
        }

        for backoff in &self.options.gateway_retry_backoff {
            if self.engine.refresh_gateway_mac() {
                return;
            }
            debug!("gateway MAC unresolved, backing off {backoff:?}");
            thread::sleep(*backoff);
        }

        warn!("gateway MAC still unresolved after retries");
    }
}

impl<P: Platform + 'static> ArpManager<P> {
    /// Bind the core to the adapter with the given OS identity.
    ///
    /// Opens the capture handle (a failure here degrades the core instead
    /// of aborting: enumeration and topology stay available, sends fail),
    /// resolves the topology, and attempts gateway-MAC resolution under
    /// the configured retry budget.
    pub fn initialize(&mut self, adapter_name: &str) -> Result<()> {
        if self.initialized {
            self.cleanup();
        }

        let adapters = self.platform.adapters()?;
        let adapter = adapters
            .iter()
            .find(|a| a.name == adapter_name)
            .ok_or_else(|| NetError::AdapterNotFound(adapter_name.to_string()))?;

        self.open_capture_for(adapter);

        let resolved = match topology::resolve(self.platform.as_ref(), adapter_name) {
            Ok(resolved) => resolved,
            Err(e) => {
                *self.handle.lock() = None;
                return Err(e);
            }
        };
        info!(
            "topology: {}/{} via {} on {}",
            resolved.local_ip, resolved.prefix_len, resolved.gateway_ip, resolved.interface
        );
        *self.topology.write() = Some(resolved);

        self.resolve_gateway_mac_with_retry();
        self.initialized = true;

        if let Some(interval) = self.options.repoison_interval {
            self.poisoner.start_refresher(interval);
        }

        Ok(())
    }
}

impl<P: Platform> Drop for ArpManager<P> {
    fn drop(&mut self) {
        self.cleanup();
    }
}
