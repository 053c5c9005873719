//! ARP frame transmission and gateway discovery.
//!
//! The engine owns no policy: it turns topology + arguments into frames,
//! pushes them through the shared capture handle, and keeps the
//! performance counters honest. Poisoning decisions live in
//! [`crate::poison`]; the engine is also what the topology layer leans on
//! to resolve the gateway's hardware address.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use metrics::counter;
use parking_lot::{Mutex, RwLock};
use pnet::util::MacAddr;
use tracing::{debug, info};

use crate::error::{NetError, Result};
use crate::network::{CaptureHandle, Platform, frame};
use crate::stats::StatsRecorder;
use crate::topology::NetworkTopology;

/// The capture handle shared between the engine, the poisoner, and the
/// manager lifecycle. `None` while the core is degraded or shut down.
pub type SharedHandle = Arc<Mutex<Option<Box<dyn CaptureHandle>>>>;

/// The topology cached by the last successful initialization.
pub type SharedTopology = Arc<RwLock<Option<NetworkTopology>>>;

/// How long to give the OS to learn from a solicited reply before
/// re-reading its neighbor table.
const PROBE_WAIT: Duration = Duration::from_millis(500);

/// A station observed on the segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostInfo {
    pub ip: Ipv4Addr,
    pub mac: MacAddr,
}

pub struct ArpEngine<P> {
    platform: Arc<P>,
    handle: SharedHandle,
    topology: SharedTopology,
    stats: StatsRecorder,
}

impl<P> Clone for ArpEngine<P> {
    fn clone(&self) -> Self {
        Self {
            platform: Arc::clone(&self.platform),
            handle: Arc::clone(&self.handle),
            topology: Arc::clone(&self.topology),
            stats: self.stats.clone(),
        }
    }
}

impl<P: Platform> ArpEngine<P> {
    pub fn new(
        platform: Arc<P>,
        handle: SharedHandle,
        topology: SharedTopology,
        stats: StatsRecorder,
    ) -> Self {
        Self {
            platform,
            handle,
            topology,
            stats,
        }
    }

    /// Broadcast a request asking who owns `target_ip`.
    pub fn send_request(&self, target_ip: Ipv4Addr) -> Result<()> {
        let started = Instant::now();
        let (our_mac, our_ip) = self.local_endpoint()?;
        let frame = frame::encode_request(our_mac, our_ip, target_ip);
        self.transmit(&frame, started, "request")
    }

    /// Send an arbitrary solicited reply, unicast to `target_mac`.
    pub fn send_reply(
        &self,
        sender_ip: Ipv4Addr,
        target_ip: Ipv4Addr,
        sender_mac: MacAddr,
        target_mac: MacAddr,
    ) -> Result<()> {
        let started = Instant::now();
        let frame = frame::encode_reply(sender_mac, sender_ip, target_mac, target_ip);
        self.transmit(&frame, started, "reply")
    }

    /// Send an unsolicited reply telling the victim that `spoof_ip` is at
    /// our hardware address.
    pub fn send_spoof(
        &self,
        victim_ip: Ipv4Addr,
        victim_mac: MacAddr,
        spoof_ip: Ipv4Addr,
    ) -> Result<()> {
        let started = Instant::now();
        let (our_mac, _) = self.local_endpoint()?;
        let frame = frame::encode_spoof(victim_mac, victim_ip, spoof_ip, our_mac);
        self.transmit(&frame, started, "spoof")
    }

    /// Find the gateway's hardware address.
    ///
    /// Checks the OS neighbor table, and if the entry is missing and a
    /// capture handle is open, solicits it with one broadcast request and
    /// re-reads the table after [`PROBE_WAIT`]. One probe per call; the
    /// caller owns any retry policy.
    pub fn discover_gateway_mac(&self, gateway_ip: Ipv4Addr) -> Option<MacAddr> {
        if let Some(mac) = self.lookup_neighbor(gateway_ip) {
            return Some(mac);
        }

        let has_handle = self.handle.lock().is_some();
        if has_handle && self.send_request(gateway_ip).is_ok() {
            thread::sleep(PROBE_WAIT);
            if let Some(mac) = self.lookup_neighbor(gateway_ip) {
                return Some(mac);
            }
        }

        None
    }

    /// Run gateway discovery and store a successful result in the
    /// topology. Returns whether the topology now has a gateway MAC.
    pub fn refresh_gateway_mac(&self) -> bool {
        let Some(gateway_ip) = self.topology.read().as_ref().map(|t| t.gateway_ip) else {
            return false;
        };

        match self.discover_gateway_mac(gateway_ip) {
            Some(mac) if mac != MacAddr::zero() => {
                if let Some(topology) = self.topology.write().as_mut() {
                    info!("resolved gateway {gateway_ip} to {}", frame::format_mac(mac));
                    topology.gateway_mac = Some(mac);
                    true
                } else {
                    false
                }
            }
            _ => false,
        }
    }

    /// Drain up to `budget` buffered frames, returning the stations seen
    /// in ARP replies.
    pub fn poll_frames(&self, budget: usize) -> Vec<HostInfo> {
        let mut hosts = Vec::new();
        let mut guard = self.handle.lock();
        let Some(handle) = guard.as_mut() else {
            return hosts;
        };

        for _ in 0..budget {
            let started = Instant::now();
            match handle.next_frame() {
                Ok(Some(data)) => {
                    self.stats.record_receive(elapsed_ms(started), true);
                    counter!("arp.frames_received").increment(1);
                    if let Ok(parsed) = frame::parse(&data)
                        && parsed.op == frame::ArpOp::Reply
                    {
                        hosts.push(HostInfo {
                            ip: parsed.sender_ip,
                            mac: parsed.sender_mac,
                        });
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    self.stats.record_receive(elapsed_ms(started), false);
                    counter!("arp.receive_errors").increment(1);
                    debug!("capture read failed: {e}");
                    break;
                }
            }
        }

        hosts
    }

    pub fn stats(&self) -> &StatsRecorder {
        &self.stats
    }

    pub fn topology(&self) -> &SharedTopology {
        &self.topology
    }

    fn local_endpoint(&self) -> Result<(MacAddr, Ipv4Addr)> {
        self.topology
            .read()
            .as_ref()
            .map(|t| (t.interface_mac, t.local_ip))
            .ok_or_else(|| NetError::NotInitialized.into())
    }

    fn lookup_neighbor(&self, ip: Ipv4Addr) -> Option<MacAddr> {
        match self.platform.neighbors() {
            Ok(entries) => entries
                .iter()
                .find(|entry| entry.is_valid && entry.ip == ip && entry.mac != MacAddr::zero())
                .map(|entry| entry.mac),
            Err(e) => {
                debug!("neighbor table read failed: {e}");
                None
            }
        }
    }

    /// Push one assembled frame through the handle and account for it.
    /// The timing sample spans frame assembly through the send call.
    fn transmit(&self, frame: &[u8], started: Instant, kind: &'static str) -> Result<()> {
        let result = match self.handle.lock().as_mut() {
            Some(handle) => handle.send_frame(frame),
            None => Err(NetError::NotTransmitted.into()),
        };

        self.stats.record_send(elapsed_ms(started), result.is_ok());
        if result.is_ok() {
            counter!("arp.frames_sent", "op" => kind).increment(1);
        } else {
            counter!("arp.send_errors", "op" => kind).increment(1);
        }

        result
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_micros() as f64 / 1000.0
}
