//! Production [`Platform`] backed by pnet, pcap, and the OS tables.
//!
//! Adapter enumeration comes from `pnet::datalink`, enriched with the
//! per-interface default gateway read from the routing table. The neighbor
//! table is read from `/proc/net/arp` on Linux and `arp -an` on macOS.
//! Capture devices and the live handle come from libpcap, which is also
//! what understands Npcap's `\Device\NPF_{GUID}` device names on Windows.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use pcap::{Active, Capture};
use pnet::datalink;
use pnet::ipnetwork::IpNetwork;
use pnet::util::MacAddr;
use tracing::{debug, warn};

use super::platform::{CaptureHandle, NetworkAdapter, NeighborEntry, Platform, map_capture_device};
use crate::error::{NetError, Result};

/// Maximum bytes captured per packet.
const SNAPLEN: i32 = 65536;

/// Read timeout handed to the capture library.
const READ_TIMEOUT_MS: i32 = 1000;

/// The real-OS platform implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemPlatform;

impl SystemPlatform {
    pub fn new() -> Self {
        Self
    }
}

impl Platform for SystemPlatform {
    fn adapters(&self) -> Result<Vec<NetworkAdapter>> {
        let gateways = gateway_map();
        let devices = self.capture_devices().unwrap_or_default();

        let adapters = datalink::interfaces()
            .iter()
            .filter(|iface| !iface.is_loopback())
            .map(|iface| {
                let (ipv4, netmask) = iface
                    .ips
                    .iter()
                    .find_map(|network| match network {
                        IpNetwork::V4(v4) => Some((v4.ip(), v4.mask())),
                        IpNetwork::V6(_) => None,
                    })
                    .map_or((None, None), |(ip, mask)| (Some(ip), Some(mask)));

                NetworkAdapter {
                    name: iface.name.clone(),
                    capture_device: map_capture_device(&iface.name, &devices)
                        .map(str::to_string),
                    description: iface.description.clone(),
                    friendly_name: if iface.description.is_empty() {
                        iface.name.clone()
                    } else {
                        iface.description.clone()
                    },
                    mac: iface.mac.unwrap_or_else(MacAddr::zero),
                    ipv4,
                    netmask,
                    gateway: gateways.get(&iface.name).copied(),
                    is_up: iface.is_up(),
                    is_wireless: is_wireless(&iface.name),
                }
            })
            .collect();

        Ok(adapters)
    }

    fn neighbors(&self) -> Result<Vec<NeighborEntry>> {
        read_neighbor_table()
    }

    fn capture_devices(&self) -> Result<Vec<String>> {
        let devices = pcap::Device::list()
            .map_err(|e| NetError::Platform(format!("failed to list capture devices: {e}")))?;
        Ok(devices.into_iter().map(|d| d.name).collect())
    }

    fn open_capture(&self, device: &str) -> Result<Box<dyn CaptureHandle>> {
        let capture = open_live(device)?;

        let capture = match capture.setnonblock() {
            Ok(capture) => capture,
            Err(e) => {
                // Non-fatal: the read timeout still bounds blocking reads.
                warn!("failed to set non-blocking mode on {device}: {e}");
                open_live(device)?
            }
        };

        Ok(Box::new(SystemHandle { capture }))
    }
}

fn open_live(device: &str) -> Result<Capture<Active>> {
    Capture::from_device(device)
        .map_err(|e| NetError::CaptureOpen(format!("{device}: {e}")))?
        .promisc(true)
        .snaplen(SNAPLEN)
        .timeout(READ_TIMEOUT_MS)
        .open()
        .map_err(|e| NetError::CaptureOpen(format!("{device}: {e}")).into())
}

struct SystemHandle {
    capture: Capture<Active>,
}

impl CaptureHandle for SystemHandle {
    fn send_frame(&mut self, frame: &[u8]) -> Result<()> {
        self.capture
            .sendpacket(frame)
            .map_err(|e| NetError::SendFailed(e.to_string()).into())
    }

    fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
        match self.capture.next_packet() {
            Ok(packet) => Ok(Some(packet.data.to_vec())),
            Err(pcap::Error::TimeoutExpired) => Ok(None),
            Err(e) => Err(NetError::Platform(format!("capture read failed: {e}")).into()),
        }
    }
}

#[cfg(target_os = "linux")]
fn is_wireless(name: &str) -> bool {
    std::path::Path::new(&format!("/sys/class/net/{name}/wireless")).exists()
}

#[cfg(not(target_os = "linux"))]
fn is_wireless(_name: &str) -> bool {
    false
}

/// Default gateway per interface, read from the routing table.
#[cfg(target_os = "linux")]
fn gateway_map() -> HashMap<String, Ipv4Addr> {
    match std::fs::read_to_string("/proc/net/route") {
        Ok(data) => parse_route_table(&data),
        Err(e) => {
            debug!("failed to read routing table: {e}");
            HashMap::new()
        }
    }
}

#[cfg(target_os = "macos")]
fn gateway_map() -> HashMap<String, Ipv4Addr> {
    match std::process::Command::new("netstat")
        .args(["-rn", "-f", "inet"])
        .output()
    {
        Ok(output) => parse_netstat_routes(&String::from_utf8_lossy(&output.stdout)),
        Err(e) => {
            debug!("failed to run netstat: {e}");
            HashMap::new()
        }
    }
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
fn gateway_map() -> HashMap<String, Ipv4Addr> {
    debug!("no routing table reader for this platform");
    HashMap::new()
}

/// Parse `/proc/net/route`: the default route per interface has a zero
/// destination; addresses are little-endian hex.
fn parse_route_table(data: &str) -> HashMap<String, Ipv4Addr> {
    let mut gateways = HashMap::new();

    for line in data.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 3 || fields[1] != "00000000" {
            continue;
        }
        if let Ok(raw) = u32::from_str_radix(fields[2], 16) {
            let gateway = Ipv4Addr::from(raw.to_be());
            if gateway != Ipv4Addr::UNSPECIFIED {
                gateways.entry(fields[0].to_string()).or_insert(gateway);
            }
        }
    }

    gateways
}

/// Parse `netstat -rn -f inet` output into an interface → gateway map.
#[allow(dead_code)]
fn parse_netstat_routes(data: &str) -> HashMap<String, Ipv4Addr> {
    let mut gateways = HashMap::new();

    for line in data.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() >= 4
            && fields[0] == "default"
            && let Ok(gateway) = fields[1].parse::<Ipv4Addr>()
        {
            gateways.entry(fields[3].to_string()).or_insert(gateway);
        }
    }

    gateways
}

#[cfg(target_os = "linux")]
fn read_neighbor_table() -> Result<Vec<NeighborEntry>> {
    let data = std::fs::read_to_string("/proc/net/arp")
        .map_err(|e| NetError::Platform(format!("failed to read neighbor table: {e}")))?;
    Ok(parse_proc_arp(&data))
}

#[cfg(target_os = "macos")]
fn read_neighbor_table() -> Result<Vec<NeighborEntry>> {
    let output = std::process::Command::new("arp")
        .arg("-an")
        .output()
        .map_err(|e| NetError::Platform(format!("failed to run arp: {e}")))?;
    Ok(parse_arp_an(&String::from_utf8_lossy(&output.stdout)))
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
fn read_neighbor_table() -> Result<Vec<NeighborEntry>> {
    Err(NetError::Platform("no neighbor table reader for this platform".into()).into())
}

/// Parse `/proc/net/arp`. Columns: IP, HW type, Flags, HW address, Mask,
/// Device. An entry is usable when the complete flag (0x2) is set.
fn parse_proc_arp(data: &str) -> Vec<NeighborEntry> {
    data.lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 4 {
                return None;
            }
            let ip = fields[0].parse().ok()?;
            let mac = parse_os_mac(fields[3])?;
            let flags = u32::from_str_radix(fields[2].trim_start_matches("0x"), 16).unwrap_or(0);
            Some(NeighborEntry {
                ip,
                mac,
                is_valid: flags & 0x2 != 0,
            })
        })
        .collect()
}

/// Parse `arp -an` lines of the form
/// `? (192.168.1.1) at aa:bb:cc:dd:ee:ff on en0 ...`.
#[allow(dead_code)]
fn parse_arp_an(data: &str) -> Vec<NeighborEntry> {
    data.lines()
        .filter_map(|line| {
            let open = line.find('(')?;
            let close = line[open..].find(')')? + open;
            let ip = line[open + 1..close].parse().ok()?;

            let rest = line[close + 1..].trim_start().strip_prefix("at ")?;
            let hw = rest.split_whitespace().next()?;
            if hw == "(incomplete)" {
                return Some(NeighborEntry {
                    ip,
                    mac: MacAddr::zero(),
                    is_valid: false,
                });
            }

            Some(NeighborEntry {
                ip,
                mac: parse_os_mac(hw)?,
                is_valid: true,
            })
        })
        .collect()
}

/// Lenient MAC parser for OS table output, which may omit leading zeros.
fn parse_os_mac(s: &str) -> Option<MacAddr> {
    let mut bytes = [0u8; 6];
    let mut count = 0;
    for part in s.split(':') {
        if count == 6 || part.is_empty() || part.len() > 2 {
            return None;
        }
        bytes[count] = u8::from_str_radix(part, 16).ok()?;
        count += 1;
    }
    (count == 6).then(|| MacAddr(bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5]))
}
