//! Platform port: the only seam through which the core touches the OS.
//!
//! Everything observable about the machine's networking state (adapters,
//! the kernel neighbor table, capture devices, and the live capture
//! handle itself) arrives through the [`Platform`] trait. Every other
//! component is deterministic given these outputs, which is what makes
//! the whole core testable against a scripted fake.

use std::net::Ipv4Addr;

use pnet::util::MacAddr;

use crate::error::Result;

/// A network adapter as reported by the OS.
///
/// Immutable snapshot; produced by [`Platform::adapters`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkAdapter {
    /// OS adapter identity (opaque, stable; a GUID on Windows, the
    /// interface name elsewhere).
    pub name: String,
    /// Capture-library device name, once mapped.
    pub capture_device: Option<String>,
    /// Human-readable description.
    pub description: String,
    /// Friendly display name.
    pub friendly_name: String,
    /// Hardware address; all-zero when the adapter has none.
    pub mac: MacAddr,
    pub ipv4: Option<Ipv4Addr>,
    pub netmask: Option<Ipv4Addr>,
    pub gateway: Option<Ipv4Addr>,
    pub is_up: bool,
    pub is_wireless: bool,
}

impl NetworkAdapter {
    /// Whether this adapter can anchor a topology: operationally up with
    /// both a unicast address and a default gateway.
    pub fn is_viable(&self) -> bool {
        self.is_up
            && self.ipv4.is_some()
            && self
                .gateway
                .is_some_and(|gw| gw != Ipv4Addr::UNSPECIFIED)
    }
}

/// One row of the OS IPv4 neighbor table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NeighborEntry {
    pub ip: Ipv4Addr,
    pub mac: MacAddr,
    /// Whether the OS considers the entry complete/usable.
    pub is_valid: bool,
}

/// An open live capture on a single interface.
///
/// Closing is dropping; the handle releases its OS resources exactly once.
pub trait CaptureHandle: Send {
    /// Transmit one raw frame.
    fn send_frame(&mut self, frame: &[u8]) -> Result<()>;

    /// Receive the next buffered frame, or `None` when nothing is pending
    /// within the read timeout.
    fn next_frame(&mut self) -> Result<Option<Vec<u8>>>;
}

/// Capability set the OS must provide.
pub trait Platform: Send + Sync {
    /// Enumerate adapters, excluding software loopback but including
    /// interfaces that are down.
    fn adapters(&self) -> Result<Vec<NetworkAdapter>>;

    /// Snapshot the OS IPv4 neighbor table.
    fn neighbors(&self) -> Result<Vec<NeighborEntry>>;

    /// Enumerate capture-library device names.
    fn capture_devices(&self) -> Result<Vec<String>>;

    /// Open a live capture handle on the named device.
    fn open_capture(&self, device: &str) -> Result<Box<dyn CaptureHandle>>;
}

/// Map an OS adapter identity to a capture-library device name.
///
/// Capture devices carry the adapter identity as a GUID-like token after
/// the final `_` (Npcap: `\Device\NPF_{GUID}`); on platforms where the two
/// namespaces coincide the whole device name is the token. Matching is by
/// substring containment in either direction.
pub fn map_capture_device<'a, S: AsRef<str>>(
    adapter_name: &str,
    devices: &'a [S],
) -> Option<&'a str> {
    if adapter_name.is_empty() {
        return None;
    }

    devices.iter().map(AsRef::as_ref).find(|device| {
        let token = device.rsplit('_').next().unwrap_or("");
        !token.is_empty() && (adapter_name.contains(token) || token.contains(adapter_name))
    })
}
