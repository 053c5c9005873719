//! Network topology resolution.
//!
//! Given an adapter identity, determine where we sit on the segment: our
//! address and mask, the default gateway, and (eventually) the gateway's
//! hardware address. Resolution is two-tier: the adapter named by the
//! caller first, then the first viable adapter on the machine. The second
//! tier exists because a formally-correct adapter selection can still lack
//! the gateway enrichment needed to work with, while another interface
//! observably carries the default route.

use std::net::Ipv4Addr;

use pnet::util::MacAddr;
use tracing::debug;

use crate::error::{NetError, Result};
use crate::network::{NetworkAdapter, Platform};

/// Where this host sits on its broadcast domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkTopology {
    pub local_ip: Ipv4Addr,
    pub netmask: Ipv4Addr,
    /// Count of leading one-bits of `netmask`.
    pub prefix_len: u8,
    pub gateway_ip: Ipv4Addr,
    /// Resolved lazily; `None` until discovery succeeds.
    pub gateway_mac: Option<MacAddr>,
    /// OS identity of the adapter this topology was built from.
    pub interface: String,
    pub interface_mac: MacAddr,
}

impl NetworkTopology {
    /// Whether `ip` falls inside the local subnet.
    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        let mask = u32::from(self.netmask);
        u32::from(ip) & mask == u32::from(self.local_ip) & mask
    }
}

/// Derive the CIDR prefix length from a subnet mask.
pub fn prefix_length(mask: Ipv4Addr) -> u8 {
    u32::from(mask).leading_ones() as u8
}

/// Resolve the topology for the adapter named by `adapter_name`, falling
/// back to the first viable adapter when that fails.
pub fn resolve<P: Platform + ?Sized>(platform: &P, adapter_name: &str) -> Result<NetworkTopology> {
    match resolve_primary(platform, adapter_name) {
        Ok(topology) => Ok(topology),
        Err(e) => {
            debug!("topology resolution for {adapter_name:?} failed ({e}), trying fallback");
            resolve_fallback(platform)
        }
    }
}

fn resolve_primary<P: Platform + ?Sized>(
    platform: &P,
    adapter_name: &str,
) -> Result<NetworkTopology> {
    let adapters = platform.adapters()?;
    let adapter = adapters
        .iter()
        .find(|a| a.name == adapter_name)
        .ok_or_else(|| NetError::AdapterNotFound(adapter_name.to_string()))?;

    from_adapter(adapter, None)
}

fn resolve_fallback<P: Platform + ?Sized>(platform: &P) -> Result<NetworkTopology> {
    let adapters = platform.adapters()?;
    let adapter = adapters
        .iter()
        .find(|a| a.is_viable())
        .ok_or(NetError::TopologyIncomplete)?;

    // Best-effort gateway MAC from the neighbor table; never blocks on it.
    let gateway_mac = adapter.gateway.and_then(|gw| {
        platform.neighbors().ok().and_then(|entries| {
            entries
                .iter()
                .find(|entry| entry.is_valid && entry.ip == gw && entry.mac != MacAddr::zero())
                .map(|entry| entry.mac)
        })
    });

    from_adapter(adapter, gateway_mac)
}

fn from_adapter(
    adapter: &NetworkAdapter,
    gateway_mac: Option<MacAddr>,
) -> Result<NetworkTopology> {
    let local_ip = adapter.ipv4.ok_or(NetError::TopologyIncomplete)?;
    let gateway_ip = adapter
        .gateway
        .filter(|gw| *gw != Ipv4Addr::UNSPECIFIED)
        .ok_or(NetError::TopologyIncomplete)?;
    let netmask = adapter.netmask.unwrap_or(Ipv4Addr::BROADCAST);

    Ok(NetworkTopology {
        local_ip,
        netmask,
        prefix_len: prefix_length(netmask),
        gateway_ip,
        gateway_mac,
        interface: adapter.name.clone(),
        interface_mac: adapter.mac,
    })
}
