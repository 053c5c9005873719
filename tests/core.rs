//! End-to-end tests for the interception core.
//!
//! These exercise the full manager surface against a scripted platform:
//! no real NIC, no privileges, every emitted frame captured for
//! inspection.

use std::collections::VecDeque;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use pnet::util::MacAddr;

use arpwarden::error::{Error, NetError};
use arpwarden::manager::{ArpManager, ManagerOptions};
use arpwarden::network::{
    CaptureHandle, NetworkAdapter, NeighborEntry, Platform, frame, map_capture_device,
};

const OUR_MAC: MacAddr = MacAddr(0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff);
const GATEWAY_MAC: MacAddr = MacAddr(0x11, 0x22, 0x33, 0x44, 0x55, 0x66);
const VICTIM_MAC: MacAddr = MacAddr(0xde, 0xad, 0xbe, 0xef, 0x00, 0x01);
const OUR_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 10);
const GATEWAY_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 1);
const VICTIM_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 50);

/// Scripted platform double: fixed adapters, a mutable neighbor table,
/// and handles that record every frame and track their own lifecycle.
#[derive(Clone, Default)]
struct TestPlatform {
    adapters: Vec<NetworkAdapter>,
    neighbors: Arc<Mutex<Vec<NeighborEntry>>>,
    devices: Vec<String>,
    fail_open: bool,
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
    rx_frames: Arc<Mutex<VecDeque<Vec<u8>>>>,
    open_handles: Arc<AtomicUsize>,
}

struct TestHandle {
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
    rx_frames: Arc<Mutex<VecDeque<Vec<u8>>>>,
    open_handles: Arc<AtomicUsize>,
}

impl Platform for TestPlatform {
    fn adapters(&self) -> arpwarden::Result<Vec<NetworkAdapter>> {
        Ok(self.adapters.clone())
    }

    fn neighbors(&self) -> arpwarden::Result<Vec<NeighborEntry>> {
        Ok(self.neighbors.lock().clone())
    }

    fn capture_devices(&self) -> arpwarden::Result<Vec<String>> {
        Ok(self.devices.clone())
    }

    fn open_capture(&self, device: &str) -> arpwarden::Result<Box<dyn CaptureHandle>> {
        if self.fail_open {
            return Err(NetError::CaptureOpen(format!("scripted failure for {device}")).into());
        }
        self.open_handles.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(TestHandle {
            sent: Arc::clone(&self.sent),
            rx_frames: Arc::clone(&self.rx_frames),
            open_handles: Arc::clone(&self.open_handles),
        }))
    }
}

impl CaptureHandle for TestHandle {
    fn send_frame(&mut self, frame: &[u8]) -> arpwarden::Result<()> {
        self.sent.lock().push(frame.to_vec());
        Ok(())
    }

    fn next_frame(&mut self) -> arpwarden::Result<Option<Vec<u8>>> {
        Ok(self.rx_frames.lock().pop_front())
    }
}

impl Drop for TestHandle {
    fn drop(&mut self) {
        self.open_handles.fetch_sub(1, Ordering::SeqCst);
    }
}

fn eth0() -> NetworkAdapter {
    NetworkAdapter {
        name: "eth0".to_string(),
        capture_device: None,
        description: "scripted adapter".to_string(),
        friendly_name: "eth0".to_string(),
        mac: OUR_MAC,
        ipv4: Some(OUR_IP),
        netmask: Some(Ipv4Addr::new(255, 255, 255, 0)),
        gateway: Some(GATEWAY_IP),
        is_up: true,
        is_wireless: false,
    }
}

/// A platform whose neighbor table already knows the gateway.
fn platform() -> TestPlatform {
    let platform = TestPlatform {
        adapters: vec![eth0()],
        devices: vec!["eth0".to_string()],
        ..Default::default()
    };
    platform.neighbors.lock().push(NeighborEntry {
        ip: GATEWAY_IP,
        mac: GATEWAY_MAC,
        is_valid: true,
    });
    platform
}

fn initialized_manager(platform: &TestPlatform) -> ArpManager<TestPlatform> {
    let mut manager = ArpManager::new(platform.clone());
    manager.initialize("eth0").unwrap();
    manager
}

#[test]
fn should_emit_exact_request_frame_layout() {
    let platform = platform();
    let manager = initialized_manager(&platform);

    manager.send_arp_request("192.168.1.5").unwrap();

    let frames = platform.sent.lock().clone();
    assert_eq!(frames.len(), 1);
    let frame = &frames[0];

    assert_eq!(frame.len(), 42);
    assert_eq!(
        &frame[0..14],
        &[0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff, 0x08, 0x06]
    );
    // op = request
    assert_eq!(&frame[20..22], &[0x00, 0x01]);
    // sender MAC/IP, target MAC zero, target IP
    assert_eq!(&frame[22..28], &[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
    assert_eq!(&frame[28..32], &[0xc0, 0xa8, 0x01, 0x0a]);
    assert_eq!(&frame[32..38], &[0u8; 6]);
    assert_eq!(&frame[38..42], &[0xc0, 0xa8, 0x01, 0x05]);

    let stats = manager.performance_stats();
    assert_eq!(stats.packets_sent, 1);
    assert_eq!(stats.send_errors, 0);
}

#[test]
fn should_send_victim_then_gateway_spoof_on_start() {
    let platform = platform();
    let manager = initialized_manager(&platform);

    manager
        .start_poisoning("192.168.1.50", "de:ad:be:ef:00:01")
        .unwrap();
    assert!(manager.is_poisoning());

    let frames = platform.sent.lock().clone();
    assert_eq!(frames.len(), 2);

    // Frame A: the victim learns that the gateway is at our MAC.
    let a = frame::parse(&frames[0]).unwrap();
    assert_eq!(a.dst_mac, VICTIM_MAC);
    assert_eq!(a.src_mac, OUR_MAC);
    assert_eq!(a.op, frame::ArpOp::Reply);
    assert_eq!(a.sender_mac, OUR_MAC);
    assert_eq!(a.sender_ip, GATEWAY_IP);
    assert_eq!(a.target_mac, VICTIM_MAC);
    assert_eq!(a.target_ip, VICTIM_IP);

    // Frame B: the gateway learns that the victim is at our MAC.
    let b = frame::parse(&frames[1]).unwrap();
    assert_eq!(b.dst_mac, GATEWAY_MAC);
    assert_eq!(b.src_mac, OUR_MAC);
    assert_eq!(b.sender_mac, OUR_MAC);
    assert_eq!(b.sender_ip, VICTIM_IP);
    assert_eq!(b.target_mac, GATEWAY_MAC);
    assert_eq!(b.target_ip, GATEWAY_IP);
}

#[test]
fn should_send_restoration_pair_on_stop() {
    let platform = platform();
    let manager = initialized_manager(&platform);

    manager
        .start_poisoning("192.168.1.50", "de:ad:be:ef:00:01")
        .unwrap();
    assert!(manager.stop_poisoning("192.168.1.50").unwrap());
    assert!(!manager.is_poisoning());

    let frames = platform.sent.lock().clone();
    assert_eq!(frames.len(), 4);

    // The victim is told the real gateway binding...
    let a = frame::parse(&frames[2]).unwrap();
    assert_eq!(a.dst_mac, VICTIM_MAC);
    assert_eq!(a.sender_mac, GATEWAY_MAC);
    assert_eq!(a.sender_ip, GATEWAY_IP);

    // ...and the gateway the real victim binding.
    let b = frame::parse(&frames[3]).unwrap();
    assert_eq!(b.dst_mac, GATEWAY_MAC);
    assert_eq!(b.sender_mac, VICTIM_MAC);
    assert_eq!(b.sender_ip, VICTIM_IP);
}

#[test]
fn should_be_idempotent_across_repeated_starts() {
    let platform = platform();
    let manager = initialized_manager(&platform);

    manager
        .start_poisoning("192.168.1.50", "de:ad:be:ef:00:01")
        .unwrap();
    manager
        .start_poisoning("192.168.1.50", "de:ad:be:ef:00:01")
        .unwrap();

    assert_eq!(manager.poison_targets().len(), 1);
    // Exactly one initial spoof pair.
    assert_eq!(platform.sent.lock().len(), 2);
}

#[test]
fn should_refuse_stop_for_unknown_victim() {
    let platform = platform();
    let manager = initialized_manager(&platform);

    assert!(!manager.stop_poisoning("192.168.1.99").unwrap());
    assert!(platform.sent.lock().is_empty());
    assert!(manager.poison_targets().is_empty());
}

#[test]
fn should_map_adapter_identity_to_npf_device() {
    let devices = vec![
        r"\Device\NPF_{ABC-123}".to_string(),
        r"\Device\NPF_{XYZ-789}".to_string(),
    ];

    assert_eq!(
        map_capture_device("{ABC-123}", &devices),
        Some(r"\Device\NPF_{ABC-123}")
    );
    assert_eq!(map_capture_device("{QQQ}", &devices), None);
}

#[test]
fn should_open_capture_through_mapped_device_name() {
    let mut adapter = eth0();
    adapter.name = "{ABC-123}".to_string();
    adapter.capture_device = None;

    let platform = TestPlatform {
        adapters: vec![adapter],
        devices: vec![r"\Device\NPF_{ABC-123}".to_string()],
        ..Default::default()
    };
    platform.neighbors.lock().push(NeighborEntry {
        ip: GATEWAY_IP,
        mac: GATEWAY_MAC,
        is_valid: true,
    });

    let mut manager = ArpManager::new(platform.clone());
    manager.initialize("{ABC-123}").unwrap();
    assert_eq!(platform.open_handles.load(Ordering::SeqCst), 1);
}

#[test]
fn should_initialize_degraded_when_capture_open_fails() {
    let mut platform = platform();
    platform.fail_open = true;

    let mut manager = ArpManager::new(platform.clone());
    manager.initialize("eth0").unwrap();

    assert!(manager.is_initialized());
    let topology = manager.topology().unwrap();
    assert_eq!(topology.local_ip, OUR_IP);
    assert_eq!(topology.gateway_ip, GATEWAY_IP);

    // Sends fail cleanly and are accounted as errors.
    let err = manager.send_arp_request("192.168.1.5").unwrap_err();
    assert!(matches!(err, Error::Net(NetError::NotTransmitted)));
    let stats = manager.performance_stats();
    assert_eq!(stats.packets_sent, 1);
    assert_eq!(stats.send_errors, 1);
}

#[test]
fn should_release_handle_and_refuse_sends_after_cleanup() {
    let platform = platform();
    let mut manager = initialized_manager(&platform);
    assert_eq!(platform.open_handles.load(Ordering::SeqCst), 1);

    manager.cleanup();

    assert_eq!(platform.open_handles.load(Ordering::SeqCst), 0);
    let err = manager.send_arp_request("192.168.1.5").unwrap_err();
    assert!(matches!(err, Error::Net(NetError::NotInitialized)));

    // cleanup is idempotent
    manager.cleanup();
    assert_eq!(platform.open_handles.load(Ordering::SeqCst), 0);
}

#[test]
fn should_restore_active_victims_during_cleanup() {
    let platform = platform();
    let mut manager = initialized_manager(&platform);

    manager
        .start_poisoning("192.168.1.50", "de:ad:be:ef:00:01")
        .unwrap();
    manager.cleanup();

    // Spoof pair plus restoration pair, then the handle went away.
    let frames = platform.sent.lock().clone();
    assert_eq!(frames.len(), 4);
    let last = frame::parse(&frames[3]).unwrap();
    assert_eq!(last.sender_mac, VICTIM_MAC);
    assert!(!manager.is_poisoning());
}

#[test]
fn should_proceed_with_zero_mac_when_gateway_unresolved() {
    // Gateway absent from the neighbor table and nothing answers the
    // probe: the gateway-side spoof goes out with a zero destination.
    let platform = TestPlatform {
        adapters: vec![eth0()],
        devices: vec!["eth0".to_string()],
        ..Default::default()
    };

    let options = ManagerOptions {
        gateway_retry_backoff: Vec::new(),
        ..ManagerOptions::default()
    };
    let mut manager = ArpManager::with_options(platform.clone(), options);
    manager.initialize("eth0").unwrap();
    assert_eq!(manager.topology().unwrap().gateway_mac, None);

    manager
        .start_poisoning("192.168.1.50", "de:ad:be:ef:00:01")
        .unwrap();

    let frames = platform.sent.lock().clone();
    // One discovery probe, then the spoof pair.
    assert_eq!(frames.len(), 3);
    let probe = frame::parse(&frames[0]).unwrap();
    assert_eq!(probe.op, frame::ArpOp::Request);
    assert_eq!(probe.target_ip, GATEWAY_IP);

    let gateway_side = frame::parse(&frames[2]).unwrap();
    assert_eq!(gateway_side.dst_mac, MacAddr::zero());
    assert_eq!(gateway_side.sender_ip, VICTIM_IP);
}

#[test]
fn should_scan_subnet_and_merge_neighbor_table() {
    let platform = platform();
    // A live host answers the sweep.
    platform.rx_frames.lock().push_back(frame::encode_reply(
        VICTIM_MAC,
        VICTIM_IP,
        OUR_MAC,
        OUR_IP,
    ));
    let manager = initialized_manager(&platform);

    let hosts = manager.scan().unwrap();
    let ips: Vec<Ipv4Addr> = hosts.iter().map(|h| h.ip).collect();
    assert!(ips.contains(&VICTIM_IP));
    assert!(ips.contains(&GATEWAY_IP));
    assert!(!ips.contains(&OUR_IP));
}

#[test]
fn should_reject_malformed_inputs_without_side_effects() {
    let platform = platform();
    let manager = initialized_manager(&platform);

    assert!(matches!(
        manager.send_arp_request("512.1.2.3").unwrap_err(),
        Error::Net(NetError::InvalidIp(_))
    ));
    assert!(matches!(
        manager
            .start_poisoning("192.168.1.50", "aa-bb-cc-dd-ee-ff!")
            .unwrap_err(),
        Error::Net(NetError::InvalidMac(_))
    ));
    assert!(platform.sent.lock().is_empty());
    assert_eq!(manager.performance_stats().packets_sent, 0);
}
