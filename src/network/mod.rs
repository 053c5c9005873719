//! Network-facing modules: the wire codec and the platform port.

pub mod frame;
pub mod platform;
pub mod system;

pub use frame::{ARP_FRAME_SIZE, ArpFrame, ArpOp, BROADCAST_MAC};
pub use platform::{
    CaptureHandle, NetworkAdapter, NeighborEntry, Platform, map_capture_device,
};
pub use system::SystemPlatform;
