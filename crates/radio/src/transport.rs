//! Boundary with the wireless transport.
//!
//! The engine never drives the radio directly. Bring-up (mode, channel,
//! storage) happens before a `Transport` is handed over; after that the
//! engine only reads the local address, installs its callbacks, registers
//! the peer and sends.

use std::sync::Arc;
use linkprobe_core::{HardwareAddress, PeerInfo};

use crate::{RadioError, RawFrame};

/// Invoked for every frame observed while passive capture is enabled.
pub type FrameCallback = Arc<dyn Fn(&RawFrame) + Send + Sync>;

/// Invoked once per accepted send, from the transport's own context.
pub type SendCallback = Arc<dyn Fn(&HardwareAddress, SendStatus) + Send + Sync>;

/// Invoked for payloads addressed to this device.
pub type ReceiveCallback = Arc<dyn Fn(&HardwareAddress, &[u8]) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    Success,
    Fail,
}

pub trait Transport: Send + Sync + 'static {
    fn local_address(&self) -> HardwareAddress;

    fn enable_passive_capture(&self, on_frame: FrameCallback) -> Result<(), RadioError>;

    fn register_peer(&self, peer: &PeerInfo) -> Result<(), RadioError>;

    fn on_send_complete(&self, callback: SendCallback) -> Result<(), RadioError>;

    fn on_receive(&self, callback: ReceiveCallback) -> Result<(), RadioError>;

    /// Queues `payload` for `peer`. `Ok` only means the transport accepted it;
    /// delivery is reported later through the send callback.
    fn send(&self, peer: &HardwareAddress, payload: &[u8]) -> Result<(), RadioError>;
}
