//! radio link telemetry engine for LinkProbe

use std::time::Duration;
use bytes::Bytes;
use linkprobe_core::{Allowlist, HardwareAddress, Oui, PeerError, PeerInfo, ESPRESSIF_OUI, KEY_LEN};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod framing;
pub mod node;
pub mod sampler;
pub mod simulated;
pub mod stats;
pub mod transmit;
pub mod transport;

pub use framing::{FrameKind, MacHeader, RawFrame, ACTION_SUBTYPE};
pub use node::{LinkHandle, LinkNode, Role};
pub use sampler::{FrameFilter, RollingAverage, SignalSampler};
pub use simulated::{AirStats, MediumConfig, SimulatedAir, SimulatedRadio};
pub use stats::{SendOutcome, Statistics, StatsAggregator, StatsReport, StatsSnapshot};
pub use transmit::{RetryPolicy, Step, TransmitController};
pub use transport::{FrameCallback, ReceiveCallback, SendCallback, SendStatus, Transport};

/// Largest payload a single send may carry.
pub const MAX_PAYLOAD: usize = 250;

/// Transport-level failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RadioError {
    #[error("Transmit buffer full")]
    BufferFull,

    #[error("Peer {0} is not registered")]
    PeerNotFound(HardwareAddress),

    #[error("Peer {0} is already registered")]
    PeerExists(HardwareAddress),

    #[error("Payload of {0} bytes exceeds radio MTU")]
    PayloadTooLarge(usize),

    #[error("Passive capture unavailable")]
    CaptureUnavailable,

    #[error("Radio medium closed")]
    Closed,
}

/// Engine-level failures.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("Peer configuration error: {0}")]
    Configuration(#[from] PeerError),

    #[error("Radio error: {0}")]
    Radio(#[from] RadioError),

    #[error("Send rejected by transport: {0}")]
    SendRejected(RadioError),

    #[error("Invalid link configuration: {0}")]
    InvalidConfig(String),

    #[error("Link task failed: {0}")]
    Task(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub allowlist: Allowlist,
    /// Refuse to start when the local address is not one of the allowlist entries.
    pub require_membership: bool,
    pub vendor_oui: Oui,
    pub action_subtype: u8,
    pub signal_window: usize,
    pub payload: String,
    #[serde(rename = "send_delay_ms", with = "serde_millis")]
    pub send_delay: Duration,
    #[serde(rename = "rejection_backoff_ms", with = "serde_millis")]
    pub rejection_backoff: Duration,
    #[serde(rename = "completion_timeout_ms", with = "serde_millis")]
    pub completion_timeout: Duration,
    pub abort_on_rejection: bool,
    #[serde(rename = "report_interval_ms", with = "serde_millis")]
    pub report_interval: Duration,
    #[serde(rename = "throughput_window_ms", with = "serde_millis")]
    pub throughput_window: Duration,
    pub channel: u8,
    pub encrypt: bool,
    pub local_master_key: [u8; KEY_LEN],
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            allowlist: Allowlist::default(),
            require_membership: true,
            vendor_oui: ESPRESSIF_OUI,
            action_subtype: ACTION_SUBTYPE,
            signal_window: 20,
            payload: "Hello World!\r\n".to_string(),
            send_delay: Duration::from_millis(10),
            rejection_backoff: Duration::from_millis(10),
            completion_timeout: Duration::from_secs(1),
            abort_on_rejection: false,
            report_interval: Duration::from_secs(1),
            throughput_window: Duration::from_secs(10),
            channel: 1,
            encrypt: false,
            local_master_key: linkprobe_core::peer::default_key(),
        }
    }
}

impl LinkConfig {
    pub fn validate(&self) -> Result<(), LinkError> {
        if self.signal_window == 0 {
            return Err(LinkError::InvalidConfig("signal_window must be at least 1".into()));
        }
        if self.payload.is_empty() {
            return Err(LinkError::InvalidConfig("payload must not be empty".into()));
        }
        if self.payload.len() > MAX_PAYLOAD {
            return Err(LinkError::InvalidConfig(format!(
                "payload is {} bytes, limit is {}",
                self.payload.len(),
                MAX_PAYLOAD
            )));
        }
        if self.report_interval.is_zero() || self.throughput_window.is_zero() {
            return Err(LinkError::InvalidConfig(
                "report interval and throughput window must be non-zero".into(),
            ));
        }
        Ok(())
    }

    pub fn payload_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(self.payload.as_bytes())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            send_delay: self.send_delay,
            rejection_backoff: self.rejection_backoff,
            completion_timeout: self.completion_timeout,
            abort_on_rejection: self.abort_on_rejection,
        }
    }

    pub fn peer_info(&self, address: HardwareAddress) -> PeerInfo {
        PeerInfo {
            address,
            local_master_key: self.local_master_key,
            channel: self.channel,
            encrypt: self.encrypt,
        }
    }

    pub fn frame_filter(&self) -> FrameFilter {
        FrameFilter::new(self.vendor_oui, self.action_subtype)
    }
}

/// Serializes a `Duration` as whole milliseconds.
pub mod serde_millis {
    use std::time::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
