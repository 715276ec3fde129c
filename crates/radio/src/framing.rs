//! 802.11 frames as seen by the passive capture path

use bytes::{BufMut, Bytes, BytesMut};
use linkprobe_core::HardwareAddress;
use serde::{Deserialize, Serialize};

/// Low byte of the frame-control field for a management action frame.
pub const ACTION_SUBTYPE: u8 = 0xD0;

/// Frame control, duration, three addresses and sequence control.
pub const MAC_HEADER_LEN: usize = 24;

const ACK_SUBTYPE: u8 = 0xD4;
const CATEGORY_VENDOR_SPECIFIC: u8 = 127;
const ELEMENT_VENDOR_SPECIFIC: u8 = 0xDD;
const ESPNOW_OUI: [u8; 3] = [0x18, 0xFE, 0x34];
const ESPNOW_TYPE: u8 = 4;
const ESPNOW_VERSION: u8 = 1;

/// Class reported by the radio for a captured frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameKind {
    Management,
    Control,
    Data,
    Misc,
}

/// One frame delivered to the capture callback.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub kind: FrameKind,
    /// Receive metadata.
    pub rssi: i8,
    /// Starts at the MAC header.
    pub data: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacHeader {
    pub frame_control: u16,
    pub duration_id: u16,
    pub receiver: HardwareAddress,
    pub sender: HardwareAddress,
    pub filter: HardwareAddress,
    pub sequence_control: u16,
}

impl MacHeader {
    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() < MAC_HEADER_LEN {
            return None;
        }
        Some(Self {
            frame_control: u16::from_le_bytes([data[0], data[1]]),
            duration_id: u16::from_le_bytes([data[2], data[3]]),
            receiver: HardwareAddress::from_slice(&data[4..10])?,
            sender: HardwareAddress::from_slice(&data[10..16])?,
            filter: HardwareAddress::from_slice(&data[16..22])?,
            sequence_control: u16::from_le_bytes([data[22], data[23]]),
        })
    }

    pub fn encode(&self, out: &mut BytesMut) {
        out.put_u16_le(self.frame_control);
        out.put_u16_le(self.duration_id);
        out.put_slice(self.receiver.as_bytes());
        out.put_slice(self.sender.as_bytes());
        out.put_slice(self.filter.as_bytes());
        out.put_u16_le(self.sequence_control);
    }

    pub fn subtype(&self) -> u8 {
        (self.frame_control & 0xFF) as u8
    }
}

impl RawFrame {
    pub fn header(&self) -> Option<MacHeader> {
        MacHeader::decode(&self.data)
    }

    /// Vendor-specific action frame carrying `body`, laid out the way ESP-NOW sends it.
    pub fn vendor_action(
        sender: HardwareAddress,
        receiver: HardwareAddress,
        sequence: u16,
        rssi: i8,
        body: &[u8],
    ) -> Self {
        let mut out = BytesMut::with_capacity(MAC_HEADER_LEN + 15 + body.len());
        MacHeader {
            frame_control: ACTION_SUBTYPE as u16,
            duration_id: 0,
            receiver,
            sender,
            filter: HardwareAddress::BROADCAST,
            sequence_control: sequence << 4,
        }
        .encode(&mut out);
        out.put_u8(CATEGORY_VENDOR_SPECIFIC);
        out.put_slice(&ESPNOW_OUI);
        out.put_u32_le(0);
        out.put_u8(ELEMENT_VENDOR_SPECIFIC);
        out.put_u8((body.len() + 5).min(u8::MAX as usize) as u8);
        out.put_slice(&ESPNOW_OUI);
        out.put_u8(ESPNOW_TYPE);
        out.put_u8(ESPNOW_VERSION);
        out.put_slice(body);
        Self {
            kind: FrameKind::Management,
            rssi,
            data: out.freeze(),
        }
    }

    /// Link-layer acknowledgement; control frames carry only frame control,
    /// duration and the receiver address.
    pub fn ack(receiver: HardwareAddress, rssi: i8) -> Self {
        let mut out = BytesMut::with_capacity(10);
        out.put_u16_le(ACK_SUBTYPE as u16);
        out.put_u16_le(0);
        out.put_slice(receiver.as_bytes());
        Self {
            kind: FrameKind::Control,
            rssi,
            data: out.freeze(),
        }
    }
}
