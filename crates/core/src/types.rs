use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

pub const ADDRESS_LEN: usize = 6;
pub const OUI_LEN: usize = 3;

pub type Oui = [u8; OUI_LEN];

/// Espressif vendor prefix carried by both paired boards.
pub const ESPRESSIF_OUI: Oui = [0x7C, 0x9E, 0xBD];

/// A 6-byte link-layer hardware address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HardwareAddress([u8; ADDRESS_LEN]);

impl HardwareAddress {
    pub const BROADCAST: HardwareAddress = HardwareAddress([0xFF; ADDRESS_LEN]);

    pub const fn new(bytes: [u8; ADDRESS_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_LEN] {
        &self.0
    }

    /// Vendor prefix (first three octets).
    pub fn oui(&self) -> Oui {
        [self.0[0], self.0[1], self.0[2]]
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let octets: [u8; ADDRESS_LEN] = bytes.try_into().ok()?;
        Some(Self(octets))
    }
}

impl fmt::Display for HardwareAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl fmt::Debug for HardwareAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HardwareAddress({self})")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressParseError {
    #[error("expected 6 colon-separated octets, found {0}")]
    WrongLength(usize),

    #[error("invalid octet {0:?}")]
    InvalidOctet(String),
}

impl FromStr for HardwareAddress {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split([':', '-']).collect();
        if parts.len() != ADDRESS_LEN {
            return Err(AddressParseError::WrongLength(parts.len()));
        }
        let mut octets = [0u8; ADDRESS_LEN];
        for (slot, part) in octets.iter_mut().zip(parts) {
            if part.is_empty() || part.len() > 2 || !part.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(AddressParseError::InvalidOctet(part.to_string()));
            }
            *slot = u8::from_str_radix(part, 16)
                .map_err(|_| AddressParseError::InvalidOctet(part.to_string()))?;
        }
        Ok(Self(octets))
    }
}

impl Serialize for HardwareAddress {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for HardwareAddress {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let text = String::deserialize(d)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}
