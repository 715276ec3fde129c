//! Core addressing types for LinkProbe

pub mod peer;
pub mod types;

pub use peer::{Allowlist, PeerError, PeerInfo, KEY_LEN, LEFT_BOARD, RIGHT_BOARD};
pub use types::{AddressParseError, HardwareAddress, Oui, ESPRESSIF_OUI};
