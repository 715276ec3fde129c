//! Peer discovery from the static two-entry allowlist

use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::HardwareAddress;

pub const KEY_LEN: usize = 16;

/// Left board.
pub const LEFT_BOARD: HardwareAddress = HardwareAddress::new([0x7C, 0x9E, 0xBD, 0xED, 0x36, 0x94]);
/// Right board.
pub const RIGHT_BOARD: HardwareAddress = HardwareAddress::new([0x7C, 0x9E, 0xBD, 0x39, 0x9F, 0x68]);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PeerError {
    #[error("every allowlist entry equals the local address {0}")]
    SelfOnly(HardwareAddress),

    #[error("local address {0} is not in the allowlist")]
    NotInAllowlist(HardwareAddress),
}

/// The two paired devices, in scan order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allowlist(pub HardwareAddress, pub HardwareAddress);

impl Default for Allowlist {
    fn default() -> Self {
        Self(LEFT_BOARD, RIGHT_BOARD)
    }
}

impl Allowlist {
    pub fn entries(&self) -> [HardwareAddress; 2] {
        [self.0, self.1]
    }

    pub fn contains(&self, address: &HardwareAddress) -> bool {
        self.0 == *address || self.1 == *address
    }

    /// First entry that differs from `local` at any byte.
    pub fn resolve(&self, local: &HardwareAddress) -> Result<HardwareAddress, PeerError> {
        let peer = self
            .entries()
            .into_iter()
            .find(|entry| differs(entry, local))
            .ok_or(PeerError::SelfOnly(*local))?;
        debug!("resolved peer {} for local {}", peer, local);
        Ok(peer)
    }

    /// Like [`Allowlist::resolve`], but the local device must itself be listed.
    pub fn resolve_strict(&self, local: &HardwareAddress) -> Result<HardwareAddress, PeerError> {
        if !self.contains(local) {
            return Err(PeerError::NotInAllowlist(*local));
        }
        self.resolve(local)
    }
}

fn differs(entry: &HardwareAddress, local: &HardwareAddress) -> bool {
    entry
        .as_bytes()
        .iter()
        .zip(local.as_bytes())
        .any(|(a, b)| a != b)
}

/// Registration record handed to the transport before sending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub address: HardwareAddress,
    pub local_master_key: [u8; KEY_LEN],
    pub channel: u8,
    pub encrypt: bool,
}

impl PeerInfo {
    pub fn new(address: HardwareAddress) -> Self {
        Self {
            address,
            local_master_key: default_key(),
            channel: 1,
            encrypt: false,
        }
    }
}

pub fn default_key() -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    for (i, slot) in key.iter_mut().enumerate() {
        *slot = i as u8 + 1;
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> Allowlist {
        Allowlist(
            HardwareAddress::new([0x01, 0x02, 0x03, 0x04, 0x05, 0x06]),
            HardwareAddress::new([0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C]),
        )
    }

    #[test]
    fn test_each_side_resolves_to_the_other() {
        let list = pair();
        assert_eq!(list.resolve(&list.0), Ok(list.1));
        assert_eq!(list.resolve(&list.1), Ok(list.0));
        assert_eq!(list.resolve_strict(&list.0), Ok(list.1));
        assert_eq!(list.resolve_strict(&list.1), Ok(list.0));
    }

    #[test]
    fn test_default_boards() {
        let list = Allowlist::default();
        assert_eq!(list.resolve_strict(&LEFT_BOARD), Ok(RIGHT_BOARD));
        assert_eq!(list.resolve_strict(&RIGHT_BOARD), Ok(LEFT_BOARD));
    }

    #[test]
    fn test_single_byte_difference_is_enough() {
        let local = HardwareAddress::new([1, 2, 3, 4, 5, 6]);
        let near = HardwareAddress::new([1, 2, 3, 4, 5, 7]);
        let list = Allowlist(local, near);
        assert_eq!(list.resolve(&local), Ok(near));
    }

    #[test]
    fn test_self_only_allowlist_fails() {
        let local = HardwareAddress::new([1, 2, 3, 4, 5, 6]);
        let list = Allowlist(local, local);
        assert_eq!(list.resolve(&local), Err(PeerError::SelfOnly(local)));
        assert_eq!(list.resolve_strict(&local), Err(PeerError::SelfOnly(local)));
    }

    #[test]
    fn test_unlisted_local_address() {
        let list = pair();
        let stranger = HardwareAddress::new([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
        // plain scan picks the first entry that differs
        assert_eq!(list.resolve(&stranger), Ok(list.0));
        assert_eq!(
            list.resolve_strict(&stranger),
            Err(PeerError::NotInAllowlist(stranger))
        );
    }

    #[test]
    fn test_peer_info_defaults() {
        let info = PeerInfo::new(RIGHT_BOARD);
        assert_eq!(info.local_master_key[0], 1);
        assert_eq!(info.local_master_key[15], 16);
        assert_eq!(info.channel, 1);
        assert!(!info.encrypt);
    }
}
