//! Peer registry: known remote stations and whether frames to them are encrypted.

use std::collections::HashMap;

use crate::address::MacAddr;

/// Radio interface a peer is reached through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interface {
    #[default]
    Station,
    AccessPoint,
}

/// One registered peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub address: MacAddr,
    /// Channel the peer listens on; 0 means the radio's current channel.
    pub channel: u8,
    pub interface: Interface,
    /// Unicast frames to this peer are sealed with the group key.
    pub encrypted: bool,
}

/// Result of a registration attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    Added,
    AlreadyKnown,
}

/// Set of known peers. Entries are never evicted.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: HashMap<MacAddr, PeerInfo>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `info` unless its address is already known. The first registration wins.
    pub fn register(&mut self, info: PeerInfo) -> Result<RegisterOutcome, RegistryError> {
        if self.peers.contains_key(&info.address) {
            tracing::debug!(peer = %info.address, "already known peer");
            return Ok(RegisterOutcome::AlreadyKnown);
        }
        self.peers
            .try_reserve(1)
            .map_err(|_| RegistryError::OutOfMemory)?;
        tracing::info!(
            peer = %info.address,
            encrypted = info.encrypted,
            "first sight of peer, added to registry"
        );
        self.peers.insert(info.address, info);
        Ok(RegisterOutcome::Added)
    }

    pub fn contains(&self, address: &MacAddr) -> bool {
        self.peers.contains_key(address)
    }

    pub fn get(&self, address: &MacAddr) -> Option<&PeerInfo> {
        self.peers.get(address)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeerInfo> {
        self.peers.values()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("out of memory registering peer")]
    OutOfMemory,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(last: u8, encrypted: bool) -> PeerInfo {
        PeerInfo {
            address: MacAddr::new([0x34, 0x85, 0x18, 0xb9, 0x1b, last]),
            channel: 1,
            interface: Interface::Station,
            encrypted,
        }
    }

    #[test]
    fn register_adds_once() {
        let mut registry = PeerRegistry::new();
        assert_eq!(registry.register(peer(1, true)), Ok(RegisterOutcome::Added));
        assert_eq!(
            registry.register(peer(1, true)),
            Ok(RegisterOutcome::AlreadyKnown)
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn first_encryption_flag_wins() {
        let mut registry = PeerRegistry::new();
        registry.register(peer(1, true)).unwrap();
        registry.register(peer(1, false)).unwrap();
        let info = registry.get(&peer(1, true).address).unwrap();
        assert!(info.encrypted);
    }

    #[test]
    fn distinct_addresses_coexist() {
        let mut registry = PeerRegistry::new();
        registry.register(peer(1, true)).unwrap();
        registry.register(peer(2, false)).unwrap();
        assert_eq!(registry.len(), 2);
        assert!(registry.contains(&peer(2, false).address));
        assert!(!registry.contains(&MacAddr::BROADCAST));
        assert_eq!(registry.iter().filter(|p| p.encrypted).count(), 1);
    }
}
