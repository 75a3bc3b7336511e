//! Link-layer station addresses.

use std::fmt;
use std::str::FromStr;

use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Length of a link-layer address in bytes.
pub const ADDR_LEN: usize = 6;

/// 6-byte link-layer (MAC) address of a station on the radio link.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacAddr([u8; ADDR_LEN]);

impl MacAddr {
    /// All-ones address; frames sent here reach every listener on the channel.
    pub const BROADCAST: MacAddr = MacAddr([0xff; ADDR_LEN]);

    pub const fn new(bytes: [u8; ADDR_LEN]) -> Self {
        MacAddr(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ADDR_LEN] {
        &self.0
    }

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    /// Random locally-administered unicast address (bit 1 of the first octet set, bit 0 clear).
    pub fn random_local() -> Self {
        let mut bytes = [0u8; ADDR_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        bytes[0] = (bytes[0] | 0x02) & !0x01;
        MacAddr(bytes)
    }

    /// Read an address from the front of `bytes`. Returns None if fewer than 6 bytes.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let head: [u8; ADDR_LEN] = bytes.get(..ADDR_LEN)?.try_into().ok()?;
        Some(MacAddr(head))
    }
}

impl From<[u8; ADDR_LEN]> for MacAddr {
    fn from(bytes: [u8; ADDR_LEN]) -> Self {
        MacAddr(bytes)
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl fmt::Debug for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MacAddr({})", self)
    }
}

/// Error parsing a textual address.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid link address {0:?}: expected six hex octets separated by ':'")]
pub struct ParseAddrError(String);

impl FromStr for MacAddr {
    type Err = ParseAddrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; ADDR_LEN];
        let mut parts = s.split(':');
        for slot in bytes.iter_mut() {
            let part = parts.next().ok_or_else(|| ParseAddrError(s.to_string()))?;
            if part.len() != 2 {
                return Err(ParseAddrError(s.to_string()));
            }
            *slot = u8::from_str_radix(part, 16).map_err(|_| ParseAddrError(s.to_string()))?;
        }
        if parts.next().is_some() {
            return Err(ParseAddrError(s.to_string()));
        }
        Ok(MacAddr(bytes))
    }
}

impl Serialize for MacAddr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MacAddr {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s: String = Deserialize::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_parse_roundtrip() {
        let addr = MacAddr::new([0x34, 0x85, 0x18, 0xb9, 0x1b, 0x9c]);
        assert_eq!(addr.to_string(), "34:85:18:b9:1b:9c");
        assert_eq!("34:85:18:B9:1B:9C".parse::<MacAddr>().unwrap(), addr);
    }

    #[test]
    fn parse_rejects_malformed() {
        assert!("34:85:18:b9:1b".parse::<MacAddr>().is_err());
        assert!("34:85:18:b9:1b:9c:00".parse::<MacAddr>().is_err());
        assert!("34-85-18-b9-1b-9c".parse::<MacAddr>().is_err());
        assert!("zz:85:18:b9:1b:9c".parse::<MacAddr>().is_err());
        assert!("3:85:18:b9:1b:9c".parse::<MacAddr>().is_err());
    }

    #[test]
    fn broadcast_detection() {
        assert!(MacAddr::BROADCAST.is_broadcast());
        assert!("ff:ff:ff:ff:ff:ff".parse::<MacAddr>().unwrap().is_broadcast());
        assert!(!MacAddr::new([1, 2, 3, 4, 5, 6]).is_broadcast());
    }

    #[test]
    fn random_local_is_unicast_and_local() {
        for _ in 0..32 {
            let addr = MacAddr::random_local();
            assert_eq!(addr.as_bytes()[0] & 0x01, 0);
            assert_eq!(addr.as_bytes()[0] & 0x02, 0x02);
        }
    }

    #[test]
    fn from_slice_needs_six_bytes() {
        assert_eq!(MacAddr::from_slice(&[1, 2, 3]), None);
        assert_eq!(
            MacAddr::from_slice(&[1, 2, 3, 4, 5, 6, 7]),
            Some(MacAddr::new([1, 2, 3, 4, 5, 6]))
        );
    }
}
