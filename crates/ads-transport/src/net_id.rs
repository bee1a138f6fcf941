//! AMS addressing.
//!
//! Every ADS device is addressed by an [`AmsNetId`] (six octets, usually the
//! device IP address followed by `.1.1`) plus a port identifying the runtime
//! on that device, e.g. `851` for the first TwinCAT 3 PLC runtime.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// AMS port of the first TwinCAT 3 PLC runtime.
pub const PORT_TC3_PLC1: u16 = 851;

/// AMS port of the first TwinCAT 2 PLC runtime.
pub const PORT_TC2_PLC1: u16 = 801;

/// Immutable six octet identifier of an AMS router endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AmsNetId([u8; 6]);

impl AmsNetId {
    /// Length of a net id on the wire.
    pub const LEN: usize = 6;

    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    pub const fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl From<[u8; 6]> for AmsNetId {
    fn from(octets: [u8; 6]) -> Self {
        Self(octets)
    }
}

/// Error returned when a dotted net id string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid AMS net id {0:?}, expected six dot separated octets")]
pub struct ParseNetIdError(pub String);

impl FromStr for AmsNetId {
    type Err = ParseNetIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; 6];
        let mut parts = s.split('.');
        for octet in octets.iter_mut() {
            *octet = parts
                .next()
                .and_then(|p| p.parse().ok())
                .ok_or_else(|| ParseNetIdError(s.to_string()))?;
        }
        if parts.next().is_some() {
            return Err(ParseNetIdError(s.to_string()));
        }
        Ok(Self(octets))
    }
}

impl fmt::Display for AmsNetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a}.{b}.{c}.{d}.{e}.{g}")
    }
}

impl Serialize for AmsNetId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for AmsNetId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A net id and port pair: one end of an AMS exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct AmsAddr {
    pub net_id: AmsNetId,
    pub port: u16,
}

impl AmsAddr {
    pub const fn new(net_id: AmsNetId, port: u16) -> Self {
        Self { net_id, port }
    }
}

impl fmt::Display for AmsAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.net_id, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_dotted() {
        let id: AmsNetId = "192.168.1.10.1.1".parse().unwrap();
        assert_eq!(id.octets(), [192, 168, 1, 10, 1, 1]);
        assert_eq!(id.to_string(), "192.168.1.10.1.1");
    }

    #[test]
    fn reject_wrong_octet_count() {
        assert!("192.168.1.10.1".parse::<AmsNetId>().is_err());
        assert!("192.168.1.10.1.1.1".parse::<AmsNetId>().is_err());
        assert!("192.168.1.300.1.1".parse::<AmsNetId>().is_err());
    }

    #[test]
    fn serde_uses_dotted_form() {
        let addr = AmsAddr::new("5.10.20.30.1.1".parse().unwrap(), 851);
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, r#"{"net_id":"5.10.20.30.1.1","port":851}"#);

        let back: AmsAddr = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
    }
}
