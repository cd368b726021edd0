//! Newtype wrappers for identity tokens.
//!
//! Identities are opaque random byte strings, never positional indices, so
//! removing one endpoint never requires renumbering its siblings. The types
//! prevent accidental mixing of hub-assigned identities and caller-chosen
//! connection correlation ids.

use core::fmt;

use serde::de::{self, Deserialize, Deserializer};
use serde::ser::{Serialize, Serializer};

/// Helper to write lowercase hex without the `hex` crate.
fn fmt_hex(bytes: &[u8], f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for byte in bytes {
        write!(f, "{:02x}", byte)?;
    }
    Ok(())
}

/// Parse lowercase/uppercase hex into a fixed-size array.
fn parse_hex<const N: usize>(s: &str) -> Result<[u8; N], InvalidToken> {
    if s.len() != N * 2 {
        return Err(InvalidToken {
            expected: N * 2,
            actual: s.len(),
        });
    }
    let mut out = [0u8; N];
    for (i, chunk) in s.as_bytes().chunks_exact(2).enumerate() {
        let hi = (chunk[0] as char).to_digit(16).ok_or(InvalidToken {
            expected: N * 2,
            actual: s.len(),
        })?;
        let lo = (chunk[1] as char).to_digit(16).ok_or(InvalidToken {
            expected: N * 2,
            actual: s.len(),
        })?;
        out[i] = ((hi << 4) | lo) as u8;
    }
    Ok(out)
}

/// A hub-assigned endpoint identity (16 random bytes).
///
/// Stable across a single channel's lifetime; reused when an endpoint
/// reconnects with an address that still matches a registered entry.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[must_use]
pub struct EndpointId(pub(crate) [u8; 16]);

impl EndpointId {
    pub const fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Mint a fresh random identity.
    pub fn random() -> Self {
        Self(rand::random())
    }

    pub fn parse(s: &str) -> Result<Self, InvalidToken> {
        parse_hex(s).map(Self)
    }
}

impl AsRef<[u8]> for EndpointId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_hex(&self.0, f)
    }
}

impl fmt::Debug for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EndpointId(")?;
        fmt_hex(&self.0[..4], f)?;
        write!(f, "..)")
    }
}

impl Serialize for EndpointId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for EndpointId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(de::Error::custom)
    }
}

/// A caller-chosen connection correlation id (8 random bytes).
///
/// Carried in the channel name and echoed in the `init` message so the hub
/// can correlate the two. Not an identity.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[must_use]
pub struct ConnectionId(pub(crate) [u8; 8]);

impl ConnectionId {
    pub const fn new(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    pub fn random() -> Self {
        Self(rand::random())
    }

    pub fn parse(s: &str) -> Result<Self, InvalidToken> {
        parse_hex(s).map(Self)
    }
}

impl AsRef<[u8]> for ConnectionId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_hex(&self.0, f)
    }
}

impl fmt::Debug for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectionId(")?;
        fmt_hex(&self.0[..4], f)?;
        write!(f, "..)")
    }
}

impl Serialize for ConnectionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ConnectionId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(de::Error::custom)
    }
}

/// Error returned when a string is not a valid hex token of the right size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidToken {
    pub expected: usize,
    pub actual: usize,
}

impl fmt::Display for InvalidToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid token: expected {} hex chars, got {}",
            self.expected, self.actual
        )
    }
}

impl core::error::Error for InvalidToken {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_id_display_roundtrip() {
        let id = EndpointId::new([
            0xab, 0xcd, 0xef, 0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef, 0x01, 0x23, 0x45,
            0x67, 0x89,
        ]);
        let s = format!("{id}");
        assert_eq!(s, "abcdef0123456789abcdef0123456789");
        assert_eq!(EndpointId::parse(&s).unwrap(), id);
    }

    #[test]
    fn endpoint_id_debug_truncated() {
        let id = EndpointId::new([
            0xab, 0xcd, 0xef, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00,
        ]);
        assert_eq!(format!("{id:?}"), "EndpointId(abcdef01..)");
    }

    #[test]
    fn parse_rejects_wrong_length() {
        let err = EndpointId::parse("abcd").unwrap_err();
        assert_eq!(err.expected, 32);
        assert_eq!(err.actual, 4);
    }

    #[test]
    fn parse_rejects_non_hex() {
        assert!(EndpointId::parse("zz000000000000000000000000000000").is_err());
    }

    #[test]
    fn random_ids_are_distinct() {
        // Two 128-bit draws colliding would indicate a broken RNG.
        assert_ne!(EndpointId::random(), EndpointId::random());
    }

    #[test]
    fn connection_id_display_roundtrip() {
        let cid = ConnectionId::new([0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77]);
        let s = format!("{cid}");
        assert_eq!(s, "0011223344556677");
        assert_eq!(ConnectionId::parse(&s).unwrap(), cid);
    }

    #[test]
    fn parse_agrees_with_hex_crate() {
        let s = "650b5d76b6bec0390d1f8cfca5bd33f9";
        let id = EndpointId::parse(s).unwrap();
        assert_eq!(id.as_ref(), hex::decode(s).unwrap().as_slice());
    }

    #[test]
    fn serde_as_hex_string() {
        let id = EndpointId::new([0x0f; 16]);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f\"");
        let back: EndpointId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
