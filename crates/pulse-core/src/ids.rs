//! Trace and span identifiers
//!
//! Trace ids are 128-bit, span ids are 64-bit, matching the W3C trace
//! context wire format (32 and 16 lowercase hex digits respectively).
//! The all-zero value is invalid on the wire for both.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// A 128-bit trace identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TraceId(pub u128);

impl TraceId {
    /// Generate a random, non-zero trace id
    pub fn generate() -> Self {
        loop {
            let id = uuid::Uuid::new_v4().as_u128();
            if id != 0 {
                return Self(id);
            }
        }
    }

    /// Parse a fixed-width 32-hex-digit trace id
    ///
    /// Returns `None` for wrong width, non-hex characters, or the
    /// all-zero value (invalid per W3C).
    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() != 32 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        let id = u128::from_str_radix(s, 16).ok()?;
        if id == 0 {
            return None;
        }
        Some(Self(id))
    }

    /// Fixed 32-hex-digit representation
    pub fn to_hex(&self) -> String {
        format!("{:032x}", self.0)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// A 64-bit span identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpanId(pub u64);

impl SpanId {
    /// Generate a random, non-zero span id
    pub fn generate() -> Self {
        loop {
            // low 64 bits of a v4 uuid carry enough entropy
            let id = uuid::Uuid::new_v4().as_u128() as u64;
            if id != 0 {
                return Self(id);
            }
        }
    }

    /// Parse a fixed-width 16-hex-digit span id
    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() != 16 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        let id = u64::from_str_radix(s, 16).ok()?;
        if id == 0 {
            return None;
        }
        Some(Self(id))
    }

    /// Fixed 16-hex-digit representation
    pub fn to_hex(&self) -> String {
        format!("{:016x}", self.0)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

// Ids serialize as their fixed-width hex strings so exported JSON matches
// the wire representation.

impl Serialize for TraceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for TraceId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        TraceId::from_hex(&s).ok_or_else(|| de::Error::custom("invalid trace id"))
    }
}

impl Serialize for SpanId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for SpanId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        SpanId::from_hex(&s).ok_or_else(|| de::Error::custom("invalid span id"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_id_hex_round_trip() {
        let id = TraceId::generate();
        let hex = id.to_hex();
        assert_eq!(hex.len(), 32);
        assert_eq!(TraceId::from_hex(&hex), Some(id));
    }

    #[test]
    fn test_span_id_hex_round_trip() {
        let id = SpanId::generate();
        let hex = id.to_hex();
        assert_eq!(hex.len(), 16);
        assert_eq!(SpanId::from_hex(&hex), Some(id));
    }

    #[test]
    fn test_zero_ids_rejected() {
        assert_eq!(TraceId::from_hex("00000000000000000000000000000000"), None);
        assert_eq!(SpanId::from_hex("0000000000000000"), None);
    }

    #[test]
    fn test_bad_width_rejected() {
        assert_eq!(TraceId::from_hex("abcd"), None);
        assert_eq!(SpanId::from_hex("abcd"), None);
        assert_eq!(TraceId::from_hex(""), None);
    }

    #[test]
    fn test_non_hex_rejected() {
        assert_eq!(TraceId::from_hex("zz345678901234567890123456789012"), None);
        assert_eq!(SpanId::from_hex("zz34567890123456"), None);
    }

    #[test]
    fn test_generated_ids_distinct() {
        assert_ne!(TraceId::generate(), TraceId::generate());
        assert_ne!(SpanId::generate(), SpanId::generate());
    }

    #[test]
    fn test_serde_as_hex_string() {
        let id = TraceId::from_hex("0af7651916cd43dd8448eb211c80319c").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"0af7651916cd43dd8448eb211c80319c\"");
        let back: TraceId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
