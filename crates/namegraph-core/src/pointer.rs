//! Content pointers.
//!
//! A pointer holds the binary form of a content identifier (CID). Version 0
//! identifiers (a bare sha2-256 multihash) display as base58btc `Qm…`
//! strings; everything else displays as multibase base32 lowercase with the
//! `b` prefix.

use bytes::Bytes;
use data_encoding::BASE32_NOPAD;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// sha2-256 multihash code and digest length.
const SHA2_256: u8 = 0x12;
const SHA2_256_LEN: u8 = 0x20;

/// Binary CID of the content a commit points at.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Pointer(Bytes);

impl Pointer {
    /// Wrap raw CID bytes.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Result<Self, CoreError> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Err(CoreError::InvalidPointer("empty".into()));
        }
        Ok(Self(bytes))
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Whether this is a version 0 identifier.
    pub fn is_v0(&self) -> bool {
        self.0.len() == 34 && self.0[0] == SHA2_256 && self.0[1] == SHA2_256_LEN
    }

    /// Parse the textual form (`Qm…`, `b…` or `z…`).
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        if s.len() == 46 && s.starts_with("Qm") {
            let bytes = bs58::decode(s)
                .into_vec()
                .map_err(|e| CoreError::InvalidPointer(e.to_string()))?;
            let pointer = Self::from_bytes(bytes)?;
            if !pointer.is_v0() {
                return Err(CoreError::InvalidPointer(format!("not a v0 cid: {}", s)));
            }
            return Ok(pointer);
        }

        let bytes = match s.chars().next() {
            Some('b') => BASE32_NOPAD
                .decode(s[1..].to_ascii_uppercase().as_bytes())
                .map_err(|e| CoreError::InvalidPointer(e.to_string()))?,
            Some('z') => bs58::decode(&s[1..])
                .into_vec()
                .map_err(|e| CoreError::InvalidPointer(e.to_string()))?,
            _ => {
                return Err(CoreError::InvalidPointer(format!(
                    "unsupported multibase: {}",
                    s
                )))
            }
        };

        match bytes.first() {
            Some(0x01) => Self::from_bytes(bytes),
            _ => Err(CoreError::InvalidPointer(format!("unsupported cid version: {}", s))),
        }
    }
}

impl fmt::Display for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_v0() {
            f.write_str(&bs58::encode(&self.0).into_string())
        } else {
            write!(f, "b{}", BASE32_NOPAD.encode(&self.0).to_ascii_lowercase())
        }
    }
}

impl fmt::Debug for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pointer({})", self)
    }
}

impl FromStr for Pointer {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<[u8]> for Pointer {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Serialize for Pointer {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Pointer {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const V1: &str = "bafybeihe67oiezjclcok2toyvbypldy4rhe4jybc6kydf75cnvvu2424zu";
    const V0: &str = "QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG";

    #[test]
    fn test_v1_roundtrip() {
        let ptr = Pointer::parse(V1).unwrap();
        assert!(!ptr.is_v0());
        assert_eq!(ptr.as_bytes()[0], 0x01);
        assert_eq!(ptr.to_string(), V1);
    }

    #[test]
    fn test_v0_roundtrip() {
        let ptr = Pointer::parse(V0).unwrap();
        assert!(ptr.is_v0());
        assert_eq!(ptr.as_bytes().len(), 34);
        assert_eq!(ptr.to_string(), V0);
    }

    #[test]
    fn test_base58_multibase() {
        let v1 = Pointer::parse(V1).unwrap();
        let z = format!("z{}", bs58::encode(v1.as_bytes()).into_string());
        assert_eq!(Pointer::parse(&z).unwrap(), v1);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(Pointer::parse("").is_err());
        assert!(Pointer::parse("hello").is_err());
        assert!(Pointer::parse("b!!!").is_err());
        assert!(Pointer::from_bytes(Vec::new()).is_err());
    }
}
