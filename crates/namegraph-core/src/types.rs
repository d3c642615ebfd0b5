//! Strong type definitions for Namegraph.
//!
//! All identifiers are newtypes to prevent misuse at compile time. Every one of
//! them renders as `0x`-prefixed lowercase hex, which is also the form used in
//! storage keys and JSON.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// Strip an optional `0x` prefix.
pub fn strip_0x(s: &str) -> &str {
    s.strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s)
}

/// Decode hex with or without a `0x` prefix.
pub fn decode_hex(s: &str) -> Result<Vec<u8>, CoreError> {
    hex::decode(strip_0x(s)).map_err(|e| CoreError::InvalidHex(e.to_string()))
}

/// Encode bytes as `0x`-prefixed lowercase hex.
pub fn encode_hex(bytes: impl AsRef<[u8]>) -> String {
    format!("0x{}", hex::encode(bytes))
}

macro_rules! fixed_hex_type {
    ($name:ident, $len:expr) => {
        impl $name {
            /// Length of the raw value in bytes.
            pub const LEN: usize = $len;

            /// The all-zero value.
            pub const ZERO: Self = Self([0u8; $len]);

            /// Create from raw bytes.
            pub const fn from_bytes(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }

            /// Get the raw bytes.
            pub const fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            /// Convert to `0x`-prefixed hex.
            pub fn to_hex(&self) -> String {
                encode_hex(self.0)
            }

            /// Parse from hex, with or without the `0x` prefix.
            pub fn from_hex(s: &str) -> Result<Self, CoreError> {
                let bytes = decode_hex(s)?;
                Self::from_slice(&bytes)
            }

            /// Build from a slice of exactly the right length.
            pub fn from_slice(bytes: &[u8]) -> Result<Self, CoreError> {
                let arr: [u8; $len] = bytes.try_into().map_err(|_| {
                    CoreError::InvalidHex(format!(
                        "expected {} bytes, got {}",
                        $len,
                        bytes.len()
                    ))
                })?;
                Ok(Self(arr))
            }

            /// Whether every byte is zero.
            pub fn is_zero(&self) -> bool {
                self.0.iter().all(|b| *b == 0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.to_hex())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({}..)", stringify!($name), &self.to_hex()[..10])
            }
        }

        impl FromStr for $name {
            type Err = CoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::from_hex(s)
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl From<[u8; $len]> for $name {
            fn from(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                Self::from_hex(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

/// A 32-byte keccak-256 digest.
///
/// Used for namehashes, channel ids, block hashes and transaction hashes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Hash32(pub [u8; 32]);

fixed_hex_type!(Hash32, 32);

/// Namehash of a fully qualified name. The root is [`Hash32::ZERO`].
pub type Namehash = Hash32;

/// Channel identifier; equal to the namehash of the channel's topic.
pub type ChannelId = Hash32;

/// A 20-byte account address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address(pub [u8; 20]);

fixed_hex_type!(Address, 20);

impl Address {
    /// Take the low 20 bytes of a 32-byte word (ABI-encoded address topic).
    pub fn from_word(word: &Hash32) -> Self {
        let mut arr = [0u8; 20];
        arr.copy_from_slice(&word.0[12..]);
        Self(arr)
    }
}

/// Get current time in milliseconds.
pub fn now_millis() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
