#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! SHA-256 content addressing for hotload
//!
//! Modules are identified by the SHA-256 of their bytes. The same digest keys
//! the content cache and is checked on every download and every cache read.

use std::fmt;
use std::str::FromStr;

use hotload_errors::{Error, StorageError};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

/// Digest length in bytes.
pub const HASH_LEN: usize = 32;

/// SHA-256 digest of a module's bytes.
///
/// Serialized as 64 lowercase hex characters, which is also the cache's file
/// name for the content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash([u8; HASH_LEN]);

impl Hash {
    #[must_use]
    pub fn from_data(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// # Errors
    /// Returns `StorageError::CorruptedData` unless `s` is exactly 64 hex digits.
    pub fn from_hex(s: &str) -> Result<Self, Error> {
        let mut digest = [0u8; HASH_LEN];
        hex::decode_to_slice(s, &mut digest).map_err(|e| StorageError::CorruptedData {
            message: format!("invalid sha256 {s:?}: {e}"),
        })?;
        Ok(Self(digest))
    }

    /// Whether `data` hashes to `self`.
    #[must_use]
    pub fn matches(&self, data: &[u8]) -> bool {
        Self::from_data(data) == *self
    }

    /// # Errors
    /// Returns `StorageError::HashMismatch` when the digest of `data` is not `self`.
    pub fn verify(&self, data: &[u8]) -> Result<(), Error> {
        let actual = Self::from_data(data);
        if actual == *self {
            return Ok(());
        }
        Err(StorageError::HashMismatch {
            expected: self.to_hex(),
            actual: actual.to_hex(),
        }
        .into())
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Hash {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_digests() {
        assert_eq!(
            Hash::from_data(b"hello world").to_hex(),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
        assert_eq!(
            Hash::from_data(b"").to_string(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn serializes_as_hex_string() {
        let hash = Hash::from_data(b"test");
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, format!("\"{hash}\""));
        assert_eq!(serde_json::from_str::<Hash>(&json).unwrap(), hash);
        assert!(serde_json::from_str::<Hash>("\"abcd\"").is_err());
    }

    #[test]
    fn from_hex_needs_full_digest() {
        assert!(Hash::from_hex("abcd").is_err());
        assert!(Hash::from_hex(&"zz".repeat(32)).is_err());
        let hash = Hash::from_data(b"x");
        assert_eq!(hash.to_hex().parse::<Hash>().unwrap(), hash);
    }

    #[test]
    fn verify_reports_mismatch() {
        let hash = Hash::from_data(b"module");
        assert!(hash.matches(b"module"));
        assert!(hash.verify(b"module").is_ok());
        let err = hash.verify(b"tampered").unwrap_err();
        assert!(err.is_integrity());
        assert!(!hash.matches(b"tampered"));
    }
}
