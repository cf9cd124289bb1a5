#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Core type definitions shared across the hotload crates
//!
//! Time is injected through [`Clock`] so cache recency and manifest freshness
//! can be driven deterministically in tests.

pub mod clock;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};

use serde::{Deserialize, Serialize};

/// Default number of module downloads allowed in flight at once.
pub const DEFAULT_CONCURRENT_DOWNLOADS: usize = 3;

/// Default cache budget: 100 MiB.
pub const DEFAULT_CACHE_MAX_BYTES: u64 = 100 * 1024 * 1024;

/// Name of the manifest file for `application_name` inside embedded and
/// download directories.
#[must_use]
pub fn manifest_file_name(application_name: &str) -> String {
    format!("{application_name}.manifest.hotload.json")
}

/// Lifecycle of one cache row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileState {
    /// A write is in progress and owned by whoever inserted the row.
    Dirty,
    /// The file on disk is complete and matches its hash.
    Ready,
}

impl FileState {
    /// Value stored in the `file_state` column.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dirty => "DIRTY",
            Self::Ready => "READY",
        }
    }

    /// Parse a `file_state` column value.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "DIRTY" => Some(Self::Dirty),
            "READY" => Some(Self::Ready),
            _ => None,
        }
    }
}

impl std::fmt::Display for FileState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Signature scheme of a manifest signing key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureAlgorithm {
    /// 32-byte keys and 64-byte signatures.
    #[default]
    Ed25519,
    /// ECDSA over P-256 with SHA-256. Public keys are uncompressed SEC1
    /// points, signatures are DER.
    EcdsaP256,
}

impl SignatureAlgorithm {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ed25519 => "ed25519",
            Self::EcdsaP256 => "ecdsa_p256",
        }
    }

    /// Length of a hex-encoded public key for this algorithm.
    #[must_use]
    pub fn public_key_hex_len(self) -> usize {
        match self {
            Self::Ed25519 => 64,
            Self::EcdsaP256 => 130,
        }
    }
}

impl std::fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
