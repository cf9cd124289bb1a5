#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Application manifest model for hotload
//!
//! A manifest names every module of an application, where to download it,
//! its SHA-256, and which modules it depends on. Modules are always kept in
//! dependency order: [`ManifestBuilder::build`] sorts them and decoding
//! rejects any document that is not already sorted.
//!
//! Everything under `unsigned` is provenance metadata that the loader may
//! rewrite after verification; the rest of the document is covered by the
//! signatures.

mod loaded;
mod ordered;
pub mod payload;
pub mod topology;

pub use loaded::LoadedManifest;
pub use ordered::OrderedMap;
pub use payload::{signature_payload, with_base_url, with_fresh_at};
pub use topology::{check_topologically_sorted, topological_sort};

use std::collections::BTreeMap;

use hotload_errors::{Error, ManifestError};
use hotload_hash::Hash;
use serde::{Deserialize, Serialize};

/// Largest manifest accepted from any source: 640 KiB.
pub const MANIFEST_MAX_SIZE: usize = 640 * 1024;

/// Metadata that is not authenticated by a signature.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Unsigned {
    /// Signatures in order of preference: key name to hex signature.
    #[serde(default)]
    pub signatures: OrderedMap<String>,

    /// Newest time this manifest was known to be fresh.
    #[serde(default)]
    pub fresh_at_epoch_ms: Option<i64>,

    /// URL that relative module URLs resolve against.
    #[serde(default)]
    pub base_url: Option<String>,
}

/// One unit of compiled code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Module {
    /// Absolute URL, or relative to the manifest's base URL.
    pub url: String,
    pub sha256: Hash,
    #[serde(default)]
    pub depends_on_ids: Vec<String>,
}

impl Module {
    pub fn new(url: impl Into<String>, sha256: Hash) -> Self {
        Self {
            url: url.into(),
            sha256,
            depends_on_ids: Vec::new(),
        }
    }

    #[must_use]
    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        self.depends_on_ids.push(id.into());
        self
    }
}

/// Signed description of an application's module graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "ManifestDocument")]
pub struct Manifest {
    unsigned: Unsigned,
    modules: OrderedMap<Module>,
    main_module_id: String,
    main_function: Option<String>,
    version: Option<String>,
    metadata: BTreeMap<String, String>,
}

/// Wire shape decoded before the ordering check.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifestDocument {
    #[serde(default)]
    unsigned: Unsigned,
    #[serde(default)]
    modules: OrderedMap<Module>,
    main_module_id: String,
    #[serde(default)]
    main_function: Option<String>,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
}

impl TryFrom<ManifestDocument> for Manifest {
    type Error = ManifestError;

    fn try_from(doc: ManifestDocument) -> Result<Self, Self::Error> {
        check_topologically_sorted(&doc.modules)?;
        Ok(Self {
            unsigned: doc.unsigned,
            modules: doc.modules,
            main_module_id: doc.main_module_id,
            main_function: doc.main_function,
            version: doc.version,
            metadata: doc.metadata,
        })
    }
}

impl Manifest {
    #[must_use]
    pub fn builder() -> ManifestBuilder {
        ManifestBuilder::default()
    }

    /// Modules in dependency order.
    #[must_use]
    pub fn modules(&self) -> &OrderedMap<Module> {
        &self.modules
    }

    #[must_use]
    pub fn main_module_id(&self) -> &str {
        &self.main_module_id
    }

    #[must_use]
    pub fn main_function(&self) -> Option<&str> {
        self.main_function.as_deref()
    }

    #[must_use]
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    #[must_use]
    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    #[must_use]
    pub fn unsigned(&self) -> &Unsigned {
        &self.unsigned
    }

    #[must_use]
    pub fn signatures(&self) -> &OrderedMap<String> {
        &self.unsigned.signatures
    }

    #[must_use]
    pub fn fresh_at_epoch_ms(&self) -> Option<i64> {
        self.unsigned.fresh_at_epoch_ms
    }

    #[must_use]
    pub fn base_url(&self) -> Option<&str> {
        self.unsigned.base_url.as_deref()
    }

    /// Copy with the signatures replaced.
    #[must_use]
    pub fn with_signatures(&self, signatures: OrderedMap<String>) -> Self {
        let mut copy = self.clone();
        copy.unsigned.signatures = signatures;
        copy
    }

    /// Copy with `freshAtEpochMs` replaced.
    #[must_use]
    pub fn with_fresh_at_epoch_ms(&self, fresh_at_epoch_ms: Option<i64>) -> Self {
        let mut copy = self.clone();
        copy.unsigned.fresh_at_epoch_ms = fresh_at_epoch_ms;
        copy
    }

    /// Copy with `baseUrl` replaced.
    #[must_use]
    pub fn with_base_url(&self, base_url: Option<String>) -> Self {
        let mut copy = self.clone();
        copy.unsigned.base_url = base_url;
        copy
    }

    /// True when both manifests describe the same signed release, ignoring
    /// the unsigned metadata.
    #[must_use]
    pub fn is_same_release(&self, other: &Manifest) -> bool {
        self.modules == other.modules
            && self.main_module_id == other.main_module_id
            && self.main_function == other.main_function
            && self.version == other.version
            && self.metadata == other.metadata
    }

    /// Encode as JSON.
    ///
    /// # Errors
    /// Returns an error if the encoding exceeds [`MANIFEST_MAX_SIZE`].
    pub fn encode_json(&self) -> Result<String, Error> {
        let json = serde_json::to_string(self)?;
        payload::check_size(json.len())?;
        Ok(json)
    }

    /// Decode and validate a manifest document.
    ///
    /// # Errors
    /// Returns an error if the document is oversized, malformed, or its
    /// modules are not in dependency order.
    pub fn decode_json(json: &str) -> Result<Self, Error> {
        payload::check_size(json.len())?;
        let document: ManifestDocument = serde_json::from_str(json)?;
        Ok(Manifest::try_from(document)?)
    }

    /// Bytes covered by the signatures.
    ///
    /// # Errors
    /// Returns an error if the manifest cannot be encoded.
    pub fn signature_payload(&self) -> Result<Vec<u8>, Error> {
        Ok(signature_payload(&self.encode_json()?)?.into_bytes())
    }
}

/// Builds a manifest from modules in any order.
#[derive(Debug, Default)]
pub struct ManifestBuilder {
    modules: OrderedMap<Module>,
    main_module_id: Option<String>,
    main_function: Option<String>,
    version: Option<String>,
    built_at_epoch_ms: Option<i64>,
    base_url: Option<String>,
    metadata: BTreeMap<String, String>,
}

impl ManifestBuilder {
    #[must_use]
    pub fn module(mut self, id: impl Into<String>, module: Module) -> Self {
        self.modules.insert(id, module);
        self
    }

    #[must_use]
    pub fn main_module_id(mut self, id: impl Into<String>) -> Self {
        self.main_module_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn main_function(mut self, function: impl Into<String>) -> Self {
        self.main_function = Some(function.into());
        self
    }

    #[must_use]
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Recorded as the initial `freshAtEpochMs`.
    #[must_use]
    pub fn built_at_epoch_ms(mut self, epoch_ms: i64) -> Self {
        self.built_at_epoch_ms = Some(epoch_ms);
        self
    }

    #[must_use]
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    #[must_use]
    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Sort the modules and assemble the manifest. The main module defaults
    /// to the last module in dependency order.
    ///
    /// # Errors
    /// Returns an error if the module graph has a cycle or names an unknown
    /// dependency, or if there are no modules and no main module id.
    pub fn build(self) -> Result<Manifest, Error> {
        let modules = topological_sort(self.modules)?;
        let main_module_id = match self.main_module_id {
            Some(id) => id,
            None => modules
                .last()
                .map(|(id, _)| id.to_string())
                .ok_or_else(|| ManifestError::ParseError {
                    message: "manifest has no modules and no main module id".to_string(),
                })?,
        };
        Ok(Manifest {
            unsigned: Unsigned {
                signatures: OrderedMap::new(),
                fresh_at_epoch_ms: self.built_at_epoch_ms,
                base_url: self.base_url,
            },
            modules,
            main_module_id,
            main_function: self.main_function,
            version: self.version,
            metadata: self.metadata,
        })
    }
}
