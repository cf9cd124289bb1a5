use hotload_errors::Error;

use crate::{with_fresh_at, Manifest};

/// A manifest together with the exact bytes it was decoded from.
///
/// Signatures are checked against `manifest_bytes`, never against a
/// re-encoding of `manifest`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedManifest {
    pub manifest_bytes: Vec<u8>,
    pub manifest: Manifest,
    pub fresh_at_epoch_ms: i64,
}

impl LoadedManifest {
    /// Decode `manifest_bytes`.
    ///
    /// # Errors
    /// Returns an error if the bytes are not a valid manifest.
    pub fn parse(manifest_bytes: Vec<u8>, fresh_at_epoch_ms: i64) -> Result<Self, Error> {
        let json = std::str::from_utf8(&manifest_bytes).map_err(|e| {
            hotload_errors::ManifestError::ParseError {
                message: format!("manifest is not UTF-8: {e}"),
            }
        })?;
        let manifest = Manifest::decode_json(json)?;
        Ok(Self {
            manifest_bytes,
            manifest,
            fresh_at_epoch_ms,
        })
    }

    /// Encode a manifest that was built in memory.
    ///
    /// # Errors
    /// Returns an error if the manifest cannot be encoded.
    pub fn from_manifest(manifest: Manifest, fresh_at_epoch_ms: i64) -> Result<Self, Error> {
        let manifest_bytes = manifest.encode_json()?.into_bytes();
        Ok(Self {
            manifest_bytes,
            manifest,
            fresh_at_epoch_ms,
        })
    }

    /// Copy whose bytes carry `fresh_at_epoch_ms` in `unsigned.freshAtEpochMs`.
    ///
    /// # Errors
    /// Returns an error if the bytes cannot be rewritten.
    pub fn encode_fresh_at(&self) -> Result<Self, Error> {
        let json = std::str::from_utf8(&self.manifest_bytes).map_err(|e| {
            hotload_errors::ManifestError::ParseError {
                message: format!("manifest is not UTF-8: {e}"),
            }
        })?;
        let rewritten = with_fresh_at(json, self.fresh_at_epoch_ms)?;
        Ok(Self {
            manifest_bytes: rewritten.into_bytes(),
            manifest: self
                .manifest
                .with_fresh_at_epoch_ms(Some(self.fresh_at_epoch_ms)),
            fresh_at_epoch_ms: self.fresh_at_epoch_ms,
        })
    }
}
