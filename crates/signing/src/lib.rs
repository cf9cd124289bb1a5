#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Manifest signing and verification
//!
//! Signatures cover the manifest's signature payload: the JSON document with
//! its `unsigned` object removed, re-encoded compactly. A manifest carries
//! one signature per key, in order of preference. Keys are Ed25519 or ECDSA
//! P-256; see [`SignatureAlgorithm`].

mod keys;

use std::collections::HashMap;

use hotload_errors::{Error, ManifestError, SigningError};
use hotload_manifest::{signature_payload, Manifest, OrderedMap};
pub use hotload_types::SignatureAlgorithm;
use serde::{Deserialize, Serialize};

use crate::keys::{PrivateKey, PublicKey};

/// A freshly generated key pair, hex encoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyPair {
    pub algorithm: SignatureAlgorithm,
    pub private_key: String,
    pub public_key: String,
}

/// Generate a random key pair for `algorithm`.
#[must_use]
pub fn generate_key_pair(algorithm: SignatureAlgorithm) -> KeyPair {
    let (private_key, public_key) = keys::generate(algorithm);
    KeyPair {
        algorithm,
        private_key,
        public_key,
    }
}

#[must_use]
pub fn generate_ed25519_key_pair() -> KeyPair {
    generate_key_pair(SignatureAlgorithm::Ed25519)
}

#[must_use]
pub fn generate_ecdsa_p256_key_pair() -> KeyPair {
    generate_key_pair(SignatureAlgorithm::EcdsaP256)
}

/// Signs manifests with every configured private key.
pub struct ManifestSigner {
    keys: Vec<(String, PrivateKey)>,
}

impl std::fmt::Debug for ManifestSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManifestSigner")
            .field("keys", &self.keys.iter().map(|(name, _)| name).collect::<Vec<_>>())
            .finish()
    }
}

impl ManifestSigner {
    #[must_use]
    pub fn builder() -> ManifestSignerBuilder {
        ManifestSignerBuilder::default()
    }

    /// Return a copy of `manifest` with one signature per key, replacing any
    /// existing signatures.
    ///
    /// # Errors
    /// Returns an error if the manifest cannot be encoded.
    pub fn sign(&self, manifest: &Manifest) -> Result<Manifest, Error> {
        let payload = manifest.signature_payload()?;
        let signatures: OrderedMap<String> = self
            .keys
            .iter()
            .map(|(name, key)| (name.clone(), hex::encode(key.sign(&payload))))
            .collect();
        Ok(manifest.with_signatures(signatures))
    }
}

#[derive(Default)]
pub struct ManifestSignerBuilder {
    keys: Vec<(String, PrivateKey)>,
}

impl ManifestSignerBuilder {
    /// Add a hex-encoded 32-byte private key for `algorithm`.
    ///
    /// # Errors
    /// Returns an error if the key is not 32 bytes of hex, or not a valid
    /// scalar for the curve.
    pub fn add(
        mut self,
        algorithm: SignatureAlgorithm,
        name: impl Into<String>,
        private_key_hex: &str,
    ) -> Result<Self, Error> {
        let name = name.into();
        let key = PrivateKey::decode(algorithm, &name, private_key_hex)?;
        self.keys.push((name, key));
        Ok(self)
    }

    /// # Errors
    /// Returns an error if the key is malformed.
    pub fn add_ed25519(self, name: impl Into<String>, private_key_hex: &str) -> Result<Self, Error> {
        self.add(SignatureAlgorithm::Ed25519, name, private_key_hex)
    }

    /// # Errors
    /// Returns an error if the key is malformed.
    pub fn add_ecdsa_p256(self, name: impl Into<String>, private_key_hex: &str) -> Result<Self, Error> {
        self.add(SignatureAlgorithm::EcdsaP256, name, private_key_hex)
    }

    /// # Errors
    /// Returns an error if no keys were added.
    pub fn build(self) -> Result<ManifestSigner, Error> {
        if self.keys.is_empty() {
            return Err(SigningError::NoSigningKeys.into());
        }
        Ok(ManifestSigner { keys: self.keys })
    }
}

/// Checks manifest signatures against a set of trusted public keys.
#[derive(Debug, Clone)]
pub struct ManifestVerifier {
    trusted_keys: Option<HashMap<String, PublicKey>>,
}

impl ManifestVerifier {
    #[must_use]
    pub fn builder() -> ManifestVerifierBuilder {
        ManifestVerifierBuilder::default()
    }

    /// A verifier that accepts every manifest. Only for development setups.
    #[must_use]
    pub fn no_signature_checks() -> Self {
        Self { trusted_keys: None }
    }

    /// Verify `manifest` using the signature payload recomputed from
    /// `manifest_bytes`, the exact bytes `manifest` was decoded from.
    ///
    /// Signatures are tried in document order. The first one whose key name
    /// is trusted decides: it must validate, and later signatures are not
    /// consulted. Returns the accepting key's name, or `None` when signature
    /// checks are disabled.
    ///
    /// # Errors
    /// Returns an error if no signature names a trusted key, or if the first
    /// trusted signature does not validate.
    pub fn verify(&self, manifest_bytes: &[u8], manifest: &Manifest) -> Result<Option<String>, Error> {
        let Some(trusted_keys) = &self.trusted_keys else {
            return Ok(None);
        };

        let json = std::str::from_utf8(manifest_bytes).map_err(|e| ManifestError::ParseError {
            message: format!("manifest is not UTF-8: {e}"),
        })?;
        let payload = signature_payload(json)?;

        for (key_id, signature_hex) in manifest.signatures().iter() {
            let Some(key) = trusted_keys.get(key_id) else {
                continue;
            };
            let signature = hex::decode(signature_hex).map_err(|_| SigningError::VerificationFailed {
                key_id: key_id.to_string(),
                reason: "signature is not hex".to_string(),
            })?;
            key.verify(payload.as_bytes(), &signature)
                .map_err(|reason| SigningError::VerificationFailed {
                    key_id: key_id.to_string(),
                    reason,
                })?;
            return Ok(Some(key_id.to_string()));
        }

        Err(SigningError::NoTrustedKeyFound {
            key_ids: manifest.signatures().keys().collect::<Vec<_>>().join(", "),
        }
        .into())
    }
}

#[derive(Debug, Default)]
pub struct ManifestVerifierBuilder {
    trusted_keys: HashMap<String, PublicKey>,
}

impl ManifestVerifierBuilder {
    /// Trust a hex-encoded public key for `algorithm` under `name`.
    ///
    /// # Errors
    /// Returns an error if the key is malformed.
    pub fn add(
        mut self,
        algorithm: SignatureAlgorithm,
        name: impl Into<String>,
        public_key_hex: &str,
    ) -> Result<Self, Error> {
        let name = name.into();
        let key = PublicKey::decode(algorithm, &name, public_key_hex)?;
        self.trusted_keys.insert(name, key);
        Ok(self)
    }

    /// Trust a 32-byte Ed25519 public key.
    ///
    /// # Errors
    /// Returns an error if the key is malformed.
    pub fn add_ed25519(self, name: impl Into<String>, public_key_hex: &str) -> Result<Self, Error> {
        self.add(SignatureAlgorithm::Ed25519, name, public_key_hex)
    }

    /// Trust an uncompressed 65-byte P-256 public key.
    ///
    /// # Errors
    /// Returns an error if the key is malformed or not on the curve.
    pub fn add_ecdsa_p256(self, name: impl Into<String>, public_key_hex: &str) -> Result<Self, Error> {
        self.add(SignatureAlgorithm::EcdsaP256, name, public_key_hex)
    }

    /// # Errors
    /// Returns an error if no keys are trusted.
    pub fn build(self) -> Result<ManifestVerifier, Error> {
        if self.trusted_keys.is_empty() {
            return Err(SigningError::NoTrustedKeys.into());
        }
        Ok(ManifestVerifier {
            trusted_keys: Some(self.trusted_keys),
        })
    }
}
