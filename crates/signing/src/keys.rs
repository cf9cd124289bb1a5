//! Per-algorithm key material
//!
//! Ed25519 keys are raw 32-byte values. P-256 private keys are raw 32-byte
//! scalars, public keys uncompressed SEC1 points (`04 || x || y`), and
//! signatures DER-encoded.

use ed25519_dalek::Signer as _;
use hotload_errors::{Error, SigningError};
use hotload_types::SignatureAlgorithm;
use p256::ecdsa::signature::{Signer as _, Verifier as _};

const P256_UNCOMPRESSED_LEN: usize = 65;

#[derive(Clone)]
pub(crate) enum PrivateKey {
    Ed25519(ed25519_dalek::SigningKey),
    EcdsaP256(p256::ecdsa::SigningKey),
}

impl PrivateKey {
    pub(crate) fn decode(algorithm: SignatureAlgorithm, name: &str, key_hex: &str) -> Result<Self, Error> {
        let invalid = || SigningError::InvalidPrivateKey(name.to_string());
        let bytes: [u8; 32] = hex::decode(key_hex)
            .ok()
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or_else(invalid)?;
        Ok(match algorithm {
            SignatureAlgorithm::Ed25519 => Self::Ed25519(ed25519_dalek::SigningKey::from_bytes(&bytes)),
            SignatureAlgorithm::EcdsaP256 => Self::EcdsaP256(
                p256::ecdsa::SigningKey::from_slice(&bytes).map_err(|_| invalid())?,
            ),
        })
    }

    pub(crate) fn sign(&self, payload: &[u8]) -> Vec<u8> {
        match self {
            Self::Ed25519(key) => key.sign(payload).to_bytes().to_vec(),
            Self::EcdsaP256(key) => {
                let signature: p256::ecdsa::Signature = key.sign(payload);
                signature.to_der().as_bytes().to_vec()
            }
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum PublicKey {
    Ed25519(ed25519_dalek::VerifyingKey),
    EcdsaP256(p256::ecdsa::VerifyingKey),
}

impl PublicKey {
    pub(crate) fn decode(algorithm: SignatureAlgorithm, name: &str, key_hex: &str) -> Result<Self, Error> {
        let invalid = || SigningError::InvalidPublicKey(name.to_string());
        let bytes = hex::decode(key_hex).map_err(|_| invalid())?;
        Ok(match algorithm {
            SignatureAlgorithm::Ed25519 => {
                let bytes: [u8; 32] = bytes.try_into().map_err(|_| invalid())?;
                Self::Ed25519(ed25519_dalek::VerifyingKey::from_bytes(&bytes).map_err(|_| invalid())?)
            }
            SignatureAlgorithm::EcdsaP256 => {
                if bytes.len() != P256_UNCOMPRESSED_LEN || bytes[0] != 0x04 {
                    return Err(invalid().into());
                }
                Self::EcdsaP256(p256::ecdsa::VerifyingKey::from_sec1_bytes(&bytes).map_err(|_| invalid())?)
            }
        })
    }

    /// `Err` carries the reason the signature was rejected.
    pub(crate) fn verify(&self, payload: &[u8], signature: &[u8]) -> Result<(), String> {
        match self {
            Self::Ed25519(key) => {
                let signature = ed25519_dalek::Signature::from_slice(signature)
                    .map_err(|_| "malformed signature".to_string())?;
                key.verify_strict(payload, &signature).map_err(|e| e.to_string())
            }
            Self::EcdsaP256(key) => {
                let signature = p256::ecdsa::Signature::from_der(signature)
                    .map_err(|_| "malformed signature".to_string())?;
                key.verify(payload, &signature).map_err(|e| e.to_string())
            }
        }
    }
}

/// Random private key, returned with its public key, both hex encoded.
pub(crate) fn generate(algorithm: SignatureAlgorithm) -> (String, String) {
    match algorithm {
        SignatureAlgorithm::Ed25519 => {
            let key = ed25519_dalek::SigningKey::from_bytes(&rand::random());
            (
                hex::encode(key.to_bytes()),
                hex::encode(key.verifying_key().to_bytes()),
            )
        }
        SignatureAlgorithm::EcdsaP256 => {
            // A random 32-byte string is a valid scalar except with negligible probability.
            let key = loop {
                if let Ok(key) = p256::ecdsa::SigningKey::from_slice(&rand::random::<[u8; 32]>()) {
                    break key;
                }
            };
            let public = key.verifying_key().to_encoded_point(false);
            (hex::encode(key.to_bytes()), hex::encode(public.as_bytes()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const P256_PRIVATE: &str = "bbb00b5fc89bdea4258b701b97e0fe875f374fad8b9c909278e7a548c2eb06d4";
    const P256_PUBLIC: &str = "04d662bf2ed11a3017e2ec9b4955f91cd975a21b47030e687e1c88ac24ebea0a4c9d12ef2ebed97be89a689d5c68e2308e155bd8030a7a961121b5b12184ddedd9";
    const OTHER_P256_PUBLIC: &str = "04bee3640f35b3f879c27eca70af4b7f0e4d133f948074fc4fad9b38df0f6c5732e02ffff73c15ccfa69c145f3a772367c20c94a5e85251521e5bb806dce3ce9a0";

    #[test]
    fn p256_known_key_pair_signs_and_verifies() {
        let private = PrivateKey::decode(SignatureAlgorithm::EcdsaP256, "k", P256_PRIVATE).unwrap();
        let public = PublicKey::decode(SignatureAlgorithm::EcdsaP256, "k", P256_PUBLIC).unwrap();
        let signature = private.sign(b"hello world");
        // DER sequence
        assert_eq!(signature[0], 0x30);

        assert!(public.verify(b"hello world", &signature).is_ok());
        assert!(public.verify(b"hello World", &signature).is_err());

        let other = PublicKey::decode(SignatureAlgorithm::EcdsaP256, "k", OTHER_P256_PUBLIC).unwrap();
        assert!(other.verify(b"hello world", &signature).is_err());
    }

    #[test]
    fn p256_public_keys_must_be_uncompressed_points() {
        let compressed = format!("02{}", &P256_PUBLIC[2..66]);
        assert!(PublicKey::decode(SignatureAlgorithm::EcdsaP256, "k", &compressed).is_err());
        let off_curve = format!("{}00", &P256_PUBLIC[..128]);
        assert!(PublicKey::decode(SignatureAlgorithm::EcdsaP256, "k", &off_curve).is_err());
        assert!(PublicKey::decode(SignatureAlgorithm::EcdsaP256, "k", &"ab".repeat(32)).is_err());
    }

    #[test]
    fn signatures_do_not_cross_algorithms() {
        let (ed_private, _) = generate(SignatureAlgorithm::Ed25519);
        let ed = PrivateKey::decode(SignatureAlgorithm::Ed25519, "k", &ed_private).unwrap();
        let public = PublicKey::decode(SignatureAlgorithm::EcdsaP256, "k", P256_PUBLIC).unwrap();
        assert_eq!(
            public.verify(b"payload", &ed.sign(b"payload")),
            Err("malformed signature".to_string())
        );
    }

    #[test]
    fn generated_keys_have_expected_encodings() {
        let (private, public) = generate(SignatureAlgorithm::EcdsaP256);
        assert_eq!(private.len(), 64);
        assert_eq!(public.len(), SignatureAlgorithm::EcdsaP256.public_key_hex_len());
        assert!(public.starts_with("04"));
        let (private, public) = generate(SignatureAlgorithm::Ed25519);
        assert_eq!(private.len(), 64);
        assert_eq!(public.len(), SignatureAlgorithm::Ed25519.public_key_hex_len());
    }
}
