//! Signing error types

use std::borrow::Cow;

use crate::UserFacingError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum SigningError {
    #[error("signature verification failed for key {key_id}: {reason}")]
    VerificationFailed { key_id: String, reason: String },

    #[error("no trusted key found among signatures: [{key_ids}]")]
    NoTrustedKeyFound { key_ids: String },

    #[error("at least one trusted key is required")]
    NoTrustedKeys,

    #[error("at least one signing key is required")]
    NoSigningKeys,

    #[error("invalid signature format: {0}")]
    InvalidSignatureFormat(String),

    #[error("invalid public key format: {0}")]
    InvalidPublicKey(String),

    #[error("invalid private key format: {0}")]
    InvalidPrivateKey(String),
}

impl UserFacingError for SigningError {
    fn user_message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    fn user_hint(&self) -> Option<&'static str> {
        match self {
            Self::NoTrustedKeyFound { .. } => {
                Some("Add the publisher's public key to the trusted key set.")
            }
            Self::NoTrustedKeys => Some("Configure at least one trusted key under [security]."),
            _ => None,
        }
    }

    fn user_code(&self) -> Option<&'static str> {
        let code = match self {
            Self::VerificationFailed { .. } => "signing.verification_failed",
            Self::NoTrustedKeyFound { .. } => "signing.no_trusted_key",
            Self::NoTrustedKeys => "signing.no_trusted_keys",
            Self::NoSigningKeys => "signing.no_signing_keys",
            Self::InvalidSignatureFormat(_) => "signing.invalid_signature",
            Self::InvalidPublicKey(_) => "signing.invalid_public_key",
            Self::InvalidPrivateKey(_) => "signing.invalid_private_key",
        };
        Some(code)
    }
}
