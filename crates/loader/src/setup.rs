//! Building a loader from [`Config`]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use hotload_cache::ContentCache;
use hotload_config::{Config, LoaderConfig, SecurityConfig};
use hotload_errors::Error;
use hotload_events::SharedEventListener;
use hotload_net::{NetClient, NetConfig};
use hotload_signing::ManifestVerifier;
use hotload_types::SharedClock;

use crate::engine::EngineFactory;
use crate::freshness::{FreshnessChecker, MaxAgeFreshnessChecker, NeverFresh};
use crate::loader::ModuleLoader;

/// Verifier trusting the configured keys.
///
/// With no keys and `require_signatures = false`, manifests are accepted
/// unsigned.
///
/// # Errors
/// Returns an error if a key is malformed, or if there are no keys while
/// signatures are required.
pub fn verifier_from_config(security: &SecurityConfig) -> Result<ManifestVerifier, Error> {
    if security.trusted_keys.is_empty() && !security.require_signatures {
        return Ok(ManifestVerifier::no_signature_checks());
    }
    security
        .trusted_keys
        .iter()
        .try_fold(ManifestVerifier::builder(), |builder, (name, key)| {
            builder.add(key.algorithm, name.clone(), &key.public_key)
        })?
        .build()
}

/// `freshness_max_age_secs` as a checker; [`NeverFresh`] when unset.
#[must_use]
pub fn freshness_from_config(loader: &LoaderConfig) -> Arc<dyn FreshnessChecker> {
    match loader.freshness_max_age_secs {
        Some(secs) => Arc::new(MaxAgeFreshnessChecker::new(Duration::from_secs(secs))),
        None => Arc::new(NeverFresh),
    }
}

/// Open the cache described by the `[cache]` section.
///
/// # Errors
/// Returns an error if the cache directory cannot be resolved or opened.
pub async fn open_cache(
    config: &Config,
    listener: SharedEventListener,
    clock: SharedClock,
) -> Result<ContentCache, Error> {
    let directory: PathBuf = config.cache_dir()?;
    ContentCache::builder(directory)
        .database_name(config.cache.database_name.clone())
        .max_size_bytes(config.cache.max_size_bytes)
        .event_listener(listener)
        .clock(clock)
        .open()
        .await
}

impl ModuleLoader {
    /// Assemble a loader with a reqwest client, the configured trust roots,
    /// cache and `[loader]` settings.
    ///
    /// # Errors
    /// Returns an error if the config is invalid or the cache cannot be
    /// opened.
    pub async fn from_config(
        config: &Config,
        engine_factory: Arc<dyn EngineFactory>,
        listener: SharedEventListener,
        clock: SharedClock,
    ) -> Result<Self, Error> {
        config.validate()?;
        let verifier = verifier_from_config(&config.security)?;
        let http_client = Arc::new(NetClient::new(NetConfig::from(&config.network))?);
        let cache = open_cache(config, listener.clone(), clock.clone()).await?;

        ModuleLoader::builder(verifier, http_client, engine_factory)
            .cache(Arc::new(cache))
            .event_listener(listener)
            .clock(clock)
            .loader_config(&config.loader)
            .build()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use hotload_config::TrustedKey;
    use hotload_manifest::{LoadedManifest, Manifest, Module};
    use hotload_signing::{
        generate_ecdsa_p256_key_pair, generate_ed25519_key_pair, ManifestSigner,
    };
    use hotload_types::SignatureAlgorithm;

    use super::*;

    fn signed(private_key: &str) -> LoadedManifest {
        signed_with(SignatureAlgorithm::Ed25519, private_key)
    }

    fn signed_with(algorithm: SignatureAlgorithm, private_key: &str) -> LoadedManifest {
        let manifest = Manifest::builder()
            .module("a", Module::new("a.bin", hotload_hash::Hash::from_data(b"a")))
            .build()
            .unwrap();
        let signer = ManifestSigner::builder()
            .add(algorithm, "key1", private_key)
            .unwrap()
            .build()
            .unwrap();
        LoadedManifest::from_manifest(signer.sign(&manifest).unwrap(), 0).unwrap()
    }

    #[test]
    fn configured_keys_are_trusted() {
        let keys = generate_ed25519_key_pair();
        let security = SecurityConfig {
            trusted_keys: BTreeMap::from([(
                "key1".to_string(),
                TrustedKey::ed25519(keys.public_key.clone()),
            )]),
            require_signatures: true,
        };
        let verifier = verifier_from_config(&security).unwrap();
        let loaded = signed(&keys.private_key);
        assert_eq!(
            verifier
                .verify(&loaded.manifest_bytes, &loaded.manifest)
                .unwrap()
                .as_deref(),
            Some("key1")
        );
    }

    #[test]
    fn configured_p256_keys_are_trusted() {
        let keys = generate_ecdsa_p256_key_pair();
        let security = SecurityConfig {
            trusted_keys: BTreeMap::from([(
                "key1".to_string(),
                TrustedKey::ecdsa_p256(keys.public_key.clone()),
            )]),
            require_signatures: true,
        };
        let verifier = verifier_from_config(&security).unwrap();
        let loaded = signed_with(SignatureAlgorithm::EcdsaP256, &keys.private_key);
        assert_eq!(
            verifier
                .verify(&loaded.manifest_bytes, &loaded.manifest)
                .unwrap()
                .as_deref(),
            Some("key1")
        );

        // The same point registered as Ed25519 is refused.
        let mislabeled = SecurityConfig {
            trusted_keys: BTreeMap::from([(
                "key1".to_string(),
                TrustedKey::ed25519(keys.public_key),
            )]),
            require_signatures: true,
        };
        assert!(verifier_from_config(&mislabeled).is_err());
    }

    #[test]
    fn required_signatures_need_keys() {
        let security = SecurityConfig {
            trusted_keys: BTreeMap::new(),
            require_signatures: true,
        };
        assert!(verifier_from_config(&security).is_err());
    }

    #[test]
    fn unsigned_mode_accepts_anything() {
        let security = SecurityConfig {
            trusted_keys: BTreeMap::new(),
            require_signatures: false,
        };
        let verifier = verifier_from_config(&security).unwrap();
        let loaded = signed(&generate_ed25519_key_pair().private_key);
        assert!(verifier
            .verify(&loaded.manifest_bytes, &loaded.manifest)
            .unwrap()
            .is_none());
    }

    #[test]
    fn freshness_follows_max_age() {
        let manifest = signed(&generate_ed25519_key_pair().private_key).manifest;
        let never = freshness_from_config(&LoaderConfig::default());
        assert!(!never.is_fresh(&manifest, 0, 0));

        let config = LoaderConfig {
            freshness_max_age_secs: Some(60),
            ..LoaderConfig::default()
        };
        assert!(freshness_from_config(&config).is_fresh(&manifest, 0, 59_000));
    }
}
