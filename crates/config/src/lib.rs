#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Configuration management for hotload
//!
//! Settings come from defaults, an optional TOML file and `HOTLOAD_*`
//! environment variables, in that order of precedence (lowest first).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use hotload_errors::{ConfigError, Error};
use hotload_types::{SignatureAlgorithm, DEFAULT_CACHE_MAX_BYTES, DEFAULT_CONCURRENT_DOWNLOADS};
use serde::{Deserialize, Serialize};
use tokio::fs;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub loader: LoaderConfig,

    #[serde(default)]
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Directory holding the index database and cached files.
    #[serde(default)]
    pub directory: Option<PathBuf>,

    #[serde(default = "default_database_name")]
    pub database_name: String,

    #[serde(default = "default_max_size_bytes")]
    pub max_size_bytes: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            directory: None,
            database_name: default_database_name(),
            max_size_bytes: default_max_size_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_retries")]
    pub retries: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            retries: default_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            user_agent: default_user_agent(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    #[serde(default = "default_concurrent_downloads")]
    pub concurrent_downloads: usize,

    /// Directory of modules and manifests shipped with the host.
    #[serde(default)]
    pub embedded_dir: Option<PathBuf>,

    /// Local manifests younger than this are used without a network check.
    /// Unset means a network check is always attempted.
    #[serde(default)]
    pub freshness_max_age_secs: Option<u64>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            concurrent_downloads: default_concurrent_downloads(),
            embedded_dir: None,
            freshness_max_age_secs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Trusted public keys by key name.
    #[serde(default)]
    pub trusted_keys: BTreeMap<String, TrustedKey>,

    #[serde(default = "default_require_signatures")]
    pub require_signatures: bool,
}

/// A public key the verifier accepts signatures from.
///
/// In TOML a bare hex string is an Ed25519 key; other algorithms use a table:
///
/// ```toml
/// [security.trusted_keys]
/// release = "3b6a27bc..."
/// partner = { algorithm = "ecdsa_p256", public_key = "04d662bf..." }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "TrustedKeyRepr", into = "TrustedKeyRepr")]
pub struct TrustedKey {
    pub algorithm: SignatureAlgorithm,
    pub public_key: String,
}

impl TrustedKey {
    #[must_use]
    pub fn new(algorithm: SignatureAlgorithm, public_key: impl Into<String>) -> Self {
        Self {
            algorithm,
            public_key: public_key.into(),
        }
    }

    #[must_use]
    pub fn ed25519(public_key: impl Into<String>) -> Self {
        Self::new(SignatureAlgorithm::Ed25519, public_key)
    }

    #[must_use]
    pub fn ecdsa_p256(public_key: impl Into<String>) -> Self {
        Self::new(SignatureAlgorithm::EcdsaP256, public_key)
    }

    fn is_well_formed(&self) -> bool {
        let key = &self.public_key;
        let prefix_ok = match self.algorithm {
            SignatureAlgorithm::Ed25519 => true,
            SignatureAlgorithm::EcdsaP256 => key.starts_with("04"),
        };
        prefix_ok
            && key.len() == self.algorithm.public_key_hex_len()
            && key.chars().all(|c| c.is_ascii_hexdigit())
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum TrustedKeyRepr {
    Bare(String),
    Tagged {
        #[serde(default)]
        algorithm: SignatureAlgorithm,
        public_key: String,
    },
}

impl From<TrustedKeyRepr> for TrustedKey {
    fn from(repr: TrustedKeyRepr) -> Self {
        match repr {
            TrustedKeyRepr::Bare(public_key) => Self::ed25519(public_key),
            TrustedKeyRepr::Tagged {
                algorithm,
                public_key,
            } => Self::new(algorithm, public_key),
        }
    }
}

impl From<TrustedKey> for TrustedKeyRepr {
    fn from(key: TrustedKey) -> Self {
        match key.algorithm {
            SignatureAlgorithm::Ed25519 => Self::Bare(key.public_key),
            algorithm => Self::Tagged {
                algorithm,
                public_key: key.public_key,
            },
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            trusted_keys: BTreeMap::new(),
            require_signatures: default_require_signatures(),
        }
    }
}

fn default_database_name() -> String {
    "hotload.db".to_string()
}

fn default_max_size_bytes() -> u64 {
    DEFAULT_CACHE_MAX_BYTES
}

fn default_timeout() -> u64 {
    300
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_user_agent() -> String {
    format!("hotload/{}", env!("CARGO_PKG_VERSION"))
}

fn default_concurrent_downloads() -> usize {
    DEFAULT_CONCURRENT_DOWNLOADS
}

fn default_require_signatures() -> bool {
    true
}

impl Config {
    /// Get the default config file path
    ///
    /// # Errors
    ///
    /// Returns an error if the system config directory cannot be determined.
    pub fn default_path() -> Result<PathBuf, Error> {
        let config_dir = dirs::config_dir().ok_or_else(|| ConfigError::NotFound {
            path: "config directory".to_string(),
        })?;
        Ok(config_dir.join("hotload").join("config.toml"))
    }

    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid TOML.
    pub async fn load_from_file(path: &Path) -> Result<Self, Error> {
        let contents = fs::read_to_string(path)
            .await
            .map_err(|_| ConfigError::NotFound {
                path: path.display().to_string(),
            })?;

        toml::from_str(&contents)
            .map_err(|e| ConfigError::ParseError {
                message: e.to_string(),
            })
            .map_err(Into::into)
    }

    /// Load from `path` if given, else from the default path if it exists,
    /// else defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be read or parsed.
    pub async fn load_or_default(path: Option<&Path>) -> Result<Self, Error> {
        if let Some(path) = path {
            return Self::load_from_file(path).await;
        }
        let config_path = Self::default_path()?;
        if config_path.exists() {
            Self::load_from_file(&config_path).await
        } else {
            tracing::debug!(path = %config_path.display(), "no config file, using defaults");
            Ok(Self::default())
        }
    }

    /// Serialize to TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, Error> {
        toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError {
                error: e.to_string(),
            })
            .map_err(Into::into)
    }

    /// Merge with environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if an environment variable holds a value that cannot
    /// be parsed into the expected type.
    pub fn merge_env(&mut self) -> Result<(), Error> {
        if let Ok(dir) = std::env::var("HOTLOAD_CACHE_DIR") {
            self.cache.directory = Some(PathBuf::from(dir));
        }

        if let Ok(bytes) = std::env::var("HOTLOAD_CACHE_MAX_BYTES") {
            self.cache.max_size_bytes = parse_env("HOTLOAD_CACHE_MAX_BYTES", &bytes)?;
        }

        if let Ok(downloads) = std::env::var("HOTLOAD_CONCURRENT_DOWNLOADS") {
            self.loader.concurrent_downloads = parse_env("HOTLOAD_CONCURRENT_DOWNLOADS", &downloads)?;
        }

        if let Ok(timeout) = std::env::var("HOTLOAD_TIMEOUT_SECS") {
            self.network.timeout_secs = parse_env("HOTLOAD_TIMEOUT_SECS", &timeout)?;
        }

        Ok(())
    }

    /// Reject settings the loader cannot run with.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first invalid field.
    pub fn validate(&self) -> Result<(), Error> {
        if self.loader.concurrent_downloads == 0 {
            return Err(invalid("loader.concurrent_downloads", "0"));
        }
        if !Path::new(&self.cache.database_name)
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("db"))
        {
            return Err(invalid("cache.database_name", &self.cache.database_name));
        }
        if self.security.require_signatures && self.security.trusted_keys.is_empty() {
            return Err(ConfigError::Invalid {
                message: "security.require_signatures is set but no trusted_keys are configured"
                    .to_string(),
            }
            .into());
        }
        for (name, key) in &self.security.trusted_keys {
            if !key.is_well_formed() {
                return Err(invalid(
                    &format!("security.trusted_keys.{name}"),
                    &format!("{} key {}", key.algorithm, key.public_key),
                ));
            }
        }
        Ok(())
    }

    /// Cache directory, defaulting to the platform cache dir.
    ///
    /// # Errors
    ///
    /// Returns an error if no directory is configured and the platform has
    /// no cache directory.
    pub fn cache_dir(&self) -> Result<PathBuf, Error> {
        if let Some(dir) = &self.cache.directory {
            return Ok(dir.clone());
        }
        dirs::cache_dir()
            .map(|dir| dir.join("hotload"))
            .ok_or_else(|| {
                ConfigError::NotFound {
                    path: "cache directory".to_string(),
                }
                .into()
            })
    }
}

fn parse_env<T: std::str::FromStr>(field: &str, value: &str) -> Result<T, Error> {
    value.parse().map_err(|_| invalid(field, value))
}

fn invalid(field: &str, value: &str) -> Error {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
    }
    .into()
}
