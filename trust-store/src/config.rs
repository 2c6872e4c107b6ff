use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, TrustStoreError};
use crate::evaluator::DEFAULT_MAX_CHAIN_DEPTH;

/// Environment variable prefix, e.g. `TRUST_STORE__MAX_CHAIN_DEPTH=8`.
pub const ENV_PREFIX: &str = "TRUST_STORE";
const ENV_SEPARATOR: &str = "__";

/// Trust store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustStoreConfig {
    /// Directory of PEM bundles loaded at startup
    #[serde(default)]
    pub ca_directory: Option<PathBuf>,

    /// Key ids of the configured trust anchors
    #[serde(default)]
    pub trusted_roots: Vec<String>,

    /// Longest signer chain walked before giving up (default: 10)
    #[serde(default = "default_max_chain_depth")]
    pub max_chain_depth: usize,

    #[serde(default)]
    pub revocation: RevocationConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Revocation list retrieval settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevocationConfig {
    /// Per-fetch timeout in seconds (default: 30)
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// Logging output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

fn default_max_chain_depth() -> usize {
    DEFAULT_MAX_CHAIN_DEPTH
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

fn default_user_agent() -> String {
    format!("trust-store/{}", env!("CARGO_PKG_VERSION"))
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TrustStoreConfig {
    fn default() -> Self {
        Self {
            ca_directory: None,
            trusted_roots: Vec::new(),
            max_chain_depth: default_max_chain_depth(),
            revocation: RevocationConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for RevocationConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: default_fetch_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl RevocationConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

impl TrustStoreConfig {
    /// Load from an optional file (TOML, YAML or JSON by extension) and the
    /// `TRUST_STORE__*` environment, then validate.
    ///
    /// # Errors
    /// Returns a configuration error when the file is missing or malformed,
    /// or when a value fails validation.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_from(path, None)
    }

    /// Same as [`TrustStoreConfig::load`] with an explicit environment map
    /// instead of the process environment.
    pub fn load_from(
        path: Option<&Path>,
        env: Option<config::Map<String, String>>,
    ) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator(ENV_SEPARATOR)
                .separator(ENV_SEPARATOR)
                .list_separator(",")
                .with_list_parse_key("trusted_roots")
                .try_parsing(true)
                .source(env),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    /// Returns a configuration error for values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_chain_depth == 0 {
            return Err(TrustStoreError::ConfigError(
                "max_chain_depth must be at least 1".to_string(),
            ));
        }
        if self.revocation.fetch_timeout_secs == 0 {
            return Err(TrustStoreError::ConfigError(
                "revocation.fetch_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.trusted_roots.iter().any(|root| root.trim().is_empty()) {
            return Err(TrustStoreError::ConfigError(
                "trusted_roots must not contain empty key ids".to_string(),
            ));
        }
        Ok(())
    }
}
