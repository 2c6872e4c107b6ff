use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrustStoreError {
    #[error("Certificate parse error: {0}")]
    ParseError(String),

    #[error("Failed to read {}: {source}", path.display())]
    LoadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Revocation list retrieval failed for {url}: {reason}")]
    RetrievalError { url: String, reason: String },

    #[error("Revocation list retrieval timed out after {timeout_secs}s: {url}")]
    Timeout { url: String, timeout_secs: u64 },

    #[error("Authority {0} has no revocation list URL")]
    MissingRevocationUrl(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

impl TrustStoreError {
    /// True for the failures a caller should retry later (network and timeouts).
    pub fn is_retrieval(&self) -> bool {
        matches!(
            self,
            Self::RetrievalError { .. } | Self::Timeout { .. } | Self::MissingRevocationUrl(_)
        )
    }
}

impl From<sqlx::Error> for TrustStoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::StorageError(err.to_string())
    }
}

impl From<config::ConfigError> for TrustStoreError {
    fn from(err: config::ConfigError) -> Self {
        Self::ConfigError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TrustStoreError>;
