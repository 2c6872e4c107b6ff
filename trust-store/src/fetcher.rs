use async_trait::async_trait;
use tracing::debug;

use crate::config::RevocationConfig;
use crate::error::{Result, TrustStoreError};
use crate::models::RevocationList;
use crate::x509;

/// Retrieves and parses a revocation list from its published location.
#[async_trait]
pub trait RevocationListFetcher: Send + Sync {
    /// # Errors
    /// Returns a retrieval error when the list cannot be downloaded or parsed.
    async fn fetch(&self, url: &str) -> Result<RevocationList>;
}

/// HTTP(S) fetcher backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpRevocationListFetcher {
    client: reqwest::Client,
}

impl HttpRevocationListFetcher {
    /// # Errors
    /// Returns a configuration error if the HTTP client cannot be built.
    pub fn new(config: &RevocationConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.fetch_timeout())
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| TrustStoreError::ConfigError(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RevocationListFetcher for HttpRevocationListFetcher {
    async fn fetch(&self, url: &str) -> Result<RevocationList> {
        let retrieval_error = |reason: String| TrustStoreError::RetrievalError {
            url: url.to_string(),
            reason,
        };

        debug!(url, "Fetching revocation list");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| retrieval_error(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(retrieval_error(format!("HTTP status {status}")));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| retrieval_error(e.to_string()))?;

        x509::parse_revocation_list(&body).map_err(|e| retrieval_error(e.to_string()))
    }
}
