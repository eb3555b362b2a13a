// News Seam - External hotspot collaborator
// Fetches a scan-and-summarize digest for downstream display

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::core::config::AnalysisConfig;
use crate::core::types::NewsDigest;

#[derive(Debug, Error)]
pub enum NewsError {
    #[error("news source unreachable: {0}")]
    Transport(String),
    #[error("news response malformed: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait NewsScout: Send + Sync {
    async fn fetch_hotspots(&self) -> Result<NewsDigest, NewsError>;
}

/// HTTP client for the news collaborator. The endpoint takes no input
/// beyond the request itself and returns a summary plus headline items.
pub struct HttpNewsScout {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpNewsScout {
    pub fn new(config: &AnalysisConfig) -> Result<Self, NewsError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| NewsError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: config.news_endpoint.clone(),
        })
    }
}

#[async_trait]
impl NewsScout for HttpNewsScout {
    async fn fetch_hotspots(&self) -> Result<NewsDigest, NewsError> {
        let response = self
            .client
            .get(&self.endpoint)
            .send()
            .await
            .map_err(|e| NewsError::Transport(e.to_string()))?
            .error_for_status()
            .map_err(|e| NewsError::Transport(e.to_string()))?;

        response
            .json::<NewsDigest>()
            .await
            .map_err(|e| NewsError::Malformed(e.to_string()))
    }
}
