//! Client for the content extraction collaborator
//!
//! The extraction service takes a page URL and returns the readable
//! article. It is consumed once, before sentences are loaded into the
//! player; failures surface immediately and are never retried here.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{Result, RodokuError};

/// Configuration for the extraction collaborator
#[derive(Clone, Debug)]
pub struct ExtractorConfig {
    /// Extraction endpoint, POST `{url}` -> article
    pub endpoint: String,

    /// Per-request timeout
    pub timeout: Duration,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:3020/api/extract".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Serialize)]
struct ExtractRequest<'a> {
    url: &'a str,
}

/// An extracted article
#[derive(Debug, Clone, Deserialize)]
pub struct Article {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub excerpt: Option<String>,
}

/// Error body the extraction service returns on failure
#[derive(Debug, Deserialize)]
struct ExtractError {
    error: String,
}

/// HTTP client for the extraction service
pub struct ExtractorClient {
    http: reqwest::Client,
    config: ExtractorConfig,
}

impl ExtractorClient {
    pub fn new(config: ExtractorConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| RodokuError::ConfigError(format!("http client: {}", e)))?;
        Ok(Self { http, config })
    }

    /// Extract the readable article from the given page URL.
    pub async fn extract(&self, url: &str) -> Result<Article> {
        debug!("extracting {}", url);

        let response = self
            .http
            .post(&self.config.endpoint)
            .json(&ExtractRequest { url })
            .send()
            .await
            .map_err(|e| RodokuError::ExtractionFailed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            // The service explains failures as `{error}`; fall back to the
            // bare status when it does not.
            let reason = match response.json::<ExtractError>().await {
                Ok(body) => body.error,
                Err(_) => format!("extraction returned {}", status),
            };
            return Err(RodokuError::ExtractionFailed(reason));
        }

        let article: Article = response
            .json()
            .await
            .map_err(|e| RodokuError::ExtractionFailed(e.to_string()))?;

        info!(
            "extracted \"{}\" ({} chars)",
            article.title,
            article.content.len()
        );
        Ok(article)
    }
}
