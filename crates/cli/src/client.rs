//! API client for a running cascade agent

use anyhow::{Context, Result};
use cascade_lib::{HealthResponse, SourceStats, StageCensus};
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use url::Url;

/// HTTP client for the agent API
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    /// Make a GET request, failing on any non-success status
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let (status, body) = self.get_text(path).await?;
        if !status.is_success() {
            anyhow::bail!("API error ({}): {}", status, body);
        }
        serde_json::from_str(&body).context("Failed to parse response")
    }

    /// Make a GET request whose body is meaningful for any status
    ///
    /// The health endpoint answers 503 with a full report.
    pub async fn get_with_status<T: DeserializeOwned>(&self, path: &str) -> Result<(StatusCode, T)> {
        let (status, body) = self.get_text(path).await?;
        let parsed = serde_json::from_str(&body)
            .with_context(|| format!("Failed to parse response ({})", status))?;
        Ok((status, parsed))
    }

    async fn get_text(&self, path: &str) -> Result<(StatusCode, String)> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send request")?;

        let status = response.status();
        let body = response.text().await.context("Failed to read response")?;
        Ok((status, body))
    }

    pub async fn health(&self) -> Result<(StatusCode, HealthResponse)> {
        self.get_with_status("healthz").await
    }

    pub async fn stats(&self) -> Result<PipelineStats> {
        self.get("api/v1/stats").await
    }
}

// API response types

/// Body of the agent's stats endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStats {
    pub instance: String,
    pub source: SourceStats,
    pub stages: Vec<StageCensus>,
}
