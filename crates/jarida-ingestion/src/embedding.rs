//! Text embeddings for semantic search over stored tenders.
//!
//! Embedding failure never blocks ingestion: a record with a zero vector is
//! still searchable by its other columns, so failures are logged and a zero
//! vector of the configured dimension is stored instead.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use tracing::{instrument, warn};

use jarida_common::config::EmbeddingEndpoint;
use jarida_common::http::CappedClient;
use jarida_common::retry::{with_retry, RetryPolicy};
use jarida_common::{JaridaError, Result};

use crate::extract::ocr::classify_status;

/// Documents and queries are embedded asymmetrically by the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedMode {
    Document,
    Query,
}

impl EmbedMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbedMode::Document => "document",
            EmbedMode::Query => "query",
        }
    }
}

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn dim(&self) -> usize;
    fn model(&self) -> &str;

    /// Embed `text`. Infallible by contract; implementations return a zero
    /// vector when the backing service is unavailable.
    async fn embed(&self, text: &str, mode: EmbedMode) -> Vec<f32>;
}

pub struct VoyageClient {
    http:     CappedClient,
    base_url: String,
    model:    String,
    api_key:  SecretString,
    dim:      usize,
    retry:    RetryPolicy,
}

impl VoyageClient {
    pub fn new(endpoint: &EmbeddingEndpoint) -> Result<Self> {
        let key = std::env::var(&endpoint.api_key_env).map_err(|_| {
            JaridaError::Config(format!("{} not set", endpoint.api_key_env))
        })?;
        let host = reqwest::Url::parse(&endpoint.base_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .ok_or_else(|| {
                JaridaError::Config(format!("invalid provider URL: {}", endpoint.base_url))
            })?;
        Ok(Self {
            http:     CappedClient::new([host], Duration::from_secs(60))?,
            base_url: endpoint.base_url.trim_end_matches('/').to_string(),
            model:    endpoint.model.clone(),
            api_key:  SecretString::from(key),
            dim:      endpoint.dim,
            retry:    RetryPolicy::default(),
        })
    }

    async fn request(&self, text: &str, mode: EmbedMode) -> Result<Vec<f32>> {
        let payload = serde_json::json!({
            "input": [text],
            "model": self.model,
            "input_type": mode.as_str(),
            "truncation": true,
        });

        let resp = self
            .http
            .post(&format!("{}/v1/embeddings", self.base_url))?
            .bearer_auth(self.api_key.expose_secret())
            .json(&payload)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(classify_status(status, &resp.text().await.unwrap_or_default()));
        }

        let body: serde_json::Value = resp.json().await?;
        let vector: Vec<f32> = body["data"][0]["embedding"]
            .as_array()
            .map(|xs| xs.iter().filter_map(|x| x.as_f64()).map(|x| x as f32).collect())
            .unwrap_or_default();

        if vector.len() != self.dim {
            return Err(JaridaError::ProviderRejected(format!(
                "embedding has {} dimensions, expected {}",
                vector.len(),
                self.dim
            )));
        }
        Ok(vector)
    }
}

#[async_trait]
impl EmbeddingProvider for VoyageClient {
    fn dim(&self) -> usize {
        self.dim
    }

    fn model(&self) -> &str {
        &self.model
    }

    #[instrument(skip(self, text), fields(chars = text.chars().count(), mode = mode.as_str()))]
    async fn embed(&self, text: &str, mode: EmbedMode) -> Vec<f32> {
        match with_retry(&self.retry, "embedding", || self.request(text, mode)).await {
            Ok(vector) => vector,
            Err(e) => {
                warn!(error = %e, "Embedding failed, storing zero vector");
                vec![0.0; self.dim]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modes_map_to_api_values() {
        assert_eq!(EmbedMode::Document.as_str(), "document");
        assert_eq!(EmbedMode::Query.as_str(), "query");
    }
}
