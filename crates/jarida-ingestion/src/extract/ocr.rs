//! Primary OCR provider client (Mistral OCR).
//!
//! Two-step protocol: upload the file, then call /v1/ocr with the returned
//! file id and aggregate the per-page markdown. Transient failures (rate
//! limit, 5xx, timeouts) are retried with backoff; 4xx responses abort the
//! attempt so the chain can fall through to the next stage.

use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use tracing::{debug, instrument};

use jarida_common::config::ProviderEndpoint;
use jarida_common::http::CappedClient;
use jarida_common::retry::{with_retry, RetryPolicy};
use jarida_common::{JaridaError, Result};

pub struct OcrClient {
    http:     CappedClient,
    base_url: String,
    model:    String,
    api_key:  SecretString,
    retry:    RetryPolicy,
}

impl OcrClient {
    pub fn new(endpoint: &ProviderEndpoint) -> Result<Self> {
        let key = std::env::var(&endpoint.api_key_env).map_err(|_| {
            JaridaError::Config(format!("{} not set", endpoint.api_key_env))
        })?;
        let host = host_of(&endpoint.base_url)?;
        Ok(Self {
            http:     CappedClient::new([host], Duration::from_secs(120))?,
            base_url: endpoint.base_url.trim_end_matches('/').to_string(),
            model:    endpoint.model.clone(),
            api_key:  SecretString::from(key),
            retry:    RetryPolicy::default(),
        })
    }

    /// OCR a file and return the aggregated markdown text.
    #[instrument(skip(self, bytes), fields(file_name, n_bytes = bytes.len()))]
    pub async fn recognize(&self, bytes: &[u8], file_name: &str, mime: &str) -> Result<String> {
        with_retry(&self.retry, "ocr", || async move {
            let file_id = self.upload(bytes, file_name, mime).await?;
            self.run_ocr(&file_id).await
        })
        .await
    }

    async fn upload(&self, bytes: &[u8], file_name: &str, mime: &str) -> Result<String> {
        let part = Part::bytes(bytes.to_vec())
            .file_name(file_name.to_string())
            .mime_str(mime)?;
        let form = Form::new().text("purpose", "ocr").part("file", part);

        let resp = self
            .http
            .post(&format!("{}/v1/files", self.base_url))?
            .bearer_auth(self.api_key.expose_secret())
            .multipart(form)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(classify_status(status, &resp.text().await.unwrap_or_default()));
        }

        let body: serde_json::Value = resp.json().await?;
        body["id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| JaridaError::ProviderRejected("file upload returned no id".to_string()))
    }

    async fn run_ocr(&self, file_id: &str) -> Result<String> {
        let payload = serde_json::json!({
            "model": self.model,
            "document": { "file_id": file_id },
        });

        let resp = self
            .http
            .post(&format!("{}/v1/ocr", self.base_url))?
            .bearer_auth(self.api_key.expose_secret())
            .json(&payload)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(classify_status(status, &resp.text().await.unwrap_or_default()));
        }

        let body: serde_json::Value = resp.json().await?;
        let pages = body["pages"].as_array().cloned().unwrap_or_default();
        let text = pages
            .iter()
            .filter_map(|p| p["markdown"].as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
            .trim()
            .to_string();

        if text.is_empty() {
            return Err(JaridaError::ProviderRejected("OCR returned no markdown text".to_string()));
        }

        debug!(n_pages = pages.len(), chars = text.chars().count(), "OCR complete");
        Ok(text)
    }
}

/// Rate limits and server faults are retryable; everything else 4xx means
/// the request itself is bad and must not be repeated.
pub fn classify_status(status: StatusCode, body: &str) -> JaridaError {
    let snippet: String = body.chars().take(200).collect();
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        JaridaError::TransientProvider(format!("HTTP {status}: {snippet}"))
    } else {
        JaridaError::ProviderRejected(format!("HTTP {status}: {snippet}"))
    }
}

fn host_of(url: &str) -> Result<String> {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .ok_or_else(|| JaridaError::Config(format!("invalid provider URL: {url}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_is_transient() {
        let e = classify_status(StatusCode::TOO_MANY_REQUESTS, "slow down");
        assert!(e.is_transient());
    }

    #[test]
    fn server_error_is_transient() {
        assert!(classify_status(StatusCode::BAD_GATEWAY, "").is_transient());
    }

    #[test]
    fn auth_failure_is_terminal() {
        let e = classify_status(StatusCode::UNAUTHORIZED, "bad key");
        assert!(!e.is_transient());
        assert!(matches!(e, JaridaError::ProviderRejected(_)));
    }
}
