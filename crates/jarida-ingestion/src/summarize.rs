//! Optional bilingual summaries for stored tenders.
//!
//! Enabled only when a summarizer endpoint is configured. A failed summary
//! leaves the record without one; it never fails the item.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use tracing::{instrument, warn};

use jarida_common::config::ProviderEndpoint;
use jarida_common::http::CappedClient;
use jarida_common::{JaridaError, Result};

use crate::extract::ocr::classify_status;

const ANTHROPIC_VERSION: &str = "2023-06-01";

const SUMMARY_PROMPT: &str = "\
لخص إعلان المناقصة التالي في جملتين بالعربية ثم جملتين بالإنجليزية. \
أعد JSON فقط: {\"arabic\": \"...\", \"english\": \"...\"}";

#[derive(Debug, Clone, Default)]
pub struct Summaries {
    pub english: Option<String>,
    pub arabic:  Option<String>,
}

#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, body: &str) -> Summaries;
}

pub struct ClaudeSummarizer {
    http:     CappedClient,
    base_url: String,
    model:    String,
    api_key:  SecretString,
}

impl ClaudeSummarizer {
    pub fn new(endpoint: &ProviderEndpoint) -> Result<Self> {
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
            http:     CappedClient::new([host], Duration::from_secs(120))?,
            base_url: endpoint.base_url.trim_end_matches('/').to_string(),
            model:    endpoint.model.clone(),
            api_key:  SecretString::from(key),
        })
    }

    async fn request(&self, body: &str) -> Result<Summaries> {
        let payload = serde_json::json!({
            "model": self.model,
            "max_tokens": 1024,
            "messages": [{
                "role": "user",
                "content": format!("{SUMMARY_PROMPT}\n\n{body}"),
            }],
        });

        let resp = self
            .http
            .post(&format!("{}/v1/messages", self.base_url))?
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&payload)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(classify_status(status, &resp.text().await.unwrap_or_default()));
        }

        let reply: serde_json::Value = resp.json().await?;
        let text = reply["content"][0]["text"].as_str().unwrap_or_default();
        Ok(parse_summaries(text))
    }
}

fn parse_summaries(reply: &str) -> Summaries {
    let json = reply
        .find('{')
        .and_then(|start| reply.rfind('}').map(|end| &reply[start..=end]))
        .and_then(|s| serde_json::from_str::<serde_json::Value>(s).ok());

    match json {
        Some(v) => Summaries {
            english: v["english"].as_str().map(str::to_string),
            arabic:  v["arabic"].as_str().map(str::to_string),
        },
        None => Summaries::default(),
    }
}

#[async_trait]
impl Summarizer for ClaudeSummarizer {
    #[instrument(skip(self, body), fields(chars = body.chars().count()))]
    async fn summarize(&self, body: &str) -> Summaries {
        match self.request(body).await {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "Summary failed, record stored without one");
                Summaries::default()
            }
        }
    }
}
