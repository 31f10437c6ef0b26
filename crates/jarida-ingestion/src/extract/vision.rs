//! Stage three: vision-model transcription of the page image.
//!
//! Last resort for pages the OCR service cannot read. The page raster is
//! sent to a multimodal model with a transcription prompt that forbids
//! invention and asks for structured fields alongside the body text. The
//! model does not always honor the JSON format, so parsing falls back to
//! treating the whole reply as raw text at low confidence.

use async_trait::async_trait;
use base64::Engine;
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use jarida_common::config::ProviderEndpoint;
use jarida_common::http::CappedClient;
use jarida_common::retry::{with_retry, RetryPolicy};
use jarida_common::{JaridaError, Result};

use crate::extract::ocr::classify_status;
use crate::extract::render::PageRenderer;
use crate::extract::ExtractionProvider;
use crate::models::{ExtractionResult, ExtractionStage, Listing};
use crate::persist::ItemBuffers;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const RAW_FALLBACK_CONFIDENCE: f64 = 0.3;

const TRANSCRIBE_PROMPT: &str = "\
هذه صفحة من الجريدة الرسمية تحتوي على إعلان مناقصة حكومية. \
انسخ النص العربي كما هو تماماً. لا تخترع ولا تلخص ولا تكمل أي نص غير واضح. \
أعد النتيجة بصيغة JSON فقط بالحقول التالية:
{\"ministry\": \"الجهة المعلنة أو null\", \
\"tender_number\": \"رقم المناقصة أو null\", \
\"deadline\": \"آخر موعد للتقديم كما ورد أو null\", \
\"meeting_date_text\": \"تاريخ الاجتماع التمهيدي كما ورد أو null\", \
\"meeting_location\": \"مكان الاجتماع أو null\", \
\"body\": \"النص الكامل للإعلان\", \
\"ocr_confidence\": 0.0, \
\"note\": \"أي ملاحظة عن وضوح الصفحة أو null\"}";

pub struct VisionClient {
    http:       CappedClient,
    base_url:   String,
    model:      String,
    api_key:    SecretString,
    max_tokens: u32,
    retry:      RetryPolicy,
}

impl VisionClient {
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
            http:       CappedClient::new([host], Duration::from_secs(180))?,
            base_url:   endpoint.base_url.trim_end_matches('/').to_string(),
            model:      endpoint.model.clone(),
            api_key:    SecretString::from(key),
            max_tokens: 8192,
            retry:      RetryPolicy::default(),
        })
    }

    /// Transcribe a PNG page image.
    #[instrument(skip(self, png), fields(n_bytes = png.len()))]
    pub async fn transcribe(&self, png: &[u8]) -> Result<ExtractionResult> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(png);
        let encoded = encoded.as_str();
        let reply = with_retry(&self.retry, "vision", || self.request(encoded)).await?;
        Ok(parse_reply(&reply))
    }

    async fn request(&self, encoded_png: &str) -> Result<String> {
        let payload = serde_json::json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "messages": [{
                "role": "user",
                "content": [
                    {
                        "type": "image",
                        "source": {
                            "type": "base64",
                            "media_type": "image/png",
                            "data": encoded_png,
                        },
                    },
                    { "type": "text", "text": TRANSCRIBE_PROMPT },
                ],
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

        let body: serde_json::Value = resp.json().await?;
        let text = body["content"]
            .as_array()
            .and_then(|blocks| {
                blocks
                    .iter()
                    .find_map(|b| (b["type"] == "text").then(|| b["text"].as_str()).flatten())
            })
            .map(str::to_string)
            .ok_or_else(|| {
                JaridaError::ProviderRejected("vision reply had no text block".to_string())
            })?;
        Ok(text)
    }
}

/// Pull the JSON object out of the reply. Models wrap JSON in prose or
/// code fences often enough that we scan for the outermost braces instead
/// of parsing the reply whole.
pub fn parse_reply(reply: &str) -> ExtractionResult {
    let json = reply
        .find('{')
        .and_then(|start| reply.rfind('}').map(|end| &reply[start..=end]))
        .and_then(|s| serde_json::from_str::<serde_json::Value>(s).ok());

    let Some(v) = json else {
        warn!("Vision reply was not JSON, keeping raw text at low confidence");
        return ExtractionResult::text_only(
            reply.trim().to_string(),
            ExtractionStage::PageVision,
            RAW_FALLBACK_CONFIDENCE,
        );
    };

    let body = v["body"].as_str().unwrap_or("").trim().to_string();
    let confidence = v["ocr_confidence"].as_f64().unwrap_or(0.5).clamp(0.0, 1.0);
    if let Some(note) = v["note"].as_str() {
        debug!(note, "Vision transcription note");
    }

    ExtractionResult {
        text: body,
        stage: ExtractionStage::PageVision,
        confidence,
        ministry: opt_str(&v, "ministry"),
        tender_no: opt_str(&v, "tender_number"),
        deadline_text: opt_str(&v, "deadline"),
        meeting_date_text: opt_str(&v, "meeting_date_text"),
        meeting_location: opt_str(&v, "meeting_location"),
    }
}

fn opt_str(v: &serde_json::Value, key: &str) -> Option<String> {
    v[key]
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty() && *s != "null")
        .map(str::to_string)
}

/// The chain's final provider. Reuses the stage-one screenshot when one
/// was captured, otherwise renders the page itself.
pub struct PageVision {
    client:   Arc<VisionClient>,
    renderer: Arc<dyn PageRenderer>,
    base_url: String,
}

impl PageVision {
    pub fn new(client: Arc<VisionClient>, renderer: Arc<dyn PageRenderer>, base_url: &str) -> Self {
        Self {
            client,
            renderer,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ExtractionProvider for PageVision {
    fn stage(&self) -> ExtractionStage {
        ExtractionStage::PageVision
    }

    async fn extract(
        &self,
        listing: &Listing,
        buffers: &mut ItemBuffers,
    ) -> Result<ExtractionResult> {
        if buffers.screenshot.is_none() {
            let url = listing.page_url(&self.base_url).ok_or_else(|| {
                JaridaError::Validation(format!(
                    "listing {} has no edition/page for the viewer URL",
                    listing.external_id
                ))
            })?;
            let png = self.renderer.capture(&url).await?;
            buffers.store_screenshot(png);
        }

        let png = buffers
            .screenshot
            .as_deref()
            .ok_or_else(|| JaridaError::Other(anyhow::anyhow!("screenshot buffer vanished")))?;
        self.client.transcribe(png).await
    }
}
