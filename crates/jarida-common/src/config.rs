//! Configuration loading for Jarida.
//! Reads jarida.toml from the current directory or the path in the
//! JARIDA_CONFIG env var. Credentials come from the environment and are
//! wrapped in SecretString so they never end up in logs.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::JaridaError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub portal: PortalConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub extraction: ExtractionPolicy,
    #[serde(default)]
    pub quality: QualityPolicy,
    #[serde(default)]
    pub deadline: DeadlinePolicy,
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub queue: QueueConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortalConfig {
    pub base_url: String,
    pub username: String,
    /// Looked up from the environment at load time, not stored in the file.
    #[serde(skip, default = "empty_secret")]
    pub password: SecretString,
    /// Category ids to ingest, in order (1 = tenders, 2 = auctions, 18 = practices).
    #[serde(default = "default_categories")]
    pub categories: Vec<String>,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Hard cap on listings fetched per category, regardless of recordsTotal.
    #[serde(default = "default_hard_cap")]
    pub max_listings: usize,
    #[serde(default = "default_days_back")]
    pub days_back: i64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn empty_secret() -> SecretString { SecretString::from(String::new()) }
fn default_categories() -> Vec<String> { vec!["1".to_string()] }
fn default_page_size() -> usize { 50 }
fn default_hard_cap() -> usize { 500 }
fn default_days_back() -> i64 { 90 }
fn default_timeout_secs() -> u64 { 60 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 { 10 }

/// Empirically tuned thresholds for the extraction fallback chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionPolicy {
    /// Stage-1 output below this is treated as unusable.
    #[serde(default = "default_min_stage1_chars")]
    pub min_stage1_chars: usize,
    /// Stage-2/3 output at or above this is accepted outright.
    #[serde(default = "default_accept_chars")]
    pub accept_chars: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Maximum edition PDF size fetched for stage 2, in bytes.
    #[serde(default = "default_max_pdf_bytes")]
    pub max_pdf_bytes: usize,
}

fn default_min_stage1_chars() -> usize { 20 }
fn default_accept_chars() -> usize { 50 }
fn default_max_attempts() -> u32 { 3 }
fn default_max_pdf_bytes() -> usize { 50 * 1024 * 1024 }

impl Default for ExtractionPolicy {
    fn default() -> Self {
        Self {
            min_stage1_chars: default_min_stage1_chars(),
            accept_chars: default_accept_chars(),
            max_attempts: default_max_attempts(),
            max_pdf_bytes: default_max_pdf_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityPolicy {
    /// Real tender announcements are rarely under this many characters.
    #[serde(default = "default_min_body_chars")]
    pub min_body_chars: usize,
    /// Below this Arabic-character ratio the text is flagged as mis-OCR.
    #[serde(default = "default_min_arabic_ratio")]
    pub min_arabic_ratio: f64,
    #[serde(default = "default_min_accept_score")]
    pub min_accept_score: f64,
}

fn default_min_body_chars() -> usize { 500 }
fn default_min_arabic_ratio() -> f64 { 0.3 }
fn default_min_accept_score() -> f64 { 0.5 }

impl Default for QualityPolicy {
    fn default() -> Self {
        Self {
            min_body_chars: default_min_body_chars(),
            min_arabic_ratio: default_min_arabic_ratio(),
            min_accept_score: default_min_accept_score(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadlinePolicy {
    /// Corrections below this confidence are surfaced, not applied.
    #[serde(default = "default_auto_apply")]
    pub auto_apply_confidence: f64,
    /// Deadlines further out than this are flagged invalid.
    #[serde(default = "default_max_future_days")]
    pub max_future_days: i64,
}

fn default_auto_apply() -> f64 { 0.80 }
fn default_max_future_days() -> i64 { 730 }

impl Default for DeadlinePolicy {
    fn default() -> Self {
        Self {
            auto_apply_confidence: default_auto_apply(),
            max_future_days: default_max_future_days(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    pub ocr: ProviderEndpoint,
    pub vision: ProviderEndpoint,
    pub embedding: EmbeddingEndpoint,
    pub summarizer: Option<ProviderEndpoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEndpoint {
    pub base_url: String,
    pub model: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingEndpoint {
    pub base_url: String,
    pub model: String,
    pub api_key_env: String,
    #[serde(default = "default_embedding_dim")]
    pub dim: usize,
}

fn default_embedding_dim() -> usize { 1024 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_min_spacing_ms")]
    pub min_spacing_ms: u64,
    #[serde(default = "default_job_attempts")]
    pub max_attempts: u32,
    /// Completed jobs are kept this long for status lookup, then expired.
    #[serde(default = "default_retention_hours")]
    pub retention_hours: i64,
    #[serde(default = "default_workers")]
    pub workers: usize,
}

fn default_max_concurrent() -> usize { 20 }
fn default_min_spacing_ms() -> u64 { 100 }
fn default_job_attempts() -> u32 { 3 }
fn default_retention_hours() -> i64 { 24 }
fn default_workers() -> usize { 4 }

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            min_spacing_ms: default_min_spacing_ms(),
            max_attempts: default_job_attempts(),
            retention_hours: default_retention_hours(),
            workers: default_workers(),
        }
    }
}

impl Config {
    /// Load from jarida.toml (or JARIDA_CONFIG), then pull credentials from
    /// the environment. Missing portal credentials are a whole-run
    /// precondition failure, reported before any work starts.
    pub fn load() -> Result<Self, JaridaError> {
        dotenvy::dotenv().ok();
        let path = std::env::var("JARIDA_CONFIG").unwrap_or_else(|_| "jarida.toml".to_string());
        Self::load_from(Path::new(&path))
    }

    pub fn load_from(path: &Path) -> Result<Self, JaridaError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| JaridaError::Config(format!("cannot read {}: {e}", path.display())))?;
        let mut cfg: Config = toml::from_str(&raw)
            .map_err(|e| JaridaError::Config(format!("invalid config: {e}")))?;

        let password = std::env::var("JARIDA_PORTAL_PASSWORD")
            .map_err(|_| JaridaError::Config("JARIDA_PORTAL_PASSWORD not set".to_string()))?;
        if password.is_empty() {
            return Err(JaridaError::Config("JARIDA_PORTAL_PASSWORD is empty".to_string()));
        }
        cfg.portal.password = SecretString::from(password);
        Ok(cfg)
    }
}
