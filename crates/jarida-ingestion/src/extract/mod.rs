//! Document extraction fallback chain.
//!
//! Strategy order is fixed: rendered-page capture OCR, then the target page
//! split out of the cached edition PDF, then a high-resolution raster sent
//! to the vision service. Each strategy is tried until one returns text
//! meeting its threshold; a listing where every strategy fails is recorded
//! as extraction-failed and never persisted as an empty shell.

pub mod edition;
pub mod ocr;
pub mod render;
pub mod vision;

use async_trait::async_trait;
use tracing::{debug, warn};

use jarida_common::config::ExtractionPolicy;
use jarida_common::{JaridaError, Result};

use crate::models::{ExtractionResult, ExtractionStage, Listing};
use crate::persist::ItemBuffers;

/// One strategy in the chain. Implementations stash any large blobs they
/// produce in the per-item buffers so the persister can release them.
#[async_trait]
pub trait ExtractionProvider: Send + Sync {
    fn stage(&self) -> ExtractionStage;

    async fn extract(
        &self,
        listing: &Listing,
        buffers: &mut ItemBuffers,
    ) -> Result<ExtractionResult>;

    /// Drop any per-category state (edition caches). Called at category
    /// boundaries.
    async fn reset(&self) {}
}

pub struct ExtractionChain {
    providers: Vec<Box<dyn ExtractionProvider>>,
    policy:    ExtractionPolicy,
}

impl ExtractionChain {
    pub fn new(policy: ExtractionPolicy) -> Self {
        Self { providers: Vec::new(), policy }
    }

    pub fn push(&mut self, provider: Box<dyn ExtractionProvider>) {
        self.providers.push(provider);
    }

    /// Minimum usable text length for a stage's output. The first stage is
    /// a cheap capture and only has to be non-trivial; later stages must
    /// produce enough to stand on their own.
    fn threshold(&self, stage: ExtractionStage) -> usize {
        match stage {
            ExtractionStage::Render => self.policy.min_stage1_chars,
            _ => self.policy.accept_chars,
        }
    }

    /// Run strategies in order, returning the first acceptable result.
    pub async fn extract(
        &self,
        listing: &Listing,
        buffers: &mut ItemBuffers,
    ) -> Result<ExtractionResult> {
        let mut last_failure: Option<String> = None;

        for provider in &self.providers {
            let stage = provider.stage();
            match provider.extract(listing, buffers).await {
                Ok(result) => {
                    let len = result.text.trim().chars().count();
                    if len >= self.threshold(stage) {
                        debug!(
                            external_id = %listing.external_id,
                            stage = stage.as_str(),
                            chars = len,
                            "Extraction accepted"
                        );
                        return Ok(result);
                    }
                    warn!(
                        external_id = %listing.external_id,
                        stage = stage.as_str(),
                        chars = len,
                        "Extraction output below threshold, falling through"
                    );
                    last_failure = Some(format!("{}: {len} chars", stage.as_str()));
                }
                Err(e) => {
                    warn!(
                        external_id = %listing.external_id,
                        stage = stage.as_str(),
                        error = %e,
                        "Extraction stage failed, falling through"
                    );
                    last_failure = Some(format!("{}: {e}", stage.as_str()));
                }
            }
        }

        Err(JaridaError::Quality(format!(
            "all extraction stages failed for {} (last: {})",
            listing.external_id,
            last_failure.unwrap_or_else(|| "no stages configured".to_string()),
        )))
    }

    /// Clear per-category caches in every provider.
    pub async fn reset(&self) {
        for provider in &self.providers {
            provider.reset().await;
        }
    }
}
