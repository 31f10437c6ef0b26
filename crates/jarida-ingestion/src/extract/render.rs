//! Stage one: headless-browser capture of the flip-viewer page.
//!
//! The portal's announcement pages are rendered client-side inside a
//! flip-book viewer, so there is no HTML to scrape. A headless Chromium
//! instance loads the page, the viewport is screenshotted, and the capture
//! goes through the primary OCR service.

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::page::{
    CaptureScreenshotFormat, CaptureScreenshotParams,
};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{instrument, warn};

use jarida_common::{JaridaError, Result};

use crate::extract::ocr::OcrClient;
use crate::extract::ExtractionProvider;
use crate::models::{ExtractionResult, ExtractionStage, Listing};
use crate::persist::ItemBuffers;

/// Seam over the browser so tests can substitute a canned capture.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    /// Load `url` and return a PNG screenshot of the settled page.
    async fn capture(&self, url: &str) -> Result<Vec<u8>>;
}

pub struct ChromiumRenderer {
    browser:     Browser,
    settle_wait: Duration,
}

impl ChromiumRenderer {
    /// Launch a headless browser and start pumping its event handler.
    pub async fn launch() -> Result<Self> {
        let config = BrowserConfig::builder()
            .build()
            .map_err(|e| JaridaError::Config(format!("browser config: {e}")))?;
        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| JaridaError::Other(anyhow::anyhow!("browser launch: {e}")))?;

        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    warn!(error = %e, "Browser handler error");
                }
            }
        });

        Ok(Self { browser, settle_wait: Duration::from_secs(3) })
    }
}

#[async_trait]
impl PageRenderer for ChromiumRenderer {
    #[instrument(skip(self))]
    async fn capture(&self, url: &str) -> Result<Vec<u8>> {
        let page = self
            .browser
            .new_page(url)
            .await
            .map_err(|e| JaridaError::Other(anyhow::anyhow!("open page: {e}")))?;

        page.wait_for_navigation()
            .await
            .map_err(|e| JaridaError::Other(anyhow::anyhow!("navigation: {e}")))?;
        // The flip viewer animates the page into place after load.
        tokio::time::sleep(self.settle_wait).await;

        let shot = page
            .screenshot(
                CaptureScreenshotParams::builder()
                    .format(CaptureScreenshotFormat::Png)
                    .build(),
            )
            .await
            .map_err(|e| JaridaError::Other(anyhow::anyhow!("screenshot: {e}")))?;

        if let Err(e) = page.close().await {
            warn!(error = %e, "Failed to close page");
        }
        Ok(shot)
    }
}

/// The chain's first provider: render, screenshot, OCR.
pub struct RenderCapture {
    renderer: Arc<dyn PageRenderer>,
    ocr:      Arc<OcrClient>,
    base_url: String,
}

impl RenderCapture {
    pub fn new(renderer: Arc<dyn PageRenderer>, ocr: Arc<OcrClient>, base_url: &str) -> Self {
        Self {
            renderer,
            ocr,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ExtractionProvider for RenderCapture {
    fn stage(&self) -> ExtractionStage {
        ExtractionStage::Render
    }

    async fn extract(
        &self,
        listing: &Listing,
        buffers: &mut ItemBuffers,
    ) -> Result<ExtractionResult> {
        let url = listing.page_url(&self.base_url).ok_or_else(|| {
            JaridaError::Validation(format!(
                "listing {} has no edition/page for the viewer URL",
                listing.external_id
            ))
        })?;

        let png = self.renderer.capture(&url).await?;
        // Keep the capture around so the vision stage can reuse it.
        buffers.store_screenshot(png);

        let bytes = buffers
            .screenshot
            .as_deref()
            .ok_or_else(|| JaridaError::Other(anyhow::anyhow!("screenshot buffer vanished")))?;
        let text = self.ocr.recognize(bytes, "page.png", "image/png").await?;
        Ok(ExtractionResult::text_only(text, ExtractionStage::Render, 0.9))
    }
}
