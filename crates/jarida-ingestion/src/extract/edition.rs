//! Stage two: split the target page out of the full edition PDF.
//!
//! The portal serves each gazette edition as a single large PDF. The
//! edition is downloaded once per run and cached, the announcement's page
//! is split into a one-page document with lopdf, and that page goes
//! through the primary OCR service. The cache is keyed by edition id and
//! cleared at category boundaries.

use async_trait::async_trait;
use lopdf::Document;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use jarida_common::http::CappedClient;
use jarida_common::{JaridaError, Result};

use crate::extract::ocr::{classify_status, OcrClient};
use crate::extract::ExtractionProvider;
use crate::models::{ExtractionResult, ExtractionStage, Listing};
use crate::persist::ItemBuffers;

pub struct EditionOcr {
    http:          CappedClient,
    ocr:           Arc<OcrClient>,
    base_url:      String,
    max_pdf_bytes: usize,
    cache:         Mutex<HashMap<i64, Arc<Vec<u8>>>>,
}

impl EditionOcr {
    pub fn new(
        http: CappedClient,
        ocr: Arc<OcrClient>,
        base_url: &str,
        max_pdf_bytes: usize,
    ) -> Self {
        Self {
            http,
            ocr,
            base_url: base_url.trim_end_matches('/').to_string(),
            max_pdf_bytes,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch the edition PDF, serving repeats from the cache.
    #[instrument(skip(self))]
    async fn edition_pdf(&self, edition_id: i64) -> Result<Arc<Vec<u8>>> {
        if let Some(pdf) = self.cache.lock().await.get(&edition_id) {
            return Ok(pdf.clone());
        }

        let url = format!("{}/online/EditionPdf?id={edition_id}", self.base_url);
        let resp = self.http.get(&url)?.send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(classify_status(status, &resp.text().await.unwrap_or_default()));
        }

        let bytes = resp.bytes().await?;
        if bytes.len() > self.max_pdf_bytes {
            return Err(JaridaError::Validation(format!(
                "edition {edition_id} PDF is {} bytes, over the {} byte cap",
                bytes.len(),
                self.max_pdf_bytes
            )));
        }

        debug!(edition_id, n_bytes = bytes.len(), "Edition PDF cached");
        let pdf = Arc::new(bytes.to_vec());
        self.cache.lock().await.insert(edition_id, pdf.clone());
        Ok(pdf)
    }
}

/// Produce a one-page PDF containing only `page_number` (1-based).
pub fn split_page(pdf: &[u8], page_number: u32) -> Result<Vec<u8>> {
    let mut doc = Document::load_mem(pdf)
        .map_err(|e| JaridaError::Validation(format!("edition PDF unreadable: {e}")))?;

    let pages = doc.get_pages();
    if !pages.contains_key(&page_number) {
        return Err(JaridaError::Validation(format!(
            "page {page_number} not in edition ({} pages)",
            pages.len()
        )));
    }

    let others: Vec<u32> = pages.keys().copied().filter(|&p| p != page_number).collect();
    doc.delete_pages(&others);
    doc.prune_objects();

    let mut out = Vec::new();
    doc.save_to(&mut out)
        .map_err(|e| JaridaError::Other(anyhow::anyhow!("page split save: {e}")))?;
    Ok(out)
}

#[async_trait]
impl ExtractionProvider for EditionOcr {
    fn stage(&self) -> ExtractionStage {
        ExtractionStage::EditionOcr
    }

    async fn extract(
        &self,
        listing: &Listing,
        buffers: &mut ItemBuffers,
    ) -> Result<ExtractionResult> {
        let edition_id = listing.edition_id.ok_or_else(|| {
            JaridaError::Validation(format!("listing {} has no edition id", listing.external_id))
        })?;
        let page = listing.page_number.ok_or_else(|| {
            JaridaError::Validation(format!("listing {} has no page number", listing.external_id))
        })?;
        let page = u32::try_from(page)
            .map_err(|_| JaridaError::Validation(format!("bad page number {page}")))?;

        let pdf = self.edition_pdf(edition_id).await?;
        let single = split_page(&pdf, page)?;
        buffers.store_page_pdf(single);

        let bytes = buffers
            .page_pdf
            .as_deref()
            .ok_or_else(|| JaridaError::Other(anyhow::anyhow!("page PDF buffer vanished")))?;
        let text = self.ocr.recognize(bytes, "page.pdf", "application/pdf").await?;
        Ok(ExtractionResult::text_only(text, ExtractionStage::EditionOcr, 0.85))
    }

    async fn reset(&self) {
        self.cache.lock().await.clear();
    }
}
