//! Per-item working buffers and record assembly.
//!
//! Peak memory for a run is bounded to one item's working set: every large
//! blob an extraction stage produces lives in `ItemBuffers`, and the
//! pipeline releases the buffers before starting the next item. Whole
//! edition PDFs are cached separately (see `extract::edition`) and cleared
//! at category boundaries.

use chrono::NaiveDate;

use jarida_db::schema::{EnrichmentUpdate, NewTender};

use crate::dates::ValidatedDeadline;
use crate::fields::ExtractedFields;
use crate::models::ExtractionResult;
use crate::normalize::detect_language;
use crate::quality::QualityReport;

/// Large blobs for the item currently being processed.
#[derive(Debug, Default)]
pub struct ItemBuffers {
    pub screenshot: Option<Vec<u8>>,
    pub page_pdf:   Option<Vec<u8>>,
    pub page_image: Option<Vec<u8>>,
    released:       bool,
}

impl ItemBuffers {
    /// Drop all blobs. Must be called before the next item begins.
    pub fn release(&mut self) {
        self.screenshot = None;
        self.page_pdf = None;
        self.page_image = None;
        self.released = true;
    }

    /// Whether `release` has run since the last blob was stored.
    pub fn is_released(&self) -> bool {
        self.released
            && self.screenshot.is_none()
            && self.page_pdf.is_none()
            && self.page_image.is_none()
    }

    pub fn store_screenshot(&mut self, bytes: Vec<u8>) {
        self.screenshot = Some(bytes);
        self.released = false;
    }

    pub fn store_page_pdf(&mut self, bytes: Vec<u8>) {
        self.page_pdf = Some(bytes);
        self.released = false;
    }

    pub fn store_page_image(&mut self, bytes: Vec<u8>) {
        self.page_image = Some(bytes);
        self.released = false;
    }
}

/// Assemble the insert payload for a fully processed listing.
#[allow(clippy::too_many_arguments)]
pub fn build_new_tender(
    listing: &crate::models::Listing,
    extraction: &ExtractionResult,
    fields: &ExtractedFields,
    deadline: &ValidatedDeadline,
    quality: &QualityReport,
    meeting_date: Option<NaiveDate>,
    fingerprint: String,
) -> NewTender {
    let mut anomalies = deadline.anomalies.clone();
    anomalies.extend(quality.issues.iter().cloned());

    NewTender {
        external_id:      listing.external_id.clone(),
        category:         listing.category.clone(),
        title:            listing.title.clone(),
        edition_no:       listing.edition_no.clone(),
        publish_date:     listing.publish_date,
        body:             extraction.text.clone(),
        extraction_stage: extraction.stage.as_str().to_string(),
        language:         detect_language(&extraction.text).to_string(),
        quality_score:    quality.score,
        arabic_ratio:     quality.arabic_ratio,
        ministry:         fields.ministry.clone(),
        tender_no:        fields.tender_no.clone(),
        fee:              fields.fee.clone(),
        contact:          fields.contact.clone(),
        meeting_date,
        meeting_location: fields.meeting_location.clone(),
        deadline:         deadline.deadline,
        deadline_original:   deadline.original,
        deadline_confidence: deadline.confidence,
        deadline_note:       deadline.note.clone(),
        anomalies,
        summary_en: None,
        summary_ar: None,
        fingerprint,
    }
}

/// Assemble the update payload for a re-enriched record.
#[allow(clippy::too_many_arguments)]
pub fn build_enrichment_update(
    extraction: &ExtractionResult,
    fields: &ExtractedFields,
    deadline: &ValidatedDeadline,
    quality: &QualityReport,
    meeting_date: Option<NaiveDate>,
    deadline_history: serde_json::Value,
    is_postponed: bool,
    summary_en: Option<String>,
    summary_ar: Option<String>,
) -> EnrichmentUpdate {
    let mut anomalies = deadline.anomalies.clone();
    anomalies.extend(quality.issues.iter().cloned());

    EnrichmentUpdate {
        body:             extraction.text.clone(),
        extraction_stage: extraction.stage.as_str().to_string(),
        language:         detect_language(&extraction.text).to_string(),
        quality_score:    quality.score,
        arabic_ratio:     quality.arabic_ratio,
        ministry:         fields.ministry.clone(),
        tender_no:        fields.tender_no.clone(),
        fee:              fields.fee.clone(),
        contact:          fields.contact.clone(),
        meeting_date,
        meeting_location: fields.meeting_location.clone(),
        deadline:         deadline.deadline,
        deadline_original:   deadline.original,
        deadline_confidence: deadline.confidence,
        deadline_note:       deadline.note.clone(),
        deadline_history,
        is_postponed,
        anomalies,
        summary_en,
        summary_ar,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_clears_every_buffer() {
        let mut buffers = ItemBuffers::default();
        buffers.store_screenshot(vec![0u8; 1024]);
        buffers.store_page_pdf(vec![0u8; 2048]);
        assert!(!buffers.is_released());

        buffers.release();
        assert!(buffers.is_released());
        assert!(buffers.screenshot.is_none());
        assert!(buffers.page_pdf.is_none());
    }

    #[test]
    fn storing_after_release_marks_unreleased() {
        let mut buffers = ItemBuffers::default();
        buffers.release();
        buffers.store_page_image(vec![1u8; 16]);
        assert!(!buffers.is_released());
    }
}
