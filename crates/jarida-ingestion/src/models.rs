//! Core data types passed between pipeline stages.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One row from the portal's paginated listing API. Immutable; never
/// persisted directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Listing {
    /// Identifier the portal assigns to the announcement.
    pub external_id: String,
    pub title:       String,
    pub category:    String,
    pub edition_no:  Option<String>,
    /// Gazette edition the announcement appears in.
    pub edition_id:  Option<i64>,
    /// Page within the edition.
    pub page_number: Option<i64>,
    pub publish_date: Option<NaiveDate>,
    /// Hijri publish date string as given by the portal, unparsed.
    pub hijri_date:  Option<String>,
}

impl Listing {
    /// URL of the flip-viewer page for this announcement.
    pub fn page_url(&self, base_url: &str) -> Option<String> {
        let (edition, page) = (self.edition_id?, self.page_number?);
        Some(format!("{base_url}/flip/index?id={edition}&no={page}"))
    }
}

/// Which strategy in the fallback chain produced the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStage {
    /// Headless-browser capture of the rendered page, OCR'd.
    Render,
    /// Target page split out of the cached edition PDF, OCR'd.
    EditionOcr,
    /// High-resolution page raster transcribed by the vision service.
    PageVision,
}

impl ExtractionStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionStage::Render => "render",
            ExtractionStage::EditionOcr => "edition_ocr",
            ExtractionStage::PageVision => "page_vision",
        }
    }
}

/// Output of one extraction strategy attempt.
#[derive(Debug, Clone)]
pub struct ExtractionResult {
    pub text:       String,
    pub stage:      ExtractionStage,
    pub confidence: f64,
    /// Ministry name when the provider returned structured fields.
    pub ministry:   Option<String>,
    pub tender_no:  Option<String>,
    pub deadline_text: Option<String>,
    pub meeting_date_text: Option<String>,
    pub meeting_location:  Option<String>,
}

impl ExtractionResult {
    pub fn text_only(text: String, stage: ExtractionStage, confidence: f64) -> Self {
        Self {
            text,
            stage,
            confidence,
            ministry: None,
            tender_no: None,
            deadline_text: None,
            meeting_date_text: None,
            meeting_location: None,
        }
    }
}
