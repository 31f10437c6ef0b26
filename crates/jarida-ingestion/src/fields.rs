//! Regex field extraction from normalized announcement text.
//!
//! The gazette announcements are formulaic: the issuing ministry appears in
//! the first lines, the tender number follows a small set of phrasings, and
//! deadlines are introduced by a handful of stock formulas. Structured
//! fields returned by the vision stage take precedence over these regexes.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::models::ExtractionResult;
use crate::normalize::normalize_arabic;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractedFields {
    pub ministry:  Option<String>,
    pub tender_no: Option<String>,
    pub fee:       Option<String>,
    pub contact:   Option<String>,
    pub deadline_text:     Option<String>,
    pub meeting_date_text: Option<String>,
    pub meeting_location:  Option<String>,
}

lazy_static::lazy_static! {
    static ref MINISTRY: Regex = Regex::new(
        r"(وزارة [\p{Arabic} ]{2,40}|الهيئة العامة [\p{Arabic} ]{2,40}|المؤسسة العامة [\p{Arabic} ]{2,40}|بلدية [\p{Arabic}]{2,20})"
    ).unwrap();

    static ref TENDER_NO: Regex = Regex::new(
        r"(?:مناقصة|ممارسة|مزايدة)\s+رقم[:\s]+([\p{Arabic}A-Za-z0-9/\-]+)|رقم\s+(?:المناقصة|الممارسة|المزايدة)[:\s]+([\p{Arabic}A-Za-z0-9/\-]+)"
    ).unwrap();

    static ref DEADLINE: Regex = Regex::new(
        r"(?:اخر\s+موعد|الموعد\s+النهائي|موعد\s+(?:الاقفال|اقفال))[^\n.]{0,60}?(\d{1,2}[/-]\d{1,2}[/-]\d{4}|\d{4}[/-]\d{1,2}[/-]\d{1,2}|\d{1,2}\s+\S+\s+\d{4})"
    ).unwrap();

    static ref FEE: Regex = Regex::new(
        r"(?:ثمن|قيمة|رسوم)\s+(?:النسخة|الوثائق|وثائق\s+المناقصة)[^\n.]{0,30}?(\d[\d,.]*)\s*(?:د\.?ك|دينار)"
    ).unwrap();

    static ref PHONE: Regex = Regex::new(r"(?:هاتف|تليفون|للاستفسار)[:\s]*([\d\s/-]{7,20})").unwrap();

    static ref MEETING: Regex = Regex::new(
        r"اجتماع[^\n.]{0,80}?(\d{1,2}[/-]\d{1,2}[/-]\d{4}|\d{1,2}\s+\S+\s+\d{4})"
    ).unwrap();

    static ref MEETING_LOCATION: Regex = Regex::new(
        r"(?:مكان\s+الاجتماع|المكان)[:\s]+([^\n.،]{3,80})"
    ).unwrap();
}

/// Extract fields from text, preferring structured values the extraction
/// stage already produced.
pub fn extract_fields(text: &str, extraction: &ExtractionResult) -> ExtractedFields {
    let normalized = normalize_arabic(text);

    let ministry = extraction
        .ministry
        .clone()
        .or_else(|| first_capture(&MINISTRY, &normalized));

    let tender_no = extraction.tender_no.clone().or_else(|| {
        TENDER_NO.captures(&normalized).and_then(|caps| {
            caps.get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str().trim().to_string())
        })
    });

    let deadline_text = extraction
        .deadline_text
        .clone()
        .or_else(|| first_group(&DEADLINE, &normalized));

    let meeting_date_text = extraction
        .meeting_date_text
        .clone()
        .or_else(|| first_group(&MEETING, &normalized));

    let meeting_location = extraction
        .meeting_location
        .clone()
        .or_else(|| first_group(&MEETING_LOCATION, &normalized));

    ExtractedFields {
        ministry: ministry.map(|m| m.trim().to_string()).filter(|m| !m.is_empty()),
        tender_no,
        fee: first_group(&FEE, &normalized),
        contact: first_group(&PHONE, &normalized).map(|p| p.trim().to_string()),
        deadline_text,
        meeting_date_text,
        meeting_location: meeting_location.map(|l| l.trim().to_string()),
    }
}

fn first_capture(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
}

fn first_group(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExtractionStage;

    fn bare(text: &str) -> ExtractionResult {
        ExtractionResult::text_only(text.to_string(), ExtractionStage::Render, 0.85)
    }

    const ANNOUNCEMENT: &str = "\
وزارة الأشغال العامة
إعلان عن مناقصة رقم أ/2025/14
توريد وتركيب معدات لمحطة الضخ.
ثمن النسخة 75 د.ك
آخر موعد لتقديم العطاءات 16/3/2025
يعقد اجتماع تمهيدي يوم 2/3/2025
مكان الاجتماع: قاعة الاجتماعات بمبنى الوزارة
هاتف: 22456789";

    #[test]
    fn all_fields_from_formulaic_announcement() {
        let ex = bare(ANNOUNCEMENT);
        let f = extract_fields(ANNOUNCEMENT, &ex);
        assert!(f.ministry.unwrap().starts_with("وزارة الاشغال"));
        assert_eq!(f.tender_no.as_deref(), Some("ا/2025/14"));
        assert_eq!(f.fee.as_deref(), Some("75"));
        assert_eq!(f.deadline_text.as_deref(), Some("16/3/2025"));
        assert_eq!(f.meeting_date_text.as_deref(), Some("2/3/2025"));
        assert!(f.meeting_location.unwrap().contains("قاعة"));
        assert!(f.contact.is_some());
    }

    #[test]
    fn structured_fields_take_precedence() {
        let mut ex = bare(ANNOUNCEMENT);
        ex.ministry = Some("وزارة الصحة".to_string());
        ex.deadline_text = Some("2025-04-01".to_string());
        let f = extract_fields(ANNOUNCEMENT, &ex);
        assert_eq!(f.ministry.as_deref(), Some("وزارة الصحة"));
        assert_eq!(f.deadline_text.as_deref(), Some("2025-04-01"));
    }

    #[test]
    fn empty_text_yields_empty_fields() {
        let ex = bare("");
        let f = extract_fields("", &ex);
        assert!(f.ministry.is_none());
        assert!(f.tender_no.is_none());
        assert!(f.deadline_text.is_none());
    }
}
