//! Date parsing and deadline sanity correction.
//!
//! OCR misreads dates in predictable ways: a wrong year digit (2024 for
//! 2025), a dropped tens digit in the day (6 for 16 or 26), or a Hijri date
//! where a Gregorian one was expected. The correction policy only ever fires
//! when the candidate deadline precedes the publish date, and a correction
//! is applied automatically only above a confidence threshold. Anything
//! uncorrectable is persisted with an explicit anomaly flag, never silently
//! wrong.

use chrono::{Datelike, Duration, NaiveDate, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use jarida_common::config::DeadlinePolicy;

use crate::hijri::{hijri_to_gregorian, parse_hijri_text};
use crate::normalize::normalize_digits;

// ── Parsing ───────────────────────────────────────────────────────────────────

lazy_static::lazy_static! {
    static ref DMY: Regex = Regex::new(r"(\d{1,2})[/-](\d{1,2})[/-](\d{4})").unwrap();
    static ref YMD: Regex = Regex::new(r"(\d{4})[/-](\d{1,2})[/-](\d{1,2})").unwrap();
    static ref DAY_MONTH_YEAR: Regex = Regex::new(r"(\d{1,2})\s+(\S+)\s+(\d{4})").unwrap();
}

fn gregorian_month_number(name: &str) -> Option<u32> {
    match name {
        "يناير" => Some(1),
        "فبراير" => Some(2),
        "مارس" => Some(3),
        "أبريل" | "ابريل" => Some(4),
        "مايو" => Some(5),
        "يونيو" => Some(6),
        "يوليو" => Some(7),
        "أغسطس" | "اغسطس" => Some(8),
        "سبتمبر" => Some(9),
        "أكتوبر" | "اكتوبر" => Some(10),
        "نوفمبر" => Some(11),
        "ديسمبر" => Some(12),
        _ => None,
    }
}

/// Parse a date from OCR'd Arabic text. Tries numeric Gregorian forms,
/// Arabic month names, then textual Hijri. Numeric dates with a year in the
/// 1300-1499 range are treated as Hijri.
pub fn parse_arabic_date(text: &str) -> Option<NaiveDate> {
    let normalized = normalize_digits(text);

    if let Some(caps) = YMD.captures(&normalized) {
        let y: i32 = caps[1].parse().ok()?;
        let m: u32 = caps[2].parse().ok()?;
        let d: u32 = caps[3].parse().ok()?;
        return numeric_date(y, m, d);
    }

    if let Some(caps) = DMY.captures(&normalized) {
        let d: u32 = caps[1].parse().ok()?;
        let m: u32 = caps[2].parse().ok()?;
        let y: i32 = caps[3].parse().ok()?;
        return numeric_date(y, m, d);
    }

    if let Some(caps) = DAY_MONTH_YEAR.captures(&normalized) {
        if let Some(month) = gregorian_month_number(&caps[2]) {
            let d: u32 = caps[1].parse().ok()?;
            let y: i32 = caps[3].parse().ok()?;
            return NaiveDate::from_ymd_opt(y, month, d);
        }
    }

    parse_hijri_text(text)
}

fn numeric_date(year: i32, month: u32, day: u32) -> Option<NaiveDate> {
    if (1300..1500).contains(&year) {
        hijri_to_gregorian(year as i64, month, day)
    } else {
        NaiveDate::from_ymd_opt(year, month, day)
    }
}

// ── Correction ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionKind {
    None,
    YearShift,
    DigitConfusion,
    HijriConversion,
}

impl CorrectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CorrectionKind::None => "none",
            CorrectionKind::YearShift => "year_shift",
            CorrectionKind::DigitConfusion => "digit_confusion",
            CorrectionKind::HijriConversion => "hijri_conversion",
        }
    }
}

/// A deadline after sanity correction, with provenance.
#[derive(Debug, Clone)]
pub struct ValidatedDeadline {
    /// The value to persist.
    pub deadline:   Option<NaiveDate>,
    /// Raw extracted value, kept whenever a correction was applied.
    pub original:   Option<NaiveDate>,
    pub correction: CorrectionKind,
    pub confidence: Option<f64>,
    pub note:       Option<String>,
    pub anomalies:  Vec<String>,
}

impl ValidatedDeadline {
    fn untouched(deadline: Option<NaiveDate>) -> Self {
        Self {
            deadline,
            original: None,
            correction: CorrectionKind::None,
            confidence: None,
            note: None,
            anomalies: Vec::new(),
        }
    }
}

/// Longest plausible gap between publication and a year-shifted deadline.
/// One gazette cycle; anything further out is noise, not a digit error.
const YEAR_SHIFT_WINDOW_DAYS: i64 = 365;

/// Deadlines this close to publication get an advisory flag.
const URGENT_WINDOW_DAYS: i64 = 3;

/// Apply the deadline correction policy.
pub fn correct_deadline(
    candidate: Option<NaiveDate>,
    publish: Option<NaiveDate>,
    policy: &DeadlinePolicy,
) -> ValidatedDeadline {
    let (Some(deadline), Some(publish)) = (candidate, publish) else {
        return ValidatedDeadline::untouched(candidate);
    };

    let days_diff = (deadline - publish).num_days();

    if days_diff > policy.max_future_days {
        let mut v = ValidatedDeadline::untouched(Some(deadline));
        v.anomalies.push("deadline_too_far_future".to_string());
        v.note = Some(format!(
            "deadline {days_diff} days after publication, beyond the {} day plausibility bound",
            policy.max_future_days
        ));
        return v;
    }

    if days_diff >= 0 {
        let mut v = ValidatedDeadline::untouched(Some(deadline));
        // Advisory only: a bid window this short usually means the tender
        // was published late in its cycle.
        if days_diff < URGENT_WINDOW_DAYS {
            v.anomalies.push("deadline_urgent".to_string());
        }
        return v;
    }

    // Candidate precedes publication: look for a known OCR error pattern.
    let gap = days_diff.unsigned_abs() as i64;

    // Year misread: shift to the publication year and see whether the result
    // lands in a plausible window after publication.
    let year_diff = publish.year() - deadline.year();
    if (1..=12).contains(&year_diff) {
        if let Some(shifted) = deadline.with_year(publish.year()) {
            let shifted_diff = (shifted - publish).num_days();
            if (0..=YEAR_SHIFT_WINDOW_DAYS).contains(&shifted_diff) {
                // A multi-year gap is almost certainly a misread digit; a
                // one-year gap could still be a genuinely stale listing.
                let confidence = if year_diff >= 2 { 0.95 } else { 0.85 };
                return apply_or_surface(
                    deadline,
                    shifted,
                    CorrectionKind::YearShift,
                    confidence,
                    format!("year read as {} instead of {}", deadline.year(), publish.year()),
                    policy,
                );
            }
        }
    }

    // Dropped tens digit in the day: 6 read for 16 (gap of exactly 10) or
    // 6 read for 26 (gap of exactly 20). Only when the year matches.
    if deadline.year() == publish.year() {
        if gap == 10 {
            return apply_or_surface(
                deadline,
                deadline + Duration::days(10),
                CorrectionKind::DigitConfusion,
                0.8,
                "possible day digit confusion, 6 read for 16".to_string(),
                policy,
            );
        }
        if gap == 20 {
            return apply_or_surface(
                deadline,
                deadline + Duration::days(20),
                CorrectionKind::DigitConfusion,
                0.7,
                "possible day digit confusion, 6 read for 26".to_string(),
                policy,
            );
        }
    }

    // No recognizable pattern.
    let mut v = ValidatedDeadline::untouched(Some(deadline));
    if gap > 30 {
        v.anomalies.push("likely_expired_reposted".to_string());
        v.note = Some(format!("deadline {gap} days before publication, likely a reposted tender"));
    } else {
        v.anomalies.push("deadline_before_publication".to_string());
        v.note = Some(format!("deadline {gap} days before publication, no correction found"));
    }
    v
}

fn apply_or_surface(
    original: NaiveDate,
    corrected: NaiveDate,
    kind: CorrectionKind,
    confidence: f64,
    reason: String,
    policy: &DeadlinePolicy,
) -> ValidatedDeadline {
    if confidence >= policy.auto_apply_confidence {
        ValidatedDeadline {
            deadline:   Some(corrected),
            original:   Some(original),
            correction: kind,
            confidence: Some(confidence),
            note:       Some(reason),
            anomalies:  Vec::new(),
        }
    } else {
        ValidatedDeadline {
            deadline:   Some(original),
            original:   None,
            correction: CorrectionKind::None,
            confidence: Some(confidence),
            note:       Some(format!("suggested {} ({reason}), below auto-apply threshold", corrected)),
            anomalies:  vec!["deadline_before_publication".to_string()],
        }
    }
}

// ── Postponement tracking ─────────────────────────────────────────────────────

/// Append a deadline change to the record's history. Returns the extended
/// history and whether the change counts as a postponement (deadline moved
/// later).
pub fn extend_deadline_history(
    history: &serde_json::Value,
    previous: Option<NaiveDate>,
    current: Option<NaiveDate>,
) -> (serde_json::Value, bool) {
    let mut entries = history.as_array().cloned().unwrap_or_default();
    let postponed = matches!((previous, current), (Some(old), Some(new)) if new > old);

    if let (Some(old), Some(new)) = (previous, current) {
        if new != old {
            entries.push(serde_json::json!({
                "recorded_at": Utc::now().to_rfc3339(),
                "previous":    old.to_string(),
                "deadline":    new.to_string(),
            }));
        }
    }

    (serde_json::Value::Array(entries), postponed)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
