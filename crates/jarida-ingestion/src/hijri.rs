//! Tabular (arithmetic) Hijri calendar conversion.
//!
//! The gazette prints Hijri dates alongside Gregorian ones, and OCR output
//! often contains deadlines only in Hijri. The tabular civil calendar is a
//! deterministic approximation: a 30-year cycle with 11 leap years, months
//! alternating 30/29 days. It can differ from the observed calendar by a
//! day, which is within the tolerance of the deadline correction heuristics.

use chrono::{Duration, NaiveDate};
use regex::Regex;

use crate::normalize::{normalize_arabic, normalize_digits};

/// Julian day number of 1 Muharram AH 1 in the civil reckoning.
const HIJRI_EPOCH_JDN: i64 = 1_948_440;
/// Julian day number of 1970-01-01.
const UNIX_EPOCH_JDN: i64 = 2_440_588;

/// Cumulative days before each month (months alternate 30/29).
const MONTH_OFFSET: [i64; 12] = [0, 30, 59, 89, 118, 148, 177, 207, 236, 266, 295, 325];

/// Leap years in the 30-year cycle: 2, 5, 7, 10, 13, 16, 18, 21, 24, 26, 29.
pub fn is_hijri_leap_year(year: i64) -> bool {
    (11 * year + 14) % 30 < 11
}

fn leap_years_before(year: i64) -> i64 {
    (11 * year + 14) / 30
}

fn month_length(year: i64, month: u32) -> i64 {
    match month {
        12 if is_hijri_leap_year(year) => 30,
        m if m % 2 == 1 => 30,
        _ => 29,
    }
}

/// Convert a tabular Hijri date to Gregorian. Returns `None` for dates that
/// do not exist in the calendar.
pub fn hijri_to_gregorian(year: i64, month: u32, day: u32) -> Option<NaiveDate> {
    if year < 1 || !(1..=12).contains(&month) {
        return None;
    }
    if day < 1 || (day as i64) > month_length(year, month) {
        return None;
    }

    let days = 354 * (year - 1)
        + leap_years_before(year - 1)
        + MONTH_OFFSET[(month - 1) as usize]
        + (day as i64 - 1);
    let unix_days = HIJRI_EPOCH_JDN + days - UNIX_EPOCH_JDN;

    NaiveDate::from_ymd_opt(1970, 1, 1).map(|epoch| epoch + Duration::days(unix_days))
}

lazy_static::lazy_static! {
    static ref HIJRI_TEXT: Regex = Regex::new(r"(\d{1,2})\s+(\S+(?:\s+\S+)?)\s+(1[34]\d{2})").unwrap();
}

/// Hijri month names in normalized form (see `normalize_arabic`), with the
/// common spelling variants the gazette uses.
fn hijri_month_number(name: &str) -> Option<u32> {
    let name = normalize_arabic(name);
    let name = name.trim();
    match name {
        "محرم" => Some(1),
        "صفر" => Some(2),
        "ربيع الاول" => Some(3),
        "ربيع الاخر" | "ربيع الثاني" => Some(4),
        "جمادي الاولي" | "جمادي الاول" => Some(5),
        "جمادي الاخره" | "جمادي الاخرة" | "جمادي الثاني" | "جمادي الثانيه" => Some(6),
        "رجب" => Some(7),
        "شعبان" => Some(8),
        "رمضان" => Some(9),
        "شوال" => Some(10),
        "ذو القعده" | "ذو القعدة" => Some(11),
        "ذو الحجه" | "ذو الحجة" => Some(12),
        _ => None,
    }
}

/// Parse a textual Hijri date like `"12 رجب 1446"` and convert it.
pub fn parse_hijri_text(text: &str) -> Option<NaiveDate> {
    let normalized = normalize_digits(text);
    let caps = HIJRI_TEXT.captures(&normalized)?;
    let day: u32 = caps.get(1)?.as_str().parse().ok()?;
    let month = hijri_month_number(caps.get(2)?.as_str())?;
    let year: i64 = caps.get(3)?.as_str().parse().ok()?;
    hijri_to_gregorian(year, month, day)
}
