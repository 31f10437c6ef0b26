//! Heuristic quality scoring for extracted text.
//!
//! Each failing check appends an issue code and lowers the score; the score
//! is clamped to [0, 1]. Nothing here is persisted standalone, the report is
//! recomputed whenever text changes.

use jarida_common::config::QualityPolicy;

use crate::normalize::arabic_ratio;

#[derive(Debug, Clone)]
pub struct QualityReport {
    pub score:         f64,
    pub arabic_ratio:  f64,
    pub issues:        Vec<String>,
    pub is_acceptable: bool,
}

/// Score a body of extracted text.
pub fn assess(text: &str, policy: &QualityPolicy) -> QualityReport {
    let trimmed = text.trim();
    let mut score = 1.0f64;
    let mut issues = Vec::new();

    let ratio = arabic_ratio(trimmed);

    if trimmed.chars().count() < policy.min_body_chars {
        issues.push("text_too_short".to_string());
        score -= 0.4;
    }

    if ratio < policy.min_arabic_ratio {
        issues.push("low_arabic_ratio".to_string());
        score -= 0.3;
    }

    if has_repeated_run(trimmed, 10) {
        issues.push("gibberish_pattern".to_string());
        score -= 0.3;
    }

    if special_char_ratio(trimmed) > 0.3 {
        issues.push("excess_special_chars".to_string());
        score -= 0.2;
    }

    let score = score.clamp(0.0, 1.0);
    QualityReport {
        score,
        arabic_ratio: ratio,
        is_acceptable: score >= policy.min_accept_score,
        issues,
    }
}

/// True when any character repeats at least `min_run` times in a row.
fn has_repeated_run(text: &str, min_run: usize) -> bool {
    let mut last: Option<char> = None;
    let mut run = 0usize;
    for c in text.chars() {
        if Some(c) == last {
            run += 1;
            if run >= min_run && !c.is_whitespace() {
                return true;
            }
        } else {
            last = Some(c);
            run = 1;
        }
    }
    false
}

/// Fraction of characters that are neither alphanumeric, whitespace, nor
/// common punctuation.
fn special_char_ratio(text: &str) -> f64 {
    let total = text.chars().count();
    if total == 0 {
        return 0.0;
    }
    let special = text
        .chars()
        .filter(|c| {
            !c.is_alphanumeric()
                && !c.is_whitespace()
                && !matches!(c, '.' | ',' | ':' | ';' | '-' | '/' | '(' | ')' | '،' | '؛' | '؟')
        })
        .count();
    special as f64 / total as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> QualityPolicy {
        QualityPolicy::default()
    }

    fn long_arabic_text() -> String {
        "إعلان مناقصة عامة لتوريد وتركيب معدات طبية لمستشفيات وزارة الصحة حسب الشروط والمواصفات الواردة في وثائق المناقصة. ".repeat(8)
    }

    #[test]
    fn clean_arabic_text_accepted() {
        let report = assess(&long_arabic_text(), &policy());
        assert!(report.is_acceptable);
        assert!(report.issues.is_empty());
        assert!(report.arabic_ratio > 0.8);
    }

    #[test]
    fn short_text_flagged() {
        let report = assess("مناقصة", &policy());
        assert!(report.issues.contains(&"text_too_short".to_string()));
        assert!(report.score < 1.0);
    }

    #[test]
    fn latin_gibberish_rejected() {
        let text = "xxxxxxxxxxxxxxxxxxxx ############# %%%%%%%%%%%";
        let report = assess(text, &policy());
        assert!(!report.is_acceptable);
        assert!(report.issues.contains(&"low_arabic_ratio".to_string()));
        assert!(report.issues.contains(&"gibberish_pattern".to_string()));
    }

    #[test]
    fn score_clamped_to_zero() {
        let report = assess("@@@@@@@@@@@@@@", &policy());
        assert!(report.score >= 0.0);
    }
}
