//! Arabic text normalization.
//!
//! OCR output from gazette scans is noisy: mixed Eastern/Western digits,
//! inconsistent alef and ya forms, stray diacritics and tatweel. Everything
//! downstream (field regexes, date parsing, quality scoring) runs on the
//! normalized form.

/// Map Eastern Arabic digits to Western.
pub fn normalize_digits(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '٠' => '0',
            '١' => '1',
            '٢' => '2',
            '٣' => '3',
            '٤' => '4',
            '٥' => '5',
            '٦' => '6',
            '٧' => '7',
            '٨' => '8',
            '٩' => '9',
            other => other,
        })
        .collect()
}

/// Normalize Arabic text for matching: strip diacritics and tatweel, unify
/// alef variants and final ya, convert digits.
pub fn normalize_arabic(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            // Harakat and Quranic marks
            '\u{064B}'..='\u{0652}' | '\u{0670}' => {}
            // Tatweel
            '\u{0640}' => {}
            'أ' | 'إ' | 'آ' => out.push('ا'),
            'ى' => out.push('ي'),
            other => out.push(other),
        }
    }
    normalize_digits(&out)
}

/// Fraction of Arabic letters among all non-whitespace characters.
pub fn arabic_ratio(text: &str) -> f64 {
    let mut arabic = 0usize;
    let mut total = 0usize;
    for c in text.chars() {
        if c.is_whitespace() {
            continue;
        }
        total += 1;
        if ('\u{0600}'..='\u{06FF}').contains(&c) {
            arabic += 1;
        }
    }
    if total == 0 {
        0.0
    } else {
        arabic as f64 / total as f64
    }
}

/// Crude language tag: "ar" when Arabic characters dominate, "en" otherwise.
pub fn detect_language(text: &str) -> &'static str {
    if arabic_ratio(text) > 0.3 {
        "ar"
    } else {
        "en"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eastern_digits_converted() {
        assert_eq!(normalize_digits("١٥-١٢-٢٠٢٤"), "15-12-2024");
    }

    #[test]
    fn alef_and_ya_unified() {
        assert_eq!(normalize_arabic("أحمد إلى مستشفى"), "احمد الي مستشفي");
    }

    #[test]
    fn diacritics_and_tatweel_stripped() {
        assert_eq!(normalize_arabic("مـــنَاقَصَة"), "مناقصة");
    }

    #[test]
    fn arabic_ratio_on_mixed_text() {
        let r = arabic_ratio("مناقصة 123 tender");
        assert!(r > 0.2 && r < 0.6);
    }

    #[test]
    fn language_detection() {
        assert_eq!(detect_language("إعلان مناقصة عامة لتوريد المعدات"), "ar");
        assert_eq!(detect_language("General supply tender announcement"), "en");
        assert_eq!(detect_language(""), "en");
    }
}
