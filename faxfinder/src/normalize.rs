//! Phone number normalization
//!
//! Raw spans pulled out of a page come in many shapes: full-width digits,
//! typographic dashes, surrounding labels. `normalize` reduces them to ASCII
//! digits, hyphens and parentheses and segments bare 10/11 digit runs into
//! the usual Japanese `AA-BBBB-CCCC` / `AAA-BBBB-CCCC` forms.

/// Minimum number of digits a normalized match must carry to be accepted.
pub const MIN_DIGITS: usize = 7;

/// Map full-width and typographic variants onto their ASCII counterparts.
fn fold_char(c: char) -> char {
    match c {
        '０'..='９' => char::from_u32(c as u32 - '０' as u32 + '0' as u32).unwrap_or(c),
        '－' | '‐' | '‑' | '‒' | '–' | '−' => '-',
        '（' => '(',
        '）' => ')',
        _ => c,
    }
}

/// Canonicalize a raw matched span into a phone-number string.
///
/// Never fails. Pure-digit results of length 10 become `DD-DDDD-DDDD`, length
/// 11 become `DDD-DDDD-DDDD`; anything else is returned as stripped.
pub fn normalize(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(fold_char)
        .filter(|c| c.is_ascii_digit() || matches!(c, '-' | '(' | ')'))
        .collect();

    if !cleaned.chars().all(|c| c.is_ascii_digit()) {
        return cleaned;
    }

    match cleaned.len() {
        10 => format!("{}-{}-{}", &cleaned[..2], &cleaned[2..6], &cleaned[6..]),
        11 => format!("{}-{}-{}", &cleaned[..3], &cleaned[3..7], &cleaned[7..]),
        _ => cleaned,
    }
}

/// Number of ASCII digits in the normalized form of `raw`.
pub fn digit_count(raw: &str) -> usize {
    normalize(raw).chars().filter(|c| c.is_ascii_digit()).count()
}

/// Whether `raw` normalizes to something long enough to be a phone number.
pub fn is_plausible(raw: &str) -> bool {
    digit_count(raw) >= MIN_DIGITS
}
