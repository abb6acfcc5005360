//! Helpers shared by the numeric trackers and their match rankers.

use crate::plugins::traits::{ChangeType, ComparisonResult, ElementMatch};
use crate::plugins::traits::tracker::sort_by_confidence;

/// Bonus for a candidate whose markup mentions a kind keyword.
pub const KEYWORD_BONUS: f32 = 10.0;
/// Bonus for a candidate whose own parse equals the target's parse.
pub const EXACT_MATCH_BONUS: f32 = 20.0;

/// Any run of digits with optional grouping and a decimal tail.
pub const NUMBER_PATTERN: &str = r"\d{1,3}(?:[,.' \x{a0}]\d{3})+(?:[.,]\d+)?|\d+(?:[.,]\d+)?";

/// Turns a locale-formatted number into `1234.56` form.
///
/// With both `,` and `.` present the last one is the decimal separator. A separator that
/// repeats is a grouping separator. A lone comma followed by exactly three digits is
/// grouping, otherwise decimal. A lone period is always decimal.
pub fn normalize_number(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, ' ' | '\u{a0}' | '\''))
        .collect();

    if cleaned.is_empty() || !cleaned.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    let commas = cleaned.matches(',').count();
    let dots = cleaned.matches('.').count();

    let normalized = match (commas, dots) {
        (0, 0) => cleaned,
        (_, 0) => {
            if commas > 1 || digits_after(&cleaned, ',') == 3 {
                cleaned.replace(',', "")
            } else {
                cleaned.replace(',', ".")
            }
        }
        (0, _) => {
            if dots > 1 {
                cleaned.replace('.', "")
            } else {
                cleaned
            }
        }
        _ => {
            let last_comma = cleaned.rfind(',')?;
            let last_dot = cleaned.rfind('.')?;
            if last_comma > last_dot {
                cleaned.replace('.', "").replace(',', ".")
            } else {
                cleaned.replace(',', "")
            }
        }
    };

    // A grouping separator that was really a decimal one leaves two dots behind
    if normalized.matches('.').count() > 1 {
        return None;
    }

    Some(normalized)
}

fn digits_after(s: &str, separator: char) -> usize {
    s.rfind(separator)
        .map(|idx| s[idx + separator.len_utf8()..].chars().take_while(|c| c.is_ascii_digit()).count())
        .unwrap_or(0)
}

/// Number of digits after the decimal point of a normalized number.
pub fn decimal_places(normalized: &str) -> usize {
    normalized
        .split_once('.')
        .map(|(_, frac)| frac.len())
        .unwrap_or(0)
}

pub fn mentions_any(haystack: &str, keywords: &[&str]) -> bool {
    let lower = haystack.to_lowercase();
    keywords.iter().any(|k| lower.contains(k))
}

/// Scalar comparison shared by the price and number trackers.
pub fn compare_scalars(old: f64, new: f64) -> ComparisonResult {
    let delta = new - old;
    if delta.abs() < 1e-9 {
        return ComparisonResult::unchanged();
    }

    let change_type = if delta > 0.0 {
        ChangeType::Increased
    } else {
        ChangeType::Decreased
    };

    let percent_change = if old.abs() > f64::EPSILON {
        Some(delta.abs() / old.abs() * 100.0)
    } else {
        None
    };

    ComparisonResult {
        changed: true,
        change_type,
        difference: delta.abs(),
        percent_change,
    }
}

/// What a tracker thinks of one candidate during reranking.
pub enum CandidateVerdict {
    /// Not a usable value; confidence drops to zero.
    Reject,
    /// Usable; extra bonus on top of the keyword bonus.
    Keep(f32),
}

/// Re-scores candidates with keyword and tracker-specific bonuses, clamps to 0..=100 and
/// sorts descending (stable).
pub fn rerank<F>(matches: &[ElementMatch], keywords: &[&str], mut judge: F) -> Vec<ElementMatch>
where
    F: FnMut(&ElementMatch) -> CandidateVerdict,
{
    let mut ranked: Vec<ElementMatch> = matches
        .iter()
        .map(|m| {
            let mut candidate = m.clone();
            candidate.confidence = match judge(m) {
                CandidateVerdict::Reject => 0.0,
                CandidateVerdict::Keep(bonus) => {
                    let markup = format!("{} {} {}", m.selector, m.html, m.context);
                    let keyword = if mentions_any(&markup, keywords) { KEYWORD_BONUS } else { 0.0 };
                    (m.confidence + keyword + bonus).clamp(0.0, 100.0)
                }
            };
            candidate
        })
        .collect();

    sort_by_confidence(&mut ranked);
    ranked
}

/// Keeps the first occurrence of each variation.
pub fn dedupe(variations: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    variations
        .into_iter()
        .filter(|v| !v.is_empty() && seen.insert(v.clone()))
        .collect()
}

/// `1234567.5` -> (`1,234,567`, `.5`) style grouping with the given separators.
pub fn group_thousands(normalized: &str, group: char, decimal: char) -> String {
    let (int_part, frac_part) = match normalized.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (normalized, None),
    };
    let (sign, digits) = match int_part.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", int_part),
    };

    let mut grouped = String::new();
    for (idx, ch) in digits.chars().enumerate() {
        if idx > 0 && (digits.len() - idx) % 3 == 0 {
            grouped.push(group);
        }
        grouped.push(ch);
    }

    match frac_part {
        Some(frac) => format!("{}{}{}{}", sign, grouped, decimal, frac),
        None => format!("{}{}", sign, grouped),
    }
}
