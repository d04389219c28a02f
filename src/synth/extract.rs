//! Verdict label and confidence extraction from worker answers.

use crate::transcript::final_answer;
use regex::Regex;
use std::sync::LazyLock;
use tribunal_common::{Verdict, VerdictLabel, VerdictRecord};

// Longest labels first so "mostly-true" wins over "true" at the same position.
static LABEL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    let mut labels: Vec<&str> = Verdict::ALL.iter().map(|v| v.label()).collect();
    labels.sort_by_key(|l| std::cmp::Reverse(l.len()));
    let alternation = labels
        .iter()
        .map(|l| l.replace('-', "[-_ ]"))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"(?i)\b(?:{})\b", alternation)).unwrap()
});

static CONFIDENCE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:confidence|신뢰도)\s*[:=]?\s*([0-9]+(?:\.[0-9]+)?)\s*(%)?").unwrap()
});

/// First taxonomy label in the answer portion of `text`.
pub fn extract_label(text: &str) -> Option<Verdict> {
    LABEL_REGEX
        .find(final_answer(text))
        .and_then(|m| m.as_str().parse().ok())
}

/// The synthesizer's label, or `Unresolved` when no taxonomy label appears.
pub fn extract_verdict_label(text: &str) -> VerdictLabel {
    extract_label(text).map_or(VerdictLabel::Unresolved, VerdictLabel::Resolved)
}

/// First confidence value in the answer portion of `text`, as a fraction.
///
/// Values above 1 or followed by `%` are read as percentages. The result is
/// clamped to `[0, 1]`.
pub fn extract_confidence(text: &str) -> Option<f64> {
    let caps = CONFIDENCE_REGEX.captures(final_answer(text))?;
    let value: f64 = caps.get(1)?.as_str().parse().ok()?;
    let fraction = if caps.get(2).is_some() || value > 1.0 {
        value / 100.0
    } else {
        value
    };
    Some(fraction.clamp(0.0, 1.0))
}

/// Verdict record for an analyst answer. Absent when no confidence is given.
pub fn extract_verdict_record(text: &str) -> Option<VerdictRecord> {
    let confidence = extract_confidence(text)?;
    Some(VerdictRecord::new(extract_label(text), confidence))
}
