use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// The closed verdict taxonomy.
///
/// Labels are kebab-case on the wire and in transcripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Verdict {
    True,
    MostlyTrue,
    PartiallyTrue,
    Unverifiable,
    Disputed,
    PartiallyFalse,
    MostlyFalse,
    False,
    Exaggerated,
    Misleading,
    Outdated,
}

impl Verdict {
    /// Every label in the taxonomy.
    pub const ALL: [Verdict; 11] = [
        Verdict::True,
        Verdict::MostlyTrue,
        Verdict::PartiallyTrue,
        Verdict::Unverifiable,
        Verdict::Disputed,
        Verdict::PartiallyFalse,
        Verdict::MostlyFalse,
        Verdict::False,
        Verdict::Exaggerated,
        Verdict::Misleading,
        Verdict::Outdated,
    ];

    /// The label as it appears in transcripts.
    pub fn label(self) -> &'static str {
        match self {
            Self::True => "true",
            Self::MostlyTrue => "mostly-true",
            Self::PartiallyTrue => "partially-true",
            Self::Unverifiable => "unverifiable",
            Self::Disputed => "disputed",
            Self::PartiallyFalse => "partially-false",
            Self::MostlyFalse => "mostly-false",
            Self::False => "false",
            Self::Exaggerated => "exaggerated",
            Self::Misleading => "misleading",
            Self::Outdated => "outdated",
        }
    }

    /// One-line explanation shown by `tribunal taxonomy`.
    pub fn description(self) -> &'static str {
        match self {
            Self::True => "Accurate and supported by evidence",
            Self::MostlyTrue => "Largely accurate with minor gaps",
            Self::PartiallyTrue => "Some elements accurate, others not",
            Self::Unverifiable => "Insufficient evidence to decide",
            Self::Disputed => "Credible sources disagree",
            Self::PartiallyFalse => "Some elements inaccurate",
            Self::MostlyFalse => "Largely inaccurate",
            Self::False => "Contradicted by evidence",
            Self::Exaggerated => "Overstates the underlying facts",
            Self::Misleading => "Technically accurate but creates a false impression",
            Self::Outdated => "Was accurate once, no longer holds",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Returned when a string is not a taxonomy label.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("'{0}' is not a verdict label")]
pub struct UnknownVerdict(pub String);

impl FromStr for Verdict {
    type Err = UnknownVerdict;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace([' ', '_'], "-");
        Self::ALL
            .iter()
            .copied()
            .find(|v| v.label() == normalized)
            .ok_or_else(|| UnknownVerdict(s.to_string()))
    }
}

/// The synthesizer's label: a taxonomy member, or explicitly unresolved.
///
/// `Unresolved` is never a silent default. Callers must be able to tell
/// "confidently false" apart from "could not be determined".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum VerdictLabel {
    Resolved(Verdict),
    Unresolved,
}

impl VerdictLabel {
    pub const UNRESOLVED: &'static str = "unresolved";

    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved(_))
    }

    pub fn verdict(&self) -> Option<Verdict> {
        match self {
            Self::Resolved(v) => Some(*v),
            Self::Unresolved => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Resolved(v) => v.label(),
            Self::Unresolved => Self::UNRESOLVED,
        }
    }
}

impl fmt::Display for VerdictLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<VerdictLabel> for String {
    fn from(label: VerdictLabel) -> Self {
        label.as_str().to_string()
    }
}

impl TryFrom<String> for VerdictLabel {
    type Error = UnknownVerdict;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.eq_ignore_ascii_case(Self::UNRESOLVED) {
            return Ok(Self::Unresolved);
        }
        value.parse().map(Self::Resolved)
    }
}

/// Verdict derived from one worker's output.
///
/// A record exists only when a confidence could be read; the label may still
/// be missing if the worker never named a taxonomy member.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VerdictRecord {
    pub label: Option<Verdict>,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
}

impl VerdictRecord {
    /// Create a record, clamping the confidence into `[0, 1]`.
    pub fn new(label: Option<Verdict>, confidence: f64) -> Self {
        let confidence = if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self { label, confidence }
    }
}
