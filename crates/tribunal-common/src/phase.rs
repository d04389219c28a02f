use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// One of the three ordered deliberation stages.
///
/// The derived `Ord` follows declaration order, so `Independent < CrossReview
/// < Synthesis` holds and can be used to reject forward references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Every analyst judges the statement alone.
    Independent,
    /// Every analyst reviews the other analysts' first-pass judgments.
    CrossReview,
    /// The synthesizer folds both analyst rounds into one verdict.
    Synthesis,
}

impl Phase {
    /// All phases in execution order.
    pub const ALL: [Phase; 3] = [Phase::Independent, Phase::CrossReview, Phase::Synthesis];

    /// Zero-based position in the execution order.
    pub fn index(self) -> usize {
        match self {
            Self::Independent => 0,
            Self::CrossReview => 1,
            Self::Synthesis => 2,
        }
    }

    /// The phase that follows this one, if any.
    pub fn next(self) -> Option<Phase> {
        Self::ALL.get(self.index() + 1).copied()
    }

    /// The phase that precedes this one, if any.
    pub fn previous(self) -> Option<Phase> {
        self.index().checked_sub(1).map(|i| Self::ALL[i])
    }

    /// Stable identifier used in event records and on disk.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Independent => "independent",
            Self::CrossReview => "cross_review",
            Self::Synthesis => "synthesis",
        }
    }

    /// Human-readable description used in `phase_start` payloads.
    pub fn description(self) -> &'static str {
        match self {
            Self::Independent => "Each analyst evaluates the statement independently",
            Self::CrossReview => "Analysts review and debate each other's findings",
            Self::Synthesis => "The coordinator weighs all findings into a final verdict",
        }
    }

    /// Whether the phase is run by the analyst panel (as opposed to the synthesizer).
    pub fn is_analyst_phase(self) -> bool {
        !matches!(self, Self::Synthesis)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string does not name a phase.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown phase '{0}'. Valid values: independent, cross_review, synthesis")]
pub struct UnknownPhase(pub String);

impl FromStr for Phase {
    type Err = UnknownPhase;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "independent" | "step1" => Ok(Self::Independent),
            "cross_review" | "crossreview" | "step2" => Ok(Self::CrossReview),
            "synthesis" | "step3" => Ok(Self::Synthesis),
            _ => Err(UnknownPhase(s.to_string())),
        }
    }
}
