use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A seat on the deliberation panel.
///
/// Five analyst roles plus exactly one synthesizer. Declaration order is the
/// visiting order used by the scheduler, so the derived `Ord` doubles as the
/// deterministic execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerRole {
    /// Academic literature and research findings.
    Academic,
    /// News coverage and press verification.
    News,
    /// Social context and public discourse.
    Social,
    /// Logical consistency and reasoning.
    Logic,
    /// Statistics and data sources.
    Statistics,
    /// The coordinator that issues the final verdict.
    Synthesizer,
}

impl WorkerRole {
    /// Analyst roles in declaration order.
    pub const ANALYSTS: [WorkerRole; 5] = [
        WorkerRole::Academic,
        WorkerRole::News,
        WorkerRole::Social,
        WorkerRole::Logic,
        WorkerRole::Statistics,
    ];

    /// Stable identifier used in event records, config keys and file names.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Academic => "academic",
            Self::News => "news",
            Self::Social => "social",
            Self::Logic => "logic",
            Self::Statistics => "statistics",
            Self::Synthesizer => "synthesizer",
        }
    }

    /// Human-readable name for terminal output.
    pub fn display_name(self) -> &'static str {
        match self {
            Self::Academic => "Academic Researcher",
            Self::News => "News Verifier",
            Self::Social => "Social Context Analyst",
            Self::Logic => "Logic Specialist",
            Self::Statistics => "Statistics Analyst",
            Self::Synthesizer => "Lead Coordinator",
        }
    }

    /// Whether this role sits on the analyst panel.
    pub fn is_analyst(self) -> bool {
        !matches!(self, Self::Synthesizer)
    }

    /// Default weight of the role in the final confidence.
    ///
    /// The synthesizer carries no weight; it does not report a confidence of
    /// its own into the weighted average.
    pub fn default_weight(self) -> f64 {
        match self {
            Self::Academic => 0.25,
            Self::News => 0.30,
            Self::Social => 0.10,
            Self::Logic => 0.15,
            Self::Statistics => 0.20,
            Self::Synthesizer => 0.0,
        }
    }
}

impl fmt::Display for WorkerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string does not name a worker role.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "Unknown role '{0}'. Valid values: academic, news, social, logic, statistics, synthesizer"
)]
pub struct UnknownRole(pub String);

impl FromStr for WorkerRole {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "academic" => Ok(Self::Academic),
            "news" => Ok(Self::News),
            "social" => Ok(Self::Social),
            "logic" => Ok(Self::Logic),
            "statistics" | "stats" => Ok(Self::Statistics),
            "synthesizer" | "super" | "coordinator" => Ok(Self::Synthesizer),
            _ => Err(UnknownRole(s.to_string())),
        }
    }
}

/// Returned when a weight is negative, NaN or infinite, or assigned to the synthesizer.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvalidWeight {
    #[error("Weight for '{role}' must be a finite non-negative number, got {value}")]
    OutOfRange { role: WorkerRole, value: f64 },

    #[error("The synthesizer does not carry a weight")]
    Synthesizer,
}

/// Per-analyst weights used by the weighted confidence.
///
/// Weights need not sum to one. Roles without an explicit entry fall back to
/// [`WorkerRole::default_weight`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Weights(BTreeMap<WorkerRole, f64>);

impl Weights {
    /// Empty weight table; every role uses its default weight.
    pub fn new() -> Self {
        Self::default()
    }

    /// The default table, with every analyst at its default weight.
    pub fn defaults() -> Self {
        Self(
            WorkerRole::ANALYSTS
                .iter()
                .map(|r| (*r, r.default_weight()))
                .collect(),
        )
    }

    /// Set a single weight, validating it.
    pub fn set(&mut self, role: WorkerRole, weight: f64) -> Result<(), InvalidWeight> {
        Self::check(role, weight)?;
        self.0.insert(role, weight);
        Ok(())
    }

    /// Builder-style [`Weights::set`].
    pub fn with(mut self, role: WorkerRole, weight: f64) -> Result<Self, InvalidWeight> {
        self.set(role, weight)?;
        Ok(self)
    }

    /// Effective weight of a role.
    pub fn get(&self, role: WorkerRole) -> f64 {
        self.0
            .get(&role)
            .copied()
            .unwrap_or_else(|| role.default_weight())
    }

    /// Overlay `other` on top of `self`; entries in `other` win.
    pub fn merged(&self, other: &Weights) -> Weights {
        let mut merged = self.0.clone();
        merged.extend(other.0.iter().map(|(r, w)| (*r, *w)));
        Weights(merged)
    }

    /// Validate every explicit entry.
    pub fn validate(&self) -> Result<(), InvalidWeight> {
        self.0.iter().try_for_each(|(r, w)| Self::check(*r, *w))
    }

    /// Iterate over explicit entries.
    pub fn iter(&self) -> impl Iterator<Item = (WorkerRole, f64)> + '_ {
        self.0.iter().map(|(r, w)| (*r, *w))
    }

    fn check(role: WorkerRole, weight: f64) -> Result<(), InvalidWeight> {
        if !role.is_analyst() {
            return Err(InvalidWeight::Synthesizer);
        }
        if !weight.is_finite() || weight < 0.0 {
            return Err(InvalidWeight::OutOfRange {
                role,
                value: weight,
            });
        }
        Ok(())
    }
}

impl FromIterator<(WorkerRole, f64)> for Weights {
    fn from_iter<T: IntoIterator<Item = (WorkerRole, f64)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}
