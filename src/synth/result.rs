//! Weighted confidence and the final session result.

use super::extract::extract_verdict_label;
use crate::scheduler::SessionSummary;
use crate::tracker::{TaskStatus, ToolInvocation};
use crate::transcript::final_answer;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;
use tribunal_common::{Phase, SessionId, VerdictLabel, VerdictRecord, Weights, WorkerRole};

/// One analyst task's outcome as reported in the final result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerVerdict {
    pub phase: Phase,
    pub role: WorkerRole,
    pub status: TaskStatus,
    #[serde(default)]
    pub verdict: Option<VerdictRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The verdict each analyst reports into the weighted confidence.
///
/// A CrossReview record replaces the same role's Independent record.
pub fn effective_records(verdicts: &[WorkerVerdict]) -> BTreeMap<WorkerRole, VerdictRecord> {
    let mut records = BTreeMap::new();
    for phase in [Phase::Independent, Phase::CrossReview] {
        for v in verdicts.iter().filter(|v| v.phase == phase) {
            if let Some(record) = v.verdict {
                records.insert(v.role, record);
            }
        }
    }
    records
}

/// `Σ(weight·confidence) / Σ(weight)` over reporting analysts.
///
/// Zero when nobody reports or the reporting weights sum to zero. Always
/// within `[0, 1]`.
pub fn weighted_confidence(records: &BTreeMap<WorkerRole, VerdictRecord>, weights: &Weights) -> f64 {
    let (numerator, denominator) = records
        .iter()
        .filter(|(role, _)| role.is_analyst())
        .fold((0.0, 0.0), |(num, den), (role, record)| {
            let weight = weights.get(*role);
            (num + weight * record.confidence, den + weight)
        });

    if denominator <= 0.0 || !denominator.is_finite() {
        return 0.0;
    }
    (numerator / denominator).clamp(0.0, 1.0)
}

/// Everything the synthesizer needs once Synthesis has run.
#[derive(Debug, Clone)]
pub struct SynthesisInput<'a> {
    pub session_id: SessionId,
    pub statement: &'a str,
    /// The synthesizer's transcript; `None` if the task failed.
    pub synthesis_output: Option<&'a str>,
    pub synthesis_error: Option<&'a str>,
    /// The analyst roles the session scheduled.
    pub panel: &'a [WorkerRole],
    pub worker_verdicts: Vec<WorkerVerdict>,
    pub tool_log: Vec<ToolInvocation>,
    pub run_summary: SessionSummary,
}

/// The immutable outcome of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalResult {
    pub session_id: SessionId,
    pub statement: String,
    pub label: VerdictLabel,
    pub weighted_confidence: f64,
    /// The synthesizer's answer.
    pub summary: String,
    /// Every analyst task from both analyst phases.
    pub worker_verdicts: Vec<WorkerVerdict>,
    pub reporting_roles: Vec<WorkerRole>,
    pub missing_roles: Vec<WorkerRole>,
    pub weights: Weights,
    pub tool_log: Vec<ToolInvocation>,
    /// Calls per tool name across all phases.
    pub tool_usage: BTreeMap<String, usize>,
    /// Set when any task failed or the label is unresolved.
    pub degraded: bool,
    /// Why the label is unresolved, if it is.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synthesis_error: Option<String>,
    /// Per-task timings and outcomes.
    #[serde(default)]
    pub run_summary: SessionSummary,
    pub completed_at: DateTime<Utc>,
}

impl FinalResult {
    pub fn is_resolved(&self) -> bool {
        self.label.is_resolved()
    }

    /// Confidence as a whole percentage, for display.
    pub fn confidence_percent(&self) -> u32 {
        (self.weighted_confidence * 100.0).round() as u32
    }
}

/// Build the final result from the synthesizer's answer and analyst verdicts.
pub fn synthesize(input: SynthesisInput<'_>, weights: &Weights) -> FinalResult {
    let records = effective_records(&input.worker_verdicts);
    let weighted = weighted_confidence(&records, weights);

    let (label, summary, synthesis_error) = match input.synthesis_output {
        Some(text) => {
            let label = extract_verdict_label(text);
            let error = (!label.is_resolved())
                .then(|| "No verdict label found in the synthesis output".to_string());
            (label, final_answer(text).to_string(), error)
        }
        None => (
            VerdictLabel::Unresolved,
            String::new(),
            Some(
                input
                    .synthesis_error
                    .unwrap_or("Synthesis produced no output")
                    .to_string(),
            ),
        ),
    };

    if let Some(reason) = &synthesis_error {
        warn!(session = %input.session_id, reason = %reason, "Synthesis is unresolved");
    }

    let reporting_roles: Vec<WorkerRole> = records.keys().copied().collect();
    let missing_roles: Vec<WorkerRole> = input
        .panel
        .iter()
        .copied()
        .filter(|r| !records.contains_key(r))
        .collect();

    let any_failed = input
        .worker_verdicts
        .iter()
        .any(|v| v.status == TaskStatus::Failed);

    let mut tool_usage = BTreeMap::new();
    for call in &input.tool_log {
        *tool_usage.entry(call.tool.clone()).or_insert(0) += 1;
    }

    FinalResult {
        session_id: input.session_id,
        statement: input.statement.to_string(),
        degraded: any_failed || !input.run_summary.all_success() || synthesis_error.is_some(),
        label,
        weighted_confidence: weighted,
        summary,
        worker_verdicts: input.worker_verdicts,
        reporting_roles,
        missing_roles,
        weights: weights.clone(),
        tool_log: input.tool_log,
        tool_usage,
        synthesis_error,
        run_summary: input.run_summary,
        completed_at: Utc::now(),
    }
}
