//! Event types produced by the transcript extractor.

use serde::{Deserialize, Serialize};

/// Markers that end a worker's task when they appear anywhere in its transcript.
pub const DEFAULT_COMPLETION_MARKERS: [&str; 4] = [
    "Final Answer:",
    "Agent Final Answer",
    "✅ Completed",
    "Task Completed",
];

/// Tool output longer than this is cut before it goes on the event stream.
pub const DEFAULT_MAX_OBSERVATION_CHARS: usize = 500;

/// A structured event recognized in a worker transcript.
///
/// "No event" is an empty result vector, never a variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TranscriptEvent {
    /// An `Action:` / `Action Input:` pair.
    ToolCall {
        /// Position of the call in the transcript, starting at 1.
        call_index: usize,
        tool: String,
        input: String,
    },
    /// An `Observation:` paired with the most recent unanswered call.
    ToolResult {
        call_index: usize,
        tool: String,
        output: String,
        #[serde(default)]
        truncated: bool,
    },
    /// One of the completion markers. Emitted at most once per task.
    Completion { marker: String },
}

impl TranscriptEvent {
    pub fn is_completion(&self) -> bool {
        matches!(self, Self::Completion { .. })
    }

    /// Tool name for call and result events.
    pub fn tool(&self) -> Option<&str> {
        match self {
            Self::ToolCall { tool, .. } | Self::ToolResult { tool, .. } => Some(tool),
            Self::Completion { .. } => None,
        }
    }
}

/// Extraction settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractorConfig {
    pub completion_markers: Vec<String>,
    pub max_observation_chars: usize,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            completion_markers: DEFAULT_COMPLETION_MARKERS
                .iter()
                .map(|m| m.to_string())
                .collect(),
            max_observation_chars: DEFAULT_MAX_OBSERVATION_CHARS,
        }
    }
}

/// How far extraction has progressed for one (session, phase, role) task.
///
/// The cursor is what makes extraction idempotent: events already counted
/// here are never returned again.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractCursor {
    /// Number of tool call/result events already returned.
    pub tool_events: usize,
    /// Whether the completion event has been returned.
    pub completed: bool,
}

impl ExtractCursor {
    pub fn new() -> Self {
        Self::default()
    }
}
