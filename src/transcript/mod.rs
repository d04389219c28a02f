//! Transcript event extraction.
//!
//! Turns the raw, incrementally growing text of a worker into tagged events:
//!
//! - `ToolCall` for an `Action:` / `Action Input:` pair
//! - `ToolResult` for the `Observation:` that answers it
//! - `Completion` when a completion marker appears
//!
//! Extraction is independent of the scheduler; callers keep one
//! [`ExtractCursor`] per task.

mod parser;
mod types;

pub use parser::{TranscriptExtractor, extract_events, final_answer, truncate_chars};
pub use types::{
    DEFAULT_COMPLETION_MARKERS, DEFAULT_MAX_OBSERVATION_CHARS, ExtractCursor, ExtractorConfig,
    TranscriptEvent,
};
