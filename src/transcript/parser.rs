//! Event extraction from worker transcripts.
//!
//! Workers write ReAct-style transcripts:
//! - `Action: <tool>` followed by `Action Input: <input>` is a tool call
//! - `Observation: <output>` up to the next marker is that call's result
//! - any configured completion marker ends the task
//!
//! The same growing transcript may be fed in many times. Extraction is
//! driven by an [`ExtractCursor`] so each event comes out exactly once.

use super::types::{ExtractCursor, ExtractorConfig, TranscriptEvent};
use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

static ACTION_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*Action:\s*(.*?)\s*$").unwrap());

static ACTION_INPUT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*Action Input:\s*(.*?)\s*$").unwrap());

static OBSERVATION_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*Observation:\s*(.*?)\s*$").unwrap());

// Any of these at line start closes an open observation.
static SEGMENT_END_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:Thought:|Action:|Action Input:|Observation:|(?:Agent\s+)?Final Answer)")
        .unwrap()
});

static FINAL_ANSWER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Final Answer:?").unwrap());

/// Extracts [`TranscriptEvent`]s from worker transcripts.
#[derive(Debug, Clone, Default)]
pub struct TranscriptExtractor {
    config: ExtractorConfig,
}

impl TranscriptExtractor {
    pub fn new(config: ExtractorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    /// Return the events that became observable since the cursor last moved.
    ///
    /// The transcript may still be growing, so a trailing line without a
    /// newline is ignored and an observation is only reported once a later
    /// marker closes it.
    pub fn extract(&self, cursor: &mut ExtractCursor, text: &str) -> Vec<TranscriptEvent> {
        self.advance(cursor, text, false)
    }

    /// Like [`extract`](Self::extract), but treats `text` as the final transcript:
    /// the trailing line counts and an open observation runs to the end.
    pub fn finalize(&self, cursor: &mut ExtractCursor, text: &str) -> Vec<TranscriptEvent> {
        self.advance(cursor, text, true)
    }

    /// All events in a finished transcript.
    pub fn parse(&self, text: &str) -> Vec<TranscriptEvent> {
        self.finalize(&mut ExtractCursor::new(), text)
    }

    /// The first completion marker present in `text`, if any.
    pub fn completion_marker(&self, text: &str) -> Option<&str> {
        self.config
            .completion_markers
            .iter()
            .filter(|m| !m.is_empty())
            .filter_map(|m| text.find(m.as_str()).map(|pos| (pos, m.as_str())))
            .min_by_key(|(pos, _)| *pos)
            .map(|(_, m)| m)
    }

    fn advance(
        &self,
        cursor: &mut ExtractCursor,
        text: &str,
        finished: bool,
    ) -> Vec<TranscriptEvent> {
        let mut fresh: Vec<TranscriptEvent> = self
            .scan_tools(text, finished)
            .into_iter()
            .skip(cursor.tool_events)
            .collect();
        cursor.tool_events += fresh.len();

        if !cursor.completed
            && let Some(marker) = self.completion_marker(text)
        {
            cursor.completed = true;
            fresh.push(TranscriptEvent::Completion {
                marker: marker.to_string(),
            });
        }

        fresh
    }

    /// Every tool call and result in `text`, in the order they close.
    fn scan_tools(&self, text: &str, finished: bool) -> Vec<TranscriptEvent> {
        let body = if finished || text.ends_with('\n') {
            text
        } else {
            match text.rfind('\n') {
                Some(i) => &text[..=i],
                None => "",
            }
        };

        let mut events = Vec::new();
        let mut next_index = 1;
        let mut action: Option<String> = None;
        let mut unanswered: Vec<(usize, String)> = Vec::new();
        let mut observation: Option<Vec<&str>> = None;

        for line in body.lines() {
            if observation.is_some() {
                if !SEGMENT_END_REGEX.is_match(line) {
                    if let Some(lines) = observation.as_mut() {
                        lines.push(line);
                    }
                    continue;
                }
                if let Some(lines) = observation.take() {
                    self.close_observation(&lines, &mut unanswered, &mut events);
                }
            }

            if let Some(cap) = ACTION_INPUT_REGEX.captures(line) {
                let input = cap.get(1).map_or("", |m| m.as_str()).to_string();
                match action.take() {
                    Some(tool) => {
                        unanswered.push((next_index, tool.clone()));
                        events.push(TranscriptEvent::ToolCall {
                            call_index: next_index,
                            tool,
                            input,
                        });
                        next_index += 1;
                    }
                    None => debug!("Skipping action input without a preceding action"),
                }
            } else if let Some(cap) = ACTION_REGEX.captures(line) {
                let tool = cap.get(1).map_or("", |m| m.as_str());
                if tool.is_empty() {
                    action = None;
                    continue;
                }
                if let Some(dropped) = action.replace(tool.to_string()) {
                    debug!(tool = %dropped, "Dropping action without input");
                }
            } else if let Some(cap) = OBSERVATION_REGEX.captures(line) {
                observation = Some(vec![cap.get(1).map_or("", |m| m.as_str())]);
            }
        }

        if finished && let Some(lines) = observation.take() {
            self.close_observation(&lines, &mut unanswered, &mut events);
        }

        events
    }

    fn close_observation(
        &self,
        lines: &[&str],
        unanswered: &mut Vec<(usize, String)>,
        events: &mut Vec<TranscriptEvent>,
    ) {
        let Some((call_index, tool)) = unanswered.pop() else {
            debug!("Skipping observation without a pending tool call");
            return;
        };
        let joined = lines.join("\n");
        let (output, truncated) = truncate_chars(joined.trim(), self.config.max_observation_chars);
        events.push(TranscriptEvent::ToolResult {
            call_index,
            tool,
            output,
            truncated,
        });
    }
}

/// Cut `text` to at most `max` characters, never splitting a character.
pub fn truncate_chars(text: &str, max: usize) -> (String, bool) {
    match text.char_indices().nth(max) {
        Some((end, _)) => (text[..end].to_string(), true),
        None => (text.to_string(), false),
    }
}

/// The answer portion of a transcript: whatever follows the last
/// `Final Answer` marker, or the whole text when there is none.
pub fn final_answer(text: &str) -> &str {
    match FINAL_ANSWER_REGEX.find_iter(text).last() {
        Some(m) => text[m.end()..].trim(),
        None => text.trim(),
    }
}

/// Extract every event from a finished transcript with default settings.
pub fn extract_events(text: &str) -> Vec<TranscriptEvent> {
    TranscriptExtractor::default().parse(text)
}
