//! Worker invocation boundary.
//!
//! A [`Worker`] is called once per task on its own thread and blocks until
//! it has a transcript. Incremental workers report the growing transcript
//! through the [`TranscriptSink`] as they go; single-shot workers just
//! return the final text.

mod replay;

pub use replay::ReplayWorker;

use crate::errors::WorkerError;
use crate::tracker::ContextRef;
use std::sync::Arc;
use tribunal_common::{Phase, SessionId, WorkerRole};

/// Everything a worker is given for one task. Owned, so no two tasks share
/// mutable state.
#[derive(Debug, Clone)]
pub struct WorkerRequest {
    pub session_id: SessionId,
    pub phase: Phase,
    pub role: WorkerRole,
    pub statement: Arc<str>,
    /// Upstream outputs this task may read, in scheduling order.
    pub context: Vec<ContextRef>,
}

impl WorkerRequest {
    /// Render the context as plain text, one section per upstream output.
    pub fn context_text(&self) -> String {
        self.context
            .iter()
            .map(|c| format!("## {} ({})\n{}", c.role.display_name(), c.phase, c.output))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Receives transcript snapshots while a worker runs.
pub trait TranscriptSink {
    /// Report the full transcript so far. Each call supersedes the last.
    fn update(&mut self, transcript: &str);
}

/// Sink that ignores every snapshot.
#[derive(Debug, Default)]
pub struct DiscardSink;

impl TranscriptSink for DiscardSink {
    fn update(&mut self, _transcript: &str) {}
}

/// A blocking worker invocation.
pub trait Worker: Send + Sync {
    fn invoke(
        &self,
        request: &WorkerRequest,
        sink: &mut dyn TranscriptSink,
    ) -> Result<String, WorkerError>;
}

impl<F> Worker for F
where
    F: Fn(&WorkerRequest, &mut dyn TranscriptSink) -> Result<String, WorkerError> + Send + Sync,
{
    fn invoke(
        &self,
        request: &WorkerRequest,
        sink: &mut dyn TranscriptSink,
    ) -> Result<String, WorkerError> {
        self(request, sink)
    }
}
