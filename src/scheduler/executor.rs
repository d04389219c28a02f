//! The session controller.
//!
//! [`SessionRunner::run`] is the single logical controller of a session. It
//! walks the phases through the [`PhaseScheduler`], invokes one worker at a
//! time on its own thread, feeds every transcript snapshot to the store and
//! publishes what the extractor finds. No lock is held while a worker runs.
//!
//! Cancellation is checked at task boundaries. A task already running when
//! the token fires runs to completion (or its deadline), and its output is
//! then discarded.

use super::scheduler::PhaseScheduler;
use super::state::{ExecutionTimer, SessionStatus, SessionSummary, StatusHandle, TaskResult};
use crate::errors::WorkerError;
use crate::stream::EventPublisher;
use crate::synth::{FinalResult, SynthesisInput, WorkerVerdict, extract_verdict_record, synthesize};
use crate::tracker::{SessionStore, TaskKey, TaskStatus};
use crate::transcript::TranscriptEvent;
use crate::worker::{TranscriptSink, Worker, WorkerRequest};
use serde_json::{Map, Value, json};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tribunal_common::{EventKind, EventRecord, Phase, SessionId, WorkerRole};

/// How a session ended.
#[derive(Debug, Clone)]
pub enum SessionOutcome {
    Completed(Box<FinalResult>),
    Cancelled { phase: Phase },
    Failed { error: String },
}

impl SessionOutcome {
    pub fn status(&self) -> SessionStatus {
        match self {
            Self::Completed(_) => SessionStatus::Completed,
            Self::Cancelled { phase } => SessionStatus::Cancelled { phase: *phase },
            Self::Failed { error } => SessionStatus::Failed {
                error: error.clone(),
            },
        }
    }

    pub fn result(&self) -> Option<&FinalResult> {
        match self {
            Self::Completed(result) => Some(result),
            _ => None,
        }
    }
}

/// Messages from a worker thread to the controller.
enum WorkerMessage {
    Snapshot(String),
    Finished(Result<String, WorkerError>),
}

/// Forwards transcript snapshots to the controller.
struct ChannelSink {
    tx: mpsc::Sender<WorkerMessage>,
}

impl TranscriptSink for ChannelSink {
    fn update(&mut self, transcript: &str) {
        // The controller stops listening after a deadline; later snapshots are moot.
        let _ = self.tx.send(WorkerMessage::Snapshot(transcript.to_string()));
    }
}

/// Runs one session from the first phase to its final result.
pub struct SessionRunner {
    id: SessionId,
    store: Arc<SessionStore>,
    worker: Arc<dyn Worker>,
    publisher: EventPublisher,
    cancel: CancellationToken,
    scheduler: PhaseScheduler,
    status: StatusHandle,
}

impl SessionRunner {
    /// The session must already be open in `store`.
    pub fn new(
        id: SessionId,
        store: Arc<SessionStore>,
        worker: Arc<dyn Worker>,
        publisher: EventPublisher,
        scheduler: PhaseScheduler,
    ) -> Self {
        Self {
            id,
            store,
            worker,
            publisher,
            cancel: CancellationToken::new(),
            scheduler,
            status: StatusHandle::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_status(mut self, status: StatusHandle) -> Self {
        self.status = status;
        self
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn status_handle(&self) -> StatusHandle {
        self.status.clone()
    }

    /// Drive the session to completion, cancellation or failure.
    pub fn run(mut self) -> SessionOutcome {
        let timer = ExecutionTimer::start();
        let mut summary = SessionSummary::default();

        let statement = match self.store.statement(self.id) {
            Ok(statement) => statement,
            Err(e) => return self.fail(e.to_string()),
        };
        info!(session = %self.id, "Session started");

        while let Some(phase) = self.scheduler.next_phase() {
            if self.cancel.is_cancelled() {
                return self.cancelled(phase);
            }
            self.status.set(SessionStatus::Running { phase });

            let roles = match self.scheduler.begin_phase(&self.store, self.id, phase) {
                Ok(roles) => roles,
                Err(e) => return self.fail(e.to_string()),
            };
            self.emit(
                EventRecord::new(
                    self.id,
                    EventKind::PhaseStart,
                    json!({ "description": phase.description(), "roles": roles }),
                )
                .with_phase(phase),
            );

            for (position, role) in roles.iter().enumerate() {
                if self.cancel.is_cancelled() {
                    self.discard_unstarted(phase, &roles[position..]);
                    return self.cancelled(phase);
                }
                let result = self.run_task(phase, *role, &statement);
                let discarded = result.status == TaskStatus::Discarded;
                summary.add_result(result);
                if discarded {
                    self.discard_unstarted(phase, &roles[position + 1..]);
                    return self.cancelled(phase);
                }
            }

            if let Err(e) = self.scheduler.complete_phase(&self.store, self.id, phase) {
                return self.fail(e.to_string());
            }
            self.emit_phase_complete(phase);
        }

        summary.duration = timer.elapsed();
        match self.finish(&statement, summary) {
            Ok(result) => {
                self.status.set(SessionStatus::Completed);
                info!(
                    session = %self.id,
                    label = %result.label,
                    confidence = result.weighted_confidence,
                    degraded = result.degraded,
                    "Session completed"
                );
                SessionOutcome::Completed(Box::new(result))
            }
            Err(e) => self.fail(e),
        }
    }

    /// Run one task under the per-task deadline.
    fn run_task(&self, phase: Phase, role: WorkerRole, statement: &Arc<str>) -> TaskResult {
        let key = TaskKey::new(phase, role);
        let started = Instant::now();

        let context = match self
            .scheduler
            .materialize_context(&self.store, self.id, key)
            .and_then(|context| {
                self.store
                    .begin_task(self.id, phase, role, context.clone())
                    .map(|_| context)
            }) {
            Ok(context) => context,
            Err(e) => return self.fail_task(key, &e.to_string(), started),
        };
        debug!(session = %self.id, phase = %phase, role = %role, context = context.len(), "Starting task");

        let request = WorkerRequest {
            session_id: self.id,
            phase,
            role,
            statement: Arc::clone(statement),
            context,
        };

        let (tx, rx) = mpsc::channel();
        let worker = Arc::clone(&self.worker);
        let spawned = std::thread::Builder::new()
            .name(format!("tribunal-{}-{}", role.as_str(), phase.as_str()))
            .spawn(move || {
                let mut sink = ChannelSink { tx: tx.clone() };
                let result = panic::catch_unwind(AssertUnwindSafe(|| {
                    worker.invoke(&request, &mut sink)
                }))
                .unwrap_or(Err(WorkerError::Panicked));
                let _ = tx.send(WorkerMessage::Finished(result));
            });
        if let Err(e) = spawned {
            return self.fail_task(key, &format!("Failed to spawn worker thread: {}", e), started);
        }

        let deadline = self.scheduler.config().deadline;
        // A deadline past the end of the clock never expires.
        let deadline_at = started.checked_add(deadline);
        let finished = loop {
            let received = match deadline_at {
                Some(at) => rx.recv_timeout(at.saturating_duration_since(Instant::now())),
                None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };
            match received {
                Ok(WorkerMessage::Snapshot(text)) => {
                    if self.cancel.is_cancelled() {
                        continue;
                    }
                    match self.store.record_output(self.id, phase, role, &text) {
                        Ok(outcome) => self.emit_transcript_events(phase, role, &outcome.events),
                        Err(e) => warn!(session = %self.id, phase = %phase, role = %role, error = %e, "Failed to record output"),
                    }
                }
                Ok(WorkerMessage::Finished(result)) => break result,
                Err(RecvTimeoutError::Timeout) => break Err(WorkerError::DeadlineExceeded { deadline }),
                Err(RecvTimeoutError::Disconnected) => break Err(WorkerError::Disconnected),
            }
        };

        if self.cancel.is_cancelled() {
            if let Err(e) = self.store.discard(self.id, phase, role) {
                warn!(session = %self.id, phase = %phase, role = %role, error = %e, "Failed to discard output");
            }
            info!(session = %self.id, phase = %phase, role = %role, "Discarded output of a task that ran past cancellation");
            return TaskResult::discarded(key, started.elapsed());
        }

        match finished {
            Ok(text) => {
                let verdict = if phase.is_analyst_phase() {
                    extract_verdict_record(&text)
                } else {
                    None
                };
                match self.store.finalize_output(self.id, phase, role, &text, verdict) {
                    Ok(outcome) => self.emit_transcript_events(phase, role, &outcome.events),
                    Err(e) => return self.fail_task(key, &e.to_string(), started),
                }
                if phase.is_analyst_phase() && verdict.is_none() {
                    debug!(session = %self.id, phase = %phase, role = %role, "No verdict record in worker output");
                }
                let tool_calls = self
                    .store
                    .worker_state(self.id, phase, role)
                    .map(|w| w.tool_calls.len())
                    .unwrap_or_default();
                let result = TaskResult::completed(key, tool_calls, started.elapsed());
                self.emit_worker_complete(&result);
                result
            }
            Err(e @ WorkerError::DeadlineExceeded { .. }) => {
                warn!(session = %self.id, phase = %phase, role = %role, ?deadline, "Worker exceeded its deadline");
                self.expire_task(key, &e.to_string(), started)
            }
            Err(e) => self.fail_task(key, &e.to_string(), started),
        }
    }

    fn fail_task(&self, key: TaskKey, reason: &str, started: Instant) -> TaskResult {
        warn!(session = %self.id, phase = %key.phase, role = %key.role, reason = %reason, "Task failed");
        if let Err(e) = self.store.mark_failed(self.id, key.phase, key.role, reason) {
            error!(session = %self.id, task = %key, error = %e, "Failed to mark task failed");
        }
        let result = TaskResult::failed(key, reason, started.elapsed());
        self.emit_worker_complete(&result);
        result
    }

    /// Deadline expiry wins over any completion the worker reported earlier.
    fn expire_task(&self, key: TaskKey, reason: &str, started: Instant) -> TaskResult {
        if let Err(e) = self.store.mark_expired(self.id, key.phase, key.role, reason) {
            error!(session = %self.id, task = %key, error = %e, "Failed to mark task expired");
        }
        let result = TaskResult::failed(key, reason, started.elapsed());
        self.emit_worker_complete(&result);
        result
    }

    fn discard_unstarted(&self, phase: Phase, roles: &[WorkerRole]) {
        for role in roles {
            if let Err(e) = self.store.discard(self.id, phase, *role) {
                warn!(session = %self.id, phase = %phase, role = %role, error = %e, "Failed to discard output");
            }
        }
    }

    /// Synthesize the final result from the store.
    fn finish(&self, statement: &str, summary: SessionSummary) -> Result<FinalResult, String> {
        let synthesis = self
            .store
            .worker_state(self.id, Phase::Synthesis, WorkerRole::Synthesizer)
            .map_err(|e| e.to_string())?;

        let mut worker_verdicts = Vec::new();
        for phase in [Phase::Independent, Phase::CrossReview] {
            for role in self.scheduler.tasks_for(phase) {
                let state = self
                    .store
                    .worker_state(self.id, phase, role)
                    .map_err(|e| e.to_string())?;
                worker_verdicts.push(WorkerVerdict {
                    phase,
                    role,
                    status: state.status,
                    verdict: state.verdict,
                    error: state.failure,
                });
            }
        }
        let tool_log = self.store.tool_log(self.id).map_err(|e| e.to_string())?;

        let completed = synthesis.status == TaskStatus::Completed;
        let input = SynthesisInput {
            session_id: self.id,
            statement,
            synthesis_output: completed.then_some(&*synthesis.output),
            synthesis_error: synthesis.failure.as_deref(),
            panel: self.scheduler.graph().panel(),
            worker_verdicts,
            tool_log,
            run_summary: summary,
        };
        let result = synthesize(input, &self.scheduler.config().weights);

        let payload = serde_json::to_value(&result).map_err(|e| e.to_string())?;
        self.emit(
            EventRecord::new(self.id, EventKind::FinalResult, payload)
                .with_phase(Phase::Synthesis)
                .with_role(WorkerRole::Synthesizer),
        );
        Ok(result)
    }

    fn cancelled(&mut self, phase: Phase) -> SessionOutcome {
        let skipped = self.scheduler.skip_remaining();
        warn!(session = %self.id, phase = %phase, skipped = ?skipped, "Session cancelled");
        self.emit(
            EventRecord::new(
                self.id,
                EventKind::Error,
                json!({ "reason": "cancelled", "message": format!("Cancelled during the {} phase", phase) }),
            )
            .with_phase(phase),
        );
        self.status.set(SessionStatus::Cancelled { phase });
        SessionOutcome::Cancelled { phase }
    }

    fn fail(&mut self, error: String) -> SessionOutcome {
        self.scheduler.skip_remaining();
        error!(session = %self.id, error = %error, "Session failed");
        self.emit(EventRecord::new(
            self.id,
            EventKind::Error,
            json!({ "reason": "failed", "message": error }),
        ));
        self.status.set(SessionStatus::Failed {
            error: error.clone(),
        });
        SessionOutcome::Failed { error }
    }

    fn emit(&self, record: EventRecord) {
        self.publisher.publish(record);
    }

    fn emit_transcript_events(&self, phase: Phase, role: WorkerRole, events: &[TranscriptEvent]) {
        for event in events {
            let kind = match event {
                TranscriptEvent::ToolCall { .. } => EventKind::ToolCall,
                TranscriptEvent::ToolResult { .. } => EventKind::ToolResult,
                TranscriptEvent::Completion { .. } => continue,
            };
            let payload = serde_json::to_value(event).unwrap_or(Value::Null);
            self.emit(
                EventRecord::new(self.id, kind, payload)
                    .with_phase(phase)
                    .with_role(role),
            );
        }
    }

    fn emit_worker_complete(&self, result: &TaskResult) {
        let verdict = self
            .store
            .worker_state(self.id, result.phase, result.role)
            .ok()
            .and_then(|w| w.verdict);
        self.emit(
            EventRecord::new(
                self.id,
                EventKind::WorkerComplete,
                json!({
                    "status": result.status,
                    "error": result.error.is_some(),
                    "message": result.error,
                    "verdict": verdict.and_then(|v| v.label),
                    "confidence": verdict.map(|v| v.confidence),
                    "tool_calls": result.tool_calls,
                    "elapsed_ms": result.duration.as_millis() as u64,
                }),
            )
            .with_phase(result.phase)
            .with_role(result.role),
        );
    }

    fn emit_phase_complete(&self, phase: Phase) {
        let statuses: Map<String, Value> = self
            .store
            .phase_statuses(self.id, phase)
            .unwrap_or_default()
            .into_iter()
            .map(|(role, status)| (role.as_str().to_string(), json!(status)))
            .collect();
        self.emit(
            EventRecord::new(
                self.id,
                EventKind::PhaseComplete,
                json!({ "statuses": statuses }),
            )
            .with_phase(phase),
        );
    }
}
