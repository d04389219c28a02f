//! The session store: Session → PhaseState → WorkerState.
//!
//! All state is keyed by the (session, phase, role) triple the scheduler
//! assigned. Different keys can be written concurrently; a single key is
//! last-writer-wins, and its completion flag only moves false → true.

use super::state::{
    ContextRef, PhaseState, SessionRecord, TaskStatus, ToolInvocation, WorkerState,
};
use crate::errors::TrackerError;
use crate::transcript::{TranscriptEvent, TranscriptExtractor};
use chrono::Utc;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;
use tribunal_common::{Phase, SessionId, VerdictRecord, WorkerRole};

/// What a single output update produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordOutcome {
    /// Events observable for the first time.
    pub events: Vec<TranscriptEvent>,
    /// The task went from not-done to done on this call.
    pub newly_completed: bool,
    /// This call completed the phase. True at most once per phase.
    pub phase_completed: bool,
}

/// Concurrency-safe arena of per-session state.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: DashMap<SessionId, Arc<SessionRecord>>,
    extractor: TranscriptExtractor,
}

impl SessionStore {
    pub fn new(extractor: TranscriptExtractor) -> Self {
        Self {
            sessions: DashMap::new(),
            extractor,
        }
    }

    pub fn extractor(&self) -> &TranscriptExtractor {
        &self.extractor
    }

    /// Create the arena for a session. Re-opening an existing id is a no-op.
    pub fn open_session(&self, id: SessionId, statement: Arc<str>) {
        self.sessions
            .entry(id)
            .or_insert_with(|| Arc::new(SessionRecord::new(id, statement)));
    }

    /// Drop all state for a session. Returns whether it existed.
    pub fn remove(&self, id: SessionId) -> bool {
        self.sessions.remove(&id).is_some()
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn statement(&self, id: SessionId) -> Result<Arc<str>, TrackerError> {
        Ok(self.session(id)?.statement.clone())
    }

    /// Fix the set of roles a phase waits for.
    pub fn schedule_phase(
        &self,
        id: SessionId,
        phase: Phase,
        roles: &[WorkerRole],
    ) -> Result<(), TrackerError> {
        let session = self.session(id)?;
        let state = session.phase(phase);
        state
            .roles
            .set(roles.to_vec())
            .map_err(|_| TrackerError::AlreadyScheduled { phase })?;
        for role in roles {
            state.workers.insert(*role, WorkerState::pending());
        }
        debug!(session = %session.id, phase = %phase, roles = roles.len(), "Scheduled phase");
        Ok(())
    }

    pub fn scheduled_roles(&self, id: SessionId, phase: Phase) -> Result<Vec<WorkerRole>, TrackerError> {
        Ok(self.session(id)?.phase(phase).roles().to_vec())
    }

    /// Mark a task as running with the context it was given.
    pub fn begin_task(
        &self,
        id: SessionId,
        phase: Phase,
        role: WorkerRole,
        context: Vec<ContextRef>,
    ) -> Result<(), TrackerError> {
        self.with_worker(id, phase, role, |worker| {
            worker.status = TaskStatus::Running;
            worker.started_at = Some(Utc::now());
            worker.context = context;
        })
        .map(|_| ())
    }

    /// Store the latest transcript snapshot and extract new events.
    pub fn record_output(
        &self,
        id: SessionId,
        phase: Phase,
        role: WorkerRole,
        text: &str,
    ) -> Result<RecordOutcome, TrackerError> {
        self.update_output(id, phase, role, text, false, None)
    }

    /// Store the transcript the worker returned.
    ///
    /// The task is done after this call even when no completion marker was
    /// ever seen; the returned text is its final snapshot.
    pub fn finalize_output(
        &self,
        id: SessionId,
        phase: Phase,
        role: WorkerRole,
        text: &str,
        verdict: Option<VerdictRecord>,
    ) -> Result<RecordOutcome, TrackerError> {
        self.update_output(id, phase, role, text, true, verdict)
    }

    /// Mark a task done with no verdict. Returns whether this completed the phase.
    pub fn mark_failed(
        &self,
        id: SessionId,
        phase: Phase,
        role: WorkerRole,
        reason: &str,
    ) -> Result<bool, TrackerError> {
        let session = self.session(id)?;
        let changed = self.with_worker(id, phase, role, |worker| {
            if worker.is_done() {
                return false;
            }
            worker.status = TaskStatus::Failed;
            worker.verdict = None;
            worker.failure = Some(reason.to_string());
            worker.completed_at = Some(Utc::now());
            true
        })?;
        Ok(changed && session.phase(phase).signal_if_complete())
    }

    /// Mark a task failed because it ran past its deadline.
    ///
    /// Unlike [`SessionStore::mark_failed`] this also overrides a completion
    /// marker the worker reported before it overran, so the task is never
    /// offered as context. Returns whether this completed the phase.
    pub fn mark_expired(
        &self,
        id: SessionId,
        phase: Phase,
        role: WorkerRole,
        reason: &str,
    ) -> Result<bool, TrackerError> {
        let session = self.session(id)?;
        let was_open = self.with_worker(id, phase, role, |worker| {
            let was_open = !worker.is_done();
            if was_open || worker.status == TaskStatus::Completed {
                worker.status = TaskStatus::Failed;
                worker.verdict = None;
                worker.failure = Some(reason.to_string());
                worker.completed_at = Some(Utc::now());
            }
            was_open
        })?;
        Ok(was_open && session.phase(phase).signal_if_complete())
    }

    /// Throw away the output of a task that ran past cancellation.
    pub fn discard(&self, id: SessionId, phase: Phase, role: WorkerRole) -> Result<(), TrackerError> {
        self.with_worker(id, phase, role, |worker| {
            if !worker.is_done() {
                worker.status = TaskStatus::Discarded;
                worker.output = Arc::from("");
                worker.verdict = None;
                worker.tool_calls.clear();
            }
        })
    }

    /// True iff every role scheduled for the phase is done.
    pub fn is_phase_complete(&self, id: SessionId, phase: Phase) -> Result<bool, TrackerError> {
        Ok(self.session(id)?.phase(phase).all_done())
    }

    /// Outputs of the phase's completed tasks, in scheduling order.
    ///
    /// Failed and unfinished tasks are never included.
    pub fn completed_outputs(
        &self,
        id: SessionId,
        phase: Phase,
    ) -> Result<Vec<ContextRef>, TrackerError> {
        let session = self.session(id)?;
        let state = session.phase(phase);
        Ok(state
            .roles()
            .iter()
            .filter_map(|role| {
                let worker = state.workers.get(role)?;
                if worker.status != TaskStatus::Completed {
                    return None;
                }
                Some(ContextRef {
                    phase,
                    role: *role,
                    completed_at: worker.completed_at?,
                    output: worker.output.clone(),
                    verdict: worker.verdict,
                })
            })
            .collect())
    }

    /// Recorded verdicts of the phase, keyed by role.
    pub fn verdict_records(
        &self,
        id: SessionId,
        phase: Phase,
    ) -> Result<BTreeMap<WorkerRole, VerdictRecord>, TrackerError> {
        let session = self.session(id)?;
        Ok(session
            .phase(phase)
            .workers
            .iter()
            .filter_map(|entry| entry.value().verdict.map(|v| (*entry.key(), v)))
            .collect())
    }

    /// Every tool call of the session, ordered by phase, role, then call order.
    pub fn tool_log(&self, id: SessionId) -> Result<Vec<ToolInvocation>, TrackerError> {
        let session = self.session(id)?;
        let mut log = Vec::new();
        for phase in Phase::ALL {
            let state = session.phase(phase);
            for role in state.roles() {
                if let Some(worker) = state.workers.get(role) {
                    log.extend(worker.tool_calls.iter().cloned());
                }
            }
        }
        Ok(log)
    }

    /// A copy of one task's state.
    pub fn worker_state(
        &self,
        id: SessionId,
        phase: Phase,
        role: WorkerRole,
    ) -> Result<WorkerState, TrackerError> {
        self.with_worker(id, phase, role, |worker| worker.clone())
    }

    /// Status of every scheduled task in a phase.
    pub fn phase_statuses(
        &self,
        id: SessionId,
        phase: Phase,
    ) -> Result<Vec<(WorkerRole, TaskStatus)>, TrackerError> {
        let session = self.session(id)?;
        let state = session.phase(phase);
        Ok(state
            .roles()
            .iter()
            .map(|role| {
                let status = state
                    .workers
                    .get(role)
                    .map_or(TaskStatus::Pending, |w| w.status);
                (*role, status)
            })
            .collect())
    }

    fn session(&self, id: SessionId) -> Result<Arc<SessionRecord>, TrackerError> {
        self.sessions
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(TrackerError::UnknownSession(id))
    }

    fn with_worker<T>(
        &self,
        id: SessionId,
        phase: Phase,
        role: WorkerRole,
        f: impl FnOnce(&mut WorkerState) -> T,
    ) -> Result<T, TrackerError> {
        let session = self.session(id)?;
        let mut worker = session
            .phase(phase)
            .workers
            .get_mut(&role)
            .ok_or(TrackerError::UnscheduledTask { phase, role })?;
        Ok(f(worker.value_mut()))
    }

    fn update_output(
        &self,
        id: SessionId,
        phase: Phase,
        role: WorkerRole,
        text: &str,
        finished: bool,
        verdict: Option<VerdictRecord>,
    ) -> Result<RecordOutcome, TrackerError> {
        let session = self.session(id)?;
        let state: &PhaseState = session.phase(phase);

        let (events, newly_completed) = {
            let mut worker = state
                .workers
                .get_mut(&role)
                .ok_or(TrackerError::UnscheduledTask { phase, role })?;

            if matches!(worker.status, TaskStatus::Failed | TaskStatus::Discarded) {
                debug!(session = %id, phase = %phase, role = %role, "Ignoring output for a closed task");
                return Ok(RecordOutcome::default());
            }

            worker.output = Arc::from(text);
            let events = if finished {
                self.extractor.finalize(&mut worker.cursor, text)
            } else {
                self.extractor.extract(&mut worker.cursor, text)
            };
            apply_tool_events(&mut worker.tool_calls, phase, role, &events);

            if finished && verdict.is_some() {
                worker.verdict = verdict;
            }

            let completion_seen = events.iter().any(TranscriptEvent::is_completion);
            let newly_completed = !worker.is_done() && (completion_seen || finished);
            if newly_completed {
                worker.status = TaskStatus::Completed;
                worker.completed_at = Some(Utc::now());
            }
            (events, newly_completed)
        };

        for event in &events {
            debug!(session = %id, phase = %phase, role = %role, ?event, "Extracted event");
        }

        let phase_completed = newly_completed && state.signal_if_complete();
        Ok(RecordOutcome {
            events,
            newly_completed,
            phase_completed,
        })
    }
}

fn apply_tool_events(
    log: &mut Vec<ToolInvocation>,
    phase: Phase,
    role: WorkerRole,
    events: &[TranscriptEvent],
) {
    for event in events {
        match event {
            TranscriptEvent::ToolCall {
                call_index,
                tool,
                input,
            } => log.push(ToolInvocation {
                phase,
                role,
                call_index: *call_index,
                tool: tool.clone(),
                input: input.clone(),
                result: None,
                called_at: Utc::now(),
            }),
            TranscriptEvent::ToolResult {
                call_index, output, ..
            } => {
                if let Some(call) = log.iter_mut().find(|c| c.call_index == *call_index) {
                    call.result = Some(output.clone());
                }
            }
            TranscriptEvent::Completion { .. } => {}
        }
    }
}
