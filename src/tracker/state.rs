//! Per-task and per-phase state held by the session store.

use crate::transcript::ExtractCursor;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tribunal_common::{Phase, SessionId, VerdictRecord, WorkerRole};

/// Identifies one task within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskKey {
    pub phase: Phase,
    pub role: WorkerRole,
}

impl TaskKey {
    pub fn new(phase: Phase, role: WorkerRole) -> Self {
        Self { phase, role }
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.role, self.phase)
    }
}

/// Lifecycle of a single task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    /// Ran while the session was cancelled; its output was thrown away.
    Discarded,
}

impl TaskStatus {
    /// Completed and failed tasks both count toward phase completion.
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Discarded => "discarded",
        };
        f.write_str(s)
    }
}

/// A recorded output that a later task may read.
///
/// Only ever built from completed tasks, so `completed_at` is always set.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextRef {
    pub phase: Phase,
    pub role: WorkerRole,
    pub completed_at: DateTime<Utc>,
    pub output: Arc<str>,
    pub verdict: Option<VerdictRecord>,
}

impl ContextRef {
    pub fn key(&self) -> TaskKey {
        TaskKey::new(self.phase, self.role)
    }
}

/// One tool call observed in a transcript, with its result once seen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub phase: Phase,
    pub role: WorkerRole,
    pub call_index: usize,
    pub tool: String,
    pub input: String,
    /// `None` while the result is pending.
    #[serde(default)]
    pub result: Option<String>,
    pub called_at: DateTime<Utc>,
}

impl ToolInvocation {
    pub fn is_pending(&self) -> bool {
        self.result.is_none()
    }
}

/// State of one (phase, role) task.
#[derive(Debug, Clone)]
pub struct WorkerState {
    pub status: TaskStatus,
    /// Latest transcript snapshot.
    pub output: Arc<str>,
    pub verdict: Option<VerdictRecord>,
    pub failure: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// What the task was allowed to read when it started.
    pub context: Vec<ContextRef>,
    pub tool_calls: Vec<ToolInvocation>,
    pub(crate) cursor: ExtractCursor,
}

impl WorkerState {
    pub(crate) fn pending() -> Self {
        Self {
            status: TaskStatus::Pending,
            output: Arc::from(""),
            verdict: None,
            failure: None,
            started_at: None,
            completed_at: None,
            context: Vec::new(),
            tool_calls: Vec::new(),
            cursor: ExtractCursor::new(),
        }
    }

    pub fn is_done(&self) -> bool {
        self.status.is_done()
    }
}

/// State of one phase: which roles it scheduled and how far they got.
#[derive(Debug, Default)]
pub(crate) struct PhaseState {
    pub(crate) roles: OnceLock<Vec<WorkerRole>>,
    pub(crate) workers: DashMap<WorkerRole, WorkerState>,
    signalled: AtomicBool,
}

impl PhaseState {
    pub(crate) fn roles(&self) -> &[WorkerRole] {
        self.roles.get().map(Vec::as_slice).unwrap_or_default()
    }

    pub(crate) fn all_done(&self) -> bool {
        let Some(roles) = self.roles.get() else {
            return false;
        };
        roles
            .iter()
            .all(|role| self.workers.get(role).is_some_and(|w| w.is_done()))
    }

    /// True for exactly one caller, the first to observe every task done.
    pub(crate) fn signal_if_complete(&self) -> bool {
        self.all_done()
            && self
                .signalled
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
    }
}

/// Everything the store knows about one session.
#[derive(Debug)]
pub(crate) struct SessionRecord {
    pub(crate) id: SessionId,
    pub(crate) statement: Arc<str>,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) phases: [PhaseState; 3],
}

impl SessionRecord {
    pub(crate) fn new(id: SessionId, statement: Arc<str>) -> Self {
        Self {
            id,
            statement,
            created_at: Utc::now(),
            phases: Default::default(),
        }
    }

    pub(crate) fn phase(&self, phase: Phase) -> &PhaseState {
        &self.phases[phase.index()]
    }
}
