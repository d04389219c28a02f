//! Typed error hierarchy for the Tribunal coordinator.
//!
//! One enum per subsystem:
//! - `SessionError`: public session API failures
//! - `WorkerError`: a blocking worker invocation failed
//! - `TrackerError`: state tracker lookups for unknown sessions or tasks
//! - `GraphError`: task graph validation failures
//! - `DeliveryError`: an event subscriber could not take a record

use std::time::Duration;
use thiserror::Error;
use tribunal_common::{InvalidWeight, Phase, SessionId, WorkerRole};

/// Errors from the session API (`start_session`, `get_result`, `cancel`).
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session {id} not found")]
    NotFound { id: SessionId },

    #[error("Session {id} has not produced a result yet")]
    NotReady { id: SessionId },

    #[error("Session {id} was cancelled during the {phase} phase")]
    Cancelled { id: SessionId, phase: Phase },

    #[error("Session {id} failed: {message}")]
    Failed { id: SessionId, message: String },

    #[error("Statement must not be empty")]
    EmptyStatement,

    #[error("Statement is {len} characters long, the limit is {max}")]
    StatementTooLong { len: usize, max: usize },

    #[error("Per-task deadline must be greater than zero")]
    InvalidDeadline,

    #[error("The {phase} phase cannot start before the previous phase is complete")]
    PhaseOutOfOrder { phase: Phase },

    #[error(transparent)]
    InvalidWeight(#[from] InvalidWeight),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Tracker(#[from] TrackerError),

    #[error("Failed to spawn session controller thread: {0}")]
    SpawnFailed(#[source] std::io::Error),
}

/// Errors from a single blocking worker invocation.
#[derive(Debug, Clone, Error)]
pub enum WorkerError {
    #[error("Worker failed: {0}")]
    Failed(String),

    #[error("No worker available for {role} in the {phase} phase: {reason}")]
    Unavailable {
        phase: Phase,
        role: WorkerRole,
        reason: String,
    },

    #[error("Worker exceeded its deadline of {deadline:?}")]
    DeadlineExceeded { deadline: Duration },

    #[error("Worker panicked")]
    Panicked,

    #[error("Worker thread disconnected without a result")]
    Disconnected,
}

/// Errors from the state tracker.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackerError {
    #[error("Unknown session {0}")]
    UnknownSession(SessionId),

    #[error("Task {role} in the {phase} phase was never scheduled")]
    UnscheduledTask { phase: Phase, role: WorkerRole },

    #[error("The {phase} phase is already scheduled")]
    AlreadyScheduled { phase: Phase },
}

/// Errors from task graph construction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("The analyst panel is empty")]
    EmptyPanel,

    #[error("The synthesizer cannot sit on the analyst panel")]
    SynthesizerInPanel,

    #[error("Duplicate task {role} in the {phase} phase")]
    DuplicateTask { phase: Phase, role: WorkerRole },

    #[error("Task {role}/{phase} reads its own output")]
    SelfReference { phase: Phase, role: WorkerRole },

    #[error("Task {role}/{phase} reads {dep_role}/{dep_phase}, which does not run earlier")]
    ForwardReference {
        phase: Phase,
        role: WorkerRole,
        dep_phase: Phase,
        dep_role: WorkerRole,
    },

    #[error("Task {role}/{phase} depends on unknown task {dep_role}/{dep_phase}")]
    UnknownDependency {
        phase: Phase,
        role: WorkerRole,
        dep_phase: Phase,
        dep_role: WorkerRole,
    },

    #[error("Cycle detected in task dependencies. Involved tasks: {tasks:?}")]
    Cycle { tasks: Vec<String> },
}

/// Errors from delivering a record to a subscriber.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("No subscribers are listening")]
    NoSubscribers,

    #[error("Subscriber channel is closed")]
    Closed,

    #[error("Failed to serialize event: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Failed to write event: {0}")]
    Io(#[from] std::io::Error),
}
