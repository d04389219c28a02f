//! Phase state machine for one session.
//!
//! The scheduler owns the task graph and walks the phases strictly in
//! order. A phase may begin only when the store reports the previous one
//! complete, and contexts are always materialized from the store's
//! completed outputs, never from running tasks.

use super::builder::{TaskGraph, TaskGraphBuilder};
use crate::errors::{GraphError, SessionError, TrackerError};
use crate::tracker::{ContextRef, SessionStore, TaskKey};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::info;
use tribunal_common::{Phase, SessionId, Weights, WorkerRole};

/// Default per-task deadline.
pub const DEFAULT_TASK_DEADLINE: Duration = Duration::from_secs(120);

/// Per-session scheduling parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    /// Deadline for each worker invocation.
    pub deadline: Duration,
    pub weights: Weights,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            deadline: DEFAULT_TASK_DEADLINE,
            weights: Weights::defaults(),
        }
    }
}

impl SchedulerConfig {
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_weights(mut self, weights: Weights) -> Self {
        self.weights = weights;
        self
    }
}

/// Status of a phase within a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PhaseStatus {
    #[default]
    Pending,
    Running { started_at_ms: u64 },
    Completed,
    /// Never ran because the session stopped first.
    Skipped,
}

impl PhaseStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Skipped)
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running { .. })
    }
}

/// Drives one session through Independent → CrossReview → Synthesis.
#[derive(Debug)]
pub struct PhaseScheduler {
    graph: TaskGraph,
    phases: [PhaseStatus; 3],
    config: SchedulerConfig,
}

impl PhaseScheduler {
    /// Build the standard task graph for the panel.
    pub fn from_panel(panel: &[WorkerRole], config: SchedulerConfig) -> Result<Self, GraphError> {
        let graph = TaskGraphBuilder::new(panel.iter().copied()).build()?;
        Ok(Self::from_graph(graph, config))
    }

    pub fn from_graph(graph: TaskGraph, config: SchedulerConfig) -> Self {
        Self {
            graph,
            phases: Default::default(),
            config,
        }
    }

    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn phase_status(&self, phase: Phase) -> &PhaseStatus {
        &self.phases[phase.index()]
    }

    /// Roles scheduled for a phase, in execution order.
    pub fn tasks_for(&self, phase: Phase) -> Vec<WorkerRole> {
        self.graph.roles_in_phase(phase)
    }

    /// The next phase to begin, or `None` once the session is finished.
    pub fn next_phase(&self) -> Option<Phase> {
        if self.phases.iter().any(|s| *s == PhaseStatus::Skipped) {
            return None;
        }
        Phase::ALL
            .into_iter()
            .find(|p| self.phase_status(*p) == &PhaseStatus::Pending)
    }

    /// All phases are completed or skipped.
    pub fn is_finished(&self) -> bool {
        self.phases.iter().all(PhaseStatus::is_terminal)
    }

    /// Schedule a phase's tasks in the store and mark it running.
    ///
    /// Fails unless the previous phase is completed both here and in the
    /// store.
    pub fn begin_phase(
        &mut self,
        store: &SessionStore,
        id: SessionId,
        phase: Phase,
    ) -> Result<Vec<WorkerRole>, SessionError> {
        if self.phase_status(phase) != &PhaseStatus::Pending {
            return Err(SessionError::PhaseOutOfOrder { phase });
        }
        if let Some(previous) = phase.previous() {
            let ready = self.phase_status(previous) == &PhaseStatus::Completed
                && store.is_phase_complete(id, previous)?;
            if !ready {
                return Err(SessionError::PhaseOutOfOrder { phase });
            }
        }

        let roles = self.tasks_for(phase);
        store.schedule_phase(id, phase, &roles)?;
        self.phases[phase.index()] = PhaseStatus::Running {
            started_at_ms: now_ms(),
        };
        info!(session = %id, phase = %phase, tasks = roles.len(), "Phase started");
        Ok(roles)
    }

    /// Mark a running phase completed once the store agrees.
    pub fn complete_phase(
        &mut self,
        store: &SessionStore,
        id: SessionId,
        phase: Phase,
    ) -> Result<(), SessionError> {
        if !self.phase_status(phase).is_running() || !store.is_phase_complete(id, phase)? {
            return Err(SessionError::PhaseOutOfOrder { phase });
        }
        self.phases[phase.index()] = PhaseStatus::Completed;
        info!(session = %id, phase = %phase, "Phase completed");
        Ok(())
    }

    /// Skip every phase that has not finished. Returns the skipped phases.
    pub fn skip_remaining(&mut self) -> Vec<Phase> {
        let mut skipped = Vec::new();
        for phase in Phase::ALL {
            let status = &mut self.phases[phase.index()];
            if !status.is_terminal() {
                *status = PhaseStatus::Skipped;
                skipped.push(phase);
            }
        }
        skipped
    }

    /// Build a task's context from the outputs already recorded upstream.
    ///
    /// Upstream tasks that failed contribute nothing. The order follows the
    /// graph's read order.
    pub fn materialize_context(
        &self,
        store: &SessionStore,
        id: SessionId,
        key: TaskKey,
    ) -> Result<Vec<ContextRef>, TrackerError> {
        let reads = self.graph.context_keys(key);
        let mut recorded: HashMap<TaskKey, ContextRef> = HashMap::new();
        let mut loaded = Vec::new();
        for read in reads {
            if !loaded.contains(&read.phase) {
                loaded.push(read.phase);
                recorded.extend(
                    store
                        .completed_outputs(id, read.phase)?
                        .into_iter()
                        .map(|c| (c.key(), c)),
                );
            }
        }
        Ok(reads.iter().filter_map(|k| recorded.remove(k)).collect())
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
