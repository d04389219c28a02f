//! Execution state tracking for session runs.
//!
//! Session-level status, per-task results and the run summary attached to
//! the final result.

use crate::tracker::{TaskKey, TaskStatus};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tribunal_common::{Phase, WorkerRole};

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionStatus {
    /// Created, controller not yet running.
    #[default]
    Pending,
    Running { phase: Phase },
    Completed,
    Cancelled { phase: Phase },
    Failed { error: String },
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Cancelled { .. } | Self::Failed { .. }
        )
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running { .. })
    }
}

/// Shared, cheaply cloned view of a session's status.
#[derive(Debug, Clone, Default)]
pub struct StatusHandle(Arc<Mutex<SessionStatus>>);

impl StatusHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> SessionStatus {
        self.0.lock().map(|s| s.clone()).unwrap_or_else(|p| p.into_inner().clone())
    }

    pub fn set(&self, status: SessionStatus) {
        match self.0.lock() {
            Ok(mut s) => *s = status,
            Err(p) => *p.into_inner() = status,
        }
    }
}

/// Result of running a single task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub phase: Phase,
    pub role: WorkerRole,
    pub status: TaskStatus,
    /// Error message if the task failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub tool_calls: usize,
    #[serde(with = "duration_serde")]
    pub duration: Duration,
}

impl TaskResult {
    pub fn completed(key: TaskKey, tool_calls: usize, duration: Duration) -> Self {
        Self {
            phase: key.phase,
            role: key.role,
            status: TaskStatus::Completed,
            error: None,
            tool_calls,
            duration,
        }
    }

    pub fn failed(key: TaskKey, error: &str, duration: Duration) -> Self {
        Self {
            phase: key.phase,
            role: key.role,
            status: TaskStatus::Failed,
            error: Some(error.to_string()),
            tool_calls: 0,
            duration,
        }
    }

    pub fn discarded(key: TaskKey, duration: Duration) -> Self {
        Self {
            phase: key.phase,
            role: key.role,
            status: TaskStatus::Discarded,
            error: None,
            tool_calls: 0,
            duration,
        }
    }

    pub fn key(&self) -> TaskKey {
        TaskKey::new(self.phase, self.role)
    }
}

/// Summary of one session run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub total_tasks: usize,
    pub completed: usize,
    pub failed: usize,
    pub discarded: usize,
    /// Total execution time in milliseconds
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    #[serde(default)]
    pub task_results: Vec<TaskResult>,
}

impl SessionSummary {
    pub fn add_result(&mut self, result: TaskResult) {
        self.total_tasks += 1;
        match result.status {
            TaskStatus::Completed => self.completed += 1,
            TaskStatus::Failed => self.failed += 1,
            TaskStatus::Discarded => self.discarded += 1,
            TaskStatus::Pending | TaskStatus::Running => {}
        }
        self.task_results.push(result);
    }

    pub fn all_success(&self) -> bool {
        self.failed == 0 && self.discarded == 0 && self.completed == self.total_tasks
    }
}

/// Tracks execution timing.
pub struct ExecutionTimer {
    start: Instant,
}

impl ExecutionTimer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

/// Serde helpers for Duration serialization.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(role: WorkerRole) -> TaskKey {
        TaskKey::new(Phase::Independent, role)
    }

    #[test]
    fn test_session_status_terminal() {
        assert!(!SessionStatus::Pending.is_terminal());
        assert!(
            !SessionStatus::Running {
                phase: Phase::Independent
            }
            .is_terminal()
        );
        assert!(SessionStatus::Completed.is_terminal());
        assert!(
            SessionStatus::Cancelled {
                phase: Phase::CrossReview
            }
            .is_terminal()
        );
    }

    #[test]
    fn test_session_status_serializes_tagged() {
        let json = serde_json::to_value(SessionStatus::Running {
            phase: Phase::CrossReview,
        })
        .unwrap();
        assert_eq!(json["state"], "running");
        assert_eq!(json["phase"], "cross_review");
    }

    #[test]
    fn test_status_handle_shared() {
        let handle = StatusHandle::new();
        let clone = handle.clone();
        clone.set(SessionStatus::Completed);
        assert_eq!(handle.get(), SessionStatus::Completed);
    }

    #[test]
    fn test_session_summary() {
        let mut summary = SessionSummary::default();
        summary.add_result(TaskResult::completed(
            key(WorkerRole::News),
            2,
            Duration::from_millis(30),
        ));
        summary.add_result(TaskResult::failed(
            key(WorkerRole::Logic),
            "deadline exceeded",
            Duration::from_secs(1),
        ));
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.failed, 1);
        assert!(!summary.all_success());
        assert_eq!(summary.task_results.len(), 2);
    }

    #[test]
    fn test_task_result_duration_serialized_as_millis() {
        let result = TaskResult::completed(key(WorkerRole::Social), 0, Duration::from_millis(1500));
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["duration"], 1500);
        assert_eq!(json["status"], "completed");
    }
}
