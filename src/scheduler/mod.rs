//! Phase scheduling for deliberation sessions.
//!
//! - [`builder`]: the task graph and its validation
//! - [`scheduler`]: the per-session phase state machine
//! - [`executor`]: the controller that runs workers and publishes events
//! - [`state`]: session status and run summaries

pub mod builder;
pub mod executor;
#[allow(clippy::module_inception)]
pub mod scheduler;
pub mod state;

pub use builder::{TaskGraph, TaskGraphBuilder, TaskNode, build_graph};
pub use executor::{SessionOutcome, SessionRunner};
pub use scheduler::{DEFAULT_TASK_DEADLINE, PhaseScheduler, PhaseStatus, SchedulerConfig};
pub use state::{ExecutionTimer, SessionStatus, SessionSummary, StatusHandle, TaskResult};
