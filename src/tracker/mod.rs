//! Per-session state tracking.
//!
//! The [`SessionStore`] owns every session's phase and task state, feeds
//! transcript snapshots through the extractor, and reports phase
//! completion exactly once.

mod state;
mod store;

pub use state::{ContextRef, TaskKey, TaskStatus, ToolInvocation, WorkerState};
pub use store::{RecordOutcome, SessionStore};
