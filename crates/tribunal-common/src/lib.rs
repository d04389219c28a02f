//! Shared domain types for the Tribunal deliberation coordinator.
//!
//! These types cross every boundary of the workspace: the scheduler assigns
//! work by [`Phase`] and [`WorkerRole`], the synthesizer speaks in
//! [`Verdict`] labels, and every observable step leaves the process as an
//! [`EventRecord`].

mod event;
mod phase;
mod role;
mod verdict;

pub use event::{EventKind, EventRecord, SessionId};
pub use phase::{Phase, UnknownPhase};
pub use role::{InvalidWeight, UnknownRole, Weights, WorkerRole};
pub use verdict::{UnknownVerdict, Verdict, VerdictLabel, VerdictRecord};
