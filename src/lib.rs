//! Phase scheduler and live-event coordinator for multi-analyst claim
//! deliberation.
//!
//! A [`session::Coordinator`] runs a claim through three phases
//! (independent analysis, cross-review, synthesis), tracks every worker's
//! output in [`tracker`], and streams progress to an
//! [`stream::EventSubscriber`] without blocking the workers.

pub mod errors;
pub mod scheduler;
pub mod session;
pub mod stream;
pub mod synth;
pub mod tracker;
pub mod transcript;
pub mod tribunal_config;
pub mod ui;
pub mod worker;
