//! The public session API.
//!
//! A [`Coordinator`] starts sessions, each on its own controller thread, and
//! answers status and result queries. A session's store arena is torn down
//! as soon as its controller finishes; the outcome stays available through
//! the coordinator until [`Coordinator::teardown`].

use crate::errors::SessionError;
use crate::scheduler::{
    PhaseScheduler, SchedulerConfig, SessionOutcome, SessionRunner, SessionStatus, StatusHandle,
};
use crate::stream::EventPublisher;
use crate::synth::FinalResult;
use crate::tracker::SessionStore;
use crate::transcript::{ExtractorConfig, TranscriptExtractor};
use crate::worker::Worker;
use dashmap::DashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tribunal_common::{SessionId, Weights, WorkerRole};

/// Default statement length limit, in characters.
pub const DEFAULT_MAX_STATEMENT_CHARS: usize = 1000;

/// Settings shared by every session a coordinator starts.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorConfig {
    /// Analyst roles, in declaration order.
    pub panel: Vec<WorkerRole>,
    /// Weights a session falls back to for roles it does not override.
    pub default_weights: Weights,
    pub max_statement_chars: usize,
    pub extractor: ExtractorConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            panel: WorkerRole::ANALYSTS.to_vec(),
            default_weights: Weights::defaults(),
            max_statement_chars: DEFAULT_MAX_STATEMENT_CHARS,
            extractor: ExtractorConfig::default(),
        }
    }
}

/// Written once by the controller thread, read by any caller.
#[derive(Default)]
struct OutcomeSlot {
    value: Mutex<Option<SessionOutcome>>,
    ready: Condvar,
}

impl OutcomeSlot {
    fn fill(&self, outcome: SessionOutcome) {
        let mut value = self.value.lock().unwrap_or_else(|p| p.into_inner());
        *value = Some(outcome);
        self.ready.notify_all();
    }

    fn peek(&self) -> Option<SessionOutcome> {
        self.value
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Block until the outcome is set or `timeout` passes.
    ///
    /// A timeout too large to represent waits indefinitely.
    fn wait(&self, timeout: Duration) -> Option<SessionOutcome> {
        let deadline = Instant::now().checked_add(timeout);
        let mut value = self.value.lock().unwrap_or_else(|p| p.into_inner());
        while value.is_none() {
            value = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return None;
                    }
                    match self.ready.wait_timeout(value, remaining) {
                        Ok((guard, _)) => guard,
                        Err(p) => p.into_inner().0,
                    }
                }
                None => self.ready.wait(value).unwrap_or_else(|p| p.into_inner()),
            };
        }
        value.clone()
    }
}

struct SessionHandle {
    cancel: CancellationToken,
    status: StatusHandle,
    outcome: Arc<OutcomeSlot>,
}

/// Starts and tracks deliberation sessions.
pub struct Coordinator {
    config: CoordinatorConfig,
    store: Arc<SessionStore>,
    worker: Arc<dyn Worker>,
    publisher: EventPublisher,
    sessions: DashMap<SessionId, Arc<SessionHandle>>,
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig, worker: Arc<dyn Worker>, publisher: EventPublisher) -> Self {
        let store = SessionStore::new(TranscriptExtractor::new(config.extractor.clone()));
        Self {
            config,
            store: Arc::new(store),
            worker,
            publisher,
            sessions: DashMap::new(),
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// The store holding the state of running sessions.
    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Validate the request and start the session's controller thread.
    ///
    /// `weights` overrides the configured weights role by role.
    pub fn start_session(
        &self,
        statement: &str,
        weights: Weights,
        deadline: Duration,
    ) -> Result<SessionId, SessionError> {
        let statement = statement.trim();
        if statement.is_empty() {
            return Err(SessionError::EmptyStatement);
        }
        let len = statement.chars().count();
        if len > self.config.max_statement_chars {
            return Err(SessionError::StatementTooLong {
                len,
                max: self.config.max_statement_chars,
            });
        }
        let weights = self.config.default_weights.merged(&weights);
        weights.validate()?;
        if deadline.is_zero() {
            return Err(SessionError::InvalidDeadline);
        }

        let config = SchedulerConfig::default()
            .with_deadline(deadline)
            .with_weights(weights);
        let scheduler = PhaseScheduler::from_panel(&self.config.panel, config)?;

        let id = SessionId::new();
        self.store.open_session(id, Arc::from(statement));

        let handle = Arc::new(SessionHandle {
            cancel: CancellationToken::new(),
            status: StatusHandle::new(),
            outcome: Arc::new(OutcomeSlot::default()),
        });
        let runner = SessionRunner::new(
            id,
            Arc::clone(&self.store),
            Arc::clone(&self.worker),
            self.publisher.clone(),
            scheduler,
        )
        .with_cancellation(handle.cancel.clone())
        .with_status(handle.status.clone());

        let store = Arc::clone(&self.store);
        let slot = Arc::clone(&handle.outcome);
        let status = handle.status.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("tribunal-session-{}", id.short()))
            .spawn(move || {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| runner.run()))
                    .unwrap_or_else(|_| {
                        error!(session = %id, "Session controller panicked");
                        SessionOutcome::Failed {
                            error: "Session controller panicked".to_string(),
                        }
                    });
                status.set(outcome.status());
                store.remove(id);
                debug!(session = %id, "Session state torn down");
                slot.fill(outcome);
            });
        if let Err(e) = spawned {
            self.store.remove(id);
            return Err(SessionError::SpawnFailed(e));
        }

        self.sessions.insert(id, handle);
        info!(session = %id, deadline = ?deadline, "Session accepted");
        Ok(id)
    }

    /// The final result, once Synthesis completed.
    ///
    /// Cancelled and failed sessions report their session-level error.
    pub fn get_result(&self, id: SessionId) -> Result<FinalResult, SessionError> {
        let handle = self.handle(id)?;
        match handle.outcome.peek() {
            Some(outcome) => into_result(id, outcome),
            None => Err(SessionError::NotReady { id }),
        }
    }

    pub fn status(&self, id: SessionId) -> Result<SessionStatus, SessionError> {
        Ok(self.handle(id)?.status.get())
    }

    /// Ask a session to stop at its next task boundary.
    pub fn cancel(&self, id: SessionId) -> Result<(), SessionError> {
        let handle = self.handle(id)?;
        if !handle.cancel.is_cancelled() {
            info!(session = %id, "Cancellation requested");
            handle.cancel.cancel();
        }
        Ok(())
    }

    /// Block until the session finishes or `timeout` passes, then report its status.
    pub fn wait(&self, id: SessionId, timeout: Duration) -> Result<SessionStatus, SessionError> {
        let handle = self.handle(id)?;
        Ok(match handle.outcome.wait(timeout) {
            Some(outcome) => outcome.status(),
            None => handle.status.get(),
        })
    }

    /// Block until the session finishes, then return its result.
    pub fn wait_result(&self, id: SessionId, timeout: Duration) -> Result<FinalResult, SessionError> {
        let handle = self.handle(id)?;
        match handle.outcome.wait(timeout) {
            Some(outcome) => into_result(id, outcome),
            None => Err(SessionError::NotReady { id }),
        }
    }

    /// Forget a session. A running session is cancelled first.
    pub fn teardown(&self, id: SessionId) -> Result<(), SessionError> {
        let (_, handle) = self
            .sessions
            .remove(&id)
            .ok_or(SessionError::NotFound { id })?;
        handle.cancel.cancel();
        if handle.outcome.peek().is_some() {
            self.store.remove(id);
        }
        debug!(session = %id, "Session removed");
        Ok(())
    }

    /// Ids of every session not yet torn down.
    pub fn sessions(&self) -> Vec<SessionId> {
        self.sessions.iter().map(|entry| *entry.key()).collect()
    }

    fn handle(&self, id: SessionId) -> Result<Arc<SessionHandle>, SessionError> {
        self.sessions
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(SessionError::NotFound { id })
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        for entry in self.sessions.iter() {
            entry.value().cancel.cancel();
        }
    }
}

fn into_result(id: SessionId, outcome: SessionOutcome) -> Result<FinalResult, SessionError> {
    match outcome {
        SessionOutcome::Completed(result) => Ok(*result),
        SessionOutcome::Cancelled { phase } => Err(SessionError::Cancelled { id, phase }),
        SessionOutcome::Failed { error } => Err(SessionError::Failed { id, message: error }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::WorkerError;
    use crate::stream::{BridgeConfig, NullSubscriber, StreamBridge};
    use crate::worker::{TranscriptSink, WorkerRequest};
    use tribunal_common::{Phase, Verdict, VerdictLabel};

    fn scripted(req: &WorkerRequest, _: &mut dyn TranscriptSink) -> Result<String, WorkerError> {
        Ok(match req.role {
            WorkerRole::Synthesizer => "Final Answer: misleading".to_string(),
            _ => "Final Answer: misleading, confidence: 70%".to_string(),
        })
    }

    fn coordinator(config: CoordinatorConfig, worker: Arc<dyn Worker>) -> (Coordinator, StreamBridge) {
        let bridge = StreamBridge::spawn(Arc::new(NullSubscriber), BridgeConfig::default()).unwrap();
        (Coordinator::new(config, worker, bridge.publisher()), bridge)
    }

    #[test]
    fn test_session_runs_to_result() {
        let (coordinator, _bridge) = coordinator(CoordinatorConfig::default(), Arc::new(scripted));
        let id = coordinator
            .start_session("Vaccines contain microchips", Weights::new(), Duration::from_secs(5))
            .unwrap();
        let status = coordinator.wait(id, Duration::from_secs(10)).unwrap();
        assert_eq!(status, SessionStatus::Completed);

        let result = coordinator.get_result(id).unwrap();
        assert_eq!(result.label, VerdictLabel::Resolved(Verdict::Misleading));
        assert!((result.weighted_confidence - 0.7).abs() < 1e-9);
        assert_eq!(result.statement, "Vaccines contain microchips");
        assert!(!coordinator.store().contains(id));
    }

    #[test]
    fn test_statement_validation() {
        let config = CoordinatorConfig {
            max_statement_chars: 10,
            ..Default::default()
        };
        let (coordinator, _bridge) = coordinator(config, Arc::new(scripted));
        assert!(matches!(
            coordinator.start_session("   ", Weights::new(), Duration::from_secs(1)),
            Err(SessionError::EmptyStatement)
        ));
        assert!(matches!(
            coordinator.start_session("x".repeat(11).as_str(), Weights::new(), Duration::from_secs(1)),
            Err(SessionError::StatementTooLong { len: 11, max: 10 })
        ));
        assert!(matches!(
            coordinator.start_session("short", Weights::new(), Duration::ZERO),
            Err(SessionError::InvalidDeadline)
        ));
        assert!(coordinator.sessions().is_empty());
    }

    #[test]
    fn test_invalid_panel_rejected_at_start() {
        let config = CoordinatorConfig {
            panel: Vec::new(),
            ..Default::default()
        };
        let (coordinator, _bridge) = coordinator(config, Arc::new(scripted));
        assert!(matches!(
            coordinator.start_session("claim", Weights::new(), Duration::from_secs(1)),
            Err(SessionError::Graph(_))
        ));
    }

    #[test]
    fn test_unknown_session() {
        let (coordinator, _bridge) = coordinator(CoordinatorConfig::default(), Arc::new(scripted));
        let id = SessionId::new();
        assert!(matches!(coordinator.status(id), Err(SessionError::NotFound { .. })));
        assert!(matches!(coordinator.cancel(id), Err(SessionError::NotFound { .. })));
        assert!(matches!(coordinator.teardown(id), Err(SessionError::NotFound { .. })));
    }

    #[test]
    fn test_cancelled_session_reports_error() {
        let worker = |req: &WorkerRequest, _: &mut dyn TranscriptSink| -> Result<String, WorkerError> {
            std::thread::sleep(Duration::from_millis(100));
            Ok(format!("Final Answer: false, confidence: 0.5 ({})", req.role))
        };
        let (coordinator, _bridge) = coordinator(CoordinatorConfig::default(), Arc::new(worker));
        let id = coordinator
            .start_session("claim", Weights::new(), Duration::from_secs(5))
            .unwrap();
        assert!(matches!(coordinator.get_result(id), Err(SessionError::NotReady { .. })));
        coordinator.cancel(id).unwrap();

        let status = coordinator.wait(id, Duration::from_secs(10)).unwrap();
        assert_eq!(
            status,
            SessionStatus::Cancelled {
                phase: Phase::Independent
            }
        );
        assert!(matches!(
            coordinator.get_result(id),
            Err(SessionError::Cancelled {
                phase: Phase::Independent,
                ..
            })
        ));

        coordinator.teardown(id).unwrap();
        assert!(coordinator.sessions().is_empty());
    }

    #[test]
    fn test_unbounded_deadline_still_finishes() {
        let (coordinator, _bridge) = coordinator(CoordinatorConfig::default(), Arc::new(scripted));
        let id = coordinator
            .start_session("claim", Weights::new(), Duration::from_secs(u64::MAX))
            .unwrap();
        let status = coordinator.wait(id, Duration::from_secs(10)).unwrap();
        assert_eq!(status, SessionStatus::Completed);
        assert!(coordinator.get_result(id).is_ok());
    }

    #[test]
    fn test_invalid_configured_weight_rejected() {
        let default_weights: Weights =
            serde_json::from_value(serde_json::json!({ "news": 0.3, "logic": -0.1 })).unwrap();
        let config = CoordinatorConfig {
            panel: vec![WorkerRole::News, WorkerRole::Logic],
            default_weights,
            ..Default::default()
        };
        let (coordinator, _bridge) = coordinator(config, Arc::new(scripted));
        assert!(matches!(
            coordinator.start_session("claim", Weights::new(), Duration::from_secs(1)),
            Err(SessionError::InvalidWeight(_))
        ));

        let fixed = Weights::new().with(WorkerRole::Logic, 0.15).unwrap();
        let id = coordinator
            .start_session("claim", fixed, Duration::from_secs(5))
            .unwrap();
        assert_eq!(
            coordinator.wait(id, Duration::from_secs(10)).unwrap(),
            SessionStatus::Completed
        );
    }
}
