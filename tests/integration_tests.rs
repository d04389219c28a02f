//! Integration tests for Tribunal
//!
//! The CLI is driven through replayed transcripts; the library tests drive a
//! `Coordinator` with scripted workers.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;
use tribunal_common::{Phase, WorkerRole};

/// Helper to create a tribunal Command
fn tribunal() -> Command {
    cargo_bin_cmd!("tribunal")
}

fn write_transcript(dir: &Path, phase: Phase, role: WorkerRole, body: &str) {
    let phase_dir = dir.join(phase.as_str());
    fs::create_dir_all(&phase_dir).unwrap();
    fs::write(phase_dir.join(format!("{}.txt", role.as_str())), body).unwrap();
}

/// Transcripts for the full default panel. `skip` leaves one analyst out.
fn write_panel(dir: &Path, skip: Option<WorkerRole>) {
    for role in WorkerRole::ANALYSTS {
        if Some(role) == skip {
            continue;
        }
        write_transcript(
            dir,
            Phase::Independent,
            role,
            "Thought: checking the botany\n\
             Action: search\n\
             Action Input: banana botanical classification\n\
             Observation: Bananas develop from a single ovary and are berries.\n\
             Final Answer: true, confidence: 0.9\n",
        );
        write_transcript(
            dir,
            Phase::CrossReview,
            role,
            "Thought: the other analysts agree\nFinal Answer: true, confidence: 0.9\n",
        );
    }
    write_transcript(
        dir,
        Phase::Synthesis,
        WorkerRole::Synthesizer,
        "Thought: every analyst agrees\nFinal Answer: true\n",
    );
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_tribunal_help() {
        tribunal()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("taxonomy"));
    }

    #[test]
    fn test_tribunal_version() {
        tribunal().arg("--version").assert().success();
    }

    #[test]
    fn test_taxonomy_lists_every_label() {
        tribunal()
            .arg("taxonomy")
            .assert()
            .success()
            .stdout(predicate::str::contains("mostly-true"))
            .stdout(predicate::str::contains("outdated"))
            .stdout(predicate::str::contains("unresolved"));
    }
}

// =============================================================================
// Config Command Tests
// =============================================================================

mod config_command {
    use super::*;

    #[test]
    fn test_config_init_creates_file() {
        let dir = TempDir::new().unwrap();

        tribunal()
            .arg("--project-dir")
            .arg(dir.path())
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Created tribunal.toml"));

        let path = dir.path().join(".tribunal/tribunal.toml");
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("[panel]"));
        assert!(content.contains("deadline_secs"));

        tribunal()
            .arg("--project-dir")
            .arg(dir.path())
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("already exists"));
    }

    #[test]
    fn test_config_validate_reports_problems() {
        let dir = TempDir::new().unwrap();
        let config_dir = dir.path().join(".tribunal");
        fs::create_dir_all(&config_dir).unwrap();
        fs::write(
            config_dir.join("tribunal.toml"),
            "[session]\ndeadline_secs = 0\n",
        )
        .unwrap();

        tribunal()
            .arg("--project-dir")
            .arg(dir.path())
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("deadline_secs must be greater than zero"));
    }

    #[test]
    fn test_config_show_uses_file_values() {
        let dir = TempDir::new().unwrap();
        let config_dir = dir.path().join(".tribunal");
        fs::create_dir_all(&config_dir).unwrap();
        fs::write(
            config_dir.join("tribunal.toml"),
            "[panel]\nanalysts = [\"news\", \"logic\"]\n\n[session]\ndeadline_secs = 7\n",
        )
        .unwrap();

        tribunal()
            .arg("--project-dir")
            .arg(dir.path())
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("deadline_secs = 7"))
            .stdout(predicate::str::contains("\"news\", \"logic\""));
    }
}

// =============================================================================
// Run Command Tests
// =============================================================================

mod run_command {
    use super::*;

    #[test]
    fn test_run_rejects_unknown_ui_mode() {
        let project = TempDir::new().unwrap();
        let transcripts = TempDir::new().unwrap();
        write_panel(transcripts.path(), None);

        tribunal()
            .arg("--project-dir")
            .arg(project.path())
            .args(["run", "--ui", "fancy", "--statement", "Bananas are berries"])
            .arg("--transcripts")
            .arg(transcripts.path())
            .assert()
            .failure()
            .stderr(predicate::str::contains("invalid value 'fancy'"));
    }

    #[test]
    fn test_run_prints_final_result() {
        let project = TempDir::new().unwrap();
        let transcripts = TempDir::new().unwrap();
        write_panel(transcripts.path(), None);

        tribunal()
            .arg("--project-dir")
            .arg(project.path())
            .args(["run", "--ui", "minimal", "--statement", "Bananas are berries"])
            .arg("--transcripts")
            .arg(transcripts.path())
            .assert()
            .success()
            .stdout(predicate::str::contains("\"label\": \"true\""))
            .stdout(predicate::str::contains("\"degraded\": false"));
    }

    #[test]
    fn test_run_writes_output_file() {
        let project = TempDir::new().unwrap();
        let transcripts = TempDir::new().unwrap();
        write_panel(transcripts.path(), Some(WorkerRole::Social));
        let output = project.path().join("result.json");

        tribunal()
            .arg("--project-dir")
            .arg(project.path())
            .args(["run", "--ui", "minimal", "--single-shot", "-s", "Bananas are berries"])
            .arg("--transcripts")
            .arg(transcripts.path())
            .arg("--output")
            .arg(&output)
            .assert()
            .success()
            .stdout(predicate::str::contains("Result written to"));

        let result: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&output).unwrap()).unwrap();
        assert_eq!(result["label"], "true");
        assert_eq!(result["degraded"], true);
        assert_eq!(result["missing_roles"], serde_json::json!(["social"]));
        assert_eq!(result["tool_usage"]["search"], 4);
    }

    #[test]
    fn test_run_json_mode_streams_events() {
        let project = TempDir::new().unwrap();
        let transcripts = TempDir::new().unwrap();
        write_panel(transcripts.path(), None);

        tribunal()
            .arg("--project-dir")
            .arg(project.path())
            .args(["run", "--ui", "json", "--statement", "Bananas are berries"])
            .arg("--transcripts")
            .arg(transcripts.path())
            .assert()
            .success()
            .stdout(predicate::str::contains("\"event_kind\":\"phase_start\""))
            .stdout(predicate::str::contains("\"event_kind\":\"tool_call\""))
            .stdout(predicate::str::contains("\"event_kind\":\"final_result\""));
    }

    #[test]
    fn test_run_missing_transcript_dir_fails() {
        let project = TempDir::new().unwrap();

        tribunal()
            .arg("--project-dir")
            .arg(project.path())
            .args(["run", "--statement", "claim", "--transcripts"])
            .arg(project.path().join("nowhere"))
            .assert()
            .failure()
            .stderr(predicate::str::contains("Transcript directory not found"));
    }

    #[test]
    fn test_run_rejects_bad_weight() {
        let project = TempDir::new().unwrap();
        let transcripts = TempDir::new().unwrap();
        write_panel(transcripts.path(), None);

        tribunal()
            .arg("--project-dir")
            .arg(project.path())
            .args(["run", "--statement", "claim", "--weight", "synthesizer=1"])
            .arg("--transcripts")
            .arg(transcripts.path())
            .assert()
            .failure()
            .stderr(predicate::str::contains("synthesizer does not carry a weight"));
    }

    #[test]
    fn test_run_rejects_empty_statement() {
        let project = TempDir::new().unwrap();
        let transcripts = TempDir::new().unwrap();

        tribunal()
            .arg("--project-dir")
            .arg(project.path())
            .args(["run", "--statement", "   "])
            .arg("--transcripts")
            .arg(transcripts.path())
            .assert()
            .failure()
            .stderr(predicate::str::contains("Statement must not be empty"));
    }

    #[test]
    fn test_run_writes_log_file() {
        let project = TempDir::new().unwrap();
        let transcripts = TempDir::new().unwrap();
        write_panel(transcripts.path(), None);
        let log = project.path().join("logs/run.log");

        tribunal()
            .arg("--project-dir")
            .arg(project.path())
            .arg("--log-file")
            .arg(&log)
            .args(["run", "--ui", "minimal", "--statement", "Bananas are berries"])
            .arg("--transcripts")
            .arg(transcripts.path())
            .assert()
            .success();

        let content = fs::read_to_string(&log).unwrap();
        assert!(content.contains("Session started"));
    }
}

// =============================================================================
// Library Tests
// =============================================================================

mod coordinator {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex, mpsc};
    use std::time::{Duration, Instant};
    use tribunal::errors::{DeliveryError, SessionError, WorkerError};
    use tribunal::scheduler::SessionStatus;
    use tribunal::session::{Coordinator, CoordinatorConfig};
    use tribunal::stream::{
        BridgeConfig, BroadcastSubscriber, EventSubscriber, NullSubscriber, StreamBridge,
    };
    use tribunal::tracker::ContextRef;
    use tribunal::worker::{ReplayWorker, TranscriptSink, Worker, WorkerRequest};
    use tribunal_common::{EventKind, EventRecord, SessionId, Verdict, VerdictLabel, Weights};

    const WAIT: Duration = Duration::from_secs(20);

    fn coordinator(worker: Arc<dyn Worker>) -> (Coordinator, StreamBridge) {
        let bridge =
            StreamBridge::spawn(Arc::new(NullSubscriber), BridgeConfig::default()).unwrap();
        let coordinator =
            Coordinator::new(CoordinatorConfig::default(), worker, bridge.publisher());
        (coordinator, bridge)
    }

    fn analyst_answer(confidence: f64) -> String {
        format!("Final Answer: false, confidence: {}", confidence)
    }

    struct Seen {
        phase: Phase,
        role: WorkerRole,
        started_at: DateTime<Utc>,
        context: Vec<ContextRef>,
    }

    #[test]
    fn test_phases_only_read_completed_upstream_outputs() {
        let seen: Arc<Mutex<Vec<Seen>>> = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        let worker = move |req: &WorkerRequest, _: &mut dyn TranscriptSink| -> Result<String, WorkerError> {
            log.lock().unwrap().push(Seen {
                phase: req.phase,
                role: req.role,
                started_at: Utc::now(),
                context: req.context.clone(),
            });
            Ok(match req.role {
                WorkerRole::Synthesizer => "Final Answer: false".to_string(),
                _ => analyst_answer(0.8),
            })
        };
        let (coordinator, _bridge) = coordinator(Arc::new(worker));
        let id = coordinator
            .start_session("The moon is made of cheese", Weights::new(), Duration::from_secs(5))
            .unwrap();
        coordinator.wait_result(id, WAIT).unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 11);
        for task in seen.iter() {
            match task.phase {
                Phase::Independent => assert!(task.context.is_empty()),
                Phase::CrossReview => {
                    assert_eq!(task.context.len(), 4);
                    for input in &task.context {
                        assert_eq!(input.phase, Phase::Independent);
                        assert_ne!(input.role, task.role);
                        assert!(input.completed_at <= task.started_at);
                    }
                }
                Phase::Synthesis => {
                    assert_eq!(task.role, WorkerRole::Synthesizer);
                    assert_eq!(task.context.len(), 10);
                    assert!(task.context.iter().all(|c| c.completed_at <= task.started_at));
                }
            }
        }

        let last_independent = seen
            .iter()
            .filter(|t| t.phase == Phase::Independent)
            .map(|t| t.started_at)
            .max()
            .unwrap();
        let first_review = seen
            .iter()
            .filter(|t| t.phase == Phase::CrossReview)
            .map(|t| t.started_at)
            .min()
            .unwrap();
        assert!(last_independent <= first_review);
    }

    #[test]
    fn test_weighted_confidence_uses_default_weights() {
        let worker = |req: &WorkerRequest, _: &mut dyn TranscriptSink| -> Result<String, WorkerError> {
            Ok(match req.role {
                WorkerRole::Academic => analyst_answer(0.9),
                WorkerRole::News => analyst_answer(0.6),
                WorkerRole::Social => analyst_answer(0.5),
                WorkerRole::Logic => analyst_answer(0.8),
                WorkerRole::Statistics => analyst_answer(0.7),
                WorkerRole::Synthesizer => "Final Answer: mostly-false".to_string(),
            })
        };
        let (coordinator, _bridge) = coordinator(Arc::new(worker));
        let id = coordinator
            .start_session("claim", Weights::new(), Duration::from_secs(5))
            .unwrap();
        let result = coordinator.wait_result(id, WAIT).unwrap();

        assert_eq!(result.label, VerdictLabel::Resolved(Verdict::MostlyFalse));
        assert!((result.weighted_confidence - 0.715).abs() < 1e-9);
        assert!(!result.degraded);
    }

    #[test]
    fn test_cancel_during_cross_review_skips_synthesis() {
        let (started_tx, started_rx) = mpsc::channel();
        let started_tx = Mutex::new(started_tx);
        let synthesized = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&synthesized);
        let worker = move |req: &WorkerRequest, _: &mut dyn TranscriptSink| -> Result<String, WorkerError> {
            match req.phase {
                Phase::Independent => Ok(analyst_answer(0.5)),
                Phase::CrossReview => {
                    let _ = started_tx.lock().unwrap().send(());
                    std::thread::sleep(Duration::from_millis(200));
                    Ok(analyst_answer(0.5))
                }
                Phase::Synthesis => {
                    flag.store(true, Ordering::SeqCst);
                    Ok("Final Answer: false".to_string())
                }
            }
        };
        let (coordinator, _bridge) = coordinator(Arc::new(worker));
        let id = coordinator
            .start_session("claim", Weights::new(), Duration::from_secs(5))
            .unwrap();

        started_rx.recv_timeout(WAIT).unwrap();
        coordinator.cancel(id).unwrap();

        let status = coordinator.wait(id, WAIT).unwrap();
        assert_eq!(
            status,
            SessionStatus::Cancelled {
                phase: Phase::CrossReview
            }
        );
        assert!(matches!(
            coordinator.get_result(id),
            Err(SessionError::Cancelled {
                phase: Phase::CrossReview,
                ..
            })
        ));
        assert!(!synthesized.load(Ordering::SeqCst));
    }

    #[test]
    fn test_deadline_degrades_result() {
        let worker = |req: &WorkerRequest, _: &mut dyn TranscriptSink| -> Result<String, WorkerError> {
            if req.role == WorkerRole::Statistics && req.phase == Phase::Independent {
                std::thread::sleep(Duration::from_millis(800));
            }
            Ok(match req.role {
                WorkerRole::Synthesizer => "Final Answer: false".to_string(),
                _ => analyst_answer(0.6),
            })
        };
        let (coordinator, _bridge) = coordinator(Arc::new(worker));
        let id = coordinator
            .start_session("claim", Weights::new(), Duration::from_millis(200))
            .unwrap();
        let result = coordinator.wait_result(id, WAIT).unwrap();

        assert!(result.degraded);
        assert!(result.run_summary.failed >= 1);
        assert!((result.weighted_confidence - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_missing_transcript_excludes_role() {
        let transcripts = TempDir::new().unwrap();
        write_panel(transcripts.path(), Some(WorkerRole::News));
        let worker = ReplayWorker::new(transcripts.path()).single_shot();
        let (coordinator, _bridge) = coordinator(Arc::new(worker));

        let id = coordinator
            .start_session("Bananas are berries", Weights::new(), Duration::from_secs(5))
            .unwrap();
        let result = coordinator.wait_result(id, WAIT).unwrap();

        assert_eq!(result.label, VerdictLabel::Resolved(Verdict::True));
        assert_eq!(result.missing_roles, vec![WorkerRole::News]);
        assert!(!result.reporting_roles.contains(&WorkerRole::News));
        assert!((result.weighted_confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_synthesizer_without_label_is_unresolved() {
        let worker = |req: &WorkerRequest, _: &mut dyn TranscriptSink| -> Result<String, WorkerError> {
            Ok(match req.role {
                WorkerRole::Synthesizer => {
                    "Final Answer: the panel could not reach a conclusion".to_string()
                }
                _ => analyst_answer(0.4),
            })
        };
        let (coordinator, _bridge) = coordinator(Arc::new(worker));
        let id = coordinator
            .start_session("claim", Weights::new(), Duration::from_secs(5))
            .unwrap();
        let result = coordinator.wait_result(id, WAIT).unwrap();

        assert_eq!(result.label, VerdictLabel::Unresolved);
        assert!(!result.is_resolved());
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["label"], "unresolved");
    }

    #[test]
    fn test_concurrent_sessions_are_isolated() {
        let worker = |req: &WorkerRequest, _: &mut dyn TranscriptSink| -> Result<String, WorkerError> {
            let label = if req.statement.contains("sky") { "true" } else { "false" };
            Ok(format!("Final Answer: {}, confidence: 0.7", label))
        };
        let (coordinator, _bridge) = coordinator(Arc::new(worker));
        let sky = coordinator
            .start_session("The sky is blue", Weights::new(), Duration::from_secs(5))
            .unwrap();
        let grass = coordinator
            .start_session("Grass is purple", Weights::new(), Duration::from_secs(5))
            .unwrap();

        let sky_result = coordinator.wait_result(sky, WAIT).unwrap();
        let grass_result = coordinator.wait_result(grass, WAIT).unwrap();
        assert_eq!(sky_result.label, VerdictLabel::Resolved(Verdict::True));
        assert_eq!(grass_result.label, VerdictLabel::Resolved(Verdict::False));
        assert_eq!(sky_result.session_id, sky);
        assert_eq!(grass_result.session_id, grass);
    }

    struct SlowSubscriber;

    #[async_trait]
    impl EventSubscriber for SlowSubscriber {
        async fn deliver(&self, _record: &EventRecord) -> Result<(), DeliveryError> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(())
        }
    }

    #[test]
    fn test_publishing_never_blocks_on_slow_subscriber() {
        let config = BridgeConfig {
            queue_capacity: 64,
            ..Default::default()
        };
        let bridge = StreamBridge::spawn(Arc::new(SlowSubscriber), config).unwrap();
        let publisher = bridge.publisher();
        let id = SessionId::new();

        let start = Instant::now();
        for i in 0..10_000 {
            publisher.publish(EventRecord::new(
                id,
                EventKind::ToolCall,
                serde_json::json!({ "i": i }),
            ));
        }
        assert!(start.elapsed() < Duration::from_secs(2));

        let stats = bridge.close(Duration::from_millis(100));
        assert_eq!(stats.published + stats.dropped, 10_000);
        assert!(stats.dropped > 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_broadcast_subscriber_sees_final_result() {
        let broadcast = Arc::new(BroadcastSubscriber::new(1024));
        let mut rx = broadcast.subscribe();
        let bridge = StreamBridge::spawn(broadcast, BridgeConfig::default()).unwrap();
        let worker = |req: &WorkerRequest, _: &mut dyn TranscriptSink| -> Result<String, WorkerError> {
            Ok(match req.role {
                WorkerRole::Synthesizer => "Final Answer: disputed".to_string(),
                _ => "Final Answer: disputed, confidence: 55%".to_string(),
            })
        };
        let coordinator =
            Coordinator::new(CoordinatorConfig::default(), Arc::new(worker), bridge.publisher());
        let id = coordinator
            .start_session("claim", Weights::new(), Duration::from_secs(5))
            .unwrap();

        let final_event = tokio::time::timeout(WAIT, async {
            loop {
                match rx.recv().await {
                    Ok(event) if event.kind == EventKind::FinalResult => return Some(event),
                    Ok(_) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(_) => return None,
                }
            }
        })
        .await
        .unwrap()
        .unwrap();

        assert_eq!(final_event.session_id, id);
        assert_eq!(final_event.payload["label"], "disputed");
        assert!((final_event.payload["weighted_confidence"].as_f64().unwrap() - 0.55).abs() < 1e-9);
    }
}
