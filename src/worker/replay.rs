use super::{TranscriptSink, Worker, WorkerRequest};
use crate::errors::WorkerError;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;
use tribunal_common::{Phase, WorkerRole};

/// Replays recorded transcripts from `<dir>/<phase>/<role>.txt`.
///
/// In incremental mode the file is fed to the sink one line at a time,
/// optionally pausing between lines, the way a live worker's output grows.
#[derive(Debug, Clone)]
pub struct ReplayWorker {
    dir: PathBuf,
    incremental: bool,
    line_delay: Option<Duration>,
}

impl ReplayWorker {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            incremental: true,
            line_delay: None,
        }
    }

    /// Deliver the whole transcript at once instead of line by line.
    pub fn single_shot(mut self) -> Self {
        self.incremental = false;
        self
    }

    pub fn with_line_delay(mut self, delay: Duration) -> Self {
        self.line_delay = Some(delay);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Where the transcript for a task is expected.
    pub fn transcript_path(&self, phase: Phase, role: WorkerRole) -> PathBuf {
        self.dir
            .join(phase.as_str())
            .join(format!("{}.txt", role.as_str()))
    }
}

impl Worker for ReplayWorker {
    fn invoke(
        &self,
        request: &WorkerRequest,
        sink: &mut dyn TranscriptSink,
    ) -> Result<String, WorkerError> {
        let path = self.transcript_path(request.phase, request.role);
        if !path.exists() {
            return Err(WorkerError::Unavailable {
                phase: request.phase,
                role: request.role,
                reason: format!("no transcript at {}", path.display()),
            });
        }
        let full = std::fs::read_to_string(&path)
            .map_err(|e| WorkerError::Failed(format!("{}: {}", path.display(), e)))?;
        debug!(path = %path.display(), bytes = full.len(), "Replaying transcript");

        if !self.incremental {
            return Ok(full);
        }

        let mut text = String::with_capacity(full.len());
        for line in full.split_inclusive('\n') {
            text.push_str(line);
            sink.update(&text);
            if let Some(delay) = self.line_delay {
                std::thread::sleep(delay);
            }
        }
        Ok(full)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::DiscardSink;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tribunal_common::SessionId;

    struct CountSink(usize);

    impl TranscriptSink for CountSink {
        fn update(&mut self, _transcript: &str) {
            self.0 += 1;
        }
    }

    fn request(phase: Phase, role: WorkerRole) -> WorkerRequest {
        WorkerRequest {
            session_id: SessionId::new(),
            phase,
            role,
            statement: Arc::from("statement"),
            context: Vec::new(),
        }
    }

    fn write_transcript(dir: &Path, phase: Phase, role: WorkerRole, body: &str) {
        let phase_dir = dir.join(phase.as_str());
        std::fs::create_dir_all(&phase_dir).unwrap();
        std::fs::write(phase_dir.join(format!("{}.txt", role.as_str())), body).unwrap();
    }

    #[test]
    fn test_replay_streams_lines() {
        let temp = TempDir::new().unwrap();
        write_transcript(
            temp.path(),
            Phase::Independent,
            WorkerRole::News,
            "Thought: a\nThought: b\nFinal Answer: true\n",
        );
        let worker = ReplayWorker::new(temp.path());
        let mut sink = CountSink(0);
        let out = worker
            .invoke(&request(Phase::Independent, WorkerRole::News), &mut sink)
            .unwrap();
        assert_eq!(sink.0, 3);
        assert!(out.ends_with("Final Answer: true\n"));
    }

    #[test]
    fn test_single_shot_skips_sink() {
        let temp = TempDir::new().unwrap();
        write_transcript(temp.path(), Phase::Synthesis, WorkerRole::Synthesizer, "false\n");
        let worker = ReplayWorker::new(temp.path()).single_shot();
        let mut sink = CountSink(0);
        worker
            .invoke(&request(Phase::Synthesis, WorkerRole::Synthesizer), &mut sink)
            .unwrap();
        assert_eq!(sink.0, 0);
    }

    #[test]
    fn test_missing_transcript_is_unavailable() {
        let temp = TempDir::new().unwrap();
        let worker = ReplayWorker::new(temp.path());
        let result = worker.invoke(&request(Phase::CrossReview, WorkerRole::Social), &mut DiscardSink);
        assert!(matches!(
            result,
            Err(WorkerError::Unavailable {
                role: WorkerRole::Social,
                ..
            })
        ));
    }

    #[test]
    fn test_transcript_path_layout() {
        let worker = ReplayWorker::new("/tmp/run");
        assert_eq!(
            worker.transcript_path(Phase::CrossReview, WorkerRole::Statistics),
            PathBuf::from("/tmp/run/cross_review/statistics.txt")
        );
    }
}
