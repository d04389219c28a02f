//! Live terminal rendering of a session's event stream.
//!
//! - `full`: a phase bar plus one spinner per task
//! - `minimal`: one plain line per notable event
//! - `json`: handled by [`JsonLinesSubscriber`](crate::stream::JsonLinesSubscriber)

use crate::errors::DeliveryError;
use crate::stream::EventSubscriber;
use crate::ui::icons::{CHECK, CROSS, GAVEL, RUNNING, SPARKLE, STOP, TOOL};
use async_trait::async_trait;
use console::{Term, style};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use serde_json::Value;
use std::collections::HashMap;
use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;
use tribunal_common::{EventKind, EventRecord, Phase, WorkerRole};

/// Output mode for the session UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum UiMode {
    /// Progress bars and colors
    #[default]
    Full,
    /// Plain lines
    Minimal,
    /// JSON lines
    Json,
}

/// Renders events in `full` or `minimal` mode.
pub struct SessionUI {
    mode: UiMode,
    multi: MultiProgress,
    phase_bar: ProgressBar,
    task_bars: Mutex<HashMap<(Phase, WorkerRole), ProgressBar>>,
    verbose: bool,
    term: Term,
}

impl SessionUI {
    pub fn new(mode: UiMode, verbose: bool) -> Self {
        let multi = MultiProgress::new();

        let phase_style = ProgressStyle::default_bar()
            .template("{prefix:.bold} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
            .expect("progress bar template is a valid static string")
            .progress_chars("█▓░");
        let phase_bar = if mode == UiMode::Full {
            multi.add(ProgressBar::new(Phase::ALL.len() as u64))
        } else {
            ProgressBar::hidden()
        };
        phase_bar.set_style(phase_style);
        phase_bar.set_prefix("Phases");
        phase_bar.set_message("Starting...");

        Self {
            mode,
            multi,
            phase_bar,
            task_bars: Mutex::new(HashMap::new()),
            verbose,
            term: Term::stdout(),
        }
    }

    pub fn mode(&self) -> UiMode {
        self.mode
    }

    /// Render one event.
    pub fn handle_event(&self, record: &EventRecord) -> std::io::Result<()> {
        match self.mode {
            UiMode::Full => {
                self.handle_full(record);
                Ok(())
            }
            UiMode::Minimal => match minimal_line(record) {
                Some(line) => writeln!(&self.term, "{}", line),
                None => Ok(()),
            },
            UiMode::Json => {
                let line = serde_json::to_string(record).map_err(std::io::Error::other)?;
                writeln!(&self.term, "{}", line)
            }
        }
    }

    fn handle_full(&self, record: &EventRecord) {
        match record.kind {
            EventKind::PhaseStart => self.on_phase_start(record),
            EventKind::ToolCall => self.on_tool_call(record),
            EventKind::ToolResult => self.on_tool_result(record),
            EventKind::WorkerComplete => self.on_worker_complete(record),
            EventKind::PhaseComplete => self.phase_bar.inc(1),
            EventKind::FinalResult => self.on_final_result(record),
            EventKind::Error => self.on_error(record),
        }
    }

    fn on_phase_start(&self, record: &EventRecord) {
        let Some(phase) = record.phase else { return };
        let description = record.payload["description"].as_str().unwrap_or_default();
        self.phase_bar.set_message(format!(
            "{}: {}",
            style(phase).yellow(),
            description
        ));

        let roles: Vec<WorkerRole> =
            serde_json::from_value(record.payload["roles"].clone()).unwrap_or_default();
        for role in roles {
            self.task_bar(phase, role);
        }
    }

    fn on_tool_call(&self, record: &EventRecord) {
        let (Some(phase), Some(role)) = (record.phase, record.role) else {
            return;
        };
        let tool = record.payload["tool"].as_str().unwrap_or("?");
        let input = record.payload["input"].as_str().unwrap_or_default();
        let bar = self.task_bar(phase, role);
        bar.set_message(format!("{}{} {}", TOOL, style(tool).yellow(), style(input).dim()));
        if self.verbose {
            self.multi
                .println(format!("    {}{} {}", TOOL, style(tool).yellow(), input))
                .ok();
        }
    }

    fn on_tool_result(&self, record: &EventRecord) {
        if !self.verbose {
            return;
        }
        let output = record.payload["output"].as_str().unwrap_or_default();
        let first_line = output.lines().next().unwrap_or_default();
        self.multi
            .println(format!("      {} {}", style("→").dim(), style(first_line).dim()))
            .ok();
    }

    fn on_worker_complete(&self, record: &EventRecord) {
        let (Some(phase), Some(role)) = (record.phase, record.role) else {
            return;
        };
        let bar = self.task_bar(phase, role);
        let elapsed = Duration::from_millis(record.payload["elapsed_ms"].as_u64().unwrap_or(0));
        if record.payload["error"].as_bool().unwrap_or(false) {
            let message = record.payload["message"].as_str().unwrap_or("failed");
            bar.finish_with_message(format!("{}{}", CROSS, style(message).red()));
        } else {
            bar.finish_with_message(format!(
                "{}{} ({})",
                CHECK,
                verdict_summary(&record.payload),
                format_duration(elapsed)
            ));
        }
    }

    fn on_final_result(&self, record: &EventRecord) {
        self.phase_bar.finish_and_clear();
        let label = record.payload["label"].as_str().unwrap_or("unresolved");
        let confidence = record.payload["weighted_confidence"].as_f64().unwrap_or(0.0);
        let styled = if label == "unresolved" {
            style(label).red().bold()
        } else {
            style(label).green().bold()
        };
        self.multi.println("").ok();
        self.multi
            .println(format!(
                "{}{} {} {}",
                SPARKLE,
                GAVEL,
                styled,
                style(format!("({:.0}% confidence)", confidence * 100.0)).cyan()
            ))
            .ok();
    }

    fn on_error(&self, record: &EventRecord) {
        let message = record.payload["message"].as_str().unwrap_or("session error");
        self.phase_bar.abandon_with_message(format!("{}{}", STOP, style(message).red()));
        let bars = self.task_bars.lock().unwrap_or_else(|p| p.into_inner());
        for bar in bars.values().filter(|b| !b.is_finished()) {
            bar.abandon();
        }
    }

    fn task_bar(&self, phase: Phase, role: WorkerRole) -> ProgressBar {
        let mut bars = self.task_bars.lock().unwrap_or_else(|p| p.into_inner());
        bars.entry((phase, role))
            .or_insert_with(|| {
                let bar = self.multi.add(ProgressBar::new_spinner());
                bar.set_style(
                    ProgressStyle::default_spinner()
                        .template("  {spinner} {prefix:.bold} {msg}")
                        .expect("progress bar template is a valid static string"),
                );
                bar.set_prefix(format!("[{}/{}]", phase, role));
                bar.set_message(RUNNING.to_string());
                bar.enable_steady_tick(Duration::from_millis(100));
                bar
            })
            .clone()
    }
}

#[async_trait]
impl EventSubscriber for SessionUI {
    async fn deliver(&self, record: &EventRecord) -> Result<(), DeliveryError> {
        self.handle_event(record)?;
        Ok(())
    }
}

/// The `minimal` rendering of an event, if it has one.
pub fn minimal_line(record: &EventRecord) -> Option<String> {
    let task = match (record.phase, record.role) {
        (Some(phase), Some(role)) => format!("{}/{}", phase, role),
        (Some(phase), None) => phase.to_string(),
        _ => String::new(),
    };
    let payload = &record.payload;
    match record.kind {
        EventKind::PhaseStart => Some(format!(
            "phase {} started: {}",
            task,
            payload["description"].as_str().unwrap_or_default()
        )),
        EventKind::ToolCall => Some(format!(
            "{} called {}",
            task,
            payload["tool"].as_str().unwrap_or("?")
        )),
        EventKind::ToolResult => None,
        EventKind::WorkerComplete => {
            if payload["error"].as_bool().unwrap_or(false) {
                Some(format!(
                    "✗ {} ({})",
                    task,
                    payload["message"].as_str().unwrap_or("failed")
                ))
            } else {
                Some(format!("✓ {} {}", task, verdict_summary(payload)))
            }
        }
        EventKind::PhaseComplete => Some(format!("phase {} complete", task)),
        EventKind::FinalResult => Some(format!(
            "verdict: {} ({:.0}%)",
            payload["label"].as_str().unwrap_or("unresolved"),
            payload["weighted_confidence"].as_f64().unwrap_or(0.0) * 100.0
        )),
        EventKind::Error => Some(format!(
            "error: {}",
            payload["message"].as_str().unwrap_or("session error")
        )),
    }
}

fn verdict_summary(payload: &Value) -> String {
    let label = payload["verdict"].as_str().unwrap_or("no verdict");
    match payload["confidence"].as_f64() {
        Some(confidence) => format!("{} {:.0}%", label, confidence * 100.0),
        None => label.to_string(),
    }
}

/// Format a duration for display.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs > 0 {
        format!("{}s", secs)
    } else {
        format!("{}ms", d.as_millis())
    }
}
