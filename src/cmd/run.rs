//! Replayed deliberation: `tribunal run`.

use anyhow::{Context, Result, anyhow, bail};
use console::style;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use tribunal::session::Coordinator;
use tribunal::stream::{EventSubscriber, JsonLinesSubscriber, StreamBridge};
use tribunal::synth::FinalResult;
use tribunal::tribunal_config::TribunalConfig;
use tribunal::ui::icons::{CHECK, CLOCK, GAVEL};
use tribunal::ui::{SessionUI, UiMode, format_duration};
use tribunal::worker::ReplayWorker;
use tribunal_common::{Weights, WorkerRole};

use super::super::{Cli, RunArgs};

const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Parse repeated `role=value` weight overrides.
pub fn parse_weights(entries: &[String]) -> Result<Weights> {
    let mut weights = Weights::new();
    for entry in entries {
        let (role, value) = entry
            .split_once('=')
            .ok_or_else(|| anyhow!("Weight '{}' must look like ROLE=VALUE", entry))?;
        let role: WorkerRole = role.parse()?;
        let value: f64 = value
            .trim()
            .parse()
            .with_context(|| format!("Weight for {} is not a number: '{}'", role, value))?;
        weights.set(role, value)?;
    }
    Ok(weights)
}

pub async fn cmd_run(cli: &Cli, project_dir: &Path, args: &RunArgs) -> Result<()> {
    let config = TribunalConfig::new(project_dir.to_path_buf())?;
    for warning in config.validate() {
        warn!(%warning, "Configuration problem");
    }

    if !args.transcripts.is_dir() {
        bail!(
            "Transcript directory not found: {}",
            args.transcripts.display()
        );
    }

    let weights = parse_weights(&args.weights)?;
    let deadline = args
        .deadline_secs
        .map(Duration::from_secs)
        .unwrap_or_else(|| config.deadline());

    let mut worker = ReplayWorker::new(&args.transcripts);
    if args.single_shot {
        worker = worker.single_shot();
    }
    if let Some(ms) = args.stream_delay_ms {
        worker = worker.with_line_delay(Duration::from_millis(ms));
    }

    let mode = args.ui;
    let subscriber: Arc<dyn EventSubscriber> = match mode {
        UiMode::Json => Arc::new(JsonLinesSubscriber::stdout()),
        other => Arc::new(SessionUI::new(other, cli.verbose)),
    };
    let bridge = StreamBridge::spawn(subscriber, config.bridge_config())
        .context("Failed to start event delivery")?;

    let coordinator = Arc::new(Coordinator::new(
        config.coordinator_config(),
        Arc::new(worker),
        bridge.publisher(),
    ));
    let id = coordinator.start_session(&args.statement, weights, deadline)?;
    info!(session = %id, deadline = ?deadline, "Session started");

    let interrupt = {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!(session = %id, "Interrupted, cancelling session");
                let _ = coordinator.cancel(id);
            }
        })
    };

    let outcome = {
        let coordinator = Arc::clone(&coordinator);
        tokio::task::spawn_blocking(move || coordinator.wait_result(id, Duration::MAX))
            .await
            .context("Session wait task failed")?
    };
    interrupt.abort();

    let stats = bridge.close(CLOSE_TIMEOUT);
    debug!(?stats, "Event delivery finished");
    if stats.dropped > 0 {
        warn!(dropped = stats.dropped, "Some events were dropped");
    }

    let result = outcome?;
    coordinator.teardown(id)?;
    emit_result(&result, args, mode)
}

fn emit_result(result: &FinalResult, args: &RunArgs, mode: UiMode) -> Result<()> {
    let json = serde_json::to_string_pretty(result).context("Failed to serialize result")?;

    match &args.output {
        Some(path) => {
            std::fs::write(path, &json)
                .with_context(|| format!("Failed to write result: {}", path.display()))?;
            if mode != UiMode::Json {
                println!(
                    "{} {} ({}%)",
                    GAVEL,
                    style(result.label).bold(),
                    result.confidence_percent()
                );
                println!(
                    "{} {}",
                    CLOCK,
                    format_duration(result.run_summary.duration)
                );
                println!("{} Result written to {}", CHECK, path.display());
            }
        }
        None => println!("{}", json),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_weights_overrides() {
        let weights =
            parse_weights(&["news=0.5".to_string(), "stats=0.1".to_string()]).unwrap();
        assert_eq!(weights.get(WorkerRole::News), 0.5);
        assert_eq!(weights.get(WorkerRole::Statistics), 0.1);
    }

    #[test]
    fn test_parse_weights_rejects_bad_input() {
        assert!(parse_weights(&["news".to_string()]).is_err());
        assert!(parse_weights(&["oracle=0.5".to_string()]).is_err());
        assert!(parse_weights(&["news=lots".to_string()]).is_err());
        assert!(parse_weights(&["news=-1".to_string()]).is_err());
    }
}
