use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};
use tribunal::ui::UiMode;

mod cmd;

#[derive(Parser)]
#[command(name = "tribunal")]
#[command(version, about = "Phased multi-analyst deliberation over a single claim")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Also write JSON logs to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Format of the logs written to stderr
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Deliberate over a claim by replaying recorded analyst transcripts
    Run(RunArgs),
    /// List the verdict labels and their meaning
    Taxonomy,
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// The claim under deliberation
    #[arg(short, long)]
    pub statement: String,

    /// Directory holding `<phase>/<role>.txt` transcripts
    #[arg(short, long)]
    pub transcripts: PathBuf,

    /// Per-task deadline in seconds (overrides tribunal.toml)
    #[arg(long)]
    pub deadline_secs: Option<u64>,

    /// Override an analyst weight, e.g. `--weight news=0.5`
    #[arg(short, long = "weight", value_name = "ROLE=VALUE")]
    pub weights: Vec<String>,

    /// Output mode
    #[arg(long, value_enum, default_value_t = UiMode::Full)]
    pub ui: UiMode,

    /// Write the final result here instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Pause between transcript lines to simulate a live worker
    #[arg(long, value_name = "MS")]
    pub stream_delay_ms: Option<u64>,

    /// Hand each transcript over in one piece instead of line by line
    #[arg(long)]
    pub single_shot: bool,
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Check the configuration for problems
    Validate,
    /// Write a default tribunal.toml
    Init,
}

/// Install the stderr log layer and, when requested, a JSON file layer.
///
/// The returned guard must stay alive for the file layer to flush.
fn init_tracing(cli: &Cli) -> Result<Option<WorkerGuard>> {
    let default_filter = if cli.verbose { "debug" } else { "info" };
    let filter =
        || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    match cli.log_format {
        LogFormat::Text => layers.push(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_filter(filter())
                .boxed(),
        ),
        LogFormat::Json => layers.push(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_filter(filter())
                .boxed(),
        ),
    }

    let mut guard = None;
    if let Some(path) = &cli.log_file {
        let file_name = path
            .file_name()
            .context("--log-file must name a file")?;
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;

        let appender = tracing_appender::rolling::never(dir, file_name);
        let (writer, file_guard) = tracing_appender::non_blocking(appender);
        layers.push(
            tracing_subscriber::fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(filter())
                .boxed(),
        );
        guard = Some(file_guard);
    }

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .context("Failed to install log subscriber")?;
    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    let _log_guard = init_tracing(&cli)?;

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to resolve current directory")?,
    };

    match &cli.command {
        Commands::Run(args) => cmd::cmd_run(&cli, &project_dir, args).await?,
        Commands::Taxonomy => cmd::cmd_taxonomy(),
        Commands::Config { command } => cmd::cmd_config(&project_dir, command.clone())?,
    }

    Ok(())
}
