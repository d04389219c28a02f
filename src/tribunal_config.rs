//! Configuration for Tribunal, read from `tribunal.toml`.
//!
//! Lookup order: `<project>/.tribunal/tribunal.toml`, then
//! `<config_dir>/tribunal/tribunal.toml`, then built-in defaults.
//! `TRIBUNAL_DEADLINE_SECS` and `TRIBUNAL_QUEUE_CAPACITY` override the file.
//!
//! ```toml
//! [panel]
//! analysts = ["academic", "news", "social", "logic", "statistics"]
//!
//! [weights]
//! academic = 0.25
//! news = 0.30
//! logic = 0.15
//! social = 0.10
//! statistics = 0.20
//!
//! [session]
//! deadline_secs = 120
//! max_statement_chars = 1000
//!
//! [extractor]
//! completion_markers = ["Final Answer:", "Agent Final Answer", "✅ Completed", "Task Completed"]
//! max_observation_chars = 500
//!
//! [stream]
//! queue_capacity = 4096
//! delivery_timeout_ms = 2000
//! ```

use crate::session::{CoordinatorConfig, DEFAULT_MAX_STATEMENT_CHARS};
use crate::stream::{BridgeConfig, DEFAULT_QUEUE_CAPACITY};
use crate::transcript::{DEFAULT_COMPLETION_MARKERS, DEFAULT_MAX_OBSERVATION_CHARS, ExtractorConfig};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tribunal_common::{Weights, WorkerRole};

pub const CONFIG_DIR: &str = ".tribunal";
pub const CONFIG_FILE: &str = "tribunal.toml";
pub const DEADLINE_ENV: &str = "TRIBUNAL_DEADLINE_SECS";
pub const QUEUE_CAPACITY_ENV: &str = "TRIBUNAL_QUEUE_CAPACITY";

/// The analyst panel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanelConfig {
    /// Analysts in declaration order
    #[serde(default = "default_analysts")]
    pub analysts: Vec<WorkerRole>,
}

fn default_analysts() -> Vec<WorkerRole> {
    WorkerRole::ANALYSTS.to_vec()
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            analysts: default_analysts(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Per-task deadline in seconds
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,
    #[serde(default = "default_max_statement_chars")]
    pub max_statement_chars: usize,
}

fn default_deadline_secs() -> u64 {
    120
}

fn default_max_statement_chars() -> usize {
    DEFAULT_MAX_STATEMENT_CHARS
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            deadline_secs: default_deadline_secs(),
            max_statement_chars: default_max_statement_chars(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractorSection {
    #[serde(default = "default_completion_markers")]
    pub completion_markers: Vec<String>,
    /// Tool results longer than this are truncated in events
    #[serde(default = "default_max_observation_chars")]
    pub max_observation_chars: usize,
}

fn default_completion_markers() -> Vec<String> {
    DEFAULT_COMPLETION_MARKERS.iter().map(|m| m.to_string()).collect()
}

fn default_max_observation_chars() -> usize {
    DEFAULT_MAX_OBSERVATION_CHARS
}

impl Default for ExtractorSection {
    fn default() -> Self {
        Self {
            completion_markers: default_completion_markers(),
            max_observation_chars: default_max_observation_chars(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_delivery_timeout_ms")]
    pub delivery_timeout_ms: u64,
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_delivery_timeout_ms() -> u64 {
    2000
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            delivery_timeout_ms: default_delivery_timeout_ms(),
        }
    }
}

fn default_weights() -> Weights {
    Weights::defaults()
}

/// The contents of `tribunal.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TribunalToml {
    #[serde(default)]
    pub panel: PanelConfig,
    #[serde(default = "default_weights")]
    pub weights: Weights,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub extractor: ExtractorSection,
    #[serde(default)]
    pub stream: StreamConfig,
}

impl Default for TribunalToml {
    fn default() -> Self {
        Self {
            panel: PanelConfig::default(),
            weights: default_weights(),
            session: SessionConfig::default(),
            extractor: ExtractorSection::default(),
            stream: StreamConfig::default(),
        }
    }
}

impl TribunalToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse tribunal.toml")
    }

    /// Load `tribunal.toml` from `dir`, or the defaults when it is absent.
    pub fn load_or_default(dir: &Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILE);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize tribunal.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Human-readable problems with the configuration. Empty when valid.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.panel.analysts.is_empty() {
            warnings.push("[panel] analysts is empty: no session can be scheduled".to_string());
        }
        let mut seen = HashSet::new();
        for role in &self.panel.analysts {
            if !role.is_analyst() {
                warnings.push(format!("[panel] '{}' is not an analyst role", role));
            } else if !seen.insert(*role) {
                warnings.push(format!("[panel] '{}' is listed more than once", role));
            }
        }

        for (role, weight) in self.weights.iter() {
            if !role.is_analyst() {
                warnings.push(format!("[weights] '{}' does not carry a weight", role));
            } else if !weight.is_finite() || weight < 0.0 {
                warnings.push(format!(
                    "[weights] '{}' must be a finite non-negative number, got {}",
                    role, weight
                ));
            }
        }

        if self.session.deadline_secs == 0 {
            warnings.push("[session] deadline_secs must be greater than zero".to_string());
        }
        if self.session.max_statement_chars == 0 {
            warnings.push("[session] max_statement_chars of 0 rejects every statement".to_string());
        }
        if self.extractor.completion_markers.iter().all(|m| m.is_empty()) {
            warnings.push(
                "[extractor] completion_markers is empty: tasks only complete when the worker returns"
                    .to_string(),
            );
        }
        if self.stream.queue_capacity == 0 {
            warnings.push("[stream] queue_capacity must be greater than zero".to_string());
        }

        warnings
    }
}

/// Resolved configuration for one project directory.
#[derive(Debug, Clone)]
pub struct TribunalConfig {
    pub project_dir: PathBuf,
    pub toml: TribunalToml,
    /// The file the configuration came from, if any.
    pub source: Option<PathBuf>,
}

impl TribunalConfig {
    /// Load the project file, falling back to the user file, then defaults.
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        let candidates = [
            Some(project_dir.join(CONFIG_DIR)),
            global_config_dir(),
        ];
        for dir in candidates.into_iter().flatten() {
            let path = dir.join(CONFIG_FILE);
            if path.exists() {
                let toml = TribunalToml::load(&path)?;
                return Ok(Self {
                    project_dir,
                    toml,
                    source: Some(path),
                });
            }
        }
        Ok(Self {
            project_dir,
            toml: TribunalToml::default(),
            source: None,
        })
    }

    pub fn config_dir(&self) -> PathBuf {
        self.project_dir.join(CONFIG_DIR)
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir().join(CONFIG_FILE)
    }

    /// Per-task deadline, honouring `TRIBUNAL_DEADLINE_SECS`.
    pub fn deadline(&self) -> Duration {
        let secs = env_override(std::env::var(DEADLINE_ENV).ok())
            .unwrap_or(self.toml.session.deadline_secs);
        Duration::from_secs(secs)
    }

    /// Event queue capacity, honouring `TRIBUNAL_QUEUE_CAPACITY`.
    pub fn queue_capacity(&self) -> usize {
        env_override(std::env::var(QUEUE_CAPACITY_ENV).ok())
            .unwrap_or(self.toml.stream.queue_capacity)
    }

    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            queue_capacity: self.queue_capacity(),
            delivery_timeout: Duration::from_millis(self.toml.stream.delivery_timeout_ms),
        }
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            panel: self.toml.panel.analysts.clone(),
            default_weights: Weights::defaults().merged(&self.toml.weights),
            max_statement_chars: self.toml.session.max_statement_chars,
            extractor: ExtractorConfig {
                completion_markers: self.toml.extractor.completion_markers.clone(),
                max_observation_chars: self.toml.extractor.max_observation_chars,
            },
        }
    }

    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }
}

/// `<config_dir>/tribunal`, when the platform has a config directory.
pub fn global_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("tribunal"))
}

/// Parse an environment override, ignoring blank or malformed values.
fn env_override<T: FromStr>(value: Option<String>) -> Option<T> {
    value.and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = TribunalToml::default();
        assert_eq!(config.panel.analysts.len(), 5);
        assert_eq!(config.session.deadline_secs, 120);
        assert_eq!(config.session.max_statement_chars, 1000);
        assert_eq!(config.extractor.max_observation_chars, 500);
        assert_eq!(config.stream.queue_capacity, 4096);
        assert_eq!(config.weights.get(WorkerRole::News), 0.30);
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_parse_partial_file() {
        let config = TribunalToml::parse(
            r#"
            [panel]
            analysts = ["news", "logic"]

            [weights]
            news = 0.6

            [session]
            deadline_secs = 30
            "#,
        )
        .unwrap();
        assert_eq!(config.panel.analysts, vec![WorkerRole::News, WorkerRole::Logic]);
        assert_eq!(config.weights.get(WorkerRole::News), 0.6);
        assert_eq!(config.session.deadline_secs, 30);
        assert_eq!(config.session.max_statement_chars, 1000);
        assert_eq!(config.stream.delivery_timeout_ms, 2000);
    }

    #[test]
    fn test_parse_rejects_unknown_role() {
        assert!(TribunalToml::parse("[panel]\nanalysts = [\"astrology\"]").is_err());
    }

    #[test]
    fn test_validate_reports_problems() {
        let config = TribunalToml::parse(
            r#"
            [panel]
            analysts = ["news", "news", "synthesizer"]

            [weights]
            logic = -1.0

            [session]
            deadline_secs = 0

            [extractor]
            completion_markers = []

            [stream]
            queue_capacity = 0
            "#,
        )
        .unwrap();
        let warnings = config.validate();
        assert!(warnings.iter().any(|w| w.contains("more than once")));
        assert!(warnings.iter().any(|w| w.contains("not an analyst")));
        assert!(warnings.iter().any(|w| w.contains("'logic'")));
        assert!(warnings.iter().any(|w| w.contains("deadline_secs")));
        assert!(warnings.iter().any(|w| w.contains("completion_markers")));
        assert!(warnings.iter().any(|w| w.contains("queue_capacity")));
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let mut config = TribunalToml::default();
        config.session.deadline_secs = 45;
        config.panel.analysts = vec![WorkerRole::Statistics];
        config.save(&dir.path().join(CONFIG_FILE)).unwrap();

        let loaded = TribunalToml::load_or_default(dir.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_or_default_without_file() {
        let dir = tempdir().unwrap();
        let loaded = TribunalToml::load_or_default(dir.path()).unwrap();
        assert_eq!(loaded, TribunalToml::default());
    }

    #[test]
    fn test_project_file_takes_precedence() {
        let dir = tempdir().unwrap();
        let config_dir = dir.path().join(CONFIG_DIR);
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::write(config_dir.join(CONFIG_FILE), "[session]\nmax_statement_chars = 50\n").unwrap();

        let config = TribunalConfig::new(dir.path().to_path_buf()).unwrap();
        assert_eq!(config.source.as_deref(), Some(config.config_file().as_path()));
        assert_eq!(config.coordinator_config().max_statement_chars, 50);
    }

    #[test]
    fn test_env_override_parsing() {
        assert_eq!(env_override::<u64>(Some(" 15 ".to_string())), Some(15));
        assert_eq!(env_override::<u64>(Some("soon".to_string())), None);
        assert_eq!(env_override::<usize>(None), None);
    }

    #[test]
    fn test_coordinator_config_merges_weights() {
        let config = TribunalConfig {
            project_dir: PathBuf::from("."),
            toml: TribunalToml::parse("[weights]\nsocial = 0.5\n").unwrap(),
            source: None,
        };
        let coordinator = config.coordinator_config();
        assert_eq!(coordinator.default_weights.get(WorkerRole::Social), 0.5);
        assert_eq!(coordinator.default_weights.get(WorkerRole::Academic), 0.25);
        assert_eq!(coordinator.panel, WorkerRole::ANALYSTS.to_vec());
    }
}
