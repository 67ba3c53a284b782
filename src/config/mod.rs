pub mod validation;

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use self::validation::validate_config;

/// Error type for configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Text => write!(f, "text"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

/// Buffering thresholds for the canonical event reporter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReporterConfig {
    #[serde(default = "default_text_flush_chars")]
    pub text_flush_chars: usize,
    #[serde(default = "default_thinking_flush_chars")]
    pub thinking_flush_chars: usize,
    /// Text emitted for a turn that produced only reasoning.
    #[serde(default = "default_placeholder_text")]
    pub placeholder_text: String,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            text_flush_chars: default_text_flush_chars(),
            thinking_flush_chars: default_thinking_flush_chars(),
            placeholder_text: default_placeholder_text(),
        }
    }
}

/// Continuation matcher tuning. The similarity threshold and the window are
/// heuristics; keep them adjustable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContinuationConfig {
    #[serde(default = "default_continuation_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_continuation_max_entries")]
    pub max_entries: usize,
    /// How many trailing assistant messages a lookup inspects.
    #[serde(default = "default_continuation_window")]
    pub window: usize,
    /// Percent similarity a text/thinking line must exceed to match.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    #[serde(default = "default_summary_max_chars")]
    pub summary_max_chars: usize,
}

impl ContinuationConfig {
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for ContinuationConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_continuation_ttl_secs(),
            max_entries: default_continuation_max_entries(),
            window: default_continuation_window(),
            similarity_threshold: default_similarity_threshold(),
            summary_max_chars: default_summary_max_chars(),
        }
    }
}

/// Continuity marker settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Lifetime stamped into new markers; markers never expire when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marker_ttl_secs: Option<u64>,
}

impl SessionConfig {
    #[must_use]
    pub fn marker_ttl(&self) -> Option<Duration> {
        self.marker_ttl_secs.map(Duration::from_secs)
    }
}

/// Stream driver settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// An upstream silent for this long is treated as cancelled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_timeout_secs: Option<u64>,
}

impl StreamConfig {
    #[must_use]
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs.map(Duration::from_secs)
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_format: LogFormat,
    #[serde(default)]
    pub reporter: ReporterConfig,
    #[serde(default)]
    pub continuation: ContinuationConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub stream: StreamConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            reporter: ReporterConfig::default(),
            continuation: ContinuationConfig::default(),
            session: SessionConfig::default(),
            stream: StreamConfig::default(),
        }
    }
}

fn default_log_level() -> String {
    "INFO".to_string()
}

fn default_text_flush_chars() -> usize {
    20
}

fn default_thinking_flush_chars() -> usize {
    80
}

fn default_placeholder_text() -> String {
    " ".to_string()
}

fn default_continuation_ttl_secs() -> u64 {
    3600
}

fn default_continuation_max_entries() -> usize {
    100
}

fn default_continuation_window() -> usize {
    3
}

fn default_similarity_threshold() -> f64 {
    90.0
}

fn default_summary_max_chars() -> usize {
    200
}

/// Parse and validate a YAML config document.
///
/// # Errors
///
/// Returns [`ConfigError::Yaml`] on malformed YAML and
/// [`ConfigError::Validation`] when a value is out of range.
pub fn parse_config(contents: &str) -> Result<EngineConfig, ConfigError> {
    let config: EngineConfig = serde_yaml::from_str(contents)?;
    validate_config(&config)?;
    Ok(config)
}

/// Load configuration from a YAML file.
///
/// # Errors
///
/// Returns [`ConfigError`] when the file cannot be read, parsed or validated.
pub fn load_config(path: impl AsRef<Path>) -> Result<EngineConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    parse_config(&contents)
}
