//! Configuration section types.
//!
//! Each section mirrors one runtime crate and converts into its native
//! options type, so loaded files never leak serde types into the engine.

use nornir_pipeline::{PipelineOptions, DEFAULT_CONCURRENCY};
use nornir_telemetry::LogConfig;
use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_service_name() -> String {
    "nornir".to_string()
}

/// Pipeline runtime configuration.
///
/// # Example
///
/// ```
/// use nornir_config::PipelineSection;
///
/// let options = PipelineSection::default().to_options();
/// assert!(options.catch_panics);
/// assert_eq!(options.default_concurrency, 10);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PipelineSection {
    /// Convert panics inside steps into errors.
    #[serde(default = "default_true")]
    pub catch_panics: bool,

    /// Run each step inside a tracing span.
    #[serde(default = "default_true")]
    pub trace_steps: bool,

    /// Concurrency used by splits whose splitter does not set one.
    #[serde(default = "default_concurrency")]
    pub default_concurrency: usize,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            catch_panics: true,
            trace_steps: true,
            default_concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

impl PipelineSection {
    /// Converts this section into pipeline options.
    #[must_use]
    pub fn to_options(&self) -> PipelineOptions {
        PipelineOptions::new()
            .with_catch_panics(self.catch_panics)
            .with_trace_steps(self.trace_steps)
            .with_default_concurrency(self.default_concurrency)
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON formatted logs (production).
    #[default]
    Json,
    /// Human-readable pretty format (development).
    Pretty,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LoggingSection {
    /// Enable logging.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Filter directive (trace, debug, info, warn, error, or per-target).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format.
    #[serde(default)]
    pub format: LogFormat,

    /// Emit span open/close events.
    #[serde(default)]
    pub span_events: bool,

    /// Include source file and line in logs.
    #[serde(default)]
    pub include_location: bool,

    /// Include thread IDs in logs.
    #[serde(default)]
    pub thread_ids: bool,

    /// Service name recorded at startup.
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            enabled: true,
            level: default_log_level(),
            format: LogFormat::default(),
            span_events: false,
            include_location: false,
            thread_ids: false,
            service_name: default_service_name(),
        }
    }
}

impl LoggingSection {
    /// Converts this section into a logging configuration.
    #[must_use]
    pub fn to_log_config(&self) -> LogConfig {
        LogConfig {
            enabled: self.enabled,
            level: self.level.clone(),
            json_format: self.format == LogFormat::Json,
            span_events: self.span_events,
            file_line_info: self.include_location,
            thread_ids: self.thread_ids,
            include_target: true,
            service_name: self.service_name.clone(),
        }
    }
}
