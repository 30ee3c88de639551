//! Main configuration types.
//!
//! This module provides the top-level [`NornirConfig`] struct and its builder.

use serde::{Deserialize, Serialize};

use crate::{ConfigError, LogFormat, LoggingSection, PipelineSection};

/// Complete Nornir configuration.
///
/// This is the root configuration type that contains all configuration sections.
/// Use [`ConfigLoader`](crate::ConfigLoader) to load configuration from files
/// and environment variables.
///
/// # Example
///
/// ```
/// use nornir_config::NornirConfig;
///
/// let config = NornirConfig::default();
/// assert_eq!(config.pipeline.default_concurrency, 10);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct NornirConfig {
    /// Pipeline runtime configuration.
    #[serde(default)]
    pub pipeline: PipelineSection,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingSection,
}

impl NornirConfig {
    /// Create a new configuration builder.
    #[must_use]
    pub fn builder() -> NornirConfigBuilder {
        NornirConfigBuilder::new()
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if:
    /// - `pipeline.default_concurrency` is zero
    /// - `logging.level` is not a valid filter directive
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pipeline.default_concurrency == 0 {
            return Err(ConfigError::invalid_value(
                "pipeline.default_concurrency",
                "must be at least 1",
            ));
        }

        if self.logging.enabled {
            self.logging
                .to_log_config()
                .validate()
                .map_err(|e| ConfigError::invalid_value("logging.level", e.to_string()))?;
        }

        Ok(())
    }

    /// Create a development configuration preset.
    ///
    /// This preset is optimized for local development with:
    /// - Pretty log formatting with span events
    /// - Debug log level
    /// - Panics propagated instead of caught, so they surface in tests
    ///
    /// # Example
    ///
    /// ```
    /// use nornir_config::NornirConfig;
    ///
    /// let config = NornirConfig::development();
    /// assert_eq!(config.logging.level, "debug");
    /// ```
    #[must_use]
    pub fn development() -> Self {
        let mut config = Self::default();

        config.logging.level = "debug".to_string();
        config.logging.format = LogFormat::Pretty;
        config.logging.span_events = true;
        config.logging.include_location = true;

        config.pipeline.catch_panics = false;

        config
    }

    /// Create a production configuration preset.
    ///
    /// # Example
    ///
    /// ```
    /// use nornir_config::{LogFormat, NornirConfig};
    ///
    /// let config = NornirConfig::production();
    /// assert_eq!(config.logging.format, LogFormat::Json);
    /// assert!(config.pipeline.catch_panics);
    /// ```
    #[must_use]
    pub fn production() -> Self {
        let mut config = Self::default();

        config.logging.level = "info".to_string();
        config.logging.format = LogFormat::Json;

        config.pipeline.catch_panics = true;

        config
    }
}

/// Builder for [`NornirConfig`].
#[derive(Debug, Default)]
pub struct NornirConfigBuilder {
    pipeline: Option<PipelineSection>,
    logging: Option<LoggingSection>,
}

impl NornirConfigBuilder {
    /// Create a new builder with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the pipeline configuration.
    #[must_use]
    pub fn pipeline(mut self, pipeline: PipelineSection) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    /// Set the logging configuration.
    #[must_use]
    pub fn logging(mut self, logging: LoggingSection) -> Self {
        self.logging = Some(logging);
        self
    }

    /// Build the configuration.
    ///
    /// Any unset sections will use their default values.
    #[must_use]
    pub fn build(self) -> NornirConfig {
        NornirConfig {
            pipeline: self.pipeline.unwrap_or_default(),
            logging: self.logging.unwrap_or_default(),
        }
    }

    /// Build and validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if validation fails.
    pub fn build_validated(self) -> Result<NornirConfig, ConfigError> {
        let config = self.build();
        config.validate()?;
        Ok(config)
    }
}
