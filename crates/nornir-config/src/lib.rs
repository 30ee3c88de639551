//! Typed configuration system for Nornir.
//!
//! This crate provides a strongly-typed configuration layer for pipeline hosts
//! with support for:
//! - TOML and JSON configuration files
//! - Environment variable overrides
//! - `.env` files
//! - Strict validation (fails on unknown fields)
//! - Layered configuration (defaults → file → env)
//!
//! # Overview
//!
//! The configuration system is built around the [`NornirConfig`] struct:
//!
//! - [`PipelineSection`] - runtime options, converted with [`PipelineSection::to_options`]
//! - [`LoggingSection`] - logging output, converted with [`LoggingSection::to_log_config`]
//!
//! # Example
//!
//! ```no_run
//! use nornir_config::ConfigLoader;
//!
//! # fn main() -> Result<(), nornir_config::ConfigError> {
//! let config = ConfigLoader::new()
//!     .with_defaults()
//!     .with_optional_file("nornir.toml")?
//!     .with_dotenv()?
//!     .with_env_prefix("NORNIR")
//!     .load()?;
//!
//! let options = config.pipeline.to_options();
//! let logging = config.logging.to_log_config();
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration File Format
//!
//! ```toml
//! [pipeline]
//! catch_panics = true
//! trace_steps = true
//! default_concurrency = 10
//!
//! [logging]
//! enabled = true
//! level = "info"
//! format = "json"
//! span_events = false
//! service_name = "orders"
//! ```
//!
//! # Environment Variable Overrides
//!
//! All configuration values can be overridden via environment variables using
//! the format `PREFIX__SECTION__KEY`. For example:
//!
//! - `NORNIR__PIPELINE__DEFAULT_CONCURRENCY=32`
//! - `NORNIR__LOGGING__LEVEL=nornir_pipeline=debug`
//! - `NORNIR__LOGGING__FORMAT=pretty`

#![doc(html_root_url = "https://docs.rs/nornir-config/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod config;
mod error;
mod loader;
mod schema;

pub use config::{NornirConfig, NornirConfigBuilder};
pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::{LogFormat, LoggingSection, PipelineSection};
