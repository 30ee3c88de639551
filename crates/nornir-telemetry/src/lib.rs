//! Structured logging and metrics for Nornir.
//!
//! This crate provides the ambient observability of the pipeline engine:
//!
//! - **Logging**: a `tracing-subscriber` registry with JSON or pretty output
//! - **Metrics**: invocation, step-failure and split metrics via the `metrics` crate
//!
//! Pipelines emit `tracing` events and `metrics` observations whether or
//! not anything is installed; this crate only decides where they go.
//!
//! # Example
//!
//! ```rust,ignore
//! use nornir_telemetry::{init_telemetry, LogConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     init_telemetry(&LogConfig::development())?;
//!     // Build and run pipelines...
//!     Ok(())
//! }
//! ```

#![doc(html_root_url = "https://docs.rs/nornir-telemetry/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::TelemetryError;
pub use logging::{create_env_filter, init_logging, LogConfig};
pub use metrics::{describe_metrics, InFlightGuard};

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Initializes logging and registers metric descriptions.
///
/// # Errors
///
/// Returns `TelemetryError` if logging fails to initialize.
pub fn init_telemetry(config: &LogConfig) -> TelemetryResult<()> {
    init_logging(config)?;
    describe_metrics();
    Ok(())
}
