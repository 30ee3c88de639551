//! Pipeline metrics for Nornir.
//!
//! Handlers record through the `metrics` facade; nothing is exported
//! unless the host application installs a recorder (Prometheus, statsd,
//! a debugging recorder in tests).
//!
//! # Standard Metrics
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `nornir_invocations_total` | Counter | `outcome` | Top-level handler invocations |
//! | `nornir_invocation_duration_seconds` | Histogram | `outcome` | Invocation latency |
//! | `nornir_invocations_in_flight` | Gauge | - | Invocations currently running |
//! | `nornir_step_failures_total` | Counter | `kind`, `error` | Steps that produced a failure |
//! | `nornir_split_items` | Histogram | - | Items produced per split |
//!
//! # Example
//!
//! ```
//! use nornir_telemetry::metrics::{describe_metrics, record_invocation};
//! use std::time::Duration;
//!
//! describe_metrics();
//! record_invocation(true, Duration::from_millis(3));
//! ```

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::time::Duration;

/// Top-level invocation counter.
pub const INVOCATIONS_TOTAL: &str = "nornir_invocations_total";

/// Top-level invocation latency histogram.
pub const INVOCATION_DURATION_SECONDS: &str = "nornir_invocation_duration_seconds";

/// In-flight invocation gauge.
pub const INVOCATIONS_IN_FLIGHT: &str = "nornir_invocations_in_flight";

/// Step failure counter.
pub const STEP_FAILURES_TOTAL: &str = "nornir_step_failures_total";

/// Items-per-split histogram.
pub const SPLIT_ITEMS: &str = "nornir_split_items";

/// Registers descriptions for all standard metrics with the installed recorder.
pub fn describe_metrics() {
    describe_counter!(INVOCATIONS_TOTAL, "Total number of pipeline invocations");
    describe_histogram!(
        INVOCATION_DURATION_SECONDS,
        metrics::Unit::Seconds,
        "Pipeline invocation duration in seconds"
    );
    describe_gauge!(
        INVOCATIONS_IN_FLIGHT,
        "Number of pipeline invocations currently running"
    );
    describe_counter!(
        STEP_FAILURES_TOTAL,
        "Total steps that turned their input into a failure"
    );
    describe_histogram!(SPLIT_ITEMS, "Number of items produced by each split");
}

// ============================================================================
// Metric Recording Functions
// ============================================================================

const fn outcome(success: bool) -> &'static str {
    if success {
        "ok"
    } else {
        "err"
    }
}

/// Records a completed top-level invocation.
///
/// Updates the following metrics:
/// - `nornir_invocations_total` (incremented)
/// - `nornir_invocation_duration_seconds` (histogram observation)
pub fn record_invocation(success: bool, duration: Duration) {
    counter!(INVOCATIONS_TOTAL, "outcome" => outcome(success)).increment(1);
    histogram!(INVOCATION_DURATION_SECONDS, "outcome" => outcome(success))
        .record(duration.as_secs_f64());
}

/// Records a step that produced a failure.
///
/// # Arguments
///
/// * `kind` - The step kind label (e.g., "use", "split")
/// * `error_kind` - The error's kind label (e.g., "guard_mismatch")
pub fn record_step_failure(kind: &'static str, error_kind: &'static str) {
    counter!(STEP_FAILURES_TOTAL, "kind" => kind, "error" => error_kind).increment(1);
}

/// Records the number of items a split produced.
#[allow(clippy::cast_precision_loss)]
pub fn record_split_items(count: usize) {
    histogram!(SPLIT_ITEMS).record(count as f64);
}

/// Guard that tracks an in-flight invocation.
///
/// The gauge is decremented on drop, so an invocation that unwinds is
/// still accounted for.
#[derive(Debug)]
pub struct InFlightGuard {
    _private: (),
}

impl InFlightGuard {
    /// Creates a new guard and increments the in-flight gauge.
    #[must_use]
    pub fn new() -> Self {
        gauge!(INVOCATIONS_IN_FLIGHT).increment(1.0);
        Self { _private: () }
    }
}

impl Default for InFlightGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        gauge!(INVOCATIONS_IN_FLIGHT).decrement(1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_labels() {
        assert_eq!(outcome(true), "ok");
        assert_eq!(outcome(false), "err");
    }

    #[test]
    fn test_in_flight_guard() {
        let guard = InFlightGuard::new();
        drop(guard);
    }

    #[test]
    fn test_record_functions_dont_panic() {
        // No recorder installed: the metrics facade discards everything.
        describe_metrics();
        record_invocation(true, Duration::from_millis(10));
        record_invocation(false, Duration::from_millis(1));
        record_step_failure("use", "step");
        record_split_items(3);
    }

    #[test]
    fn test_metric_names_are_prefixed() {
        for name in [
            INVOCATIONS_TOTAL,
            INVOCATION_DURATION_SECONDS,
            INVOCATIONS_IN_FLIGHT,
            STEP_FAILURES_TOTAL,
            SPLIT_ITEMS,
        ] {
            assert!(name.starts_with("nornir_"));
        }
    }
}
