//! Runtime options for built pipelines.

/// Default number of concurrent items for a split whose splitter reports zero.
pub const DEFAULT_CONCURRENCY: usize = 10;

/// Options shared by a pipeline and every sub-pipeline built inside it.
///
/// # Example
///
/// ```
/// use nornir_pipeline::PipelineOptions;
///
/// let options = PipelineOptions::default().with_default_concurrency(4);
/// assert!(options.catch_panics);
/// assert_eq!(options.default_concurrency, 4);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOptions {
    /// Convert panics inside steps into `NornirError::Panicked`.
    pub catch_panics: bool,

    /// Run each step inside a `nornir.step` tracing span.
    pub trace_steps: bool,

    /// Concurrency used by splits whose splitter reports zero.
    pub default_concurrency: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            catch_panics: true,
            trace_steps: true,
            default_concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

impl PipelineOptions {
    /// Create options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set panic catching.
    pub fn with_catch_panics(mut self, enabled: bool) -> Self {
        self.catch_panics = enabled;
        self
    }

    /// Set per-step tracing spans.
    pub fn with_trace_steps(mut self, enabled: bool) -> Self {
        self.trace_steps = enabled;
        self
    }

    /// Set the fallback split concurrency. Zero is stored as one.
    pub fn with_default_concurrency(mut self, concurrency: usize) -> Self {
        self.default_concurrency = concurrency.max(1);
        self
    }

    /// Resolves a splitter's requested concurrency.
    pub(crate) fn concurrency_for(&self, requested: usize) -> usize {
        if requested == 0 {
            self.default_concurrency.max(1)
        } else {
            requested
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = PipelineOptions::new();
        assert!(options.catch_panics);
        assert!(options.trace_steps);
        assert_eq!(options.default_concurrency, DEFAULT_CONCURRENCY);
    }

    #[test]
    fn test_concurrency_for() {
        let options = PipelineOptions::new().with_default_concurrency(0);
        assert_eq!(options.default_concurrency, 1);
        assert_eq!(options.concurrency_for(0), 1);
        assert_eq!(options.concurrency_for(7), 7);
    }
}
