//! # Nornir
//!
//! **Composable async pipelines with typed, scoped context**
//!
//! Nornir chains steps into a single callable handler:
//!
//! - **Steps** – plain, result-aware and registry-aware transforms, plus guards
//! - **Attachments** – a per-invocation, typed, lazily resolved context store
//! - **Fan-out/join** – bounded, order-preserving concurrency over split items
//! - **Branching** – externally decided dispatch and exhaustive tagged matches
//!
//! ## Quick Start
//!
//! ```
//! use nornir::prelude::*;
//!
//! # tokio_test::block_on(async {
//! let greeting = create_key::<String>();
//!
//! let handler = nornir::<String>()
//!     .use_with_registry(move |name, registry| async move {
//!         registry.put(&greeting, format!("hello {name}"));
//!         Ok(name.len())
//!     })
//!     .use_with_registry(move |len, registry| async move {
//!         registry.get_assert(&greeting).map(|g| format!("{g} ({len})"))
//!     })
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(handler.call("ada".to_string()).await.unwrap(), "hello ada (3)");
//! # });
//! ```
//!
//! ## Architecture
//!
//! ```text
//! call(input) → registry + Ok(input) → step → step → ... → step → value | error
//!                                        │
//!                          split / decide / use_match
//!                                        │
//!                           embedded sub-pipelines
//! ```

#![doc(html_root_url = "https://docs.rs/nornir/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

// Re-export core types
pub use nornir_core as core;

// Re-export pipeline types
pub use nornir_pipeline as pipeline;

// Re-export telemetry
pub use nornir_telemetry as telemetry;

// Re-export configuration
pub use nornir_config as config;

pub use nornir_pipeline::nornir;

use std::hash::Hash;

use nornir_config::NornirConfig;
use nornir_pipeline::{ContextHandler, KeyedDecider, Nornir};

/// Creates a pipeline builder whose options come from loaded configuration.
///
/// # Example
///
/// ```
/// use nornir::config::NornirConfig;
///
/// let config = NornirConfig::development();
/// let pipeline = nornir::configured::<u8>(&config);
/// assert!(!pipeline.options().catch_panics);
/// ```
#[must_use]
pub fn configured<In: Send + 'static>(config: &NornirConfig) -> Nornir<In, In> {
    Nornir::with_options(config.pipeline.to_options())
}

/// Creates the default decider: route each value by a key derived from it.
///
/// The returned decider plugs straight into [`Nornir::decide`].
///
/// # Example
///
/// ```
/// use nornir::prelude::*;
///
/// # tokio_test::block_on(async {
/// let handler = nornir::<String>()
///     .decide(nornir::decider(|s: &String| s.chars().next()), |d| {
///         d.choice('a', |p| p.map(|_| Ok("starts with a")))
///             .default(|p| p.map(|_| Ok("something else")))
///     })
///     .build()
///     .unwrap();
///
/// assert_eq!(handler.call("apple".to_string()).await.unwrap(), "starts with a");
/// assert_eq!(handler.call("pear".to_string()).await.unwrap(), "something else");
/// # });
/// ```
pub fn decider<K, In, Out, F>(key_of: F) -> KeyedDecider<K, In, ContextHandler<In, Out>>
where
    K: Eq + Hash,
    F: Fn(&In) -> Option<K> + Send + Sync + 'static,
{
    KeyedDecider::new(key_of)
}

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust,ignore
/// use nornir::prelude::*;
/// ```
pub mod prelude {
    pub use nornir_core::{
        create_key, AttachmentKey, AttachmentRegistry, NornirError, NornirResult, ResultExt,
    };

    // Re-export the builder and its runtimes
    pub use nornir_pipeline::{
        nornir, ContextHandler, Handler, Nornir, PipelineOptions, StepKind,
    };

    // Re-export fan-out and branching types
    pub use nornir_pipeline::{
        Decider, DecisionBuilder, FnSplitter, KeyedDecider, MatchBuilder, Splitter, Tagged,
        MATCH_FALLBACK,
    };

    // Re-export configuration entry points
    pub use nornir_config::{ConfigLoader, NornirConfig};
    pub use nornir_telemetry::{init_telemetry, LogConfig};
}
