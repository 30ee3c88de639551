//! # Nornir Pipeline
//!
//! The step-chaining pipeline builder for the Nornir engine.
//!
//! A pipeline is an ordered list of steps threaded with one
//! [`NornirResult`](nornir_core::NornirResult) and one
//! [`AttachmentRegistry`](nornir_core::AttachmentRegistry) per invocation:
//!
//! ```text
//! input ─► Ok(input) ─► step 1 ─► step 2 ─► ... ─► step n ─► value | error
//!                         │         │                 │
//!                         └─────────┴── registry ─────┘
//! ```
//!
//! ## Step Kinds
//!
//! | Builder method | Sees failures | Purpose |
//! |---|---|---|
//! | `use_` / `map` | no | transform the value |
//! | `use_result` | yes | transform or recover the result |
//! | `use_with_registry` | no | transform with registry access |
//! | `constrict` / `is` / `narrow` | no | guard the value |
//! | `split` | no | fan out over items and join |
//! | `decide` | no | route through an external [`Decider`] |
//! | `use_match` | no | dispatch on a [`Tagged`] discriminant |
//! | `use_chain` | yes | embed a built sub-pipeline |
//!
//! ## Example
//!
//! ```
//! use nornir_pipeline::nornir;
//! use nornir_core::NornirError;
//!
//! # tokio_test::block_on(async {
//! let handler = nornir::<&'static str>()
//!     .map(|raw| raw.parse::<i32>().map_err(|e| NornirError::msg(e.to_string())))
//!     .use_result(|result, _registry| async move { Ok(result.unwrap_or(0)) })
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(handler.call("12").await.unwrap(), 12);
//! assert_eq!(handler.call("twelve").await.unwrap(), 0);
//! # });
//! ```

#![doc(html_root_url = "https://docs.rs/nornir-pipeline/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod decision;
pub mod matching;
mod options;
mod pipeline;
pub mod split;
mod step;

// Re-export main types at crate root
pub use decision::{Decider, DecisionBuilder, KeyedDecider};
pub use matching::{MatchBuilder, Tagged, MATCH_FALLBACK};
pub use options::{PipelineOptions, DEFAULT_CONCURRENCY};
pub use pipeline::{nornir, ContextHandler, Handler, Nornir};
pub use split::{FnSplitter, Splitter};
pub use step::{BoxFuture, StepKind};
