//! # Nornir Core
//!
//! Core types for the Nornir pipeline engine.
//!
//! This crate provides the foundational pieces every pipeline step touches:
//!
//! - [`NornirError`] / [`NornirResult`] - the failure value and result channel
//! - [`ResultExt`] - branch-wise chaining and the outer-edge raise
//! - [`AttachmentRegistry`] / [`AttachmentKey`] - scoped, typed, lazily resolved context data
//! - [`concurrent_map`] - bounded, order-preserving concurrent map

#![doc(html_root_url = "https://docs.rs/nornir-core/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod attachment;
mod error;
pub mod pool;
mod result;

pub use attachment::{create_key, AttachmentKey, AttachmentRegistry, KeyId};
pub use error::{NornirError, NornirResult};
pub use pool::concurrent_map;
pub use result::ResultExt;
