//! Error types for Nornir.
//!
//! This module provides the [`NornirError`] type, the single failure value
//! carried through the pipeline's result channel.
//!
//! # Taxonomy
//!
//! | Variant | Raised by | When |
//! |---|---|---|
//! | `Step` | any step callback | at invocation time |
//! | `GuardMismatch` | `constrict` / `is` / `narrow` | at invocation time |
//! | `MissingAttachment` | `AttachmentRegistry::get_assert` | at invocation time |
//! | `AttachmentCycle` | a factory reading a key it is resolving | at invocation time |
//! | `Build` | `build` / `build_with_context` | while constructing the pipeline |
//! | `NoMatch` | match steps | at invocation time |
//! | `Split` | `split` / `join` of a splitter | at invocation time |
//! | `Panicked` | any step or worker item | at invocation time |
//!
//! Every invocation-time error is recovered into the result channel at the
//! step boundary. Callers of a built handler only ever observe the terminal
//! error.

use thiserror::Error;

/// Result type alias using [`NornirError`].
pub type NornirResult<T> = Result<T, NornirError>;

/// Standard error type for Nornir.
///
/// # Example
///
/// ```
/// use nornir_core::{NornirError, NornirResult};
///
/// fn parse(raw: &str) -> NornirResult<u32> {
///     raw.parse().map_err(|_| NornirError::msg(format!("not a number: {raw}")))
/// }
///
/// assert!(parse("12").is_ok());
/// assert_eq!(parse("x").unwrap_err().to_string(), "not a number: x");
/// ```
#[derive(Error, Debug)]
pub enum NornirError {
    /// A failure produced inside a step callback.
    #[error(transparent)]
    Step(#[from] anyhow::Error),

    /// A narrowing guard rejected the value.
    #[error("guard mismatch: value of type {type_name} was rejected")]
    GuardMismatch {
        /// The type the guard was applied to.
        type_name: &'static str,
    },

    /// A required attachment was not present in the registry.
    #[error("missing attachment: key #{key} ({type_name})")]
    MissingAttachment {
        /// Numeric identity of the key.
        key: u64,
        /// The attachment's value type.
        type_name: &'static str,
    },

    /// A factory read a key whose resolution it is part of.
    #[error("attachment cycle: factory for key #{key} ({type_name}) read its own key")]
    AttachmentCycle {
        /// Numeric identity of the key.
        key: u64,
        /// The attachment's value type.
        type_name: &'static str,
    },

    /// The pipeline was configured incorrectly.
    #[error("build error: {0}")]
    Build(String),

    /// A match step found no entry for the discriminant.
    #[error("no match for tag: {tag}")]
    NoMatch {
        /// The discriminant value that had no entry (`<none>` if the field was absent).
        tag: String,
    },

    /// A splitter failed to split or join.
    #[error("split error: {0}")]
    Split(String),

    /// A step or worker item panicked.
    #[error("step panicked: {0}")]
    Panicked(String),

    /// A type-erased payload did not carry the tracked type.
    #[error("internal type mismatch: expected {expected}")]
    TypeMismatch {
        /// The type the pipeline expected at this point.
        expected: &'static str,
    },
}

impl NornirError {
    /// Creates a step error from a message.
    #[must_use]
    pub fn msg(message: impl std::fmt::Display + std::fmt::Debug + Send + Sync + 'static) -> Self {
        Self::Step(anyhow::Error::msg(message))
    }

    /// Creates a guard mismatch error for type `T`.
    #[must_use]
    pub fn guard_mismatch<T>() -> Self {
        Self::GuardMismatch {
            type_name: std::any::type_name::<T>(),
        }
    }

    /// Creates a build error.
    #[must_use]
    pub fn build(message: impl Into<String>) -> Self {
        Self::Build(message.into())
    }

    /// Creates a no-match error.
    #[must_use]
    pub fn no_match(tag: impl Into<String>) -> Self {
        Self::NoMatch { tag: tag.into() }
    }

    /// Creates a split error.
    #[must_use]
    pub fn split(message: impl Into<String>) -> Self {
        Self::Split(message.into())
    }

    /// Creates a type mismatch error for type `T`.
    #[must_use]
    pub fn type_mismatch<T>() -> Self {
        Self::TypeMismatch {
            expected: std::any::type_name::<T>(),
        }
    }

    /// Converts a caught panic payload into an error.
    #[must_use]
    pub fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string());
        Self::Panicked(message)
    }

    /// Returns true for guard mismatches.
    #[must_use]
    pub const fn is_guard_mismatch(&self) -> bool {
        matches!(self, Self::GuardMismatch { .. })
    }

    /// Returns true for missing attachments.
    #[must_use]
    pub const fn is_missing_attachment(&self) -> bool {
        matches!(self, Self::MissingAttachment { .. })
    }

    /// Returns true for factories that re-entered their own key.
    #[must_use]
    pub const fn is_attachment_cycle(&self) -> bool {
        matches!(self, Self::AttachmentCycle { .. })
    }

    /// Returns true for build-time configuration errors.
    #[must_use]
    pub const fn is_build(&self) -> bool {
        matches!(self, Self::Build(_))
    }

    /// Returns true for match misses.
    #[must_use]
    pub const fn is_no_match(&self) -> bool {
        matches!(self, Self::NoMatch { .. })
    }

    /// Returns true for caught panics.
    #[must_use]
    pub const fn is_panic(&self) -> bool {
        matches!(self, Self::Panicked(_))
    }

    /// Short, stable label used for log fields and metric labels.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Step(_) => "step",
            Self::GuardMismatch { .. } => "guard_mismatch",
            Self::MissingAttachment { .. } => "missing_attachment",
            Self::AttachmentCycle { .. } => "attachment_cycle",
            Self::Build(_) => "build",
            Self::NoMatch { .. } => "no_match",
            Self::Split(_) => "split",
            Self::Panicked(_) => "panicked",
            Self::TypeMismatch { .. } => "type_mismatch",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_msg_display_is_transparent() {
        let err = NornirError::msg("boom");
        assert_eq!(err.to_string(), "boom");
        assert_eq!(err.kind(), "step");
    }

    #[test]
    fn test_from_anyhow() {
        let err: NornirError = anyhow::anyhow!("wrapped {}", 7).into();
        assert_eq!(err.to_string(), "wrapped 7");
    }

    #[test]
    fn test_guard_mismatch_names_type() {
        let err = NornirError::guard_mismatch::<u32>();
        assert!(err.is_guard_mismatch());
        assert!(err.to_string().contains("u32"));
    }

    #[test]
    fn test_predicates() {
        assert!(NornirError::build("x").is_build());
        assert!(NornirError::no_match("T3").is_no_match());
        assert!(!NornirError::split("x").is_no_match());
        assert!(NornirError::Panicked("p".into()).is_panic());
        assert!(NornirError::MissingAttachment {
            key: 1,
            type_name: "u8"
        }
        .is_missing_attachment());
        assert!(NornirError::AttachmentCycle {
            key: 2,
            type_name: "u8"
        }
        .is_attachment_cycle());
    }

    #[test]
    fn test_from_panic_payloads() {
        let static_str: Box<dyn std::any::Any + Send> = Box::new("static");
        assert_eq!(
            NornirError::from_panic(static_str.as_ref()).to_string(),
            "step panicked: static"
        );

        let owned: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        assert_eq!(
            NornirError::from_panic(owned.as_ref()).to_string(),
            "step panicked: owned"
        );

        let other: Box<dyn std::any::Any + Send> = Box::new(42_u8);
        assert!(NornirError::from_panic(other.as_ref())
            .to_string()
            .contains("unknown"));
    }

    #[test]
    fn test_no_match_display() {
        assert_eq!(
            NornirError::no_match("T9").to_string(),
            "no match for tag: T9"
        );
    }
}
