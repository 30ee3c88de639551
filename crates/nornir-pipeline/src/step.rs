//! Type-erased pipeline steps.
//!
//! A step is a function `(state, registry) -> future of state`, where the
//! state is the running [`NornirResult`] with its value boxed as
//! `dyn Any`. The [`Nornir`](crate::Nornir) builder tracks the concrete
//! value type at each position statically and only ever recovers a payload
//! with the type it stored, so the downcasts here are bookkeeping rather
//! than validation.

use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use nornir_core::{AttachmentRegistry, NornirError, NornirResult};

/// A boxed, sendable future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A step value with its type erased.
pub(crate) type Payload = Box<dyn Any + Send>;

/// The result flowing between steps.
pub(crate) type StepState = NornirResult<Payload>;

/// A stored step function.
pub(crate) type StepFn =
    Arc<dyn Fn(StepState, Arc<AttachmentRegistry>) -> BoxFuture<'static, StepState> + Send + Sync>;

/// The kind of a pipeline step, used for tracing and metrics labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepKind {
    /// Plain transform of the success value.
    Use,
    /// Transform of the raw incoming result.
    UseResult,
    /// Plain transform with registry access.
    UseWithRegistry,
    /// Same-type guard.
    Constrict,
    /// Type-changing guard.
    Narrow,
    /// Fan-out/join over items.
    Split,
    /// Externally decided dispatch.
    Decide,
    /// Tagged-union dispatch.
    Match,
    /// Embedded, already built sub-pipeline.
    Chain,
}

impl StepKind {
    /// Returns the step kind's label.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Use => "use",
            Self::UseResult => "use_result",
            Self::UseWithRegistry => "use_with_registry",
            Self::Constrict => "constrict",
            Self::Narrow => "narrow",
            Self::Split => "split",
            Self::Decide => "decide",
            Self::Match => "match",
            Self::Chain => "chain",
        }
    }

    /// Returns true if steps of this kind observe a prior failure.
    #[must_use]
    pub const fn observes_failure(self) -> bool {
        matches!(self, Self::UseResult | Self::Chain)
    }
}

/// One entry of a pipeline's step list.
#[derive(Clone)]
pub(crate) struct Step {
    pub(crate) kind: StepKind,
    pub(crate) run: StepFn,
}

impl Step {
    pub(crate) fn new<F>(kind: StepKind, run: F) -> Self
    where
        F: Fn(StepState, Arc<AttachmentRegistry>) -> BoxFuture<'static, StepState>
            + Send
            + Sync
            + 'static,
    {
        Self {
            kind,
            run: Arc::new(run),
        }
    }
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step").field("kind", &self.kind).finish()
    }
}

/// Boxes a value for the step list.
pub(crate) fn erase<T: Send + 'static>(value: T) -> Payload {
    Box::new(value)
}

/// Recovers a value of the tracked type from a payload.
pub(crate) fn recover<T: 'static>(payload: Payload) -> NornirResult<T> {
    payload
        .downcast::<T>()
        .map(|value| *value)
        .map_err(|_| NornirError::type_mismatch::<T>())
}
