//! The step-chaining builder and its runtimes.
//!
//! A [`Nornir<In, Out>`] is a thin, typed view over a shared build context
//! holding the ordered step list. Every builder method appends one step and
//! returns a new view whose `Out` reflects the step's output type:
//!
//! ```text
//! nornir::<Order>()          Nornir<Order, Order>
//!     .map(validate)         Nornir<Order, Order>
//!     .use_(price)           Nornir<Order, Priced>
//!     .use_result(recover)   Nornir<Order, Priced>
//!     .build()?              Handler<Order, Priced>
//! ```
//!
//! ## Execution model
//!
//! Steps run strictly in append order, one at a time. Each receives the
//! previous step's result. Plain steps (`use_`, `map`, `use_with_registry`,
//! guards, branches) pass an incoming failure through untouched without
//! calling their callback; `use_result` is the only step that observes, and
//! may recover, a prior failure.
//!
//! ## Materializing
//!
//! - [`Nornir::build`] yields a [`Handler`] that creates a fresh
//!   [`AttachmentRegistry`] per call and returns the terminal value or error.
//! - [`Nornir::build_with_context`] yields a [`ContextHandler`] that runs
//!   against a caller-supplied result and registry, for embedding.
//!
//! Configuration errors (a decision without a default, a malformed match
//! table) are collected while building and returned by these two methods.

use std::future::Future;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures_util::FutureExt;
use nornir_core::{AttachmentRegistry, NornirError, NornirResult, ResultExt};
use nornir_telemetry::logging::fields::STEP_SPAN;
use nornir_telemetry::metrics::{record_invocation, record_step_failure, InFlightGuard};
use parking_lot::Mutex;
use tracing::Instrument;

use crate::options::PipelineOptions;
use crate::step::{erase, recover, BoxFuture, Step, StepKind, StepState};

/// Mutable state shared by every builder view of one pipeline.
#[derive(Debug, Default)]
pub(crate) struct BuildContext {
    steps: Vec<Step>,
    errors: Vec<NornirError>,
    options: PipelineOptions,
}

/// Creates a pipeline builder whose input and output are `In`.
///
/// # Example
///
/// ```
/// use nornir_pipeline::nornir;
///
/// # tokio_test::block_on(async {
/// let handler = nornir::<i32>()
///     .map(|n| Ok(n + 1))
///     .use_(|n| async move { Ok(n * 10) })
///     .build()
///     .unwrap();
///
/// assert_eq!(handler.call(4).await.unwrap(), 50);
/// # });
/// ```
#[must_use]
pub fn nornir<In: Send + 'static>() -> Nornir<In, In> {
    Nornir::new()
}

/// A typed builder view over a shared step list.
pub struct Nornir<In, Out> {
    context: Arc<Mutex<BuildContext>>,
    _marker: PhantomData<fn(In) -> Out>,
}

impl<In: Send + 'static> Nornir<In, In> {
    /// Creates an empty pipeline with default options.
    #[must_use]
    pub fn new() -> Self {
        Self::with_options(PipelineOptions::default())
    }

    /// Creates an empty pipeline with the given options.
    #[must_use]
    pub fn with_options(options: PipelineOptions) -> Self {
        Self {
            context: Arc::new(Mutex::new(BuildContext {
                options,
                ..BuildContext::default()
            })),
            _marker: PhantomData,
        }
    }
}

impl<In: Send + 'static> Default for Nornir<In, In> {
    fn default() -> Self {
        Self::new()
    }
}

impl<In, Out> std::fmt::Debug for Nornir<In, Out> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let context = self.context.lock();
        f.debug_struct("Nornir")
            .field("input", &std::any::type_name::<In>())
            .field("output", &std::any::type_name::<Out>())
            .field("steps", &context.steps)
            .field("errors", &context.errors.len())
            .finish()
    }
}

impl<In, Out> Nornir<In, Out>
where
    In: Send + 'static,
    Out: Send + 'static,
{
    /// Appends a step and advances the tracked output type.
    pub(crate) fn push<Next>(self, step: Step) -> Nornir<In, Next> {
        self.context.lock().steps.push(step);
        Nornir {
            context: self.context,
            _marker: PhantomData,
        }
    }

    /// Records a configuration error to be returned at build time.
    pub(crate) fn record_error(&self, error: NornirError) {
        tracing::debug!(error = %error, "recorded pipeline build error");
        self.context.lock().errors.push(error);
    }

    /// Returns this pipeline's options, inherited by sub-pipelines.
    #[must_use]
    pub fn options(&self) -> PipelineOptions {
        self.context.lock().options.clone()
    }

    /// Returns the number of steps appended so far.
    #[must_use]
    pub fn step_count(&self) -> usize {
        self.context.lock().steps.len()
    }

    /// Returns the kinds of the steps appended so far, in order.
    #[must_use]
    pub fn step_kinds(&self) -> Vec<StepKind> {
        self.context.lock().steps.iter().map(|s| s.kind).collect()
    }

    /// Appends an async transform of the success value.
    ///
    /// The callback is skipped when the incoming result is a failure; the
    /// failure passes through unchanged.
    pub fn use_<Next, F, Fut>(self, f: F) -> Nornir<In, Next>
    where
        Next: Send + 'static,
        F: Fn(Out) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = NornirResult<Next>> + Send + 'static,
    {
        let f = Arc::new(f);
        self.push(Step::new(StepKind::Use, move |state, _registry| {
            let f = Arc::clone(&f);
            Box::pin(async move {
                let value: Out = recover(state?)?;
                f(value).await.map(erase)
            })
        }))
    }

    /// Appends a synchronous transform of the success value.
    pub fn map<Next, F>(self, f: F) -> Nornir<In, Next>
    where
        Next: Send + 'static,
        F: Fn(Out) -> NornirResult<Next> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        self.push(Step::new(StepKind::Use, move |state, _registry| {
            let outcome = state.and_then(recover::<Out>).and_then(|v| f(v)).map(erase);
            Box::pin(async move { outcome })
        }))
    }

    /// Appends a transform of the raw incoming result.
    ///
    /// This is the only step that sees a prior failure, and so the only
    /// place a failure can be turned back into a success.
    pub fn use_result<Next, F, Fut>(self, f: F) -> Nornir<In, Next>
    where
        Next: Send + 'static,
        F: Fn(NornirResult<Out>, Arc<AttachmentRegistry>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = NornirResult<Next>> + Send + 'static,
    {
        let f = Arc::new(f);
        self.push(Step::new(StepKind::UseResult, move |state, registry| {
            let f = Arc::clone(&f);
            Box::pin(async move {
                let incoming = state.and_then(recover::<Out>);
                f(incoming, registry).await.map(erase)
            })
        }))
    }

    /// Appends an async transform that also receives the registry.
    pub fn use_with_registry<Next, F, Fut>(self, f: F) -> Nornir<In, Next>
    where
        Next: Send + 'static,
        F: Fn(Out, Arc<AttachmentRegistry>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = NornirResult<Next>> + Send + 'static,
    {
        let f = Arc::new(f);
        self.push(Step::new(StepKind::UseWithRegistry, move |state, registry| {
            let f = Arc::clone(&f);
            Box::pin(async move {
                let value: Out = recover(state?)?;
                f(value, registry).await.map(erase)
            })
        }))
    }

    /// Appends a guard that passes the value through or fails with a
    /// guard mismatch.
    pub fn constrict<G>(self, guard: G) -> Nornir<In, Out>
    where
        G: Fn(&Out) -> bool + Send + Sync + 'static,
    {
        let guard = Arc::new(guard);
        self.push(Step::new(StepKind::Constrict, move |state, _registry| {
            let outcome = state.and_then(recover::<Out>).and_then(|value| {
                if guard(&value) {
                    Ok(erase(value))
                } else {
                    Err(NornirError::guard_mismatch::<Out>())
                }
            });
            Box::pin(async move { outcome })
        }))
    }

    /// Alias for [`constrict`](Self::constrict).
    pub fn is<G>(self, guard: G) -> Nornir<In, Out>
    where
        G: Fn(&Out) -> bool + Send + Sync + 'static,
    {
        self.constrict(guard)
    }

    /// Appends a guard that narrows the value to a new type.
    ///
    /// Returning `None` fails the step with a guard mismatch.
    pub fn narrow<Next, G>(self, guard: G) -> Nornir<In, Next>
    where
        Next: Send + 'static,
        G: Fn(Out) -> Option<Next> + Send + Sync + 'static,
    {
        let guard = Arc::new(guard);
        self.push(Step::new(StepKind::Narrow, move |state, _registry| {
            let outcome = state.and_then(recover::<Out>).and_then(|value| {
                guard(value)
                    .map(erase)
                    .ok_or_else(NornirError::guard_mismatch::<Out>)
            });
            Box::pin(async move { outcome })
        }))
    }

    /// Appends an already built sub-pipeline as a single step.
    ///
    /// The sub-pipeline receives the raw incoming result, so a failure is
    /// visible to any `use_result` steps inside it.
    pub fn use_chain<Next>(self, chain: ContextHandler<Out, Next>) -> Nornir<In, Next>
    where
        Next: Send + 'static,
    {
        self.push(Step::new(StepKind::Chain, move |state, registry| {
            let call = chain.call(state.and_then(recover::<Out>), registry);
            Box::pin(async move { call.await.map(erase) })
        }))
    }

    /// Compiles the step list into an embeddable handler.
    pub fn build_with_context(self) -> NornirResult<ContextHandler<In, Out>> {
        Ok(ContextHandler {
            compiled: self.compile()?,
            _marker: PhantomData,
        })
    }

    fn compile(self) -> NornirResult<Arc<Compiled>> {
        let mut context = self.context.lock();
        let mut errors = std::mem::take(&mut context.errors).into_iter();
        if let Some(first) = errors.next() {
            for rest in errors {
                tracing::warn!(error = %rest, "additional pipeline build error");
            }
            return Err(first);
        }

        Ok(Arc::new(Compiled {
            steps: context.steps.clone(),
            options: context.options.clone(),
        }))
    }
}

impl<In, Out> Nornir<In, Out>
where
    In: Clone + Send + Sync + 'static,
    Out: Send + 'static,
{
    /// Compiles the step list into a standalone handler.
    pub fn build(self) -> NornirResult<Handler<In, Out>> {
        Ok(Handler {
            compiled: self.compile()?,
            _marker: PhantomData,
        })
    }
}

/// A frozen step list.
#[derive(Debug)]
struct Compiled {
    steps: Vec<Step>,
    options: PipelineOptions,
}

impl Compiled {
    async fn run(&self, mut state: StepState, registry: Arc<AttachmentRegistry>) -> StepState {
        for (index, step) in self.steps.iter().enumerate() {
            let was_ok = state.is_ok();
            let run = Arc::clone(&step.run);
            let registry = Arc::clone(&registry);
            // Call inside the future so a panic while building it is caught too.
            let future: BoxFuture<'static, StepState> =
                Box::pin(async move { run(state, registry).await });
            state = self.drive(index, step.kind, future).await;

            if let Err(error) = &state {
                if was_ok || step.kind.observes_failure() {
                    tracing::debug!(
                        index,
                        kind = step.kind.name(),
                        error = %error,
                        "step failed"
                    );
                    record_step_failure(step.kind.name(), error.kind());
                }
            }
        }
        state
    }

    async fn drive(
        &self,
        index: usize,
        kind: StepKind,
        future: BoxFuture<'static, StepState>,
    ) -> StepState {
        let future: BoxFuture<'static, StepState> = if self.options.catch_panics {
            Box::pin(async move {
                AssertUnwindSafe(future).catch_unwind().await.unwrap_or_else(|payload| {
                    let error = NornirError::from_panic(payload.as_ref());
                    tracing::warn!(index, kind = kind.name(), error = %error, "step panicked");
                    Err(error)
                })
            })
        } else {
            future
        };

        if self.options.trace_steps {
            let span = tracing::debug_span!(STEP_SPAN, index, kind = kind.name());
            future.instrument(span).await
        } else {
            future.await
        }
    }
}

/// A standalone, callable pipeline.
///
/// Each call creates a fresh [`AttachmentRegistry`], seeds it with the
/// input, runs every step and returns the terminal value or failure.
/// Handlers are cheap to clone and may be called concurrently.
pub struct Handler<In, Out> {
    compiled: Arc<Compiled>,
    _marker: PhantomData<fn(In) -> Out>,
}

impl<In, Out> Clone for Handler<In, Out> {
    fn clone(&self) -> Self {
        Self {
            compiled: Arc::clone(&self.compiled),
            _marker: PhantomData,
        }
    }
}

impl<In, Out> std::fmt::Debug for Handler<In, Out> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handler")
            .field("steps", &self.compiled.steps.len())
            .finish()
    }
}

impl<In, Out> Handler<In, Out>
where
    In: Clone + Send + Sync + 'static,
    Out: Send + 'static,
{
    /// Runs the pipeline against `input`.
    pub async fn call(&self, input: In) -> NornirResult<Out> {
        self.call_with_registry(input, Arc::new(AttachmentRegistry::new()))
            .await
    }

    /// Runs the pipeline against `input` using a caller-prepared registry.
    ///
    /// The input is stored as the invocation attachment unless the registry
    /// already holds one.
    pub async fn call_with_registry(
        &self,
        input: In,
        registry: Arc<AttachmentRegistry>,
    ) -> NornirResult<Out> {
        registry.seed_invocation(input.clone());

        let _in_flight = InFlightGuard::new();
        let started = Instant::now();
        let outcome = self
            .compiled
            .run(Ok(erase(input)), registry)
            .await
            .and_then(recover::<Out>);
        record_invocation(outcome.is_ok(), started.elapsed());

        outcome.unwrap_or_raise()
    }

    /// Returns the number of steps.
    #[must_use]
    pub fn step_count(&self) -> usize {
        self.compiled.steps.len()
    }
}

/// A pipeline embeddable inside another pipeline's execution.
///
/// It runs against an existing result and registry instead of creating its
/// own; split items, decision choices and match arms are compiled to this.
pub struct ContextHandler<In, Out> {
    compiled: Arc<Compiled>,
    _marker: PhantomData<fn(In) -> Out>,
}

impl<In, Out> Clone for ContextHandler<In, Out> {
    fn clone(&self) -> Self {
        Self {
            compiled: Arc::clone(&self.compiled),
            _marker: PhantomData,
        }
    }
}

impl<In, Out> std::fmt::Debug for ContextHandler<In, Out> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextHandler")
            .field("steps", &self.compiled.steps.len())
            .finish()
    }
}

impl<In, Out> ContextHandler<In, Out>
where
    In: Send + 'static,
    Out: Send + 'static,
{
    /// Runs the pipeline against `input` with the given registry.
    pub fn call(
        &self,
        input: NornirResult<In>,
        registry: Arc<AttachmentRegistry>,
    ) -> BoxFuture<'static, NornirResult<Out>> {
        let compiled = Arc::clone(&self.compiled);
        Box::pin(async move {
            compiled
                .run(input.map(erase), registry)
                .await
                .and_then(recover::<Out>)
        })
    }

    /// Returns the number of steps.
    #[must_use]
    pub fn step_count(&self) -> usize {
        self.compiled.steps.len()
    }
}
