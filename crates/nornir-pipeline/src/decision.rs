//! Externally decided dispatch.
//!
//! A decision step routes its value to one of several sub-pipelines. The
//! routing strategy belongs to a [`Decider`] supplied by the caller: the
//! step registers each compiled choice under its routing key and, at run
//! time, asks the decider to resolve a handler for the value itself. When
//! nothing resolves, the mandatory default choice runs.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use nornir_core::{NornirError, NornirResult};

use crate::options::PipelineOptions;
use crate::pipeline::{ContextHandler, Nornir};
use crate::step::{erase, recover, Step, StepKind};

/// Resolves a handler for a value.
///
/// Implementations own their mapping strategy. The routing key a handler
/// was registered under need not be derivable from the values that later
/// resolve to it.
pub trait Decider<H>: Send + Sync + 'static {
    /// The routing key handlers are registered under.
    type Key;
    /// The value being routed.
    type Input;

    /// Registers `handler` under `key`.
    fn register(&mut self, key: Self::Key, handler: H);

    /// Resolves a handler for `input`, if any.
    fn decide(&self, input: &Self::Input) -> Option<H>;
}

/// A [`Decider`] that extracts a key from each value and looks it up.
///
/// # Example
///
/// ```
/// use nornir_pipeline::{Decider, KeyedDecider};
///
/// let mut decider = KeyedDecider::new(|n: &i32| Some(n.signum()));
/// decider.register(1, "positive");
/// decider.register(-1, "negative");
///
/// assert_eq!(decider.decide(&42), Some("positive"));
/// assert_eq!(decider.decide(&0), None);
/// ```
pub struct KeyedDecider<K, In, H> {
    key_of: Box<dyn Fn(&In) -> Option<K> + Send + Sync>,
    routes: HashMap<K, H>,
}

impl<K, In, H> KeyedDecider<K, In, H>
where
    K: Eq + Hash,
{
    /// Creates a decider using `key_of` to derive each value's routing key.
    pub fn new<F>(key_of: F) -> Self
    where
        F: Fn(&In) -> Option<K> + Send + Sync + 'static,
    {
        Self {
            key_of: Box::new(key_of),
            routes: HashMap::new(),
        }
    }

    /// Returns the number of registered routes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Returns true if no route is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl<K, In, H> std::fmt::Debug for KeyedDecider<K, In, H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedDecider")
            .field("routes", &self.routes.len())
            .finish_non_exhaustive()
    }
}

impl<K, In, H> Decider<H> for KeyedDecider<K, In, H>
where
    K: Eq + Hash + Send + Sync + 'static,
    In: 'static,
    H: Clone + Send + Sync + 'static,
{
    type Key = K;
    type Input = In;

    fn register(&mut self, key: K, handler: H) {
        if self.routes.insert(key, handler).is_some() {
            tracing::debug!("decision route replaced");
        }
    }

    fn decide(&self, input: &In) -> Option<H> {
        (self.key_of)(input).and_then(|key| self.routes.get(&key).cloned())
    }
}

/// Collects the choices of a decision step.
pub struct DecisionBuilder<D, In, Out> {
    decider: D,
    default: Option<ContextHandler<In, Out>>,
    options: PipelineOptions,
    errors: Vec<NornirError>,
}

impl<D, In, Out> DecisionBuilder<D, In, Out>
where
    D: Decider<ContextHandler<In, Out>, Input = In>,
    In: Send + 'static,
    Out: Send + 'static,
{
    fn new(decider: D, options: PipelineOptions) -> Self {
        Self {
            decider,
            default: None,
            options,
            errors: Vec::new(),
        }
    }

    fn compile<B>(&mut self, build: B) -> Option<ContextHandler<In, Out>>
    where
        B: FnOnce(Nornir<In, In>) -> Nornir<In, Out>,
    {
        match build(Nornir::with_options(self.options.clone())).build_with_context() {
            Ok(handler) => Some(handler),
            Err(error) => {
                self.errors.push(error);
                None
            }
        }
    }

    /// Compiles a sub-pipeline and registers it under `key`.
    #[must_use]
    pub fn choice<B>(mut self, key: D::Key, build: B) -> Self
    where
        B: FnOnce(Nornir<In, In>) -> Nornir<In, Out>,
    {
        if let Some(handler) = self.compile(build) {
            self.decider.register(key, handler);
        }
        self
    }

    /// Compiles the sub-pipeline used when the decider resolves nothing.
    #[must_use]
    pub fn default<B>(mut self, build: B) -> Self
    where
        B: FnOnce(Nornir<In, In>) -> Nornir<In, Out>,
    {
        self.default = self.compile(build);
        self
    }

    fn finish(self) -> NornirResult<(D, ContextHandler<In, Out>)> {
        if let Some(error) = self.errors.into_iter().next() {
            return Err(error);
        }
        let default = self
            .default
            .ok_or_else(|| NornirError::build("decision contexts require a default choice"))?;
        Ok((self.decider, default))
    }
}

impl<In, Out> Nornir<In, Out>
where
    In: Send + 'static,
    Out: Send + 'static,
{
    /// Appends a decision step.
    ///
    /// `build` receives a [`DecisionBuilder`] wrapping `decider` and must
    /// register a default choice.
    ///
    /// # Example
    ///
    /// ```
    /// use nornir_pipeline::{nornir, KeyedDecider};
    ///
    /// # tokio_test::block_on(async {
    /// let handler = nornir::<i32>()
    ///     .decide(KeyedDecider::new(|n: &i32| (*n < 0).then_some("neg")), |d| {
    ///         d.choice("neg", |p| p.map(|n| Ok(format!("{} below zero", -n))))
    ///             .default(|p| p.map(|n| Ok(n.to_string())))
    ///     })
    ///     .build()
    ///     .unwrap();
    ///
    /// assert_eq!(handler.call(-3).await.unwrap(), "3 below zero");
    /// assert_eq!(handler.call(3).await.unwrap(), "3");
    /// # });
    /// ```
    pub fn decide<Next, D, B>(self, decider: D, build: B) -> Nornir<In, Next>
    where
        Next: Send + 'static,
        D: Decider<ContextHandler<Out, Next>, Input = Out>,
        B: FnOnce(DecisionBuilder<D, Out, Next>) -> DecisionBuilder<D, Out, Next>,
    {
        let (decider, default) = match build(DecisionBuilder::new(decider, self.options())).finish()
        {
            Ok(parts) => parts,
            Err(error) => {
                self.record_error(error);
                return self.push(Step::new(StepKind::Decide, |_, _| {
                    Box::pin(async { Err(NornirError::build("decision failed to build")) })
                }));
            }
        };

        let decider = Arc::new(decider);
        self.push(Step::new(StepKind::Decide, move |state, registry| {
            let decider = Arc::clone(&decider);
            let default = default.clone();
            Box::pin(async move {
                let value: Out = recover(state?)?;
                let handler = decider.decide(&value).unwrap_or_else(|| {
                    tracing::debug!("decider resolved nothing, using default choice");
                    default
                });
                handler.call(Ok(value), registry).await.map(erase)
            })
        }))
    }
}
