//! Fan-out/join steps.
//!
//! A split step hands its input to a [`Splitter`], runs an inner pipeline
//! over every item with bounded concurrency, and asks the splitter to fold
//! the per-item results back into one value. Item `i` of the joined
//! results always corresponds to item `i` of the split, and one item's
//! failure never affects its siblings.
//!
//! The inner pipeline is compiled once, when the step is appended, and all
//! items share the parent invocation's attachment registry.

use std::marker::PhantomData;
use std::sync::Arc;

use nornir_core::{concurrent_map, NornirError, NornirResult};
use nornir_telemetry::metrics::record_split_items;

use crate::pipeline::Nornir;
use crate::step::{erase, recover, Step, StepKind};

/// Splits an input into items and joins per-item results.
pub trait Splitter: Send + Sync + 'static {
    /// The value being split.
    type Input: Send + 'static;
    /// One unit of work.
    type Item: Send + 'static;
    /// The inner pipeline's output for one item.
    type ItemOutput: Send + 'static;
    /// The joined value.
    type Output: Send + 'static;

    /// Maximum number of items in flight. Zero selects the pipeline default.
    fn concurrency(&self) -> usize;

    /// Splits the input into items.
    fn split(&self, input: Self::Input) -> NornirResult<Vec<Self::Item>>;

    /// Folds per-item results, in input order, into one value.
    fn join(&self, results: Vec<NornirResult<Self::ItemOutput>>) -> NornirResult<Self::Output>;
}

/// A [`Splitter`] assembled from two closures.
///
/// # Example
///
/// ```
/// use nornir_pipeline::{nornir, FnSplitter};
///
/// # tokio_test::block_on(async {
/// let splitter = FnSplitter::new(
///     4,
///     |csv: String| Ok(csv.split(',').map(str::to_owned).collect::<Vec<_>>()),
///     |lengths: Vec<nornir_core::NornirResult<usize>>| {
///         Ok(lengths.into_iter().filter_map(Result::ok).sum::<usize>())
///     },
/// );
///
/// let handler = nornir::<String>()
///     .split(splitter, |item| item.map(|s| Ok(s.len())))
///     .build()
///     .unwrap();
///
/// assert_eq!(handler.call("ab,cde,f".to_string()).await.unwrap(), 6);
/// # });
/// ```
pub struct FnSplitter<In, Item, ItemOut, Out, S, J> {
    concurrency: usize,
    split: S,
    join: J,
    _marker: PhantomData<fn(In, ItemOut) -> (Item, Out)>,
}

impl<In, Item, ItemOut, Out, S, J> FnSplitter<In, Item, ItemOut, Out, S, J>
where
    S: Fn(In) -> NornirResult<Vec<Item>> + Send + Sync + 'static,
    J: Fn(Vec<NornirResult<ItemOut>>) -> NornirResult<Out> + Send + Sync + 'static,
{
    /// Creates a splitter from a split and a join closure.
    pub fn new(concurrency: usize, split: S, join: J) -> Self {
        Self {
            concurrency,
            split,
            join,
            _marker: PhantomData,
        }
    }
}

impl<In, Item, ItemOut, Out, S, J> Splitter for FnSplitter<In, Item, ItemOut, Out, S, J>
where
    In: Send + 'static,
    Item: Send + 'static,
    ItemOut: Send + 'static,
    Out: Send + 'static,
    S: Fn(In) -> NornirResult<Vec<Item>> + Send + Sync + 'static,
    J: Fn(Vec<NornirResult<ItemOut>>) -> NornirResult<Out> + Send + Sync + 'static,
{
    type Input = In;
    type Item = Item;
    type ItemOutput = ItemOut;
    type Output = Out;

    fn concurrency(&self) -> usize {
        self.concurrency
    }

    fn split(&self, input: In) -> NornirResult<Vec<Item>> {
        (self.split)(input)
    }

    fn join(&self, results: Vec<NornirResult<ItemOut>>) -> NornirResult<Out> {
        (self.join)(results)
    }
}

impl<In, Out> Nornir<In, Out>
where
    In: Send + 'static,
    Out: Send + 'static,
{
    /// Appends a fan-out/join step.
    ///
    /// `build` receives an empty pipeline over one item and returns the
    /// per-item pipeline. A build error inside it is reported when this
    /// pipeline is built.
    pub fn split<S, B>(self, splitter: S, build: B) -> Nornir<In, S::Output>
    where
        S: Splitter<Input = Out>,
        B: FnOnce(Nornir<S::Item, S::Item>) -> Nornir<S::Item, S::ItemOutput>,
    {
        let options = self.options();
        let inner = match build(Nornir::with_options(options.clone())).build_with_context() {
            Ok(inner) => inner,
            Err(error) => {
                self.record_error(error);
                return self.push(Step::new(StepKind::Split, |_, _| {
                    Box::pin(async { Err(NornirError::build("split pipeline failed to build")) })
                }));
            }
        };

        let splitter = Arc::new(splitter);
        self.push(Step::new(StepKind::Split, move |state, registry| {
            let splitter = Arc::clone(&splitter);
            let inner = inner.clone();
            let concurrency = options.concurrency_for(splitter.concurrency());
            Box::pin(async move {
                let value: Out = recover(state?)?;
                let items = splitter.split(value)?;
                tracing::debug!(items = items.len(), concurrency, "splitting");
                record_split_items(items.len());

                let results = concurrent_map(
                    items,
                    |item| inner.call(Ok(item), Arc::clone(&registry)),
                    concurrency,
                )
                .await;

                splitter.join(results).map(erase)
            })
        }))
    }
}
