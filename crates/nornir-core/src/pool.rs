//! Bounded, order-preserving concurrent map.
//!
//! [`concurrent_map`] drives a fixed number of cooperative workers over a
//! shared cursor. Each worker claims the next unclaimed `(index, item)` pair,
//! computes its outcome and writes it into output slot `index`, so the
//! returned vector lines up with the input no matter which items finish
//! first.
//!
//! Workers run on the calling task; nothing is spawned onto the runtime.
//! That keeps borrowed state (such as a shared attachment registry) usable
//! from the per-item futures.

use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures_util::future::join_all;
use futures_util::FutureExt;
use parking_lot::Mutex;

use crate::error::{NornirError, NornirResult};

/// Maps `f` over `items` with at most `concurrency` items in flight.
///
/// Per-item failures, including panics, are isolated into that item's slot
/// and never abort siblings. A `concurrency` of zero is treated as one, and
/// the worker count is clamped to the item count.
///
/// # Example
///
/// ```
/// use nornir_core::pool::concurrent_map;
///
/// # tokio_test::block_on(async {
/// let results = concurrent_map(vec![1, 2, 3], |n| async move { Ok(n * 2) }, 2).await;
/// let doubled: Vec<i32> = results.into_iter().map(Result::unwrap).collect();
/// assert_eq!(doubled, vec![2, 4, 6]);
/// # });
/// ```
pub async fn concurrent_map<T, U, F, Fut>(
    items: Vec<T>,
    f: F,
    concurrency: usize,
) -> Vec<NornirResult<U>>
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = NornirResult<U>>,
{
    let total = items.len();
    if total == 0 {
        return Vec::new();
    }

    let workers = concurrency.clamp(1, total);
    tracing::debug!(items = total, workers, "starting concurrent map");

    let cursor = Mutex::new(items.into_iter().enumerate());
    let slots: Mutex<Vec<Option<NornirResult<U>>>> =
        Mutex::new((0..total).map(|_| None).collect());

    let cursor = &cursor;
    let slots_ref = &slots;
    let f = &f;
    let worker = move |_worker: usize| async move {
        loop {
            let claimed = cursor.lock().next();
            let Some((index, item)) = claimed else {
                break;
            };

            let outcome = AssertUnwindSafe(async move { f(item).await })
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| {
                    let error = NornirError::from_panic(payload.as_ref());
                    tracing::warn!(index, error = %error, "worker item panicked");
                    Err(error)
                });

            slots_ref.lock()[index] = Some(outcome);
        }
    };

    join_all((0..workers).map(worker)).await;

    slots
        .into_inner()
        .into_iter()
        .map(|slot| {
            slot.unwrap_or_else(|| Err(NornirError::split("worker pool left a slot unfilled")))
        })
        .collect()
}
