//! Combinators for the pipeline's result channel.
//!
//! Nornir carries step outcomes as plain [`NornirResult`] values. The
//! [`ResultExt`] trait adds the two operations the engine relies on beyond
//! what `std` already provides: branch-wise chaining and the single
//! edge-of-pipeline "raise".

use crate::error::{NornirError, NornirResult};

/// Extension methods for [`NornirResult`].
///
/// # Example
///
/// ```
/// use nornir_core::{NornirError, ResultExt};
///
/// let doubled = Ok::<_, NornirError>(21).chain(|v| Ok(v * 2), Err);
/// assert_eq!(doubled.unwrap(), 42);
///
/// let recovered = Err::<i32, _>(NornirError::msg("lost")).chain(Ok, |_| Ok(0));
/// assert_eq!(recovered.unwrap(), 0);
/// ```
pub trait ResultExt<T> {
    /// Maps either branch to a new result, invoking exactly one callback.
    fn chain<U, OkF, ErrF>(self, on_ok: OkF, on_err: ErrF) -> NornirResult<U>
    where
        OkF: FnOnce(T) -> NornirResult<U>,
        ErrF: FnOnce(NornirError) -> NornirResult<U>;

    /// Yields the success value, or raises the failure to the caller.
    ///
    /// This is the outer-edge unwrap: the error is returned for `?`
    /// propagation rather than panicking.
    fn unwrap_or_raise(self) -> NornirResult<T>;
}

impl<T> ResultExt<T> for NornirResult<T> {
    fn chain<U, OkF, ErrF>(self, on_ok: OkF, on_err: ErrF) -> NornirResult<U>
    where
        OkF: FnOnce(T) -> NornirResult<U>,
        ErrF: FnOnce(NornirError) -> NornirResult<U>,
    {
        match self {
            Ok(value) => on_ok(value),
            Err(error) => on_err(error),
        }
    }

    fn unwrap_or_raise(self) -> NornirResult<T> {
        if let Err(error) = &self {
            tracing::debug!(error = %error, kind = error.kind(), "raising terminal failure");
        }
        self
    }
}
