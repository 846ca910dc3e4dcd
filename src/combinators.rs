//! `map`, `map_result` and `flat_map`.
//!
//! Each combinator creates a new promise on the source's executor and
//! registers a single callback on the source. Cancellation of the source
//! cancels the derived promise; no transform runs for it. A transform that
//! panics cancels the derived promise as well.
use std::panic::{self, AssertUnwindSafe};

use log::error;

use crate::{Error, Promise};

impl<T, E> Promise<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Transforms the delivered value. Errors pass through and `transform`
    /// never runs for them.
    ///
    /// # Examples
    ///
    /// ```
    /// use promise_chain::Promise;
    ///
    /// let ints = Promise::<i32, String>::new();
    /// let strings = ints.map(|x| x.to_string());
    /// let doubled = strings.map(|s| s.parse::<i32>().unwrap() * 2);
    /// assert!(!doubled.is_realized());
    ///
    /// ints.deliver(24);
    /// assert_eq!(doubled.deref(), Ok(48));
    /// ```
    pub fn map<U, F>(&self, transform: F) -> Promise<U, E>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        let chained = Promise::with_executor(self.executor());
        let target = chained.clone();
        self.on_realized(move |outcome| match outcome {
            Ok(value) => match guarded("map", move || transform(value)) {
                Some(mapped) => {
                    target.deliver(mapped);
                }
                None => {
                    target.cancel();
                }
            },
            Err(err) => {
                forward(&target, Err(err));
            }
        });
        chained
    }

    /// Transforms the delivered outcome as a whole, so `transform` may
    /// recover from an error or turn a value into one.
    pub fn map_result<U, E2, F>(&self, transform: F) -> Promise<U, E2>
    where
        U: Clone + Send + 'static,
        E2: Clone + Send + 'static,
        F: FnOnce(Result<T, E>) -> Result<U, E2> + Send + 'static,
    {
        let chained = Promise::with_executor(self.executor());
        let target = chained.clone();
        self.on_realized(move |outcome| match outcome {
            Ok(value) => settle_with(&target, guarded("map_result", move || transform(Ok(value)))),
            Err(Error::Failed(err)) => {
                settle_with(&target, guarded("map_result", move || transform(Err(err))))
            }
            Err(Error::Cancelled) => {
                target.cancel();
            }
        });
        chained
    }

    /// Chains a promise that depends on the delivered value.
    ///
    /// The returned promise realizes with whatever the promise produced by
    /// `bind` realizes with. An error in this promise skips `bind`.
    ///
    /// # Examples
    ///
    /// ```
    /// use promise_chain::Promise;
    ///
    /// let ints = Promise::<i32, String>::new();
    /// let doubled = ints
    ///     .flat_map(|x| Promise::realized(Ok(x.to_string())))
    ///     .flat_map(|s| Promise::realized(s.parse::<i32>().map(|x| x * 2).map_err(|e| e.to_string())));
    ///
    /// ints.deliver(24);
    /// assert_eq!(doubled.deref(), Ok(48));
    /// ```
    pub fn flat_map<U, F>(&self, bind: F) -> Promise<U, E>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Promise<U, E> + Send + 'static,
    {
        let chained = Promise::with_executor(self.executor());
        let target = chained.clone();
        self.on_realized(move |outcome| match outcome {
            Ok(value) => match guarded("flat_map", move || bind(value)) {
                Some(dependent) => dependent.on_realized(move |outcome| {
                    forward(&target, outcome);
                }),
                None => {
                    target.cancel();
                }
            },
            Err(err) => {
                forward(&target, Err(err));
            }
        });
        chained
    }
}

fn guarded<R>(combinator: &str, f: impl FnOnce() -> R) -> Option<R> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => Some(result),
        Err(_) => {
            error!("{} closure panicked, cancelling the derived promise", combinator);
            None
        }
    }
}

fn settle_with<T, E>(target: &Promise<T, E>, result: Option<Result<T, E>>)
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    match result {
        Some(result) => target.deliver_result(result),
        None => target.cancel(),
    };
}

fn forward<T, E>(target: &Promise<T, E>, outcome: Result<T, Error<E>>) -> bool
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    match outcome {
        Ok(value) => target.deliver(value),
        Err(Error::Failed(err)) => target.deliver_error(err),
        Err(Error::Cancelled) => target.cancel(),
    }
}
