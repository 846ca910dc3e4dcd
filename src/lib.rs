//! Write-once promises that can be shared between threads.
//!
//! A [`Promise`] starts out empty and is realized exactly once, with a value,
//! an error, or a cancellation. Any number of threads may then observe it:
//! blocking with [`Promise::deref`] (optionally bounded by a timeout),
//! registering a callback with [`Promise::on_realized`], or awaiting a
//! [`Waiter`]. [`Promise::map`], [`Promise::map_result`] and
//! [`Promise::flat_map`] derive new promises from existing ones.
//!
//! Callbacks never run under the promise's lock. They are handed to an
//! [`Executor`], by default a shared [`PoolExecutor`]. Callbacks of one
//! promise run in registration order.
//!
//! ```
//! use promise_chain::{Error, Promise};
//! use std::time::Duration;
//!
//! let promise = Promise::<i32, String>::new();
//! assert_eq!(promise.deref_timeout(Duration::from_millis(10)), None);
//!
//! let doubled = promise.map(|x| x * 2);
//! promise.deliver(21);
//! assert_eq!(doubled.deref(), Ok(42));
//!
//! let cancelled = Promise::<i32, String>::new();
//! cancelled.cancel();
//! assert_eq!(cancelled.deref(), Err(Error::Cancelled));
//! ```
mod combinators;
pub mod error;
pub mod executor;
pub mod promise;
pub mod waiter;

pub use error::Error;
pub use executor::{default_executor, Executor, InlineExecutor, PoolExecutor, Work};
pub use promise::Promise;
pub use waiter::Waiter;
