use thiserror::Error;

/// Why a promise did not produce a value.
///
/// `Failed` carries the error a producer delivered. `Cancelled` means the
/// promise was abandoned through [`Promise::cancel`](crate::Promise::cancel)
/// before anything was delivered; it is not a value of `E`.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Error<E> {
    #[error("promise failed: {0}")]
    Failed(E),
    #[error("promise was cancelled")]
    Cancelled,
}
