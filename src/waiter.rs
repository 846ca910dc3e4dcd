use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use parking_lot::Mutex;

use crate::{Error, Promise};

/// A future that resolves when its promise is realized.
///
/// # Examples
///
/// ```
/// use promise_chain::Promise;
/// use futures::executor::block_on;
/// use std::thread;
///
/// let promise = Promise::<String, ()>::new();
/// let consumer = promise.waiter();
///
/// let task1 = thread::spawn(move || block_on(async {
///     assert_eq!(consumer.await, Ok("Hi".to_string()));
/// }));
/// promise.deliver("Hi".into());
/// task1.join().expect("The task1 thread has panicked.");
/// ```
pub struct Waiter<T, E> {
    slot: Arc<Mutex<Slot<T, E>>>,
}

struct Slot<T, E> {
    value: Option<Result<T, Error<E>>>,
    waker: Option<Waker>,
}

impl<T, E> Promise<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    pub fn waiter(&self) -> Waiter<T, E> {
        let slot = Arc::new(Mutex::new(Slot {
            value: None,
            waker: None,
        }));
        let filled = slot.clone();
        self.on_realized(move |outcome| {
            let waker = {
                let mut slot = filled.lock();
                slot.value = Some(outcome);
                slot.waker.take()
            };
            if let Some(waker) = waker {
                waker.wake()
            }
        });
        Waiter { slot }
    }
}

impl<T, E> IntoFuture for Promise<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    type Output = Result<T, Error<E>>;
    type IntoFuture = Waiter<T, E>;

    fn into_future(self) -> Self::IntoFuture {
        self.waiter()
    }
}

impl<T: Clone, E: Clone> Future for Waiter<T, E> {
    type Output = Result<T, Error<E>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut slot = self.slot.lock();
        match slot.value {
            Some(ref value) => Poll::Ready(value.clone()),
            None => {
                slot.waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}
