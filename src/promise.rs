use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, error, trace};
use parking_lot::{Condvar, Mutex};

use crate::executor::{default_executor, Executor};
use crate::Error;

type Callback<T, E> = Box<dyn FnOnce(Result<T, Error<E>>) + Send + 'static>;

enum State<T, E> {
    // Callbacks are only ever parked while nothing has been delivered.
    Unrealized(Vec<Callback<T, E>>),
    Realized(Result<T, E>),
    Cancelled,
}

impl<T: Clone, E: Clone> State<T, E> {
    fn outcome(&self) -> Option<Result<T, Error<E>>> {
        match self {
            State::Unrealized(_) => None,
            State::Realized(Ok(value)) => Some(Ok(value.clone())),
            State::Realized(Err(err)) => Some(Err(Error::Failed(err.clone()))),
            State::Cancelled => Some(Err(Error::Cancelled)),
        }
    }
}

struct Shared<T, E> {
    state: State<T, E>,
    // Some while a drain is queued on the executor or running: callbacks
    // registered after realization wait here for it, in registration order.
    draining: Option<Vec<Callback<T, E>>>,
}

struct Inner<T, E> {
    shared: Mutex<Shared<T, E>>,
    realized: Condvar,
    executor: Arc<dyn Executor>,
}

/// A write-once value that any number of threads can wait on.
///
/// A promise starts unrealized. The first call to one of the `deliver`
/// methods or to [`cancel`](Promise::cancel) fixes its outcome for good;
/// every later call is ignored. Clones are handles to the same promise.
///
/// Callbacks of one promise run one after another in registration order,
/// those registered before realization first, whatever executor is used.
///
/// # Examples
///
/// ```
/// use promise_chain::Promise;
/// use std::thread;
///
/// let promise = Promise::<u32, String>::new();
/// let producer = promise.clone();
/// let task = thread::spawn(move || producer.deliver(5));
///
/// assert_eq!(promise.deref(), Ok(5));
/// task.join().expect("The producer thread has panicked");
///
/// // The first delivery wins.
/// assert!(!promise.deliver(3));
/// assert_eq!(promise.deref(), Ok(5));
/// ```
pub struct Promise<T, E> {
    inner: Arc<Inner<T, E>>,
}

impl<T, E> Clone for Promise<T, E> {
    fn clone(&self) -> Self {
        Promise {
            inner: self.inner.clone(),
        }
    }
}

impl<T, E> Default for Promise<T, E> {
    fn default() -> Self {
        Promise::new()
    }
}

impl<T, E> Promise<T, E> {
    /// An unrealized promise whose callbacks run on [`default_executor`].
    pub fn new() -> Self {
        Promise::with_executor(default_executor())
    }

    /// An unrealized promise whose callbacks run on `executor`.
    pub fn with_executor(executor: Arc<dyn Executor>) -> Self {
        Promise::from_state(State::Unrealized(Vec::new()), executor)
    }

    /// A promise that is already realized with `result`.
    pub fn realized(result: Result<T, E>) -> Self {
        Promise::from_state(State::Realized(result), default_executor())
    }

    fn from_state(state: State<T, E>, executor: Arc<dyn Executor>) -> Self {
        Promise {
            inner: Arc::new(Inner {
                shared: Mutex::new(Shared {
                    state,
                    draining: None,
                }),
                realized: Condvar::new(),
                executor,
            }),
        }
    }

    /// Whether a value, an error or a cancellation has been committed.
    pub fn is_realized(&self) -> bool {
        !matches!(self.inner.shared.lock().state, State::Unrealized(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.inner.shared.lock().state, State::Cancelled)
    }

    pub fn executor(&self) -> Arc<dyn Executor> {
        self.inner.executor.clone()
    }
}

impl<T, E> Promise<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Keeps the promise. Returns `false` if it was already realized.
    pub fn deliver(&self, value: T) -> bool {
        self.deliver_result(Ok(value))
    }

    /// Breaks the promise. Returns `false` if it was already realized.
    pub fn deliver_error(&self, err: E) -> bool {
        self.deliver_result(Err(err))
    }

    pub fn deliver_result(&self, result: Result<T, E>) -> bool {
        self.settle(State::Realized(result))
    }

    /// Abandons the promise. Waiters and callbacks see [`Error::Cancelled`].
    ///
    /// This only marks the promise; whoever was going to deliver it is not
    /// told to stop.
    pub fn cancel(&self) -> bool {
        self.settle(State::Cancelled)
    }

    fn settle(&self, terminal: State<T, E>) -> bool {
        let mut shared = self.inner.shared.lock();
        let callbacks = match &mut shared.state {
            State::Unrealized(callbacks) => mem::take(callbacks),
            _ => return false,
        };
        shared.state = terminal;
        let pending = callbacks.len();
        let outcome = if callbacks.is_empty() {
            None
        } else {
            shared.draining = Some(callbacks);
            shared.state.outcome()
        };
        self.inner.realized.notify_all();
        drop(shared);

        trace!("promise realized, dispatching {} callbacks", pending);
        if let Some(outcome) = outcome {
            self.schedule_drain(outcome);
        }
        true
    }

    fn schedule_drain(&self, outcome: Result<T, Error<E>>) {
        let promise = self.clone();
        self.inner
            .executor
            .execute(Box::new(move || promise.drain(outcome)));
    }

    fn drain(&self, outcome: Result<T, Error<E>>) {
        loop {
            let batch = {
                let mut shared = self.inner.shared.lock();
                match shared.draining.as_mut() {
                    Some(queued) if !queued.is_empty() => mem::take(queued),
                    _ => {
                        shared.draining = None;
                        return;
                    }
                }
            };
            for callback in batch {
                let outcome = outcome.clone();
                if panic::catch_unwind(AssertUnwindSafe(move || callback(outcome))).is_err() {
                    error!("promise callback panicked");
                }
            }
        }
    }

    /// Blocks until the promise is realized.
    pub fn deref(&self) -> Result<T, Error<E>> {
        let mut shared = self.inner.shared.lock();
        loop {
            if let Some(outcome) = shared.state.outcome() {
                return outcome;
            }
            self.inner.realized.wait(&mut shared);
        }
    }

    /// Blocks for at most `timeout`. `None` means nothing was delivered in time.
    pub fn deref_timeout(&self, timeout: Duration) -> Option<Result<T, Error<E>>> {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.deref_until(deadline),
            None => Some(self.deref()),
        }
    }

    /// Blocks until the promise is realized or `deadline` passes.
    pub fn deref_until(&self, deadline: Instant) -> Option<Result<T, Error<E>>> {
        let mut shared = self.inner.shared.lock();
        loop {
            if let Some(outcome) = shared.state.outcome() {
                return Some(outcome);
            }
            if self.inner.realized.wait_until(&mut shared, deadline).timed_out() {
                let outcome = shared.state.outcome();
                if outcome.is_none() {
                    debug!("promise deref timed out");
                }
                return outcome;
            }
        }
    }

    /// Runs `callback` with the outcome once the promise is realized.
    ///
    /// The callback runs exactly once, on this promise's executor, whether it
    /// was registered before or after realization. A cancelled promise hands
    /// it `Err(Error::Cancelled)`.
    pub fn on_realized<F>(&self, callback: F)
    where
        F: FnOnce(Result<T, Error<E>>) + Send + 'static,
    {
        let callback: Callback<T, E> = Box::new(callback);
        let mut shared = self.inner.shared.lock();
        let Shared { state, draining } = &mut *shared;
        if let State::Unrealized(callbacks) = state {
            callbacks.push(callback);
            return;
        }
        if let Some(queued) = draining {
            queued.push(callback);
            return;
        }
        *draining = Some(vec![callback]);
        let outcome = state.outcome();
        drop(shared);

        if let Some(outcome) = outcome {
            self.schedule_drain(outcome);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Promise;
    use crate::executor::{Executor, InlineExecutor, Work};
    use crate::Error;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };
    use std::thread;
    use std::time::{Duration, Instant};

    fn inline<T, E>() -> Promise<T, E> {
        Promise::with_executor(Arc::new(InlineExecutor))
    }

    #[test]
    fn test_new_is_unrealized() {
        let p = Promise::<i32, String>::new();
        assert!(!p.is_realized());
        assert!(!p.is_cancelled());
        assert_eq!(p.deref_until(Instant::now()), None);
    }

    #[test]
    fn test_deliver_twice_keeps_first() {
        let p = inline::<i32, String>();
        assert!(p.deliver(5));
        assert!(p.is_realized());
        assert_eq!(p.deref(), Ok(5));

        assert!(!p.deliver(3));
        assert!(!p.deliver_error("late".into()));
        assert!(!p.cancel());
        assert_eq!(p.deref(), Ok(5));
    }

    #[test]
    fn test_deliver_error() {
        let p = inline::<i32, &str>();
        p.deliver_error("boom");
        assert_eq!(p.deref(), Err(Error::Failed("boom")));
        assert!(!p.is_cancelled());
    }

    #[test]
    fn test_cancel() {
        let p = inline::<i32, &str>();
        assert!(p.cancel());
        assert!(p.is_cancelled());
        assert!(p.is_realized());
        assert!(!p.deliver(1));
        assert_eq!(p.deref(), Err(Error::Cancelled));
    }

    #[test]
    fn test_realized() {
        let p = Promise::<_, ()>::realized(Ok("done"));
        assert!(p.is_realized());
        assert_eq!(p.deref(), Ok("done"));
        let p = Promise::<(), i32>::realized(Err(4));
        assert_eq!(p.deref(), Err(Error::Failed(4)));
    }

    #[test]
    fn test_callbacks_before_and_after() {
        let p = inline::<i32, ()>();
        let hits = Arc::new(AtomicUsize::new(0));
        let before = hits.clone();
        p.on_realized(move |outcome| {
            assert_eq!(outcome, Ok(9));
            before.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        p.deliver(9);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let after = hits.clone();
        p.on_realized(move |outcome| {
            assert_eq!(outcome, Ok(9));
            after.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        p.deliver(10);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_callbacks_run_in_registration_order() {
        let p = inline::<(), ()>();
        let order = Arc::new(parking_lot::Mutex::new(vec![]));
        for i in 0..10 {
            let order = order.clone();
            p.on_realized(move |_| order.lock().push(i));
        }
        p.deliver(());
        assert_eq!(*order.lock(), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_panicking_callback_does_not_stop_batch() {
        let p = inline::<(), ()>();
        let hits = Arc::new(AtomicUsize::new(0));
        p.on_realized(|_| panic!("callback failure"));
        let after = hits.clone();
        p.on_realized(move |_| {
            after.fetch_add(1, Ordering::SeqCst);
        });
        p.deliver(());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_callback_may_touch_same_promise() {
        let p = inline::<i32, ()>();
        let again = p.clone();
        let seen = Arc::new(parking_lot::Mutex::new(None));
        let seen2 = seen.clone();
        p.on_realized(move |_| {
            again.deliver(2);
            *seen2.lock() = Some(again.deref());
        });
        p.deliver(1);
        assert_eq!(*seen.lock(), Some(Ok(1)));
    }

    #[test]
    fn test_deref_timeout_unrealized() {
        let p = Promise::<i32, ()>::new();
        let timeout = Duration::from_millis(50);
        let start = Instant::now();
        assert_eq!(p.deref_timeout(timeout), None);
        assert!(start.elapsed() >= timeout);
    }

    #[test]
    fn test_deref_timeout_huge_is_unbounded() {
        let p = Promise::<i32, ()>::realized(Ok(1));
        assert_eq!(p.deref_timeout(Duration::MAX), Some(Ok(1)));
    }

    #[test]
    fn test_deref_until_past_deadline_does_not_block() {
        let p = Promise::<i32, ()>::new();
        assert_eq!(p.deref_until(Instant::now()), None);
        p.deliver(1);
        assert_eq!(p.deref_until(Instant::now()), Some(Ok(1)));
    }

    #[test]
    fn test_deref_wakes_on_delivery() {
        let p = Promise::<String, ()>::new();
        let producer = p.clone();
        let task = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            producer.deliver("🍓".into());
        });
        assert_eq!(p.deref(), Ok("🍓".to_string()));
        task.join().expect("The producer thread has panicked");
    }

    #[derive(Default)]
    struct Deferred {
        queued: parking_lot::Mutex<Vec<Work>>,
    }

    impl Executor for Deferred {
        fn execute(&self, work: Work) {
            self.queued.lock().push(work);
        }
    }

    impl Deferred {
        fn run_all(&self) -> usize {
            let queued = std::mem::take(&mut *self.queued.lock());
            let submitted = queued.len();
            for work in queued {
                work();
            }
            submitted
        }
    }

    #[test]
    fn test_late_callback_waits_for_pending_batch() {
        let executor = Arc::new(Deferred::default());
        let p = Promise::<i32, ()>::with_executor(executor.clone());
        let order = Arc::new(parking_lot::Mutex::new(vec![]));

        let pre = order.clone();
        p.on_realized(move |_| pre.lock().push("pre"));
        p.deliver(1);
        // The batch is submitted but has not run yet.
        let post = order.clone();
        p.on_realized(move |_| post.lock().push("post"));

        assert_eq!(executor.run_all(), 1);
        assert_eq!(*order.lock(), vec!["pre", "post"]);
        assert_eq!(executor.run_all(), 0);
    }

    #[test]
    fn test_late_callbacks_keep_registration_order() {
        let executor = Arc::new(Deferred::default());
        let p = Promise::<i32, ()>::with_executor(executor.clone());
        p.deliver(1);
        let order = Arc::new(parking_lot::Mutex::new(vec![]));
        for i in 0..5 {
            let order = order.clone();
            p.on_realized(move |_| order.lock().push(i));
        }
        assert_eq!(executor.run_all(), 1);
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);

        let again = order.clone();
        p.on_realized(move |_| again.lock().push(5));
        assert_eq!(executor.run_all(), 1);
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_callback_registered_from_callback_runs_after_batch() {
        let p = inline::<i32, ()>();
        let order = Arc::new(parking_lot::Mutex::new(vec![]));
        let nested = p.clone();
        let first = order.clone();
        p.on_realized(move |_| {
            first.lock().push("first");
            let inner = first.clone();
            nested.on_realized(move |_| inner.lock().push("nested"));
        });
        let second = order.clone();
        p.on_realized(move |_| second.lock().push("second"));
        p.deliver(1);
        assert_eq!(*order.lock(), vec!["first", "second", "nested"]);
    }
}
