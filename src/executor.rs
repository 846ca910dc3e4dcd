//! Executors run the callbacks a promise dispatches once it is realized.
//!
//! The promise core never runs user code while holding its lock; it hands
//! every batch of callbacks to an [`Executor`] after the lock is released.
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Sender};
use log::{debug, error};

/// A unit of work submitted to an executor.
pub type Work = Box<dyn FnOnce() + Send + 'static>;

/// Something that eventually runs submitted work, possibly on another thread.
pub trait Executor: Send + Sync {
    fn execute(&self, work: Work);
}

impl<F> Executor for F
where
    F: Fn(Work) + Send + Sync,
{
    fn execute(&self, work: Work) {
        self(work)
    }
}

/// Runs work right away on the submitting thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn execute(&self, work: Work) {
        work()
    }
}

/// A fixed set of worker threads fed from one FIFO queue.
///
/// Work starts in the order it was submitted. With more than one worker,
/// later work may finish first; [`PoolExecutor::serial`] gives a single
/// worker that runs everything strictly in submission order. Cloned handles
/// share the workers, which exit once every handle is gone and the queue is
/// drained.
#[derive(Debug, Clone)]
pub struct PoolExecutor {
    sender: Sender<Work>,
    workers: Arc<parking_lot::Mutex<Vec<JoinHandle<()>>>>,
}

impl PoolExecutor {
    pub fn new(name: impl Into<String>, workers: usize) -> std::io::Result<Self> {
        let name = name.into();
        let (sender, receiver) = unbounded::<Work>();
        let mut handles = Vec::with_capacity(workers.max(1));
        for index in 0..workers.max(1) {
            let receiver = receiver.clone();
            let worker_name = format!("{}-{}", name, index);
            let handle = thread::Builder::new().name(worker_name.clone()).spawn(move || {
                debug!("{} started", worker_name);
                for work in receiver.iter() {
                    if panic::catch_unwind(AssertUnwindSafe(work)).is_err() {
                        error!("{} work panicked", worker_name);
                    }
                }
                debug!("{} stopped", worker_name);
            })?;
            handles.push(handle);
        }
        Ok(PoolExecutor {
            sender,
            workers: Arc::new(parking_lot::Mutex::new(handles)),
        })
    }

    /// One worker: all work runs one item at a time, in submission order.
    pub fn serial(name: impl Into<String>) -> std::io::Result<Self> {
        PoolExecutor::new(name, 1)
    }

    /// Closes this handle and waits until the workers have run everything
    /// queued so far.
    ///
    /// Other clones still alive keep the queue open, so join the last one.
    pub fn join(self) -> thread::Result<()> {
        let PoolExecutor { sender, workers } = self;
        drop(sender);
        let handles = mem::take(&mut *workers.lock());
        for handle in handles {
            handle.join()?;
        }
        Ok(())
    }
}

impl Executor for PoolExecutor {
    fn execute(&self, work: Work) {
        // Workers survive panicking work, so the queue only closes with the pool.
        if let Err(err) = self.sender.send(work) {
            error!("executor pool is gone, running work inline");
            (err.into_inner())()
        }
    }
}

/// The process-wide executor promises use by default: a [`PoolExecutor`]
/// with one worker per available core, at least two.
pub fn default_executor() -> Arc<dyn Executor> {
    static DEFAULT: OnceLock<Arc<dyn Executor>> = OnceLock::new();
    DEFAULT
        .get_or_init(|| {
            let workers = thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2)
                .max(2);
            let executor: Arc<dyn Executor> = match PoolExecutor::new("promise-callback", workers) {
                Ok(pool) => Arc::new(pool),
                Err(err) => {
                    error!("failed to start promise-callback pool, callbacks run inline: {}", err);
                    Arc::new(InlineExecutor)
                }
            };
            executor
        })
        .clone()
}
