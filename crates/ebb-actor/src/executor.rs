use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use tracing::error;

/// A unit of work handed to an executor.
pub type Task = Box<dyn FnOnce() + Send>;

/// Task executor boundary.
///
/// Actors have no dedicated threads; every run-loop invocation executes on
/// whatever thread the backing executor assigns. Implementations must accept
/// tasks from any thread.
pub trait Executor: Send + Sync {
    /// Submit a task for eventual execution.
    fn execute(&self, task: Task);
}

/// Configuration for [`ThreadPoolExecutor`].
#[derive(Clone, Debug)]
pub struct ThreadPoolConfig {
    /// Number of worker threads. Clamped to at least one.
    pub threads: usize,
    /// Prefix for worker thread names.
    pub name_prefix: String,
}

impl Default for ThreadPoolConfig {
    fn default() -> Self {
        Self {
            threads: 2,
            name_prefix: "ebb-worker".to_string(),
        }
    }
}

/// Fixed-size pool of worker threads fed by one lock-free channel.
///
/// Tasks run in submission order per worker but with no global ordering
/// across workers; serialization of a given actor's runs is the actor's own
/// responsibility, not the pool's. A panicking task is caught and logged so
/// one misbehaving subscriber cannot shrink the pool for everyone else.
pub struct ThreadPoolExecutor {
    sender: Option<Sender<Task>>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPoolExecutor {
    /// Spawn a pool with the given configuration.
    pub fn new(config: ThreadPoolConfig) -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded::<Task>();
        let workers = (0..config.threads.max(1))
            .map(|i| Self::spawn_worker(&config.name_prefix, i, receiver.clone()))
            .collect();

        Self {
            sender: Some(sender),
            workers,
        }
    }

    /// Spawn a pool with `threads` workers and default naming.
    pub fn with_threads(threads: usize) -> Self {
        Self::new(ThreadPoolConfig {
            threads,
            ..Default::default()
        })
    }

    fn spawn_worker(prefix: &str, index: usize, receiver: Receiver<Task>) -> JoinHandle<()> {
        thread::Builder::new()
            .name(format!("{prefix}-{index}"))
            .spawn(move || {
                while let Ok(task) = receiver.recv() {
                    if catch_unwind(AssertUnwindSafe(task)).is_err() {
                        error!(worker = index, "task panicked on pool worker");
                    }
                }
            })
            .expect("failed to spawn pool worker thread")
    }

    /// Number of worker threads in the pool.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

impl Executor for ThreadPoolExecutor {
    fn execute(&self, task: Task) {
        if let Some(sender) = &self.sender {
            // Send only fails after shutdown, when pending tasks are dropped
            // by contract anyway.
            let _ = sender.send(task);
        }
    }
}

impl Drop for ThreadPoolExecutor {
    fn drop(&mut self) {
        // Disconnect the channel so workers drain and exit.
        self.sender.take();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                error!("pool worker terminated by panic");
            }
        }
    }
}

/// Executor that runs every task immediately on the calling thread.
///
/// Turns actor scheduling into plain synchronous calls, which makes tests
/// deterministic.
#[derive(Clone, Copy, Debug, Default)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn execute(&self, task: Task) {
        task();
    }
}
