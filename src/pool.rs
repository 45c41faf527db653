//! Bounded worker pool with ordered result collection.
//!
//! Tasks run on a dedicated rayon pool built per pipeline run. Every task
//! gets its own one-shot channel, and the submitter drains those channels in
//! submission order, so output order never depends on scheduling.

use std::any::Any;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;

use log::{error, warn};

use crate::error::{Result, StatsError};


/// Messages on the progress channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// A worker finished the task for this id (completion order).
    TaskFinished { id: i64 },
    /// Share of results consumed so far (submission order).
    Percent(u8),
    Error(String),
}

/// Everything a worker entry point may touch besides its own arguments.
#[derive(Debug)]
pub struct TaskContext<C> {
    progress: Sender<ProgressEvent>,
    config: Arc<C>,
}

impl<C> Clone for TaskContext<C> {
    fn clone(&self) -> Self {
        Self {
            progress: self.progress.clone(),
            config: Arc::clone(&self.config),
        }
    }
}

impl<C> TaskContext<C> {
    pub fn new(progress: Sender<ProgressEvent>, config: Arc<C>) -> Self {
        Self { progress, config }
    }

    pub fn config(&self) -> &C {
        &self.config
    }

    pub fn finished(&self, id: i64) {
        self.send(ProgressEvent::TaskFinished { id });
    }

    pub fn error(&self, message: impl Into<String>) {
        self.send(ProgressEvent::Error(message.into()));
    }

    /// Nobody listening is not an error.
    fn send(&self, event: ProgressEvent) {
        let _ = self.progress.send(event);
    }
}

/// `available_parallelism - 1`, at least one.
pub fn default_workers() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .saturating_sub(1)
        .max(1)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

pub struct WorkerPool {
    pool: rayon::ThreadPool,
}

impl WorkerPool {
    /// Pool with `workers` threads, or [`default_workers`] when `None`.
    pub fn new(workers: Option<usize>) -> Result<Self> {
        let num_threads = workers.unwrap_or_else(default_workers).max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|i| format!("grainstat-worker-{}", i))
            .panic_handler(|payload| {
                error!("worker task panicked: {}", panic_message(payload.as_ref()));
            })
            .build()
            .map_err(|e| StatsError::Pool(e.to_string()))?;
        Ok(Self { pool })
    }

    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Queues `task`; the returned handle yields its output.
    pub fn submit<T, F>(&self, label: impl Into<String>, task: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        self.pool.spawn(move || {
            let _ = tx.send(task());
        });
        TaskHandle {
            label: label.into(),
            rx,
        }
    }
}

/// Receiving end of one submitted task.
pub struct TaskHandle<T> {
    label: String,
    rx: Receiver<T>,
}

impl<T> TaskHandle<T> {
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Blocks until the task delivers. A task that panicked never does, and
    /// its dropped sender turns into `StatsError::Pool`.
    pub fn get(self) -> Result<T> {
        self.rx.recv().map_err(|_| StatsError::Pool(self.label))
    }
}

fn percent(consumed: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    (consumed * 100 / total).min(99) as u8
}

/// Pulls every handle in submission order, reporting `Percent` after each
/// one and a final `Percent(100)`. Crashed tasks are reported as `Error`
/// events and come back as `Err` in their slot.
pub fn collect_ordered<T>(
    handles: Vec<TaskHandle<T>>,
    progress: &Sender<ProgressEvent>,
) -> Vec<Result<T>> {
    let total = handles.len();
    let mut results = Vec::with_capacity(total);
    for (i, handle) in handles.into_iter().enumerate() {
        let result = handle.get();
        if let Err(e) = &result {
            warn!("{}", e);
            let _ = progress.send(ProgressEvent::Error(e.to_string()));
        }
        results.push(result);
        let _ = progress.send(ProgressEvent::Percent(percent(i + 1, total)));
    }
    let _ = progress.send(ProgressEvent::Percent(100));
    results
}
