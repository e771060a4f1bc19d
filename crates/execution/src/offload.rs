//! Off-critical-path execution of long-running tasks.
//!
//! A dedicated dispatch thread pulls tasks from a FIFO channel and hands each
//! one to a worker from a tokio blocking pool without waiting for it. Stopping
//! drains the queue: everything submitted before `stop()` is dispatched before
//! the dispatch thread exits.

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::runtime::{Handle, Runtime};
use tracing::{debug, info, warn};

/// Offload scheduler errors.
#[derive(Debug, thiserror::Error)]
pub enum OffloadError {
    /// The scheduler is not accepting tasks
    #[error("offload scheduler is not running")]
    NotRunning,

    /// The dispatch thread is gone
    #[error("offload dispatch thread disconnected")]
    Disconnected,

    /// Threads or the worker pool could not be created
    #[error("failed to start offload scheduler: {0}")]
    Startup(#[from] std::io::Error),
}

/// Offload scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OffloadConfig {
    /// Maximum number of tasks running at once
    pub workers: usize,
    /// Bound of the task queue; `None` for unbounded
    pub queue_capacity: Option<usize>,
    /// Name prefix for scheduler threads
    pub thread_name: String,
}

impl Default for OffloadConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: None,
            thread_name: "eventflow-offload".to_string(),
        }
    }
}

/// Scheduler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OffloadState {
    /// Not accepting tasks
    Stopped,
    /// Accepting and dispatching tasks
    Running,
    /// Dispatching what is left after `stop()`
    Draining,
}

impl std::fmt::Display for OffloadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Running => write!(f, "running"),
            Self::Draining => write!(f, "draining"),
        }
    }
}

/// Task counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OffloadStats {
    /// Tasks accepted by `submit`
    pub submitted: u64,
    /// Tasks handed to a worker
    pub dispatched: u64,
    /// Tasks that returned `Ok`
    pub completed: u64,
    /// Tasks that returned an error or panicked
    pub failed: u64,
}

impl OffloadStats {
    /// Dispatched tasks that have not finished yet.
    pub fn in_flight(&self) -> u64 {
        self.dispatched.saturating_sub(self.completed + self.failed)
    }
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    dispatched: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> OffloadStats {
        OffloadStats {
            submitted: self.submitted.load(Ordering::Acquire),
            dispatched: self.dispatched.load(Ordering::Acquire),
            completed: self.completed.load(Ordering::Acquire),
            failed: self.failed.load(Ordering::Acquire),
        }
    }
}

const DROP_GRACE: Duration = Duration::from_secs(5);

type Work = Box<dyn FnOnce() -> anyhow::Result<()> + Send + 'static>;

/// A unit of offloaded work.
pub struct OffloadTask {
    name: String,
    work: Work,
}

impl OffloadTask {
    /// Wrap a closure.
    pub fn new<F>(name: impl Into<String>, work: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        Self {
            name: name.into(),
            work: Box::new(work),
        }
    }

    /// Task name, used in logs.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for OffloadTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OffloadTask").field("name", &self.name).finish()
    }
}

enum Job {
    Run(OffloadTask),
    Sentinel,
}

/// Dispatches tasks to a worker pool from a dedicated thread.
pub struct AsyncOffloadScheduler {
    config: OffloadConfig,
    state: Mutex<OffloadState>,
    drained: Condvar,
    running: Arc<AtomicBool>,
    sender: Mutex<Option<Sender<Job>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    runtime: Mutex<Option<Runtime>>,
    counters: Arc<Counters>,
}

impl AsyncOffloadScheduler {
    /// Create a stopped scheduler.
    pub fn new(config: OffloadConfig) -> Self {
        Self {
            config,
            state: Mutex::new(OffloadState::Stopped),
            drained: Condvar::new(),
            running: Arc::new(AtomicBool::new(false)),
            sender: Mutex::new(None),
            dispatcher: Mutex::new(None),
            runtime: Mutex::new(None),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Scheduler configuration.
    pub fn config(&self) -> &OffloadConfig {
        &self.config
    }

    /// Current state.
    pub fn state(&self) -> OffloadState {
        *self.state.lock()
    }

    /// Whether tasks are being accepted.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Task counters.
    pub fn stats(&self) -> OffloadStats {
        self.counters.snapshot()
    }

    /// Start the dispatch thread. No-op if already running.
    pub fn start(&self) -> Result<(), OffloadError> {
        let mut state = self.state.lock();
        if *state != OffloadState::Stopped {
            return Ok(());
        }

        let handle = self.worker_pool()?;
        let (sender, receiver) = match self.config.queue_capacity {
            Some(capacity) => crossbeam_channel::bounded(capacity),
            None => crossbeam_channel::unbounded(),
        };

        self.running.store(true, Ordering::Release);
        let running = Arc::clone(&self.running);
        let counters = Arc::clone(&self.counters);
        let spawned = std::thread::Builder::new()
            .name(format!("{}-dispatch", self.config.thread_name))
            .spawn(move || dispatch_loop(receiver, running, handle, counters));

        let dispatcher = match spawned {
            Ok(dispatcher) => dispatcher,
            Err(e) => {
                self.running.store(false, Ordering::Release);
                return Err(OffloadError::Startup(e));
            }
        };

        *self.sender.lock() = Some(sender);
        *self.dispatcher.lock() = Some(dispatcher);
        *state = OffloadState::Running;
        info!(
            "Offload scheduler started with {} workers{}",
            self.config.workers,
            self.config
                .queue_capacity
                .map(|c| format!(", queue capacity {}", c))
                .unwrap_or_default()
        );
        Ok(())
    }

    /// Enqueue a task.
    ///
    /// Blocks while a bounded queue is full. Must not be called after `stop()`.
    pub fn submit(&self, task: OffloadTask) -> Result<(), OffloadError> {
        if !self.is_running() {
            return Err(OffloadError::NotRunning);
        }
        let sender = self.sender.lock().clone().ok_or(OffloadError::NotRunning)?;

        debug!("Submitting offload task {}", task.name);
        self.counters.submitted.fetch_add(1, Ordering::AcqRel);
        sender.send(Job::Run(task)).map_err(|_| {
            self.counters.submitted.fetch_sub(1, Ordering::AcqRel);
            OffloadError::Disconnected
        })
    }

    /// Drain the queue and join the dispatch thread. No-op when stopped.
    ///
    /// Returns once every task submitted before the call has been
    /// dispatched, also when another thread is already stopping. Tasks may
    /// still be executing afterwards.
    pub fn stop(&self) -> Result<(), OffloadError> {
        let dispatcher = {
            let mut state = self.state.lock();
            match *state {
                OffloadState::Stopped => return Ok(()),
                OffloadState::Draining => {
                    while *state == OffloadState::Draining {
                        self.drained.wait(&mut state);
                    }
                    return Ok(());
                }
                OffloadState::Running => {}
            }
            *state = OffloadState::Draining;
            self.running.store(false, Ordering::Release);

            if let Some(sender) = self.sender.lock().take() {
                if sender.send(Job::Sentinel).is_err() {
                    warn!("Offload dispatch thread already gone");
                }
            }
            self.dispatcher.lock().take()
        };

        let joined = match dispatcher {
            Some(handle) => handle.join().map_err(|_| OffloadError::Disconnected),
            None => Ok(()),
        };

        *self.state.lock() = OffloadState::Stopped;
        self.drained.notify_all();
        let stats = self.stats();
        info!(
            "Offload scheduler stopped: {} dispatched, {} still running",
            stats.dispatched,
            stats.in_flight()
        );
        joined
    }

    /// Wait until every dispatched task has finished. Returns `false` on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let stats = self.stats();
            if stats.completed + stats.failed >= stats.submitted {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    /// Handle of the worker pool, built on first start and reused afterwards.
    fn worker_pool(&self) -> Result<Handle, OffloadError> {
        let mut runtime = self.runtime.lock();
        if let Some(rt) = runtime.as_ref() {
            return Ok(rt.handle().clone());
        }

        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(self.config.workers.max(1))
            .thread_name(format!("{}-worker", self.config.thread_name))
            .enable_all()
            .build()?;
        let handle = rt.handle().clone();
        *runtime = Some(rt);
        Ok(handle)
    }
}

impl Drop for AsyncOffloadScheduler {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("Offload scheduler did not stop cleanly: {}", e);
        }
        // Tasks not yet picked up by a worker are dropped with the runtime.
        if !self.wait_idle(DROP_GRACE) {
            warn!("Dropping offload scheduler with {} tasks still running", self.stats().in_flight());
        }
    }
}

impl std::fmt::Debug for AsyncOffloadScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncOffloadScheduler")
            .field("config", &self.config)
            .field("state", &self.state())
            .field("stats", &self.stats())
            .finish()
    }
}

fn dispatch_loop(receiver: Receiver<Job>, running: Arc<AtomicBool>, handle: Handle, counters: Arc<Counters>) {
    debug!("Offload dispatch loop started");
    while let Ok(job) = receiver.recv() {
        match job {
            Job::Run(task) => dispatch(task, &handle, &counters),
            Job::Sentinel => {
                if !running.load(Ordering::Acquire) {
                    break;
                }
            }
        }
    }

    // Anything that raced past the sentinel still gets dispatched.
    while let Ok(job) = receiver.try_recv() {
        if let Job::Run(task) = job {
            dispatch(task, &handle, &counters);
        }
    }
    debug!("Offload dispatch loop finished");
}

fn dispatch(task: OffloadTask, handle: &Handle, counters: &Arc<Counters>) {
    counters.dispatched.fetch_add(1, Ordering::AcqRel);
    let counters = Arc::clone(counters);

    handle.spawn_blocking(move || {
        let OffloadTask { name, work } = task;
        match catch_unwind(AssertUnwindSafe(work)) {
            Ok(Ok(())) => {
                counters.completed.fetch_add(1, Ordering::AcqRel);
                debug!("Offload task {} finished", name);
            }
            Ok(Err(e)) => {
                counters.failed.fetch_add(1, Ordering::AcqRel);
                warn!("Offload task {} failed: {:#}", name, e);
            }
            Err(_) => {
                counters.failed.fetch_add(1, Ordering::AcqRel);
                warn!("Offload task {} panicked", name);
            }
        }
    });
}
