//! Scheduling and callback delivery supplied by the embedding application.
//!
//! The engine never decides which thread a caller's completion callback runs
//! on. It hands callbacks to [`Host::run_on_callback_context`], which must
//! deliver them in the order given. Periodic flushes and cache sweeps are
//! registered with [`Host::schedule_repeating`] and out-of-cycle flushes with
//! [`Host::schedule_once`].
//!
//! [`TokioHost`] is the stock implementation: a dedicated single-worker tokio
//! runtime for scheduled work and a dedicated thread draining callbacks FIFO.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use tagstore_core::{EngineError, TagResult};
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::pool::panic_message;

/// One-shot unit of work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Work run on every tick of a repeating schedule.
pub type RepeatingTask = Arc<dyn Fn() + Send + Sync + 'static>;

/// Handle to a repeating schedule. Clones share the cancellation flag.
#[derive(Debug, Clone)]
pub struct ScheduledTask {
    name: Arc<str>,
    cancelled: Arc<AtomicBool>,
}

impl ScheduledTask {
    pub fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stop the schedule. A tick already running finishes.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Execution capabilities the engine needs from its host.
pub trait Host: Send + Sync {
    /// Run `task` every `interval`, first after one interval has elapsed.
    fn schedule_repeating(&self, name: &str, interval: Duration, task: RepeatingTask) -> ScheduledTask;

    /// Run `task` once, soon, off the caller's thread.
    fn schedule_once(&self, task: Task);

    /// Run `task` on the context user-visible callbacks must run on.
    /// Tasks are delivered in submission order.
    fn run_on_callback_context(&self, task: Task);

    /// Stop scheduled work and deliver any callbacks still queued.
    fn shutdown(&self);
}

// ============================================================================
// TOKIO HOST
// ============================================================================

/// Default shutdown wait for the scheduler runtime.
const SCHEDULER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Bounds applied to repeating intervals.
const MIN_INTERVAL: Duration = Duration::from_millis(1);
const MAX_INTERVAL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Host backed by a dedicated single-worker tokio runtime and a callback
/// thread. Ticks and one-shot tasks run on a single blocking thread, one at
/// a time.
pub struct TokioHost {
    runtime: Mutex<Option<Runtime>>,
    handle: Handle,
    shutdown_tx: watch::Sender<bool>,
    callbacks: Mutex<Option<mpsc::UnboundedSender<Task>>>,
    callback_thread: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl TokioHost {
    /// Start the scheduler runtime and the callback thread.
    pub fn new() -> TagResult<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(1)
            .thread_name("tagstore-scheduler")
            .enable_time()
            .build()
            .map_err(|e| EngineError::RuntimeStart {
                reason: e.to_string(),
            })?;
        let handle = runtime.handle().clone();

        let (tx, mut rx) = mpsc::unbounded_channel::<Task>();
        let callback_thread = std::thread::Builder::new()
            .name("tagstore-callbacks".to_string())
            .spawn(move || {
                while let Some(task) = rx.blocking_recv() {
                    if let Err(panic) = catch_unwind(AssertUnwindSafe(task)) {
                        tracing::error!(reason = %panic_message(panic), "Callback panicked");
                    }
                }
            })
            .map_err(|e| EngineError::RuntimeStart {
                reason: e.to_string(),
            })?;

        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            runtime: Mutex::new(Some(runtime)),
            handle,
            shutdown_tx,
            callbacks: Mutex::new(Some(tx)),
            callback_thread: Mutex::new(Some(callback_thread)),
            closed: AtomicBool::new(false),
        })
    }

    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn stop(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown_tx.send(true);

        if let Some(runtime) = lock(&self.runtime).take() {
            // A blocking wait is not allowed from inside another runtime
            if Handle::try_current().is_ok() {
                runtime.shutdown_background();
            } else {
                runtime.shutdown_timeout(SCHEDULER_SHUTDOWN_TIMEOUT);
            }
        }

        // Dropping the sender lets the callback thread drain and exit
        drop(lock(&self.callbacks).take());
        if let Some(thread) = lock(&self.callback_thread).take() {
            if thread.thread().id() != std::thread::current().id() && thread.join().is_err() {
                tracing::warn!("Callback thread exited abnormally");
            }
        }
        tracing::info!("Scheduler host stopped");
    }
}

impl Host for TokioHost {
    fn schedule_repeating(&self, name: &str, interval: Duration, task: RepeatingTask) -> ScheduledTask {
        let schedule = ScheduledTask::new(name);
        if self.is_shut_down() {
            schedule.cancel();
            return schedule;
        }

        let interval = interval.clamp(MIN_INTERVAL, MAX_INTERVAL);
        let cancel = schedule.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        self.handle.spawn(async move {
            let mut ticker = interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            tracing::debug!(task = cancel.name(), interval_ms = interval.as_millis() as u64, "Repeating task scheduled");

            loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        if cancel.is_cancelled() {
                            break;
                        }
                        let tick = Arc::clone(&task);
                        if let Err(e) = tokio::task::spawn_blocking(move || tick()).await {
                            if e.is_panic() {
                                tracing::error!(task = cancel.name(), reason = %panic_message(e.into_panic()), "Repeating task panicked");
                            }
                        }
                    }
                }
            }
            tracing::debug!(task = cancel.name(), "Repeating task stopped");
        });

        schedule
    }

    fn schedule_once(&self, task: Task) {
        if self.is_shut_down() {
            tracing::debug!("Host shut down, one-shot task dropped");
            return;
        }
        drop(self.handle.spawn_blocking(move || {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(task)) {
                tracing::error!(reason = %panic_message(panic), "One-shot task panicked");
            }
        }));
    }

    fn run_on_callback_context(&self, task: Task) {
        let task = match lock(&self.callbacks).as_ref() {
            Some(sender) => match sender.send(task) {
                Ok(()) => return,
                Err(mpsc::error::SendError(task)) => task,
            },
            None => task,
        };
        // Callback thread is gone; deliver on the caller's thread
        task();
    }

    fn shutdown(&self) {
        self.stop();
    }
}

impl Drop for TokioHost {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(true);
        if let Some(runtime) = lock(&self.runtime).take() {
            runtime.shutdown_background();
        }
        drop(lock(&self.callbacks).take());
    }
}

impl std::fmt::Debug for TokioHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokioHost")
            .field("closed", &self.is_shut_down())
            .finish()
    }
}

/// Lock a mutex, recovering the guard if a panicking holder poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
