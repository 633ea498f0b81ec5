//! Fixed-size worker pool for persistence calls.
//!
//! Reads and immediate writes block on persistence, so they run on the
//! blocking pool of a private tokio runtime capped at the configured thread
//! count. Work beyond capacity waits in the runtime's queue; nothing is
//! rejected until the pool is shut down.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use futures_util::future::{self, BoxFuture, FutureExt};
use tagstore_core::{EngineError, TagResult};
use tokio::runtime::{Builder, Handle, Runtime};

use crate::host::lock;

/// Future resolved with the result of a pool task.
pub type PoolFuture<T> = BoxFuture<'static, TagResult<T>>;

pub struct WorkerPool {
    runtime: Mutex<Option<Runtime>>,
    handle: Handle,
    threads: usize,
    closed: AtomicBool,
}

impl WorkerPool {
    /// Start a pool running at most `threads` tasks at once.
    pub fn new(threads: usize) -> TagResult<Self> {
        let threads = threads.max(1);
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(threads)
            .thread_name("tagstore-worker")
            .build()
            .map_err(|e| EngineError::RuntimeStart {
                reason: e.to_string(),
            })?;
        let handle = runtime.handle().clone();

        tracing::debug!(threads, "Worker pool started");

        Ok(Self {
            runtime: Mutex::new(Some(runtime)),
            handle,
            threads,
            closed: AtomicBool::new(false),
        })
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Run `work` on the pool. The returned future may be awaited on any
    /// executor; dropping it does not cancel the work.
    ///
    /// A panic inside `work` resolves the future with
    /// [`EngineError::TaskPanicked`].
    pub fn submit<T, F>(&self, work: F) -> PoolFuture<T>
    where
        T: Send + 'static,
        F: FnOnce() -> TagResult<T> + Send + 'static,
    {
        if self.is_shut_down() {
            return future::ready(Err(EngineError::ShutDown.into())).boxed();
        }

        let join = self.handle.spawn_blocking(work);
        async move {
            match join.await {
                Ok(result) => result,
                Err(e) if e.is_panic() => Err(EngineError::TaskPanicked {
                    reason: panic_message(e.into_panic()),
                }
                .into()),
                Err(_) => Err(EngineError::ShutDown.into()),
            }
        }
        .boxed()
    }

    /// Run `work` on the pool without waiting for it.
    pub fn execute<F>(&self, work: F) -> TagResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_shut_down() {
            return Err(EngineError::ShutDown.into());
        }
        drop(self.handle.spawn_blocking(work));
        Ok(())
    }

    /// Stop accepting work and wait up to `timeout` for running tasks.
    pub fn shutdown(&self, timeout: Duration) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(runtime) = lock(&self.runtime).take() {
            if Handle::try_current().is_ok() {
                runtime.shutdown_background();
            } else {
                runtime.shutdown_timeout(timeout);
            }
        }
        tracing::debug!("Worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(runtime) = lock(&self.runtime).take() {
            runtime.shutdown_background();
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("threads", &self.threads)
            .field("closed", &self.is_shut_down())
            .finish()
    }
}

/// Run `work` on the current thread, turning a panic into
/// [`EngineError::TaskPanicked`].
pub(crate) fn run_guarded<T>(work: impl FnOnce() -> TagResult<T>) -> TagResult<T> {
    catch_unwind(AssertUnwindSafe(work)).unwrap_or_else(|panic| {
        Err(EngineError::TaskPanicked {
            reason: panic_message(panic),
        }
        .into())
    })
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
