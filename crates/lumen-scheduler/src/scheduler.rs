use std::sync::Arc;

use rayon::ThreadPool;
use tokio::runtime::Runtime;
use tokio::sync::{broadcast, oneshot};

use lumen_core::panic_payload_to_str;

use crate::{BlockingTask, CancellationToken, Cancelled, ProgressSender, TaskError};

enum WorkerPool {
    Rayon(ThreadPool),
    Inline,
}

impl WorkerPool {
    fn spawn<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        match self {
            WorkerPool::Rayon(pool) => pool.spawn(job),
            WorkerPool::Inline => job(),
        }
    }
}

fn build_worker_pool(prefix: &'static str, threads: usize) -> WorkerPool {
    // Thread creation can fail in constrained CI environments; degrade to a
    // smaller pool, and as a last resort to inline execution, rather than
    // failing startup.
    let mut threads = threads.max(1);
    loop {
        match rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(move |idx| format!("{prefix}-{idx}"))
            .build()
        {
            Ok(pool) => return WorkerPool::Rayon(pool),
            Err(_) if threads > 1 => {
                threads = (threads / 2).max(1);
            }
            Err(_) => return WorkerPool::Inline,
        }
    }
}

fn build_io_runtime(threads: usize) -> Runtime {
    let mut threads = threads.max(1);
    loop {
        match tokio::runtime::Builder::new_multi_thread()
            .worker_threads(threads)
            .enable_time()
            .thread_name("lumen-io")
            .build()
        {
            Ok(rt) => return rt,
            Err(_) if threads > 1 => {
                threads = 1;
            }
            Err(err) => {
                return tokio::runtime::Builder::new_current_thread()
                    .enable_time()
                    .build()
                    .unwrap_or_else(|_| panic!("failed to build IO runtime: {err}"));
            }
        }
    }
}

/// Which pool a blocking job runs on.
///
/// Scan work (parsing + extraction) and background maintenance are sized
/// independently so neither starves the other; debounce timers never run on
/// either.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolKind {
    Scan,
    Background,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub scan_threads: usize,
    pub background_threads: usize,
    pub io_threads: usize,
    pub progress_channel_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        let available = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        // Conservative: schedulers are created freely in tests and short-lived
        // tools, and container CPU counts overreport what cgroups allow.
        Self {
            scan_threads: available.saturating_sub(1).clamp(1, 4),
            background_threads: 1,
            io_threads: 1,
            progress_channel_capacity: 1024,
        }
    }
}

/// Owns the worker pools and the timer runtime.
///
/// Cloning is cheap; all clones share the same pools.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    scan_pool: WorkerPool,
    background_pool: WorkerPool,
    io_runtime: Option<Runtime>,
    io_handle: tokio::runtime::Handle,
    progress: ProgressSender,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        let scan_pool = build_worker_pool("lumen-scan", config.scan_threads);
        let background_pool = build_worker_pool("lumen-background", config.background_threads);
        let io_runtime = build_io_runtime(config.io_threads);
        let io_handle = io_runtime.handle().clone();

        let (progress_tx, _) = broadcast::channel(config.progress_channel_capacity.max(1));
        let progress = ProgressSender::new(progress_tx);

        Self {
            inner: Arc::new(SchedulerInner {
                scan_pool,
                background_pool,
                io_runtime: Some(io_runtime),
                io_handle,
                progress,
            }),
        }
    }

    pub fn progress(&self) -> ProgressSender {
        self.inner.progress.clone()
    }

    pub fn subscribe_progress(&self) -> broadcast::Receiver<crate::ProgressEvent> {
        self.inner.progress.subscribe()
    }

    pub fn io_handle(&self) -> tokio::runtime::Handle {
        self.inner.io_handle.clone()
    }

    /// Run a blocking job on the given pool; panics are caught and reported
    /// as [`TaskError::Panicked`].
    pub fn spawn_blocking_on<T, F>(
        &self,
        pool: PoolKind,
        token: CancellationToken,
        f: F,
    ) -> BlockingTask<T>
    where
        T: Send + 'static,
        F: FnOnce(CancellationToken) -> Result<T, Cancelled> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        if token.is_cancelled() {
            let _ = tx.send(Err(TaskError::Cancelled));
            return BlockingTask::new(token, rx);
        }

        let token_for_job = token.clone();
        let job = move || {
            let result =
                match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| f(token_for_job))) {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(err)) => Err(TaskError::from(err)),
                    Err(panic) => {
                        let message = panic_payload_to_str(&*panic);
                        tracing::error!(
                            target = "lumen.scheduler",
                            pool = ?pool,
                            panic = %message,
                            "task panicked"
                        );
                        Err(TaskError::Panicked)
                    }
                };
            let _ = tx.send(result);
        };

        match pool {
            PoolKind::Scan => self.inner.scan_pool.spawn(job),
            PoolKind::Background => self.inner.background_pool.spawn(job),
        }

        BlockingTask::new(token, rx)
    }

    pub fn spawn_scan<T, F>(&self, f: F) -> BlockingTask<T>
    where
        T: Send + 'static,
        F: FnOnce(CancellationToken) -> Result<T, Cancelled> + Send + 'static,
    {
        self.spawn_blocking_on(PoolKind::Scan, CancellationToken::new(), f)
    }

    pub fn spawn_scan_with_token<T, F>(&self, token: CancellationToken, f: F) -> BlockingTask<T>
    where
        T: Send + 'static,
        F: FnOnce(CancellationToken) -> Result<T, Cancelled> + Send + 'static,
    {
        self.spawn_blocking_on(PoolKind::Scan, token, f)
    }

    pub fn spawn_background<T, F>(&self, f: F) -> BlockingTask<T>
    where
        T: Send + 'static,
        F: FnOnce(CancellationToken) -> Result<T, Cancelled> + Send + 'static,
    {
        self.spawn_blocking_on(PoolKind::Background, CancellationToken::new(), f)
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

impl Drop for SchedulerInner {
    fn drop(&mut self) {
        if let Some(runtime) = self.io_runtime.take() {
            runtime.shutdown_background();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_job_runs_and_returns_value() {
        let scheduler = Scheduler::default();
        let task = scheduler.spawn_scan(|_token| Ok(21 * 2));
        assert_eq!(task.wait(), Ok(42));
    }

    #[test]
    fn pre_cancelled_token_short_circuits() {
        let scheduler = Scheduler::default();
        let token = CancellationToken::new();
        token.cancel();
        let task = scheduler.spawn_scan_with_token(token, |_token| Ok(1));
        assert_eq!(task.wait(), Err(TaskError::Cancelled));
    }

    #[test]
    fn panic_is_reported_not_propagated() {
        let scheduler = Scheduler::default();
        let task: BlockingTask<()> = scheduler.spawn_scan(|_token| panic!("boom"));
        assert_eq!(task.wait(), Err(TaskError::Panicked));
    }

    #[test]
    fn cooperative_cancellation_is_observed() {
        let scheduler = Scheduler::default();
        let token = CancellationToken::new();
        token.cancel();
        let task = scheduler.spawn_scan_with_token(token.clone(), move |token| {
            if token.is_cancelled() {
                return Err(Cancelled);
            }
            Ok(())
        });
        assert_eq!(task.wait(), Err(TaskError::Cancelled));
    }
}
