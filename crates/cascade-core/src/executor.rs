use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::runtime::{Builder, Handle, Runtime};

/// A unit of work submitted to an executor.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// An executor refused a submission.
///
/// The submitter reports the rejection and drops the job; the state of the
/// future that produced it is unaffected.
#[derive(Clone, Copy, Debug, thiserror::Error)]
#[error("executor rejected the submitted job")]
pub struct Rejected;

/// Where completion callbacks run.
///
/// The core assumes nothing beyond submission: no priorities, no ordering
/// across executors, no thread identity. Implementations that cannot accept
/// a job return [`Rejected`] instead of panicking.
pub trait Executor: Send + Sync + 'static {
    fn execute(&self, job: Job) -> Result<(), Rejected>;

    /// True when jobs run inline on the submitting thread.
    fn is_direct(&self) -> bool {
        false
    }
}

/// An executor that can also run a job after a delay.
pub trait Scheduler: Executor {
    /// Run `job` once `delay` has elapsed. The returned handle cancels the
    /// pending job; cancelling after it ran is a no-op.
    fn schedule(&self, job: Job, delay: Duration) -> TimeoutHandle;
}

/// Cancellation handle for a scheduled job.
pub struct TimeoutHandle {
    cancelled: AtomicBool,
    abort: Box<dyn Fn() + Send + Sync>,
}

impl TimeoutHandle {
    pub fn new(abort: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            cancelled: AtomicBool::new(false),
            abort: Box::new(abort),
        }
    }

    /// Cancel the pending job. Returns true on the first call only.
    pub fn cancel(&self) -> bool {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return false;
        }
        (self.abort)();
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for TimeoutHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeoutHandle")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Runs jobs synchronously on the calling thread.
///
/// Used for in-place composition: a listener attached under `Direct` runs
/// before the attaching (or completing) call returns.
#[derive(Clone, Copy, Debug, Default)]
pub struct Direct;

impl Executor for Direct {
    fn execute(&self, job: Job) -> Result<(), Rejected> {
        job();
        Ok(())
    }

    fn is_direct(&self) -> bool {
        true
    }
}

/// The shared direct executor.
pub fn direct() -> Arc<dyn Executor> {
    static DIRECT: OnceLock<Arc<dyn Executor>> = OnceLock::new();
    DIRECT.get_or_init(|| Arc::new(Direct)).clone()
}

/// Configuration for a [`RuntimeScheduler`].
#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    worker_threads: usize,
    thread_name: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2),
            thread_name: "cascade-worker".to_string(),
        }
    }
}

impl SchedulerConfig {
    pub fn worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads.max(1);
        self
    }

    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    pub fn build(&self) -> io::Result<RuntimeScheduler> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(self.worker_threads)
            .thread_name(&self.thread_name)
            .enable_time()
            .build()?;
        let handle = runtime.handle().clone();
        Ok(RuntimeScheduler {
            handle,
            _runtime: Some(Arc::new(runtime)),
        })
    }
}

/// The tokio-backed default scheduler.
///
/// Jobs may block (listeners run arbitrary user code, blocking reads
/// included), so `execute` routes through the blocking pool; only the
/// delay of `schedule` lives on the async workers.
#[derive(Clone)]
pub struct RuntimeScheduler {
    handle: Handle,
    _runtime: Option<Arc<Runtime>>,
}

impl RuntimeScheduler {
    /// Piggyback on an already-running tokio runtime instead of owning one.
    pub fn from_handle(handle: Handle) -> Self {
        Self {
            handle,
            _runtime: None,
        }
    }

    /// The underlying runtime handle, for adapters that drive host futures.
    pub fn handle(&self) -> &Handle {
        &self.handle
    }
}

impl std::fmt::Debug for RuntimeScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeScheduler")
            .field("owns_runtime", &self._runtime.is_some())
            .finish()
    }
}

impl Executor for RuntimeScheduler {
    fn execute(&self, job: Job) -> Result<(), Rejected> {
        self.handle.spawn_blocking(job);
        Ok(())
    }
}

impl Scheduler for RuntimeScheduler {
    fn schedule(&self, job: Job, delay: Duration) -> TimeoutHandle {
        let task = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            job();
        });
        let abort = task.abort_handle();
        TimeoutHandle::new(move || abort.abort())
    }
}

/// The lazily-built, process-wide default scheduler.
///
/// Promises created without an explicit executor dispatch their listeners
/// here, and the timeout combinator schedules its deadlines here unless
/// told otherwise.
pub fn default_scheduler() -> Arc<RuntimeScheduler> {
    static SCHEDULER: OnceLock<Arc<RuntimeScheduler>> = OnceLock::new();
    SCHEDULER
        .get_or_init(|| {
            let scheduler = SchedulerConfig::default()
                .build()
                .expect("failed to build the default scheduler runtime");
            Arc::new(scheduler)
        })
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn direct_runs_inline() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        // The job runs before execute returns.
        Direct
            .execute(Box::new(move || flag.store(true, Ordering::SeqCst)))
            .unwrap();
        assert!(ran.load(Ordering::SeqCst));
        assert!(Direct.is_direct());
        assert!(!default_scheduler().is_direct());
    }

    #[test]
    fn runtime_scheduler_executes_jobs() {
        let scheduler = default_scheduler();
        let (tx, rx) = mpsc::channel();
        scheduler
            .execute(Box::new(move || {
                tx.send(42).ok();
            }))
            .unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 42);
    }

    #[test]
    fn schedule_fires_after_the_delay() {
        let scheduler = default_scheduler();
        let (tx, rx) = mpsc::channel();
        scheduler.schedule(
            Box::new(move || {
                tx.send(()).ok();
            }),
            Duration::from_millis(20),
        );
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
    }

    #[test]
    fn cancelled_schedule_never_fires() {
        let scheduler = default_scheduler();
        let (tx, rx) = mpsc::channel::<()>();
        let handle = scheduler.schedule(
            Box::new(move || {
                tx.send(()).ok();
            }),
            Duration::from_millis(100),
        );
        assert!(handle.cancel());
        assert!(!handle.cancel());
        assert!(handle.is_cancelled());
        assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
    }
}
