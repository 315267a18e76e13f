use std::fmt;
use std::sync::{Arc, Mutex};

use crate::error::{Cause, capture_panic};
use crate::executor::{Executor, default_scheduler};
use crate::future::Future;
use crate::outcome::Outcome;

type TaskFn<V> = Box<dyn FnOnce(&TaskContext<V>) -> Result<V, Cause> + Send + 'static>;

/// Cooperative cancellation view handed to a running task body.
///
/// Rust threads cannot be interrupted from outside, so an interrupt
/// request surfaces here instead: the worker polls [`TaskContext::checkpoint`]
/// (or the individual predicates) at convenient points and unwinds early.
pub struct TaskContext<V> {
    future: Future<V>,
}

impl<V: Send + Sync + 'static> TaskContext<V> {
    pub fn is_cancelled(&self) -> bool {
        self.future.is_cancelled()
    }

    /// True only when the cancellation asked for an interrupt
    /// (`cancel_interrupting`); a plain `cancel()` lets the body run out.
    pub fn is_interrupted(&self) -> bool {
        self.future.interrupt_requested()
    }

    /// Early-exit helper: `Err` with the cancellation cause once the task
    /// was cancelled, for `?`-style returns from the body.
    pub fn checkpoint(&self) -> Result<(), Cause> {
        match self.future.cause() {
            Some(cause) if self.future.is_cancelled() => Err(cause),
            _ => Ok(()),
        }
    }
}

/// A [`Future`] bound to a one-shot computation.
///
/// The computation runs at most once, on whatever executor the run step is
/// submitted to. A task cancelled before the run step starts never invokes
/// the body at all; a completion produced after cancellation loses the
/// publication race and is discarded.
pub struct FutureTask<V> {
    future: Future<V>,
    body: Arc<Mutex<Option<TaskFn<V>>>>,
    label: &'static str,
}

impl<V> Clone for FutureTask<V> {
    fn clone(&self) -> Self {
        Self {
            future: self.future.clone(),
            body: self.body.clone(),
            label: self.label,
        }
    }
}

impl<V: Send + Sync + 'static> FutureTask<V> {
    /// Bind `body` to a new task on the default scheduler.
    pub fn new<F>(body: F) -> Self
    where
        F: FnOnce(&TaskContext<V>) -> Result<V, Cause> + Send + 'static,
    {
        Self::with_executor(default_scheduler(), body)
    }

    pub fn with_executor<F>(executor: Arc<dyn Executor>, body: F) -> Self
    where
        F: FnOnce(&TaskContext<V>) -> Result<V, Cause> + Send + 'static,
    {
        Self {
            future: Future::pending(executor),
            body: Arc::new(Mutex::new(Some(Box::new(body)))),
            label: std::any::type_name::<F>(),
        }
    }

    pub fn future(&self) -> Future<V> {
        self.future.clone()
    }

    /// Submit the run step to the task's executor.
    pub fn execute(&self) {
        let task = self.clone();
        if self
            .future
            .executor()
            .execute(Box::new(move || task.run()))
            .is_err()
        {
            tracing::error!(task = self.label, "task dropped: executor rejected the run step");
        }
    }

    /// The worker step: skip if already terminal, otherwise run the body
    /// exactly once and publish its result.
    pub fn run(&self) {
        if self.future.is_done() {
            tracing::trace!(task = self.label, "skipping cancelled task");
            return;
        }
        let body = self
            .body
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let Some(body) = body else {
            return;
        };
        let context = TaskContext {
            future: self.future.clone(),
        };
        match capture_panic(|| body(&context)) {
            Ok(Ok(value)) => {
                self.future.complete(Outcome::Success(value));
            }
            Ok(Err(cause)) | Err(cause) => {
                self.future.complete(Outcome::Failure(cause));
            }
        }
    }
}

impl<V: Send + Sync + 'static> fmt::Debug for FutureTask<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.future.is_done() {
            write!(f, "FutureTask({:?})", self.future)
        } else {
            write!(f, "FutureTask(pending, task = {})", self.label)
        }
    }
}

/// Create a task for `body`, submit it to `executor`, and return its future.
pub fn spawn<V, F>(executor: Arc<dyn Executor>, body: F) -> Future<V>
where
    V: Send + Sync + 'static,
    F: FnOnce(&TaskContext<V>) -> Result<V, Cause> + Send + 'static,
{
    let task = FutureTask::with_executor(executor, body);
    task.execute();
    task.future()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::direct;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[derive(Debug, thiserror::Error)]
    #[error("task failed")]
    struct TaskError;

    #[test]
    fn run_publishes_the_body_result() {
        let task = FutureTask::with_executor(direct(), |_ctx: &TaskContext<i32>| Ok(41 + 1));
        task.execute();
        assert_eq!(task.future().join().unwrap(), 42);
    }

    #[test]
    fn body_errors_become_failures() {
        let task =
            FutureTask::with_executor(direct(), |_ctx: &TaskContext<i32>| Err(Arc::new(TaskError) as Cause));
        task.execute();
        let err = task.future().join().unwrap_err();
        assert!(err.downcast_ref::<TaskError>().is_some());
    }

    #[test]
    fn body_panics_become_failures() {
        let task = FutureTask::with_executor(direct(), |_ctx: &TaskContext<i32>| panic!("task bug"));
        task.execute();
        assert!(task.future().is_failure());
    }

    #[test]
    fn cancelled_task_never_runs_the_body() {
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = ran.clone();
        let task = FutureTask::with_executor(direct(), move |_ctx: &TaskContext<i32>| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(1)
        });
        task.future().cancel();
        task.execute();
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert!(task.future().is_cancelled());
    }

    #[test]
    fn interrupt_request_is_visible_to_the_worker() {
        let task = FutureTask::new(|ctx: &TaskContext<i32>| {
            for _ in 0..200 {
                ctx.checkpoint()?;
                thread::sleep(Duration::from_millis(5));
            }
            Ok(0)
        });
        let future = task.future();
        task.execute();
        thread::sleep(Duration::from_millis(20));
        assert!(future.cancel_interrupting());
        // The worker observes the cancellation and returns without
        // overwriting the terminal state.
        assert!(future.is_cancelled());
        assert!(future.interrupt_requested());
    }

    #[test]
    fn spawn_submits_and_returns_the_future() {
        let future = spawn(direct(), |_ctx: &TaskContext<i32>| Ok(5));
        assert_eq!(future.get_now(), Some(5));
    }

    #[test]
    fn debug_of_a_pending_task_names_the_body() {
        let task = FutureTask::with_executor(direct(), |_ctx: &TaskContext<i32>| Ok(1));
        let repr = format!("{task:?}");
        assert!(repr.contains("task = "), "got: {repr}");
        task.run();
        let repr = format!("{task:?}");
        assert!(!repr.contains("task = "), "got: {repr}");
    }
}
