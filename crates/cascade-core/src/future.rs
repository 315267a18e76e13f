use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::{Duration, Instant};

use crate::error::{CancelledError, Cause, GetError, TimeoutError, panic_message};
use crate::executor::{Executor, Job, direct};
use crate::outcome::Outcome;
use crate::parker::Parker;

type Listener<V> = Box<dyn FnOnce(&Future<V>) + Send + 'static>;

/// A shared, observable deferred result.
///
/// `Future` is a cheap handle over one core: an atomic one-shot outcome
/// cell, a queue of completion listeners and parked readers, and the
/// executor on which callbacks run. Writable handles ([`crate::Promise`],
/// [`crate::FutureTask`]) and derived futures (combinators) are all this
/// same core with different construction state.
///
/// Reads of the value require `V: Clone` because the core is
/// multi-observer: every listener and every blocking reader sees the same
/// stored result.
pub struct Future<V> {
    inner: Arc<Inner<V>>,
}

impl<V> Clone for Future<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<V> {
    /// Terminal state; empty while pending, set exactly once.
    outcome: OnceLock<Outcome<V>>,
    /// Pre-completion registrations. Appended by observers, detached once
    /// by the completing thread.
    queue: Mutex<Queue<V>>,
    /// Default executor for completion callbacks.
    executor: Arc<dyn Executor>,
}

struct Queue<V> {
    listeners: Vec<Listener<V>>,
    parkers: Vec<Arc<Parker>>,
    /// Set by the completing thread when it detaches the queue. Observers
    /// that find it set attach nothing and act on the outcome directly.
    drained: bool,
}

impl<V: Send + Sync + 'static> Future<V> {
    pub(crate) fn pending(executor: Arc<dyn Executor>) -> Self {
        Self {
            inner: Arc::new(Inner {
                outcome: OnceLock::new(),
                queue: Mutex::new(Queue {
                    listeners: Vec::new(),
                    parkers: Vec::new(),
                    drained: false,
                }),
                executor,
            }),
        }
    }

    /// An already-successful future on the direct executor.
    pub fn ok(value: V) -> Self {
        Self::ok_on(direct(), value)
    }

    pub fn ok_on(executor: Arc<dyn Executor>, value: V) -> Self {
        let future = Self::pending(executor);
        future.complete(Outcome::Success(value));
        future
    }

    /// An already-failed future on the direct executor.
    pub fn failed(cause: Cause) -> Self {
        Self::failed_on(direct(), cause)
    }

    pub fn failed_on(executor: Arc<dyn Executor>, cause: Cause) -> Self {
        let future = Self::pending(executor);
        future.complete(Outcome::Failure(cause));
        future
    }

    /// An already-cancelled future on the direct executor.
    pub fn cancelled() -> Self {
        let future = Self::pending(direct());
        future.complete(Outcome::Cancelled {
            cause: None,
            interrupt: false,
        });
        future
    }

    pub fn executor(&self) -> Arc<dyn Executor> {
        self.inner.executor.clone()
    }

    fn peek(&self) -> Option<&Outcome<V>> {
        self.inner.outcome.get()
    }

    pub fn is_done(&self) -> bool {
        self.peek().is_some()
    }

    pub fn is_success(&self) -> bool {
        self.peek().is_some_and(Outcome::is_success)
    }

    /// Any terminal state other than success.
    pub fn is_failed(&self) -> bool {
        self.peek().is_some_and(Outcome::is_failed)
    }

    /// Failed but not cancelled.
    pub fn is_failure(&self) -> bool {
        self.peek().is_some_and(Outcome::is_failure)
    }

    pub fn is_cancelled(&self) -> bool {
        self.peek().is_some_and(Outcome::is_cancelled)
    }

    /// True once the future was cancelled with an interrupt request; a
    /// running task worker polls this to stop early.
    pub fn interrupt_requested(&self) -> bool {
        self.peek().is_some_and(Outcome::interrupt_requested)
    }

    /// The stored cause for non-success terminals, `None` otherwise.
    pub fn cause(&self) -> Option<Cause> {
        self.peek().and_then(Outcome::cause)
    }

    fn queue(&self) -> MutexGuard<'_, Queue<V>> {
        self.inner.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Publish a terminal state.
    ///
    /// The outcome write wins or loses atomically; the winner detaches the
    /// registration queue, wakes blocked readers, then submits listeners in
    /// registration order. Returns false when the future was already
    /// terminal, leaving everything untouched.
    pub(crate) fn complete(&self, outcome: Outcome<V>) -> bool {
        if self.inner.outcome.set(outcome).is_err() {
            return false;
        }
        let (listeners, parkers) = {
            let mut queue = self.queue();
            queue.drained = true;
            (
                std::mem::take(&mut queue.listeners),
                std::mem::take(&mut queue.parkers),
            )
        };
        for parker in parkers {
            parker.unpark();
        }
        for listener in listeners {
            self.submit(listener);
        }
        true
    }

    /// Hand one listener to the executor. A panicking listener is reported
    /// and contained; a rejected submission is reported and dropped.
    fn submit(&self, listener: Listener<V>) {
        let observed = self.clone();
        let job: Job = Box::new(move || {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| listener(&observed))) {
                tracing::error!(
                    panic = %panic_message(payload.as_ref()),
                    "completion listener panicked"
                );
            }
        });
        if self.inner.executor.execute(job).is_err() {
            tracing::error!("completion listener dropped: executor rejected the submission");
        }
    }

    /// Attach a completion listener.
    ///
    /// Runs exactly once with the terminal future: queued while pending,
    /// submitted immediately when attached after completion. Under the
    /// direct executor that immediate submission runs inline.
    pub fn on_completed<F>(&self, listener: F) -> &Self
    where
        F: FnOnce(&Future<V>) + Send + 'static,
    {
        let boxed: Listener<V> = Box::new(listener);
        {
            let mut queue = self.queue();
            if !queue.drained {
                queue.listeners.push(boxed);
                return self;
            }
        }
        self.submit(boxed);
        self
    }

    /// Runs on any non-success terminal, cancellation included.
    pub fn on_failed<F>(&self, listener: F) -> &Self
    where
        F: FnOnce(Cause) + Send + 'static,
    {
        self.on_completed(move |fut| {
            if fut.is_failed()
                && let Some(cause) = fut.cause()
            {
                listener(cause);
            }
        })
    }

    /// Runs on failures proper; cancellation does not trigger it.
    pub fn on_failure<F>(&self, listener: F) -> &Self
    where
        F: FnOnce(Cause) + Send + 'static,
    {
        self.on_failure_when(|_| true, listener)
    }

    pub fn on_failure_when<P, F>(&self, predicate: P, listener: F) -> &Self
    where
        P: Fn(&Cause) -> bool + Send + 'static,
        F: FnOnce(Cause) + Send + 'static,
    {
        self.on_completed(move |fut| {
            if fut.is_failure()
                && let Some(cause) = fut.cause()
                && predicate(&cause)
            {
                listener(cause);
            }
        })
    }

    /// Runs only when the failure cause is an `E`.
    pub fn on_failure_of<E, F>(&self, listener: F) -> &Self
    where
        E: std::error::Error + Send + Sync + 'static,
        F: FnOnce(&E) + Send + 'static,
    {
        self.on_completed(move |fut| {
            if fut.is_failure()
                && let Some(cause) = fut.cause()
                && let Some(matched) = cause.downcast_ref::<E>()
            {
                listener(matched);
            }
        })
    }

    pub fn on_cancelled<F>(&self, listener: F) -> &Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_completed(move |fut| {
            if fut.is_cancelled() {
                listener();
            }
        })
    }

    /// Runs on every terminal state.
    pub fn on_finally<F>(&self, listener: F) -> &Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_completed(move |_| listener())
    }

    /// Cancel without asking a running worker to stop.
    pub fn cancel(&self) -> bool {
        self.complete(Outcome::Cancelled {
            cause: None,
            interrupt: false,
        })
    }

    /// Cancel and request that a running task worker stop early.
    pub fn cancel_interrupting(&self) -> bool {
        self.complete(Outcome::Cancelled {
            cause: None,
            interrupt: true,
        })
    }

    /// Cancel with an explicit cause; `cause()` returns it verbatim.
    pub fn cancel_with(&self, cause: Cause) -> bool {
        self.complete(Outcome::Cancelled {
            cause: Some(cause),
            interrupt: false,
        })
    }

    /// Block until the future is terminal; returns `self` for chaining.
    ///
    /// No core lock is held while blocked.
    pub fn wait(&self) -> &Self {
        if self.is_done() {
            return self;
        }
        let parker = Arc::new(Parker::new());
        {
            let mut queue = self.queue();
            if queue.drained {
                return self;
            }
            queue.parkers.push(parker.clone());
        }
        while !self.is_done() {
            parker.park();
        }
        self
    }

    /// Block until terminal or until `timeout` elapses.
    ///
    /// Returns true when the future completed within the deadline.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        if self.is_done() {
            return true;
        }
        let deadline = Instant::now() + timeout;
        let parker = Arc::new(Parker::new());
        {
            let mut queue = self.queue();
            if queue.drained {
                return true;
            }
            queue.parkers.push(parker.clone());
        }
        loop {
            if self.is_done() {
                return true;
            }
            if !parker.park_deadline(deadline) {
                if self.is_done() {
                    return true;
                }
                let mut queue = self.queue();
                queue.parkers.retain(|p| !Arc::ptr_eq(p, &parker));
                return false;
            }
        }
    }
}

impl<V: Clone + Send + Sync + 'static> Future<V> {
    /// The value, when already successful; `None` for anything else,
    /// pending included.
    pub fn get_now(&self) -> Option<V> {
        match self.peek() {
            Some(Outcome::Success(value)) => Some(value.clone()),
            _ => None,
        }
    }

    /// A copy of the terminal state, `None` while pending.
    pub fn outcome(&self) -> Option<Outcome<V>> {
        self.peek().cloned()
    }

    /// The value of a successful future.
    ///
    /// # Panics
    ///
    /// Panics with `"Result is required"` when the future is not (yet)
    /// successful; requiring a result that is not there is a programming
    /// error, not a stored failure.
    pub fn obtain(&self) -> V {
        match self.peek() {
            Some(Outcome::Success(value)) => value.clone(),
            _ => panic!("Result is required"),
        }
    }

    fn terminal(&self) -> &Outcome<V> {
        self.wait();
        match self.peek() {
            Some(outcome) => outcome,
            None => unreachable!("wait() returns only after the outcome is published"),
        }
    }

    fn wrapped(outcome: &Outcome<V>) -> Result<V, GetError> {
        match outcome {
            Outcome::Success(value) => Ok(value.clone()),
            Outcome::Failure(cause) => Err(GetError::Failed(cause.clone())),
            cancelled => Err(GetError::Cancelled(
                cancelled
                    .cause()
                    .unwrap_or_else(|| Arc::new(CancelledError)),
            )),
        }
    }

    fn unwrapped(outcome: &Outcome<V>) -> Result<V, Cause> {
        match outcome {
            Outcome::Success(value) => Ok(value.clone()),
            other => Err(other.cause().unwrap_or_else(|| Arc::new(CancelledError))),
        }
    }

    /// Block for the result, wrapping any stored cause in [`GetError`].
    pub fn get(&self) -> Result<V, GetError> {
        Self::wrapped(self.terminal())
    }

    /// As [`Future::get`], giving up after `timeout`.
    pub fn get_for(&self, timeout: Duration) -> Result<V, GetError> {
        if !self.wait_for(timeout) {
            return Err(GetError::Timeout(timeout));
        }
        Self::wrapped(self.terminal())
    }

    /// Block for the result, returning any stored cause unwrapped.
    pub fn join(&self) -> Result<V, Cause> {
        Self::unwrapped(self.terminal())
    }

    /// As [`Future::join`] with a deadline. A deadline miss reports a
    /// [`TimeoutError`] and leaves the future untouched.
    pub fn block(&self, timeout: Duration) -> Result<V, Cause> {
        if !self.wait_for(timeout) {
            return Err(Arc::new(TimeoutError::blocking_read(timeout)));
        }
        Self::unwrapped(self.terminal())
    }

    /// As [`Future::block`], but a deadline miss first cancels the future,
    /// with or without the interrupt request.
    pub fn block_cancelling(&self, timeout: Duration, interrupt: bool) -> Result<V, Cause> {
        if !self.wait_for(timeout) {
            if interrupt {
                self.cancel_interrupting();
            } else {
                self.cancel();
            }
            return Err(Arc::new(TimeoutError::blocking_read(timeout)));
        }
        Self::unwrapped(self.terminal())
    }

    /// Block until terminal, then surface a non-success cause unwrapped.
    pub fn sync(&self) -> Result<&Self, Cause> {
        match self.terminal().cause() {
            None => Ok(self),
            Some(cause) => Err(cause),
        }
    }

    /// Split completion form: one callback for the value, one for any
    /// non-success cause.
    pub fn on_done<S, F>(&self, on_success: S, on_failed: F) -> &Self
    where
        S: FnOnce(V) + Send + 'static,
        F: FnOnce(Cause) + Send + 'static,
    {
        self.on_completed(move |fut| {
            let Some(outcome) = fut.outcome() else { return };
            match outcome {
                Outcome::Success(value) => on_success(value),
                other => {
                    if let Some(cause) = other.cause() {
                        on_failed(cause);
                    }
                }
            }
        })
    }

    /// Runs with the value on success only.
    pub fn on_success<F>(&self, listener: F) -> &Self
    where
        F: FnOnce(V) + Send + 'static,
    {
        self.on_completed(move |fut| {
            if let Some(value) = fut.get_now() {
                listener(value);
            }
        })
    }
}

impl<V> fmt::Debug for Future<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.inner.outcome.get() {
            None => "pending",
            Some(Outcome::Success(_)) => "success",
            Some(Outcome::Failure(_)) => "failure",
            Some(Outcome::Cancelled {
                interrupt: false, ..
            }) => "cancelled",
            Some(Outcome::Cancelled {
                interrupt: true, ..
            }) => "cancelled(interrupt)",
        };
        f.debug_struct("Future").field("state", &state).finish()
    }
}
