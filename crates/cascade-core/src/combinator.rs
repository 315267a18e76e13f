//! Derived futures.
//!
//! Every operator here follows one shape: create a downstream promise on
//! the upstream's executor, register a single completion listener on the
//! upstream that implements the operator's semantics, and hook downstream
//! cancellation back to the upstream. User closures are routed through
//! [`capture_panic`] so a panicking mapper fails the derived future instead
//! of leaving it pending.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{Cause, TimeoutError, capture_panic, root_cause};
use crate::executor::{Scheduler, default_scheduler};
use crate::future::Future;
use crate::outcome::Outcome;
use crate::promise::Promise;

/// Forward a non-success terminal to `target`, preserving the cancellation
/// flavor (cause and interrupt request) exactly.
fn mirror_abnormal<X, U: Send + Sync + 'static>(target: &Promise<U>, outcome: &Outcome<X>) {
    match outcome {
        Outcome::Failure(cause) => {
            target.try_failure(cause.clone());
        }
        Outcome::Cancelled { cause, interrupt } => {
            target.complete_with(Outcome::Cancelled {
                cause: cause.clone(),
                interrupt: *interrupt,
            });
        }
        Outcome::Success(_) => {}
    }
}

/// Subscribe `source` and replay whatever terminal it reaches onto `target`.
fn mirror_into<U: Clone + Send + Sync + 'static>(target: Promise<U>, source: &Future<U>) {
    source.on_completed(move |src| {
        let Some(outcome) = src.outcome() else { return };
        match outcome {
            Outcome::Success(value) => {
                target.try_success(value);
            }
            other => mirror_abnormal(&target, &other),
        }
    });
}

impl<V: Clone + Send + Sync + 'static> Future<V> {
    /// Downstream promise wired for upward cancellation propagation.
    fn derive<U: Send + Sync + 'static>(&self) -> (Promise<U>, Future<U>) {
        let promise = Promise::with_executor(self.executor());
        let derived = promise.future();
        let upstream = self.clone();
        derived.on_cancelled(move || {
            upstream.cancel();
        });
        (promise, derived)
    }

    /// Transform the success value; failures and cancellation pass through.
    pub fn map<U, F>(&self, mapper: F) -> Future<U>
    where
        U: Send + Sync + 'static,
        F: FnOnce(V) -> U + Send + 'static,
    {
        let (promise, derived) = self.derive::<U>();
        self.on_completed(move |fut| {
            let Some(outcome) = fut.outcome() else { return };
            match outcome {
                Outcome::Success(value) => match capture_panic(move || mapper(value)) {
                    Ok(mapped) => {
                        promise.try_success(mapped);
                    }
                    Err(cause) => {
                        promise.try_failure(cause);
                    }
                },
                other => mirror_abnormal(&promise, &other),
            }
        });
        derived
    }

    /// Discard the success value.
    pub fn map_void(&self) -> Future<()> {
        self.map(|_| ())
    }

    /// Run `consumer` on the success value, then discard it.
    pub fn map_void_with<F>(&self, consumer: F) -> Future<()>
    where
        F: FnOnce(V) + Send + 'static,
    {
        self.map(move |value| consumer(value))
    }

    /// Chain an asynchronous continuation; the derived future mirrors
    /// whatever `next(v)` settles to. Cancelling the derived future cancels
    /// the upstream and the inner future, whichever is current.
    pub fn flat_map<U, F>(&self, next: F) -> Future<U>
    where
        U: Clone + Send + Sync + 'static,
        F: FnOnce(V) -> Future<U> + Send + 'static,
    {
        let promise = Promise::with_executor(self.executor());
        let derived = promise.future();
        let inner: Arc<Mutex<Option<Future<U>>>> = Arc::new(Mutex::new(None));

        {
            let upstream = self.clone();
            let inner = inner.clone();
            derived.on_cancelled(move || {
                upstream.cancel();
                let current = inner.lock().unwrap_or_else(|e| e.into_inner()).take();
                if let Some(current) = current {
                    current.cancel();
                }
            });
        }

        self.on_completed(move |fut| {
            let Some(outcome) = fut.outcome() else { return };
            match outcome {
                Outcome::Success(value) => match capture_panic(move || next(value)) {
                    Ok(next_future) => {
                        *inner.lock().unwrap_or_else(|e| e.into_inner()) =
                            Some(next_future.clone());
                        if promise.is_cancelled() {
                            // Cancellation raced the subscription; the slot
                            // was already drained, stop the inner directly.
                            next_future.cancel();
                        }
                        mirror_into(promise.clone(), &next_future);
                    }
                    Err(cause) => {
                        promise.try_failure(cause);
                    }
                },
                other => mirror_abnormal(&promise, &other),
            }
        });
        derived
    }

    /// Pair this future's value with another's. The first failure or
    /// cancellation wins and the other input is cancelled.
    pub fn zip<U>(&self, other: &Future<U>) -> Future<(V, U)>
    where
        U: Clone + Send + Sync + 'static,
    {
        let promise = Promise::with_executor(self.executor());
        let derived = promise.future();
        {
            let left = self.clone();
            let right = other.clone();
            derived.on_cancelled(move || {
                left.cancel();
                right.cancel();
            });
        }

        let slots = Arc::new(Mutex::new((None::<V>, None::<U>)));
        {
            let promise = promise.clone();
            let slots = slots.clone();
            let right = other.clone();
            self.on_completed(move |fut| {
                let Some(outcome) = fut.outcome() else { return };
                match outcome {
                    Outcome::Success(value) => {
                        let mut guard = slots.lock().unwrap_or_else(|e| e.into_inner());
                        guard.0 = Some(value);
                        if guard.0.is_some() && guard.1.is_some() {
                            let pair = (guard.0.take(), guard.1.take());
                            drop(guard);
                            if let (Some(a), Some(b)) = pair {
                                promise.try_success((a, b));
                            }
                        }
                    }
                    abnormal => {
                        mirror_abnormal(&promise, &abnormal);
                        right.cancel();
                    }
                }
            });
        }
        {
            let left = self.clone();
            other.on_completed(move |fut| {
                let Some(outcome) = fut.outcome() else { return };
                match outcome {
                    Outcome::Success(value) => {
                        let mut guard = slots.lock().unwrap_or_else(|e| e.into_inner());
                        guard.1 = Some(value);
                        if guard.0.is_some() && guard.1.is_some() {
                            let pair = (guard.0.take(), guard.1.take());
                            drop(guard);
                            if let (Some(a), Some(b)) = pair {
                                promise.try_success((a, b));
                            }
                        }
                    }
                    abnormal => {
                        mirror_abnormal(&promise, &abnormal);
                        left.cancel();
                    }
                }
            });
        }
        derived
    }

    /// As [`Future::zip`], combining the pair with `combiner`.
    pub fn zip_with<U, R, F>(&self, other: &Future<U>, combiner: F) -> Future<R>
    where
        U: Clone + Send + Sync + 'static,
        R: Send + Sync + 'static,
        F: FnOnce(V, U) -> R + Send + 'static,
    {
        self.zip(other).map(move |(a, b)| combiner(a, b))
    }

    /// Turn any failure into a success through `handler`; cancellation
    /// passes through unchanged.
    pub fn recover<F>(&self, handler: F) -> Future<V>
    where
        F: FnOnce(Cause) -> V + Send + 'static,
    {
        let (promise, derived) = self.derive::<V>();
        self.on_completed(move |fut| {
            let Some(outcome) = fut.outcome() else { return };
            match outcome {
                Outcome::Success(value) => {
                    promise.try_success(value);
                }
                Outcome::Failure(cause) => match capture_panic(move || handler(cause)) {
                    Ok(value) => {
                        promise.try_success(value);
                    }
                    Err(cause) => {
                        promise.try_failure(cause);
                    }
                },
                cancelled => mirror_abnormal(&promise, &cancelled),
            }
        });
        derived
    }

    /// Recover only when the failure cause is an `E`.
    pub fn catching<E, F>(&self, handler: F) -> Future<V>
    where
        E: std::error::Error + Send + Sync + 'static,
        F: FnOnce(&E) -> V + Send + 'static,
    {
        let (promise, derived) = self.derive::<V>();
        self.on_completed(move |fut| {
            let Some(outcome) = fut.outcome() else { return };
            match outcome {
                Outcome::Success(value) => {
                    promise.try_success(value);
                }
                Outcome::Failure(cause) => {
                    let probe = cause.clone();
                    match capture_panic(move || probe.downcast_ref::<E>().map(handler)) {
                        Ok(Some(value)) => {
                            promise.try_success(value);
                        }
                        Ok(None) => {
                            promise.try_failure(cause);
                        }
                        Err(panic) => {
                            promise.try_failure(panic);
                        }
                    }
                }
                cancelled => mirror_abnormal(&promise, &cancelled),
            }
        });
        derived
    }

    /// Recover when `predicate` accepts the failure cause.
    pub fn catching_when<P, F>(&self, predicate: P, handler: F) -> Future<V>
    where
        P: Fn(&Cause) -> bool + Send + 'static,
        F: FnOnce(Cause) -> V + Send + 'static,
    {
        let (promise, derived) = self.derive::<V>();
        self.on_completed(move |fut| {
            let Some(outcome) = fut.outcome() else { return };
            match outcome {
                Outcome::Success(value) => {
                    promise.try_success(value);
                }
                Outcome::Failure(cause) => {
                    if predicate(&cause) {
                        match capture_panic(move || handler(cause)) {
                            Ok(value) => {
                                promise.try_success(value);
                            }
                            Err(panic) => {
                                promise.try_failure(panic);
                            }
                        }
                    } else {
                        promise.try_failure(cause);
                    }
                }
                cancelled => mirror_abnormal(&promise, &cancelled),
            }
        });
        derived
    }

    /// Recover when the immediate `source()` of the failure is an `E`.
    pub fn catch_cause<E, F>(&self, handler: F) -> Future<V>
    where
        E: std::error::Error + Send + Sync + 'static,
        F: FnOnce(&E) -> V + Send + 'static,
    {
        let (promise, derived) = self.derive::<V>();
        self.on_completed(move |fut| {
            let Some(outcome) = fut.outcome() else { return };
            match outcome {
                Outcome::Success(value) => {
                    promise.try_success(value);
                }
                Outcome::Failure(cause) => {
                    let probe = cause.clone();
                    match capture_panic(move || {
                        probe.source().and_then(|s| s.downcast_ref::<E>()).map(handler)
                    }) {
                        Ok(Some(value)) => {
                            promise.try_success(value);
                        }
                        Ok(None) => {
                            promise.try_failure(cause);
                        }
                        Err(panic) => {
                            promise.try_failure(panic);
                        }
                    }
                }
                cancelled => mirror_abnormal(&promise, &cancelled),
            }
        });
        derived
    }

    /// Recover when the root of the failure's `source()` chain is an `E`.
    pub fn catch_root<E, F>(&self, handler: F) -> Future<V>
    where
        E: std::error::Error + Send + Sync + 'static,
        F: FnOnce(&E) -> V + Send + 'static,
    {
        let (promise, derived) = self.derive::<V>();
        self.on_completed(move |fut| {
            let Some(outcome) = fut.outcome() else { return };
            match outcome {
                Outcome::Success(value) => {
                    promise.try_success(value);
                }
                Outcome::Failure(cause) => {
                    let probe = cause.clone();
                    match capture_panic(move || {
                        root_cause(probe.as_ref()).downcast_ref::<E>().map(handler)
                    }) {
                        Ok(Some(value)) => {
                            promise.try_success(value);
                        }
                        Ok(None) => {
                            promise.try_failure(cause);
                        }
                        Err(panic) => {
                            promise.try_failure(panic);
                        }
                    }
                }
                cancelled => mirror_abnormal(&promise, &cancelled),
            }
        });
        derived
    }

    /// Switch to the future produced by `next` on failure.
    pub fn on_error_resume<F>(&self, next: F) -> Future<V>
    where
        F: FnOnce(Cause) -> Future<V> + Send + 'static,
    {
        self.on_error_resume_when(|_| true, next)
    }

    pub fn on_error_resume_when<P, F>(&self, predicate: P, next: F) -> Future<V>
    where
        P: Fn(&Cause) -> bool + Send + 'static,
        F: FnOnce(Cause) -> Future<V> + Send + 'static,
    {
        let promise = Promise::with_executor(self.executor());
        let derived = promise.future();
        let inner: Arc<Mutex<Option<Future<V>>>> = Arc::new(Mutex::new(None));
        {
            let upstream = self.clone();
            let inner = inner.clone();
            derived.on_cancelled(move || {
                upstream.cancel();
                let current = inner.lock().unwrap_or_else(|e| e.into_inner()).take();
                if let Some(current) = current {
                    current.cancel();
                }
            });
        }
        self.on_completed(move |fut| {
            let Some(outcome) = fut.outcome() else { return };
            match outcome {
                Outcome::Success(value) => {
                    promise.try_success(value);
                }
                Outcome::Failure(cause) => {
                    if predicate(&cause) {
                        match capture_panic(move || next(cause)) {
                            Ok(fallback) => {
                                *inner.lock().unwrap_or_else(|e| e.into_inner()) =
                                    Some(fallback.clone());
                                if promise.is_cancelled() {
                                    fallback.cancel();
                                }
                                mirror_into(promise.clone(), &fallback);
                            }
                            Err(panic) => {
                                promise.try_failure(panic);
                            }
                        }
                    } else {
                        promise.try_failure(cause);
                    }
                }
                cancelled => mirror_abnormal(&promise, &cancelled),
            }
        });
        derived
    }

    /// Replace the failure cause through `mapper`.
    pub fn on_error_map<F>(&self, mapper: F) -> Future<V>
    where
        F: FnOnce(Cause) -> Cause + Send + 'static,
    {
        self.on_error_map_when(|_| true, mapper)
    }

    pub fn on_error_map_when<P, F>(&self, predicate: P, mapper: F) -> Future<V>
    where
        P: Fn(&Cause) -> bool + Send + 'static,
        F: FnOnce(Cause) -> Cause + Send + 'static,
    {
        let (promise, derived) = self.derive::<V>();
        self.on_completed(move |fut| {
            let Some(outcome) = fut.outcome() else { return };
            match outcome {
                Outcome::Success(value) => {
                    promise.try_success(value);
                }
                Outcome::Failure(cause) => {
                    if predicate(&cause) {
                        match capture_panic(move || mapper(cause)) {
                            Ok(mapped) => {
                                promise.try_failure(mapped);
                            }
                            Err(panic) => {
                                promise.try_failure(panic);
                            }
                        }
                    } else {
                        promise.try_failure(cause);
                    }
                }
                cancelled => mirror_abnormal(&promise, &cancelled),
            }
        });
        derived
    }

    /// Complete empty instead of failing; the payload moves to `Option`.
    pub fn on_error_complete(&self) -> Future<Option<V>> {
        self.on_error_complete_when(|_| true)
    }

    pub fn on_error_complete_when<P>(&self, predicate: P) -> Future<Option<V>>
    where
        P: Fn(&Cause) -> bool + Send + 'static,
    {
        let (promise, derived) = self.derive::<Option<V>>();
        self.on_completed(move |fut| {
            let Some(outcome) = fut.outcome() else { return };
            match outcome {
                Outcome::Success(value) => {
                    promise.try_success(Some(value));
                }
                Outcome::Failure(cause) => {
                    if predicate(&cause) {
                        promise.try_success(None);
                    } else {
                        promise.try_failure(cause);
                    }
                }
                cancelled => mirror_abnormal(&promise, &cancelled),
            }
        });
        derived
    }

    /// Replace a failure with a fixed value.
    pub fn on_error_return(&self, value: V) -> Future<V> {
        self.on_error_return_when(|_| true, value)
    }

    pub fn on_error_return_when<P>(&self, predicate: P, value: V) -> Future<V>
    where
        P: Fn(&Cause) -> bool + Send + 'static,
    {
        let (promise, derived) = self.derive::<V>();
        self.on_completed(move |fut| {
            let Some(outcome) = fut.outcome() else { return };
            match outcome {
                Outcome::Success(v) => {
                    promise.try_success(v);
                }
                Outcome::Failure(cause) => {
                    if predicate(&cause) {
                        promise.try_success(value);
                    } else {
                        promise.try_failure(cause);
                    }
                }
                cancelled => mirror_abnormal(&promise, &cancelled),
            }
        });
        derived
    }

    /// Swallow a cancellation, completing with `fallback` instead. The
    /// derived future is *not* cancelled in that case.
    pub fn switch_if_cancelled(&self, fallback: V) -> Future<V> {
        self.switch_if_cancelled_with(move || fallback)
    }

    pub fn switch_if_cancelled_with<F>(&self, supplier: F) -> Future<V>
    where
        F: FnOnce() -> V + Send + 'static,
    {
        let (promise, derived) = self.derive::<V>();
        self.on_completed(move |fut| {
            let Some(outcome) = fut.outcome() else { return };
            match outcome {
                Outcome::Success(value) => {
                    promise.try_success(value);
                }
                Outcome::Failure(cause) => {
                    promise.try_failure(cause);
                }
                Outcome::Cancelled { .. } => match capture_panic(supplier) {
                    Ok(value) => {
                        promise.try_success(value);
                    }
                    Err(panic) => {
                        promise.try_failure(panic);
                    }
                },
            }
        });
        derived
    }

    pub fn switch_if_cancelled_future(&self, fallback: Future<V>) -> Future<V> {
        let (promise, derived) = self.derive::<V>();
        self.on_completed(move |fut| {
            let Some(outcome) = fut.outcome() else { return };
            match outcome {
                Outcome::Success(value) => {
                    promise.try_success(value);
                }
                Outcome::Failure(cause) => {
                    promise.try_failure(cause);
                }
                Outcome::Cancelled { .. } => {
                    mirror_into(promise.clone(), &fallback);
                }
            }
        });
        derived
    }

    /// Replay this future's terminal state onto `target`.
    pub fn cascade_to(&self, target: &Promise<V>) -> &Self {
        let target = target.clone();
        self.on_completed(move |fut| {
            let Some(outcome) = fut.outcome() else { return };
            match outcome {
                Outcome::Success(value) => {
                    target.try_success(value);
                }
                other => mirror_abnormal(&target, &other),
            }
        });
        self
    }

    /// Race this future against a deadline on the default scheduler.
    pub fn timeout(&self, after: Duration) -> Future<V> {
        self.timeout_on(after, default_scheduler().as_ref())
    }

    /// Race against a deadline; a deadline win fails the derived future
    /// with the stable `"Timeout, after N seconds"` message.
    pub fn timeout_on(&self, after: Duration, scheduler: &dyn Scheduler) -> Future<V> {
        self.timeout_with(after, scheduler, move |promise| {
            promise.try_failure(Arc::new(TimeoutError::deadline(after)));
        })
    }

    /// Race against a deadline with a custom handler. `on_timeout` receives
    /// the derived promise and decides how to settle it; a late upstream
    /// completion loses the publication race and is discarded. The deadline
    /// task is cancelled as soon as the upstream completes first.
    pub fn timeout_with<F>(&self, after: Duration, scheduler: &dyn Scheduler, on_timeout: F) -> Future<V>
    where
        F: FnOnce(&Promise<V>) + Send + 'static,
    {
        let (promise, derived) = self.derive::<V>();
        let deadline_promise = promise.clone();
        let handle = Arc::new(scheduler.schedule(
            Box::new(move || on_timeout(&deadline_promise)),
            after,
        ));
        let timer = handle.clone();
        self.on_completed(move |fut| {
            timer.cancel();
            let Some(outcome) = fut.outcome() else { return };
            match outcome {
                Outcome::Success(value) => {
                    promise.try_success(value);
                }
                other => mirror_abnormal(&promise, &other),
            }
        });
        derived.on_cancelled(move || {
            handle.cancel();
        });
        derived
    }
}

impl<T: Clone + Send + Sync + 'static> Future<Option<T>> {
    /// Replace an empty success with `fallback`.
    ///
    /// `Success(None)` is the only empty case; a failure never counts as
    /// empty and propagates instead.
    pub fn switch_if_empty(&self, fallback: T) -> Future<T> {
        self.switch_if_empty_with(move || fallback)
    }

    pub fn switch_if_empty_with<F>(&self, supplier: F) -> Future<T>
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let (promise, derived) = self.derive::<T>();
        self.on_completed(move |fut| {
            let Some(outcome) = fut.outcome() else { return };
            match outcome {
                Outcome::Success(Some(value)) => {
                    promise.try_success(value);
                }
                Outcome::Success(None) => match capture_panic(supplier) {
                    Ok(value) => {
                        promise.try_success(value);
                    }
                    Err(panic) => {
                        promise.try_failure(panic);
                    }
                },
                other => mirror_abnormal(&promise, &other),
            }
        });
        derived
    }

    pub fn switch_if_empty_future(&self, fallback: Future<T>) -> Future<T> {
        let (promise, derived) = self.derive::<T>();
        self.on_completed(move |fut| {
            let Some(outcome) = fut.outcome() else { return };
            match outcome {
                Outcome::Success(Some(value)) => {
                    promise.try_success(value);
                }
                Outcome::Success(None) => {
                    mirror_into(promise.clone(), &fallback);
                }
                other => mirror_abnormal(&promise, &other),
            }
        });
        derived
    }
}
