use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use cascade_core::{Cause, Executor, Future, Promise, capture_panic, default_scheduler};

/// Aggregate N futures into one.
///
/// Inputs are collected builder-style, the mode decides what an individual
/// failure means, and one of the output methods commits the combination:
///
/// - require-all-succeed (default): the combined future fails with the
///   first observed failure-or-cancellation cause, and every other input
///   is cancelled best effort, without an interrupt request.
/// - accept-failure: the combined future succeeds once every input is
///   terminal, whatever the individual outcomes were.
///
/// Cancelling the combined future cancels all still-pending inputs and
/// surfaces as a cancellation.
pub struct Combiner<V> {
    inputs: Vec<Future<V>>,
    accept_failure: bool,
    executor: Option<Arc<dyn Executor>>,
}

/// Start a combiner from any collection or iterator of futures.
pub fn combine<V, I>(inputs: I) -> Combiner<V>
where
    V: Clone + Send + Sync + 'static,
    I: IntoIterator<Item = Future<V>>,
{
    Combiner::new().with_all(inputs)
}

impl<V: Clone + Send + Sync + 'static> Combiner<V> {
    pub fn new() -> Self {
        Self {
            inputs: Vec::new(),
            accept_failure: false,
            executor: None,
        }
    }

    /// Add one input. Inputs are remembered in insertion order.
    pub fn with(mut self, future: Future<V>) -> Self {
        self.inputs.push(future);
        self
    }

    pub fn with_all(mut self, futures: impl IntoIterator<Item = Future<V>>) -> Self {
        self.inputs.extend(futures);
        self
    }

    /// Fail fast on the first failed or cancelled input. This is the
    /// default mode.
    pub fn require_all_succeed(mut self) -> Self {
        self.accept_failure = false;
        self
    }

    /// Succeed once all inputs are terminal, ignoring individual failures.
    pub fn accept_failure(mut self) -> Self {
        self.accept_failure = true;
        self
    }

    /// Executor for the combined future's callbacks; defaults to the
    /// library default scheduler.
    pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Complete with the inputs' results in input order.
    ///
    /// Each slot is that input's `get_now()`, so in accept-failure mode a
    /// failed or cancelled input contributes `None`.
    pub fn as_list(self) -> Future<Vec<Option<V>>> {
        self.finish(|inputs, promise| {
            let results: Vec<Option<V>> = inputs.iter().map(Future::get_now).collect();
            promise.try_success(results);
        })
    }

    /// Complete with no value.
    pub fn as_void(self) -> Future<()> {
        self.finish(|_, promise| {
            promise.try_success(());
        })
    }

    /// Run `callable` once the inputs are settled; its result is the
    /// combined result. An error return or a panic fails the combined
    /// future.
    pub fn invoke<R, F>(self, callable: F) -> Future<R>
    where
        R: Send + Sync + 'static,
        F: FnOnce() -> Result<R, Cause> + Send + 'static,
    {
        self.finish(move |_, promise| match capture_panic(callable) {
            Ok(Ok(value)) => {
                promise.try_success(value);
            }
            Ok(Err(cause)) | Err(cause) => {
                promise.try_failure(cause);
            }
        })
    }

    /// As [`Combiner::invoke`], handing the mapper the settled inputs.
    pub fn map_inputs<R, F>(self, mapper: F) -> Future<R>
    where
        R: Send + Sync + 'static,
        F: FnOnce(&[Future<V>]) -> Result<R, Cause> + Send + 'static,
    {
        self.finish(move |inputs, promise| match capture_panic(|| mapper(inputs)) {
            Ok(Ok(value)) => {
                promise.try_success(value);
            }
            Ok(Err(cause)) | Err(cause) => {
                promise.try_failure(cause);
            }
        })
    }

    /// Run `action` once the inputs are settled; completes with no value.
    pub fn run<F>(self, action: F) -> Future<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.finish(move |_, promise| match capture_panic(action) {
            Ok(()) => {
                promise.try_success(());
            }
            Err(cause) => {
                promise.try_failure(cause);
            }
        })
    }

    /// Commit: wire the inputs to a combined promise and hand `settle` the
    /// final say once (and if) the aggregate succeeds.
    fn finish<R, F>(self, settle: F) -> Future<R>
    where
        R: Send + Sync + 'static,
        F: FnOnce(&[Future<V>], &Promise<R>) + Send + 'static,
    {
        let executor = self
            .executor
            .unwrap_or_else(|| default_scheduler() as Arc<dyn Executor>);
        let promise = Promise::with_executor(executor);
        let combined = promise.future();
        let inputs = Arc::new(self.inputs);

        {
            let inputs = inputs.clone();
            combined.on_cancelled(move || {
                for input in inputs.iter() {
                    input.cancel();
                }
            });
        }

        // An empty aggregate is immediately settled.
        if inputs.is_empty() {
            settle(&[], &promise);
            return combined;
        }

        let remaining = Arc::new(AtomicUsize::new(inputs.len()));
        let settle = Arc::new(Mutex::new(Some(settle)));
        let accept_failure = self.accept_failure;

        for input in inputs.iter() {
            let promise = promise.clone();
            let remaining = remaining.clone();
            let settle = settle.clone();
            let inputs = inputs.clone();
            input.on_completed(move |fut| {
                if !accept_failure && fut.is_failed() {
                    if let Some(cause) = fut.cause() {
                        // First observed failure wins the combined cause.
                        if promise.try_failure(cause) {
                            tracing::debug!(
                                "combined input failed; cancelling the remaining inputs"
                            );
                            for other in inputs.iter() {
                                other.cancel();
                            }
                        }
                    }
                }
                // The final decrement settles the aggregate, unless a
                // failure or an external cancellation already did.
                if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                    if promise.is_done() {
                        return;
                    }
                    let settle = settle.lock().unwrap_or_else(|e| e.into_inner()).take();
                    if let Some(settle) = settle {
                        settle(inputs.as_slice(), &promise);
                    }
                }
            });
        }
        combined
    }
}

impl<V: Clone + Send + Sync + 'static> Default for Combiner<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cascade_core::{CancelledError, direct};

    #[derive(Debug, thiserror::Error)]
    #[error("boom")]
    struct Boom;

    fn direct_promise<V: Send + Sync + 'static>() -> Promise<V> {
        Promise::with_executor(direct())
    }

    #[test]
    fn as_list_preserves_input_order() {
        let list = combine([Future::ok("a"), Future::ok("b"), Future::ok("c")])
            .executor(direct())
            .as_list();
        assert_eq!(
            list.join().unwrap(),
            vec![Some("a"), Some("b"), Some("c")]
        );
    }

    #[test]
    fn require_all_succeed_fails_with_the_first_cause() {
        let cause: Cause = Arc::new(Boom);
        let list = combine([Future::ok("a"), Future::failed(cause.clone())])
            .require_all_succeed()
            .executor(direct())
            .as_list();
        let err = list.join().unwrap_err();
        assert!(Arc::ptr_eq(&err, &cause));
    }

    #[test]
    fn require_all_succeed_cancels_the_still_pending_inputs() {
        let pending = direct_promise::<i32>();
        let combined = combine([pending.future(), Future::failed(Arc::new(Boom))])
            .executor(direct())
            .as_void();
        assert!(combined.is_failure());
        assert!(pending.is_cancelled());
    }

    #[test]
    fn accept_failure_succeeds_over_failed_inputs() {
        let combined = combine([Future::ok("a"), Future::failed(Arc::new(Boom))])
            .accept_failure()
            .executor(direct())
            .as_void();
        assert_eq!(combined.join().unwrap(), ());
    }

    #[test]
    fn accept_failure_list_marks_failed_slots_empty() {
        let list = combine([Future::ok(1), Future::failed(Arc::new(Boom)), Future::ok(3)])
            .accept_failure()
            .executor(direct())
            .as_list();
        assert_eq!(list.join().unwrap(), vec![Some(1), None, Some(3)]);
    }

    #[test]
    fn a_cancelled_input_fails_the_strict_aggregate() {
        let combined = combine([Future::ok(1), Future::<i32>::cancelled()])
            .executor(direct())
            .as_void();
        assert!(combined.is_failure());
        assert!(!combined.is_cancelled());
        let cause = combined.cause().expect("cause");
        assert!(cause.downcast_ref::<CancelledError>().is_some());
    }

    #[test]
    fn empty_input_settles_immediately() {
        let list = combine(Vec::<Future<i32>>::new()).executor(direct()).as_list();
        assert_eq!(list.join().unwrap(), Vec::<Option<i32>>::new());

        let void = Combiner::<i32>::new().executor(direct()).as_void();
        assert!(void.is_success());
    }

    #[test]
    fn inputs_are_added_builder_style() {
        let a = direct_promise::<i32>();
        let b = direct_promise::<i32>();
        let list = Combiner::new()
            .with(a.future())
            .with_all([b.future()])
            .executor(direct())
            .as_list();
        a.try_success(1);
        assert!(!list.is_done());
        b.try_success(2);
        assert_eq!(list.join().unwrap(), vec![Some(1), Some(2)]);
    }

    #[test]
    fn invoke_runs_after_all_inputs_settle() {
        let combined = combine([Future::ok(1), Future::ok(2)])
            .executor(direct())
            .invoke(|| Ok::<_, Cause>(42));
        assert_eq!(combined.join().unwrap(), 42);
    }

    #[test]
    fn invoke_errors_fail_the_aggregate() {
        let combined = combine([Future::ok(1)])
            .executor(direct())
            .invoke(|| Err::<i32, Cause>(Arc::new(Boom)));
        assert!(combined.is_failure());
    }

    #[test]
    fn map_inputs_sees_every_settled_input() {
        let combined = combine([Future::ok(2), Future::ok(3)])
            .executor(direct())
            .map_inputs(|inputs| {
                let product: i32 = inputs.iter().filter_map(Future::get_now).product();
                Ok(product)
            });
        assert_eq!(combined.join().unwrap(), 6);
    }

    #[test]
    fn run_panics_fail_the_aggregate() {
        let combined = combine([Future::ok(1)])
            .executor(direct())
            .run(|| panic!("runnable bug"));
        assert!(combined.is_failure());
    }

    #[test]
    fn cancelling_the_aggregate_cancels_pending_inputs() {
        let a = direct_promise::<i32>();
        let b = direct_promise::<i32>();
        let combined = combine([a.future(), b.future()])
            .executor(direct())
            .as_void();
        assert!(combined.cancel());
        assert!(combined.is_cancelled());
        assert!(a.is_cancelled());
        assert!(b.is_cancelled());
    }

    #[test]
    fn ad_hoc_causes_round_trip_through_the_aggregate() {
        let boxed: Box<dyn std::error::Error + Send + Sync> =
            anyhow::anyhow!("storage offline").into();
        let cause: Cause = Arc::from(boxed);
        let combined = combine([Future::<i32>::failed(cause)])
            .executor(direct())
            .as_void();
        let err = combined.join().unwrap_err();
        assert_eq!(err.to_string(), "storage offline");
    }
}
