use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

use cascade_core::{
    CancelledError, Cause, Future, Outcome, PanicError, Promise, RuntimeScheduler,
    default_scheduler, panic_message,
};

/// Drive a host-standard future and observe it as a [`Future`].
///
/// The host future runs on the default scheduler's runtime. A panic inside
/// it is peeled out of the join layer so the native payload survives as a
/// [`PanicError`]; cancelling the returned future aborts the driving task
/// best effort.
pub fn adopt<V, F>(host: F) -> Future<V>
where
    V: Clone + Send + Sync + 'static,
    F: std::future::Future<Output = Result<V, Cause>> + Send + 'static,
{
    adopt_on(&default_scheduler(), host)
}

pub fn adopt_on<V, F>(scheduler: &Arc<RuntimeScheduler>, host: F) -> Future<V>
where
    V: Clone + Send + Sync + 'static,
    F: std::future::Future<Output = Result<V, Cause>> + Send + 'static,
{
    let promise = Promise::with_executor(scheduler.clone());
    let future = promise.future();

    let driver = scheduler.handle().spawn(host);
    let abort = driver.abort_handle();
    future.on_cancelled(move || {
        abort.abort();
    });

    let pump = promise.clone();
    scheduler.handle().spawn(async move {
        match driver.await {
            Ok(Ok(value)) => {
                pump.try_success(value);
            }
            Ok(Err(cause)) => {
                pump.try_failure(cause);
            }
            Err(join) if join.is_panic() => {
                // Peel the join wrapping so the native panic payload is
                // what the failure reports.
                let message = panic_message(join.into_panic().as_ref());
                pump.try_failure(Arc::new(PanicError::new(message)));
            }
            Err(_) => {
                tracing::debug!("host future driver aborted; surfacing as cancellation");
                pump.cancel();
            }
        }
    });
    future
}

/// As [`adopt`] for a host future that cannot fail.
pub fn adopt_value<V, F>(host: F) -> Future<V>
where
    V: Clone + Send + Sync + 'static,
    F: std::future::Future<Output = V> + Send + 'static,
{
    adopt(async move { Ok(host.await) })
}

/// A host-standard completion handle observing a [`Future`].
///
/// Awaiting it yields the join-style (unwrapped) presentation of the
/// terminal state. Cancellation flows one way: [`Completable::cancel`]
/// cancels the observed future.
pub struct Completable<V> {
    source: Future<V>,
    waker: Arc<Mutex<Option<Waker>>>,
    registered: bool,
}

/// Observation entry point, in extension-trait form so the handle can live
/// outside the core crate.
pub trait CompletableExt<V> {
    /// A host-standard completion handle mirroring this future.
    fn completable(&self) -> Completable<V>;
}

impl<V: Clone + Send + Sync + 'static> CompletableExt<V> for Future<V> {
    fn completable(&self) -> Completable<V> {
        Completable {
            source: self.clone(),
            waker: Arc::new(Mutex::new(None)),
            registered: false,
        }
    }
}

impl<V: Send + Sync + 'static> Completable<V> {
    /// Cancel the observed future.
    pub fn cancel(&self) -> bool {
        self.source.cancel()
    }

    pub fn source(&self) -> &Future<V> {
        &self.source
    }
}

fn settle<V: Clone + Send + Sync + 'static>(outcome: Outcome<V>) -> Poll<Result<V, Cause>> {
    Poll::Ready(match outcome {
        Outcome::Success(value) => Ok(value),
        other => Err(other.cause().unwrap_or_else(|| Arc::new(CancelledError))),
    })
}

impl<V: Clone + Send + Sync + 'static> std::future::Future for Completable<V> {
    type Output = Result<V, Cause>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if let Some(outcome) = this.source.outcome() {
            return settle(outcome);
        }
        *this.waker.lock().unwrap_or_else(|e| e.into_inner()) = Some(cx.waker().clone());
        if !this.registered {
            this.registered = true;
            let slot = this.waker.clone();
            this.source.on_completed(move |_| {
                let waker = slot.lock().unwrap_or_else(|e| e.into_inner()).take();
                if let Some(waker) = waker {
                    waker.wake();
                }
            });
        }
        // The completion may have raced the waker installation; the final
        // check keeps the wakeup from being lost.
        if let Some(outcome) = this.source.outcome() {
            return settle(outcome);
        }
        Poll::Pending
    }
}

impl<V> std::fmt::Debug for Completable<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completable")
            .field("source", &self.source)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cascade_core::direct;
    use std::thread;
    use std::time::Duration;

    #[derive(Debug, thiserror::Error)]
    #[error("host failed")]
    struct HostError;

    #[test]
    fn completable_yields_an_existing_success() {
        let promise = Promise::with_executor(direct());
        promise.try_success(5);
        let handle = promise.future().completable();
        assert_eq!(futures::executor::block_on(handle).unwrap(), 5);
    }

    #[test]
    fn completable_wakes_on_late_completion() {
        let promise = Promise::<i32>::new();
        let handle = promise.future().completable();
        let producer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            promise.try_success(9);
        });
        assert_eq!(futures::executor::block_on(handle).unwrap(), 9);
        producer.join().unwrap();
    }

    #[test]
    fn completable_unwraps_the_stored_cause() {
        let future = Future::<i32>::failed(Arc::new(HostError));
        let err = futures::executor::block_on(future.completable()).unwrap_err();
        assert!(err.downcast_ref::<HostError>().is_some());
    }

    #[test]
    fn cancelling_the_completable_cancels_the_future() {
        let promise = Promise::<i32>::with_executor(direct());
        let handle = promise.future().completable();
        assert!(handle.cancel());
        assert!(promise.is_cancelled());
        let err = futures::executor::block_on(handle).unwrap_err();
        assert!(err.downcast_ref::<CancelledError>().is_some());
    }

    #[test]
    fn adopt_mirrors_the_host_result() {
        let adopted = adopt(async { Ok::<_, Cause>(7) });
        assert_eq!(adopted.join().unwrap(), 7);

        let failed = adopt::<i32, _>(async { Err(Arc::new(HostError) as Cause) });
        assert!(failed.join().unwrap_err().downcast_ref::<HostError>().is_some());
    }

    #[test]
    fn adopt_preserves_the_native_panic_payload() {
        let adopted = adopt::<i32, _>(async { panic!("host bug") });
        let err = adopted.join().unwrap_err();
        let panic = err.downcast_ref::<PanicError>().expect("panic error");
        assert_eq!(panic.message(), "host bug");
    }

    #[test]
    fn cancelling_an_adopted_future_stops_the_driver() {
        let adopted = adopt_value::<i32, _>(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            1
        });
        assert!(adopted.cancel());
        assert!(adopted.is_cancelled());
    }

    #[test]
    fn adopt_value_wraps_infallible_hosts() {
        let adopted = adopt_value(async { "plain".to_string() });
        assert_eq!(adopted.join().unwrap(), "plain");
    }
}
