use std::sync::Arc;

use futures::{Stream, StreamExt};

use cascade_core::{Cause, Future, Promise, RuntimeScheduler, default_scheduler};

/// Observe a single-value reactive publisher as a [`Future`].
///
/// Exactly-once discipline: the first signal decides the outcome — a value
/// succeeds with `Some`, an exhausted publisher succeeds empty, an error
/// fails. The publisher is dropped right after the first signal, so later
/// emissions are never polled. Cancelling the returned future aborts the
/// consuming task, which drops the publisher and thereby cancels the
/// subscription.
pub fn from_publisher<V, S>(publisher: S) -> Future<Option<V>>
where
    V: Clone + Send + Sync + 'static,
    S: Stream<Item = Result<V, Cause>> + Send + 'static,
{
    from_publisher_on(&default_scheduler(), publisher)
}

pub fn from_publisher_on<V, S>(scheduler: &Arc<RuntimeScheduler>, publisher: S) -> Future<Option<V>>
where
    V: Clone + Send + Sync + 'static,
    S: Stream<Item = Result<V, Cause>> + Send + 'static,
{
    let promise = Promise::with_executor(scheduler.clone());
    let future = promise.future();
    let subscription = scheduler.handle().spawn(async move {
        let mut publisher = std::pin::pin!(publisher);
        match publisher.next().await {
            Some(Ok(value)) => {
                promise.try_success(Some(value));
            }
            Some(Err(cause)) => {
                promise.try_failure(cause);
            }
            None => {
                promise.try_success(None);
            }
        }
    });
    let abort = subscription.abort_handle();
    future.on_cancelled(move || {
        tracing::debug!("publisher bridge cancelled; dropping the subscription");
        abort.abort();
    });
    future
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[derive(Debug, thiserror::Error)]
    #[error("publisher failed")]
    struct PublisherError;

    #[test]
    fn first_signal_wins() {
        let publisher = stream::iter(vec![
            Ok::<_, Cause>("first".to_string()),
            Ok("second".to_string()),
        ]);
        let bridged = from_publisher(publisher);
        assert_eq!(bridged.join().unwrap(), Some("first".to_string()));
    }

    #[test]
    fn exhausted_publisher_completes_empty() {
        let bridged = from_publisher(stream::iter(Vec::<Result<i32, Cause>>::new()));
        assert_eq!(bridged.join().unwrap(), None);
    }

    #[test]
    fn a_leading_error_fails_the_bridge() {
        let publisher = stream::iter(vec![
            Err::<i32, Cause>(Arc::new(PublisherError)),
            Ok(1),
        ]);
        let bridged = from_publisher(publisher);
        let err = bridged.join().unwrap_err();
        assert!(err.downcast_ref::<PublisherError>().is_some());
    }

    #[test]
    fn an_empty_first_signal_can_be_defaulted() {
        let bridged = from_publisher(stream::iter(Vec::<Result<i32, Cause>>::new()));
        assert_eq!(bridged.switch_if_empty(17).join().unwrap(), 17);
    }

    #[test]
    fn cancelling_the_bridge_drops_the_subscription() {
        let bridged = from_publisher(stream::pending::<Result<i32, Cause>>());
        assert!(bridged.cancel());
        assert!(bridged.is_cancelled());
    }
}
