use std::any::Any;
use std::error::Error;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

/// The failure payload of a future.
///
/// Causes are shared: every listener, every derived future and every
/// blocking reader observes the same stored error, so the payload is
/// reference-counted rather than owned. `Arc<dyn Error>` keeps the
/// payload downcastable for type-matched handlers and chainable via
/// [`Error::source`].
pub type Cause = Arc<dyn Error + Send + Sync>;

/// Marker stored for a cancellation that carries no user-supplied cause.
///
/// Materialized lazily by [`crate::Outcome::cause`] so that cancelling a
/// future allocates nothing on the hot path. The type is fixed, which lets
/// handlers test for plain cancellation with a single downcast.
#[derive(Clone, Copy, Debug, Default, thiserror::Error)]
#[error("future was cancelled")]
pub struct CancelledError;

/// Deadline failure raised by timed blocking reads and by the timeout
/// combinator.
///
/// The message strings are load-bearing: downstream consumers match on
/// them, so both constructors format stable literals.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct TimeoutError {
    message: String,
}

impl TimeoutError {
    /// A timed `block`/`block_cancelling` read missed its deadline.
    pub fn blocking_read(waited: Duration) -> Self {
        Self {
            message: format!("Timeout on blocking read for {} ms", waited.as_millis()),
        }
    }

    /// The timeout combinator's deadline fired first. The duration is
    /// truncated to whole seconds.
    pub fn deadline(after: Duration) -> Self {
        Self {
            message: format!("Timeout, after {} seconds", after.as_secs()),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// A panic that escaped a user-supplied closure (mapper, supplier, task
/// body). The payload is flattened to its message; the panic itself never
/// crosses the completion boundary.
#[derive(Clone, Debug, thiserror::Error)]
#[error("panic in user callback: {message}")]
pub struct PanicError {
    message: String,
}

impl PanicError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Wrapped presentation of a terminal state, returned by the blocking
/// `get` family. `join`/`block`/`sync` return the stored cause unwrapped
/// instead.
#[derive(Clone, Debug, thiserror::Error)]
pub enum GetError {
    /// The future completed with a failure; the original cause is the source.
    #[error("future completed with a failure")]
    Failed(#[source] Cause),
    /// The future was cancelled; the cancellation cause is the source.
    #[error("future was cancelled")]
    Cancelled(#[source] Cause),
    /// The deadline of a timed `get_for` elapsed before completion.
    #[error("timed out after {0:?} waiting for completion")]
    Timeout(Duration),
}

impl GetError {
    /// The stored cause, when the future reached a terminal state at all.
    pub fn cause(&self) -> Option<&Cause> {
        match self {
            Self::Failed(cause) | Self::Cancelled(cause) => Some(cause),
            Self::Timeout(_) => None,
        }
    }
}

/// Walk the `source()` chain to its deepest error.
///
/// Returns the error itself when it has no source.
pub fn root_cause<'a>(err: &'a (dyn Error + 'static)) -> &'a (dyn Error + 'static) {
    let mut current = err;
    while let Some(next) = current.source() {
        current = next;
    }
    current
}

/// Flatten a panic payload to a displayable message.
///
/// `panic!` with a literal produces `&str`, formatted panics produce
/// `String`; anything else is opaque.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<opaque panic payload>".to_string()
    }
}

/// Run a user closure, converting a panic into a [`PanicError`] cause.
///
/// Combinators and task runners route every user-supplied function through
/// here so that a panicking closure fails the derived future instead of
/// leaving it pending forever.
pub fn capture_panic<T>(f: impl FnOnce() -> T) -> Result<T, Cause> {
    std::panic::catch_unwind(AssertUnwindSafe(f))
        .map_err(|payload| Arc::new(PanicError::new(panic_message(payload.as_ref()))) as Cause)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("outer: {source}")]
    struct Outer {
        #[source]
        source: Inner,
    }

    #[derive(Debug, thiserror::Error)]
    #[error("inner")]
    struct Inner;

    #[test]
    fn timeout_messages_are_stable_literals() {
        assert_eq!(
            TimeoutError::blocking_read(Duration::from_millis(250)).to_string(),
            "Timeout on blocking read for 250 ms"
        );
        assert_eq!(
            TimeoutError::deadline(Duration::from_millis(50)).to_string(),
            "Timeout, after 0 seconds"
        );
        assert_eq!(
            TimeoutError::deadline(Duration::from_millis(2500)).to_string(),
            "Timeout, after 2 seconds"
        );
    }

    #[test]
    fn root_cause_walks_the_chain() {
        let outer = Outer { source: Inner };
        let root = root_cause(&outer);
        assert!(root.downcast_ref::<Inner>().is_some());

        let flat = Inner;
        assert!(root_cause(&flat).downcast_ref::<Inner>().is_some());
    }

    #[test]
    fn capture_panic_flattens_the_payload() {
        let err = capture_panic(|| -> i32 { panic!("boom at offset {}", 7) }).unwrap_err();
        let panic = err.downcast_ref::<PanicError>().expect("panic error");
        assert_eq!(panic.message(), "boom at offset 7");

        assert_eq!(capture_panic(|| 41 + 1).unwrap(), 42);
    }

    #[test]
    fn get_error_exposes_the_stored_cause() {
        let cause: Cause = Arc::new(Inner);
        assert!(GetError::Failed(cause.clone()).cause().is_some());
        assert!(GetError::Cancelled(cause).cause().is_some());
        assert!(GetError::Timeout(Duration::from_secs(1)).cause().is_none());
    }
}
