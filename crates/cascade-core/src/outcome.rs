use std::sync::Arc;

use crate::error::{CancelledError, Cause};

/// Terminal state of a future.
///
/// A pending future has no `Outcome` at all; once one is published it never
/// changes. Cancellation is its own variant rather than a failure subtype so
/// that `is_cancelled` needs no downcast, and the interrupt request of
/// `cancel_interrupting` rides along as a flag a task worker can observe.
#[derive(Clone, Debug)]
pub enum Outcome<V> {
    /// The computation produced a value.
    Success(V),
    /// The computation failed with a business error.
    Failure(Cause),
    /// The future was cancelled before producing a value.
    ///
    /// `cause` is the user-supplied cancellation cause, if any; the default
    /// marker is materialized lazily by [`Outcome::cause`]. `interrupt` is
    /// true when the cancellation asked a running worker to stop early.
    Cancelled {
        cause: Option<Cause>,
        interrupt: bool,
    },
}

impl<V> Outcome<V> {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Any terminal state other than success, cancellation included.
    pub fn is_failed(&self) -> bool {
        !self.is_success()
    }

    /// A failure proper: failed but not cancelled.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// True only for the interrupt flavor of cancellation.
    pub fn interrupt_requested(&self) -> bool {
        matches!(self, Self::Cancelled { interrupt: true, .. })
    }

    /// The stored error for non-success terminals.
    ///
    /// For a cancellation without a user-supplied cause this materializes
    /// the fixed [`CancelledError`] marker on demand, so a plain `cancel()`
    /// never allocates a cause it might not need.
    pub fn cause(&self) -> Option<Cause> {
        match self {
            Self::Success(_) => None,
            Self::Failure(cause) => Some(cause.clone()),
            Self::Cancelled { cause, .. } => {
                Some(cause.clone().unwrap_or_else(|| Arc::new(CancelledError)))
            }
        }
    }

    pub fn success(&self) -> Option<&V> {
        match self {
            Self::Success(value) => Some(value),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TimeoutError;
    use std::time::Duration;

    #[test]
    fn predicates_partition_the_terminal_states() {
        let success = Outcome::Success(1);
        assert!(success.is_success());
        assert!(!success.is_failed());
        assert!(!success.is_failure());
        assert!(!success.is_cancelled());
        assert!(success.cause().is_none());

        let failure = Outcome::<i32>::Failure(Arc::new(TimeoutError::deadline(Duration::ZERO)));
        assert!(failure.is_failed());
        assert!(failure.is_failure());
        assert!(!failure.is_cancelled());

        let cancelled = Outcome::<i32>::Cancelled {
            cause: None,
            interrupt: false,
        };
        assert!(cancelled.is_failed());
        assert!(!cancelled.is_failure());
        assert!(cancelled.is_cancelled());
        assert!(!cancelled.interrupt_requested());
    }

    #[test]
    fn cancellation_cause_is_materialized_on_demand() {
        let plain = Outcome::<i32>::Cancelled {
            cause: None,
            interrupt: true,
        };
        assert!(plain.interrupt_requested());
        let cause = plain.cause().expect("cancelled outcomes carry a cause");
        assert!(cause.downcast_ref::<CancelledError>().is_some());

        let explicit = Outcome::<i32>::Cancelled {
            cause: Some(Arc::new(TimeoutError::deadline(Duration::ZERO))),
            interrupt: false,
        };
        let cause = explicit.cause().expect("cause");
        assert!(cause.downcast_ref::<TimeoutError>().is_some());
    }
}
