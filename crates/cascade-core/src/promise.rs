use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use crate::error::Cause;
use crate::executor::{Executor, default_scheduler};
use crate::future::Future;
use crate::outcome::Outcome;

/// The writable face of a [`Future`].
///
/// A promise is the same shared core as the future it hands out; producers
/// keep the promise, consumers get [`Promise::future`] clones. Completion
/// is first-write-wins: the `try_*` operations report whether this call
/// performed the transition.
pub struct Promise<V> {
    future: Future<V>,
}

impl<V> Clone for Promise<V> {
    fn clone(&self) -> Self {
        Self {
            future: self.future.clone(),
        }
    }
}

impl<V: Send + Sync + 'static> Promise<V> {
    /// A pending promise dispatching callbacks on the default scheduler.
    pub fn new() -> Self {
        Self::with_executor(default_scheduler())
    }

    pub fn with_executor(executor: Arc<dyn Executor>) -> Self {
        Self {
            future: Future::pending(executor),
        }
    }

    /// The readable handle observing this promise.
    pub fn future(&self) -> Future<V> {
        self.future.clone()
    }

    pub fn try_success(&self, value: V) -> bool {
        self.future.complete(Outcome::Success(value))
    }

    pub fn try_failure(&self, cause: Cause) -> bool {
        self.future.complete(Outcome::Failure(cause))
    }

    /// As [`Promise::try_success`], but a lost race is a programming error.
    ///
    /// # Panics
    ///
    /// Panics when the promise is already completed.
    pub fn set_success(&self, value: V) {
        if !self.try_success(value) {
            panic!("promise is already completed");
        }
    }

    /// As [`Promise::try_failure`], but a lost race is a programming error.
    ///
    /// # Panics
    ///
    /// Panics when the promise is already completed.
    pub fn set_failure(&self, cause: Cause) {
        if !self.try_failure(cause) {
            panic!("promise is already completed");
        }
    }

    /// Mirror a terminal state from elsewhere, preserving the cancellation
    /// flavor exactly.
    pub(crate) fn complete_with(&self, outcome: Outcome<V>) -> bool {
        self.future.complete(outcome)
    }
}

impl<V: Send + Sync + 'static> Default for Promise<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Deref for Promise<V> {
    type Target = Future<V>;

    fn deref(&self) -> &Future<V> {
        &self.future
    }
}

impl<V> fmt::Debug for Promise<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("future", &self.future)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::direct;

    #[test]
    fn set_success_accepts_the_first_write() {
        let promise = Promise::with_executor(direct());
        promise.set_success(1);
        assert_eq!(promise.get_now(), Some(1));
    }

    #[test]
    #[should_panic(expected = "promise is already completed")]
    fn set_success_rejects_a_second_write() {
        let promise = Promise::with_executor(direct());
        promise.set_success(1);
        promise.set_success(2);
    }

    #[test]
    fn promise_clones_share_one_core() {
        let promise = Promise::<i32>::with_executor(direct());
        let sibling = promise.clone();
        assert!(promise.try_success(5));
        assert!(!sibling.try_success(6));
        assert_eq!(sibling.get_now(), Some(5));
    }
}
