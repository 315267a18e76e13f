//! Composable asynchronous result pipeline.
//!
//! The building blocks:
//! - [`Future`]: the shared, observable deferred result — one concrete core
//!   behind every handle, with an atomic one-shot outcome and listener
//!   fan-out on a pluggable executor.
//! - [`Promise`]: the writable face of a future.
//! - [`FutureTask`]: a future bound to a one-shot computation with
//!   cooperative interruption.
//! - Combinators (`map`, `flat_map`, `zip`, error and cancellation
//!   handling, `timeout`) that derive new futures from existing ones.
//! - The minimal [`Executor`]/[`Scheduler`] contract the core depends on,
//!   with a [`Direct`] inline executor and a tokio-backed default.

mod combinator;
pub mod error;
pub mod executor;
pub mod future;
pub mod outcome;
mod parker;
pub mod promise;
pub mod task;

pub use error::{
    CancelledError, Cause, GetError, PanicError, TimeoutError, capture_panic, panic_message,
    root_cause,
};
pub use executor::{
    Direct, Executor, Job, Rejected, RuntimeScheduler, Scheduler, SchedulerConfig, TimeoutHandle,
    default_scheduler, direct,
};
pub use future::Future;
pub use outcome::Outcome;
pub use promise::Promise;
pub use task::{FutureTask, TaskContext, spawn};
