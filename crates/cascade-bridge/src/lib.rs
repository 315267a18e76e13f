//! Adapters between [`cascade_core::Future`] and external deferred types.
//!
//! Two boundaries:
//! - the host-standard deferred type (`std::future::Future`): [`adopt`] on
//!   the way in, [`CompletableExt::completable`] on the way out;
//! - the single-value reactive publisher discipline (`futures::Stream`):
//!   [`from_publisher`], first-signal-wins.

pub mod publisher;
pub mod std_future;

pub use publisher::{from_publisher, from_publisher_on};
pub use std_future::{Completable, CompletableExt, adopt, adopt_on, adopt_value};
