//! N-future aggregation.
//!
//! [`Combiner`] reduces an ordered collection of futures to a single
//! combined future, with a mode flag deciding whether an individual
//! failure fails the aggregate (require-all-succeed) or is absorbed
//! (accept-failure), and output shapes for a result list, a void
//! completion, or a user-computed value.

pub mod combiner;

pub use combiner::{Combiner, combine};
