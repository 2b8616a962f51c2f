//! Tandem Barrier
//!
//! A barrier is a named rendezvous between the workflows of one parallel
//! group of a pipeline execution. The [`BarrierService`] owns the arrival
//! protocol: every update is a compare-and-set against the barrier's version,
//! and the participant whose update moves the barrier to DOWN or ENDURE posts
//! the single response that releases everyone waiting on it.

mod error;
mod service;

pub use error::BarrierError;
pub use service::{Arrival, BarrierScope, BarrierService, ENDURE_MESSAGE};
