//! Tandem Waiter
//!
//! Suspend/resume by correlation id. A state that cannot finish synchronously
//! returns a set of correlation ids; the engine registers them here and the
//! instance stays WAITING until every id has a response (or the wait times
//! out). External completions enter through [`Coordinator::post_response`].
//!
//! Completed waits are delivered exactly once as a [`Resumption`] on the
//! channel returned by [`Coordinator::new`].

mod coordinator;
mod error;
mod response;

pub use coordinator::{Coordinator, Resumption};
pub use error::WaitError;
pub use response::ResponseData;
