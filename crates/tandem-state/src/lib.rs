//! Tandem State
//!
//! The state execution contract and the built-in state kinds.
//!
//! A [`State`] runs against an [`ExecutionContext`] and answers with an
//! [`ExecutionResponse`]: either a final status, or a set of correlation ids
//! to suspend on (plus any child instances to spawn). Once every id has a
//! response the engine calls [`State::handle_async_response`] exactly once.
//!
//! Built-in kinds:
//! - [`ForkState`]: runs sibling states in parallel and joins on them
//! - [`BarrierGateState`]: rendezvous with the other workflows of a parallel group
//! - [`SubWorkflowState`]: delegates to a nested graph
//! - [`WaitState`]: suspends for a fixed duration
//! - [`EnvResumeState`] / [`EnvLoopResumeState`]: replay results of an
//!   earlier pipeline execution
//!
//! `step` kinds are built by a [`StepFactory`] registered in the
//! [`StateRegistry`]; `log` and `fail` ship with the crate.

mod context;
mod contract;
pub mod data;
mod error;
mod registry;
mod response;
mod states;
pub mod steps;

pub use context::{ExecutionContext, Services};
pub use contract::{State, TimeoutDefaults, default_async_response};
pub use error::StateError;
pub use registry::{StateRegistry, StepFactory};
pub use response::ExecutionResponse;
pub use states::{
  BarrierGateState, EnvLoopResumeState, EnvResumeState, ForkState, SubWorkflowState, WaitState,
};
