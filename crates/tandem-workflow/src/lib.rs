//! Tandem Workflow
//!
//! This crate provides the "locked" state machine representation for Tandem.
//! A locked state machine is a validated form of a `WorkflowDef` that the
//! engine can dispatch directly.
//!
//! Key differences from `tandem-config`:
//! - State names are unique per graph and every transition target exists
//! - Fork children and loop-resume targets are checked against their graph
//! - Success/failure transitions are indexed for O(1) lookup
//! - Nested graphs are addressed by their sub-workflow id

mod error;
mod graph;
mod machine;

pub use error::WorkflowError;
pub use graph::StateGraph;
pub use machine::StateMachine;
