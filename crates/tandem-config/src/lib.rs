//! Tandem Config
//!
//! This crate contains the serializable definition types for Tandem.
//! These types describe workflows (state graphs) and pipelines (ordered,
//! optionally parallel stages of workflows) before they are validated and
//! locked by `tandem-workflow`.
//!
//! Definitions can be loaded from:
//! - JSON files (via CLI with `tandem run --definitions=bundle.json`)
//! - Any other source that produces `serde_json::Value`
//!
//! # Example
//!
//! ```json
//! {
//!   "workflow_id": "deploy",
//!   "name": "Deploy",
//!   "initial_state": "fan-out",
//!   "states": [
//!     { "name": "fan-out", "type": "fork", "children": ["canary", "main"] },
//!     { "name": "canary", "type": "step", "step_type": "log", "params": { "message": "canary" } },
//!     { "name": "main", "type": "barrier", "identifier": "deploy-gate" }
//!   ]
//! }
//! ```

mod bundle;
mod error;
mod pipeline;
mod state;
mod timeout;
mod workflow;

pub use bundle::Definitions;
pub use error::ConfigError;
pub use pipeline::{PipelineDef, PipelineStageDef};
pub use state::{StateDef, StateKind, StateType};
pub use timeout::TimeoutPolicy;
pub use workflow::{SubWorkflowDef, TransitionDef, TransitionType, WorkflowDef};
