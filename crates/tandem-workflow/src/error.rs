use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkflowError {
  #[error("state not found: {0}")]
  StateNotFound(String),

  #[error("duplicate state '{state}' in graph '{graph}'")]
  DuplicateState { graph: String, state: String },

  #[error("duplicate sub-workflow id: {0}")]
  DuplicateSubWorkflow(String),

  #[error("transition references unknown state: from={from}, to={to}")]
  InvalidTransition { from: String, to: String },

  #[error("state '{0}' has more than one {1} transition")]
  AmbiguousTransition(String, &'static str),

  #[error("fork '{fork}' references unknown child state '{child}'")]
  UnknownForkChild { fork: String, child: String },

  #[error("fork '{0}' has no children")]
  EmptyFork(String),

  #[error("loop resume '{state}' must target an env_resume state, found '{target}'")]
  InvalidResumeTarget { state: String, target: String },
}
