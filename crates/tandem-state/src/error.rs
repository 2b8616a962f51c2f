use tandem_barrier::BarrierError;
use tandem_store::StoreError;
use thiserror::Error;

/// Errors raised by a state. The engine turns every one of them into an
/// ERROR response carrying the message.
#[derive(Debug, Error)]
pub enum StateError {
  #[error("store error: {0}")]
  Store(#[from] StoreError),

  #[error("barrier error: {0}")]
  Barrier(#[from] BarrierError),

  #[error("expression error: {0}")]
  Expression(#[from] minijinja::Error),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  #[error("resume source missing: {0}")]
  ResumeSourceMissing(String),

  #[error("invalid parameters for state '{state}': {message}")]
  InvalidParams { state: String, message: String },

  #[error("unknown step type: {0}")]
  UnknownStepType(String),
}
