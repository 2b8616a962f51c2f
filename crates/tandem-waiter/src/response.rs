use serde::{Deserialize, Serialize};
use tandem_store::{BarrierState, ContextElement, ExecutionStatus};

/// Payload posted against a correlation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseData {
  /// Completion of a child instance chain.
  Element {
    status: ExecutionStatus,
    error_message: Option<String>,
    #[serde(default)]
    context_elements: Vec<ContextElement>,
  },
  /// A barrier reached a terminal state.
  Barrier {
    barrier_id: String,
    state: BarrierState,
  },
  /// Synthesized when a wait's deadline passes before this id responded.
  Timeout { correlation_id: String },
  Error { message: String },
  /// Arbitrary payload from an external system.
  Data { value: serde_json::Value },
}

impl ResponseData {
  pub fn success() -> Self {
    ResponseData::Element {
      status: ExecutionStatus::Success,
      error_message: None,
      context_elements: Vec::new(),
    }
  }

  pub fn element(status: ExecutionStatus, error_message: Option<String>) -> Self {
    ResponseData::Element {
      status,
      error_message,
      context_elements: Vec::new(),
    }
  }

  pub fn is_timeout(&self) -> bool {
    matches!(self, ResponseData::Timeout { .. })
  }

  /// Status carried by an element response.
  pub fn status(&self) -> Option<ExecutionStatus> {
    match self {
      ResponseData::Element { status, .. } => Some(*status),
      _ => None,
    }
  }

  pub fn error_message(&self) -> Option<&str> {
    match self {
      ResponseData::Element { error_message, .. } => error_message.as_deref(),
      ResponseData::Error { message } => Some(message),
      _ => None,
    }
  }
}
