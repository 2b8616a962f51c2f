use serde::Serialize;
use tandem_store::{ContextElement, ExecutionStatus, StateExecutionInstance};

use crate::error::StateError;

/// Result of `State::execute` or `State::handle_async_response`.
///
/// A synchronous response carries a final status. An asynchronous one
/// carries the correlation ids to wait on and any instances to spawn.
#[derive(Debug, Clone)]
pub struct ExecutionResponse {
  pub is_async: bool,
  pub correlation_ids: Vec<String>,
  pub status: ExecutionStatus,
  pub error_message: Option<String>,
  pub execution_data: Option<serde_json::Value>,
  pub context_elements: Vec<ContextElement>,
  /// Elements handed to the parent when this instance's chain ends.
  pub notify_elements: Vec<ContextElement>,
  pub state_execution_instances: Vec<StateExecutionInstance>,
}

impl ExecutionResponse {
  pub fn with_status(status: ExecutionStatus) -> Self {
    Self {
      is_async: false,
      correlation_ids: Vec::new(),
      status,
      error_message: None,
      execution_data: None,
      context_elements: Vec::new(),
      notify_elements: Vec::new(),
      state_execution_instances: Vec::new(),
    }
  }

  pub fn success() -> Self {
    Self::with_status(ExecutionStatus::Success)
  }

  pub fn failed(message: impl Into<String>) -> Self {
    Self::with_status(ExecutionStatus::Failed).with_message(message)
  }

  pub fn error(message: impl Into<String>) -> Self {
    Self::with_status(ExecutionStatus::Error).with_message(message)
  }

  /// Suspend on `correlation_ids` until every one has a response.
  pub fn waiting(correlation_ids: Vec<String>) -> Self {
    Self {
      is_async: true,
      correlation_ids,
      ..Self::with_status(ExecutionStatus::Waiting)
    }
  }

  pub fn with_message(mut self, message: impl Into<String>) -> Self {
    self.error_message = Some(message.into());
    self
  }

  pub fn with_data<T: Serialize>(mut self, data: &T) -> Result<Self, StateError> {
    self.execution_data = Some(serde_json::to_value(data)?);
    Ok(self)
  }

  pub fn with_instances(mut self, instances: Vec<StateExecutionInstance>) -> Self {
    self.state_execution_instances = instances;
    self
  }

  pub fn with_context_elements(mut self, elements: Vec<ContextElement>) -> Self {
    self.context_elements = elements;
    self
  }

  pub fn with_notify_elements(mut self, elements: Vec<ContextElement>) -> Self {
    self.notify_elements = elements;
    self
  }
}
