use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tandem_config::StateKind;
use tandem_store::{ContextElement, ExecutionStatus};
use tandem_waiter::ResponseData;

use crate::context::ExecutionContext;
use crate::error::StateError;
use crate::response::ExecutionResponse;

/// Engine-wide timeouts states fall back on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutDefaults {
  pub default_state: Duration,
  pub resume_state: Duration,
}

impl Default for TimeoutDefaults {
  fn default() -> Self {
    Self {
      default_state: Duration::from_secs(4 * 60 * 60),
      resume_state: Duration::from_secs(24 * 60 * 60),
    }
  }
}

/// One executable state of a workflow.
///
/// `execute` either finishes synchronously with a final status, or returns
/// correlation ids and the instance is suspended until every id has a
/// response, at which point `handle_async_response` runs exactly once.
#[async_trait]
pub trait State: Send + Sync {
  fn name(&self) -> &str;

  fn kind(&self) -> StateKind;

  async fn execute(&self, ctx: &ExecutionContext) -> Result<ExecutionResponse, StateError>;

  async fn handle_async_response(
    &self,
    _ctx: &ExecutionContext,
    responses: &HashMap<String, ResponseData>,
  ) -> Result<ExecutionResponse, StateError> {
    Ok(default_async_response(responses))
  }

  /// Best-effort cleanup when the instance is aborted. Must not set status.
  async fn handle_abort_event(&self, _ctx: &ExecutionContext) {}

  /// How long the instance may wait. `None` never times out.
  fn timeout(&self, defaults: &TimeoutDefaults) -> Option<Duration>;
}

/// Map a set of responses to one outcome: any timeout fails, any error
/// payload errors, the worst non-success element status wins, otherwise
/// success. Element context is carried over.
pub fn default_async_response(responses: &HashMap<String, ResponseData>) -> ExecutionResponse {
  let mut ids: Vec<&String> = responses.keys().collect();
  ids.sort();

  if let Some(id) = ids.iter().find(|id| responses[**id].is_timeout()) {
    return ExecutionResponse::failed(format!("timed out waiting for {id}"));
  }

  for id in &ids {
    if let ResponseData::Error { message } = &responses[*id] {
      return ExecutionResponse::error(message.clone());
    }
  }

  let mut worst: Option<(ExecutionStatus, Option<String>)> = None;
  let mut elements: Vec<ContextElement> = Vec::new();
  for id in &ids {
    if let ResponseData::Element {
      status,
      error_message,
      context_elements,
    } = &responses[*id]
    {
      elements.extend(context_elements.iter().cloned());
      let worse = match &worst {
        Some((current, _)) => status.severity() > current.severity(),
        None => *status != ExecutionStatus::Success,
      };
      if worse {
        worst = Some((*status, error_message.clone()));
      }
    }
  }

  let response = match worst {
    Some((status, message)) => {
      let response = ExecutionResponse::with_status(status);
      match message {
        Some(message) => response.with_message(message),
        None => response,
      }
    }
    None => ExecutionResponse::success(),
  };
  response.with_context_elements(elements)
}
