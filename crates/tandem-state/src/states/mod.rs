mod barrier;
mod fork;
mod resume;
mod sub_workflow;
mod wait;

pub use barrier::BarrierGateState;
pub use fork::ForkState;
pub use resume::{EnvLoopResumeState, EnvResumeState};
pub use sub_workflow::SubWorkflowState;
pub use wait::WaitState;

use std::collections::HashMap;

use tandem_store::ExecutionStatus;
use tandem_waiter::ResponseData;

use crate::data::{ChildRef, ForkExecutionData};
use crate::error::StateError;
use crate::response::ExecutionResponse;

/// Join the responses of spawned children.
///
/// SUCCESS unless a child finished otherwise. The most severe child status
/// wins, ties going to the child declared first.
pub(crate) fn aggregate_children(
  kind: &str,
  children: &[ChildRef],
  responses: &HashMap<String, ResponseData>,
) -> Result<ExecutionResponse, StateError> {
  let mut summary = Vec::with_capacity(children.len());
  let mut worst: Option<(usize, ExecutionStatus, Option<String>)> = None;
  let mut elements = Vec::new();

  for (index, child) in children.iter().enumerate() {
    let (status, message) = match responses.get(&child.notify_id) {
      Some(ResponseData::Element {
        status,
        error_message,
        context_elements,
      }) => {
        elements.extend(context_elements.iter().cloned());
        (*status, error_message.clone())
      }
      Some(ResponseData::Timeout { .. }) => {
        (ExecutionStatus::Failed, Some("timed out".to_string()))
      }
      Some(ResponseData::Error { message }) => (ExecutionStatus::Error, Some(message.clone())),
      Some(_) => (ExecutionStatus::Success, None),
      None => (ExecutionStatus::Error, Some("no response".to_string())),
    };

    summary.push(ChildRef {
      status: Some(status),
      ..child.clone()
    });

    if status == ExecutionStatus::Success {
      continue;
    }
    let worse = match &worst {
      Some((_, current, _)) => status.severity() > current.severity(),
      None => true,
    };
    if worse {
      worst = Some((index, status, message));
    }
  }

  let data = ForkExecutionData { children: summary };
  let response = match worst {
    None => ExecutionResponse::success(),
    Some((index, status, message)) => {
      let name = &children[index].element_name;
      let text = match message {
        Some(message) => format!("{kind} child '{name}' finished {status}: {message}"),
        None => format!("{kind} child '{name}' finished {status}"),
      };
      ExecutionResponse::with_status(status).with_message(text)
    }
  };
  Ok(response.with_context_elements(elements).with_data(&data)?)
}
