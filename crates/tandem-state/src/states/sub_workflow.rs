use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tandem_config::StateKind;
use tandem_store::{ChildSpec, ExecutionStatus};
use tandem_waiter::ResponseData;

use crate::context::ExecutionContext;
use crate::contract::{State, TimeoutDefaults, default_async_response};
use crate::data::{ChildSummary, SubWorkflowExecutionData};
use crate::error::StateError;
use crate::response::ExecutionResponse;

/// Delegates to a nested graph and finishes with the nested outcome.
///
/// The child notifies on the parent's own instance id, so that id is the
/// only correlation id waited on.
pub struct SubWorkflowState {
  name: String,
  sub_workflow_id: String,
}

impl SubWorkflowState {
  pub fn new(name: impl Into<String>, sub_workflow_id: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      sub_workflow_id: sub_workflow_id.into(),
    }
  }
}

#[async_trait]
impl State for SubWorkflowState {
  fn name(&self) -> &str {
    &self.name
  }

  fn kind(&self) -> StateKind {
    StateKind::SubWorkflow
  }

  async fn execute(&self, ctx: &ExecutionContext) -> Result<ExecutionResponse, StateError> {
    let parent = ctx.instance();
    // An absent graph leaves the child without a runnable state; the engine
    // completes such a child immediately.
    let (state_name, state_kind) = match ctx.machine().graph(Some(&self.sub_workflow_id)) {
      Some(graph) => {
        let initial = graph.initial_state();
        let kind = graph
          .state(initial)
          .map(|s| s.kind())
          .unwrap_or(StateKind::Step);
        (initial.to_string(), kind)
      }
      None => (String::new(), StateKind::Step),
    };

    let child = parent.spawn_child(
      ChildSpec::new(state_name, state_kind, parent.id.clone())
        .in_graph(Some(self.sub_workflow_id.clone())),
    );

    ExecutionResponse::waiting(vec![parent.id.clone()])
      .with_instances(vec![child])
      .with_data(&SubWorkflowExecutionData {
        sub_workflow_id: self.sub_workflow_id.clone(),
        children: Vec::new(),
      })
  }

  async fn handle_async_response(
    &self,
    ctx: &ExecutionContext,
    responses: &HashMap<String, ResponseData>,
  ) -> Result<ExecutionResponse, StateError> {
    let mapped = default_async_response(responses);

    let children = ctx
      .store()
      .list_children(ctx.instance_id())
      .await?
      .into_iter()
      .map(|child| ChildSummary {
        instance_id: child.id,
        state_name: child.state_name,
        status: child.status,
        error_message: child.error_message,
      })
      .collect();

    let data = SubWorkflowExecutionData {
      sub_workflow_id: self.sub_workflow_id.clone(),
      children,
    };

    let response = if mapped.status == ExecutionStatus::Success {
      ExecutionResponse::success().with_context_elements(mapped.context_elements)
    } else {
      let message = mapped
        .error_message
        .unwrap_or_else(|| {
          format!("sub-workflow '{}' finished {}", self.sub_workflow_id, mapped.status)
        });
      ExecutionResponse::with_status(mapped.status).with_message(message)
    };
    response.with_data(&data)
  }

  fn timeout(&self, _defaults: &TimeoutDefaults) -> Option<Duration> {
    None
  }
}
