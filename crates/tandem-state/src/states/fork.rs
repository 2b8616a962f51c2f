use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tandem_config::StateKind;
use tandem_store::ChildSpec;
use tandem_waiter::ResponseData;
use tracing::debug;
use uuid::Uuid;

use crate::context::ExecutionContext;
use crate::contract::{State, TimeoutDefaults};
use crate::data::{ChildRef, ForkExecutionData};
use crate::error::StateError;
use crate::response::ExecutionResponse;
use crate::states::aggregate_children;

/// Runs sibling states of the same graph in parallel and joins on them.
pub struct ForkState {
  name: String,
  children: Vec<String>,
}

impl ForkState {
  pub fn new(name: impl Into<String>, children: Vec<String>) -> Self {
    Self {
      name: name.into(),
      children,
    }
  }
}

#[async_trait]
impl State for ForkState {
  fn name(&self) -> &str {
    &self.name
  }

  fn kind(&self) -> StateKind {
    StateKind::Fork
  }

  async fn execute(&self, ctx: &ExecutionContext) -> Result<ExecutionResponse, StateError> {
    let parent = ctx.instance();
    let graph = parent.child_state_machine_id.clone();

    let mut refs = Vec::with_capacity(self.children.len());
    let mut instances = Vec::with_capacity(self.children.len());
    for child in &self.children {
      let state = ctx
        .machine()
        .state(graph.as_deref(), child)
        .ok_or_else(|| StateError::InvalidParams {
          state: self.name.clone(),
          message: format!("unknown child state '{child}'"),
        })?;
      let notify_id = Uuid::new_v4().to_string();
      instances.push(parent.spawn_child(
        ChildSpec::new(child.clone(), state.kind(), notify_id.clone()).in_graph(graph.clone()),
      ));
      refs.push(ChildRef {
        element_name: child.clone(),
        notify_id,
        status: None,
      });
    }

    debug!(fork = %self.name, children = refs.len(), "forking");
    let ids = refs.iter().map(|r| r.notify_id.clone()).collect();
    ExecutionResponse::waiting(ids)
      .with_instances(instances)
      .with_data(&ForkExecutionData { children: refs })
  }

  async fn handle_async_response(
    &self,
    ctx: &ExecutionContext,
    responses: &HashMap<String, ResponseData>,
  ) -> Result<ExecutionResponse, StateError> {
    let data: ForkExecutionData = ctx.execution_data()?.unwrap_or_default();
    aggregate_children("fork", &data.children, responses)
  }

  fn timeout(&self, _defaults: &TimeoutDefaults) -> Option<Duration> {
    None
  }
}
