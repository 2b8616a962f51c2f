use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tandem_config::{StateKind, TimeoutPolicy};
use tandem_store::{ChildSpec, StoreError};
use tandem_waiter::ResponseData;
use tracing::info;
use uuid::Uuid;

use crate::context::ExecutionContext;
use crate::contract::{State, TimeoutDefaults};
use crate::data::{ChildRef, ForkExecutionData};
use crate::error::StateError;
use crate::response::ExecutionResponse;
use crate::states::aggregate_children;

pub const PREV_PIPELINE_EXECUTION_ID: &str = "prev_pipeline_execution_id";
pub const PREV_STATE_EXECUTION_ID: &str = "prev_state_execution_id";

/// Reproduces the outcome of a state from an earlier pipeline execution.
///
/// The source comes from the instance's state params when present (set by a
/// loop-resume parent), otherwise from the definition.
pub struct EnvResumeState {
  name: String,
  prev_pipeline_execution_id: Option<String>,
  prev_state_execution_id: Option<String>,
  timeout: TimeoutPolicy,
}

impl EnvResumeState {
  pub fn new(
    name: impl Into<String>,
    prev_pipeline_execution_id: Option<String>,
    prev_state_execution_id: Option<String>,
    timeout: TimeoutPolicy,
  ) -> Self {
    Self {
      name: name.into(),
      prev_pipeline_execution_id,
      prev_state_execution_id,
      timeout,
    }
  }

  fn source(&self, ctx: &ExecutionContext, key: &str, fallback: &Option<String>) -> Option<String> {
    ctx
      .state_param(key)
      .and_then(Value::as_str)
      .map(str::to_string)
      .or_else(|| fallback.clone())
  }
}

#[async_trait]
impl State for EnvResumeState {
  fn name(&self) -> &str {
    &self.name
  }

  fn kind(&self) -> StateKind {
    StateKind::EnvResume
  }

  async fn execute(&self, ctx: &ExecutionContext) -> Result<ExecutionResponse, StateError> {
    let prev_pipeline =
      self.source(ctx, PREV_PIPELINE_EXECUTION_ID, &self.prev_pipeline_execution_id);
    let Some(prev_state) = self.source(ctx, PREV_STATE_EXECUTION_ID, &self.prev_state_execution_id)
    else {
      return Err(StateError::ResumeSourceMissing(format!(
        "state '{}' has no previous state execution id",
        self.name
      )));
    };

    if let (Some(from), Some(to)) = (&prev_pipeline, &ctx.identity().pipeline_execution_id) {
      let copied = ctx.store().copy_pipeline_outputs(from, to).await?;
      info!(from = %from, to = %to, copied, "copied pipeline outputs");
    }

    let prior = match ctx.store().get_instance(&prev_state).await {
      Ok(prior) => prior,
      Err(StoreError::NotFound(_)) => {
        return Err(StateError::ResumeSourceMissing(format!(
          "previous state execution '{prev_state}' not found"
        )));
      }
      Err(e) => return Err(e.into()),
    };
    if !prior.status.is_final() {
      return Err(StateError::ResumeSourceMissing(format!(
        "previous state execution '{prev_state}' is {}",
        prior.status
      )));
    }

    info!(
      state = %self.name,
      prev_state = %prev_state,
      status = %prior.status,
      "resumed from previous execution"
    );
    let mut response = ExecutionResponse::with_status(prior.status)
      .with_context_elements(prior.context_elements)
      .with_notify_elements(prior.notify_elements);
    response.error_message = prior.error_message;
    response.execution_data = prior.execution_data;
    Ok(response)
  }

  fn timeout(&self, defaults: &TimeoutDefaults) -> Option<Duration> {
    self.timeout.resolve(defaults.resume_state)
  }
}

/// Fans out one `env_resume` child per prior workflow execution and joins on
/// them like a fork.
pub struct EnvLoopResumeState {
  name: String,
  resume_state: String,
  prev_pipeline_execution_id: String,
  /// prior workflow execution id -> prior state execution id
  prev_executions: BTreeMap<String, String>,
  timeout: TimeoutPolicy,
}

impl EnvLoopResumeState {
  pub fn new(
    name: impl Into<String>,
    resume_state: impl Into<String>,
    prev_pipeline_execution_id: impl Into<String>,
    prev_executions: BTreeMap<String, String>,
    timeout: TimeoutPolicy,
  ) -> Self {
    Self {
      name: name.into(),
      resume_state: resume_state.into(),
      prev_pipeline_execution_id: prev_pipeline_execution_id.into(),
      prev_executions,
      timeout,
    }
  }
}

#[async_trait]
impl State for EnvLoopResumeState {
  fn name(&self) -> &str {
    &self.name
  }

  fn kind(&self) -> StateKind {
    StateKind::EnvLoopResume
  }

  async fn execute(&self, ctx: &ExecutionContext) -> Result<ExecutionResponse, StateError> {
    if self.prev_executions.is_empty() {
      return Ok(ExecutionResponse::success());
    }

    let parent = ctx.instance();
    let graph = parent.child_state_machine_id.clone();

    let mut refs = Vec::with_capacity(self.prev_executions.len());
    let mut instances = Vec::with_capacity(self.prev_executions.len());
    for (prev_workflow_execution, prev_state_execution) in &self.prev_executions {
      let notify_id = Uuid::new_v4().to_string();
      let params = HashMap::from([
        (
          PREV_PIPELINE_EXECUTION_ID.to_string(),
          Value::String(self.prev_pipeline_execution_id.clone()),
        ),
        (
          PREV_STATE_EXECUTION_ID.to_string(),
          Value::String(prev_state_execution.clone()),
        ),
      ]);
      instances.push(
        parent.spawn_child(
          ChildSpec::new(self.resume_state.clone(), StateKind::EnvResume, notify_id.clone())
            .in_graph(graph.clone())
            .with_params(params),
        ),
      );
      refs.push(ChildRef {
        element_name: prev_workflow_execution.clone(),
        notify_id,
        status: None,
      });
    }

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
    aggregate_children("resume", &data.children, responses)
  }

  fn timeout(&self, defaults: &TimeoutDefaults) -> Option<Duration> {
    self.timeout.resolve(defaults.resume_state)
  }
}
