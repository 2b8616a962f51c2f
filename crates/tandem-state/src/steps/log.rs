use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tandem_config::{StateDef, StateKind, TimeoutPolicy};
use tandem_store::{ContextElement, OutputScope};
use tracing::info;

use crate::context::ExecutionContext;
use crate::contract::{State, TimeoutDefaults};
use crate::error::StateError;
use crate::registry::StepFactory;
use crate::response::ExecutionResponse;
use crate::steps::string_param;

/// Renders `message` and logs it.
///
/// With `output` set, the rendered message is also published as a context
/// element and a pipeline-scoped sweeping output under that name.
pub struct LogStep {
  name: String,
  message: String,
  output: Option<String>,
  timeout: TimeoutPolicy,
}

#[async_trait]
impl State for LogStep {
  fn name(&self) -> &str {
    &self.name
  }

  fn kind(&self) -> StateKind {
    StateKind::Step
  }

  async fn execute(&self, ctx: &ExecutionContext) -> Result<ExecutionResponse, StateError> {
    let message = ctx.render_expression(&self.message).await?;
    info!(
      workflow_execution_id = %ctx.identity().workflow_execution_id,
      state = %self.name,
      "{}",
      message
    );

    let Some(output) = &self.output else {
      return Ok(ExecutionResponse::success());
    };
    let value = Value::String(message);
    ctx
      .save_output(OutputScope::Pipeline, output, value.clone())
      .await?;
    let element = ContextElement::new(output.clone(), "log", value);
    Ok(
      ExecutionResponse::success()
        .with_context_elements(vec![element.clone()])
        .with_notify_elements(vec![element]),
    )
  }

  fn timeout(&self, defaults: &TimeoutDefaults) -> Option<Duration> {
    self.timeout.resolve(defaults.default_state)
  }
}

pub struct LogStepFactory;

impl StepFactory for LogStepFactory {
  fn step_type(&self) -> &str {
    "log"
  }

  fn create(
    &self,
    def: &StateDef,
    params: &Map<String, Value>,
  ) -> Result<Arc<dyn State>, StateError> {
    Ok(Arc::new(LogStep {
      name: def.name.clone(),
      message: string_param(&def.name, params, "message")?.unwrap_or_else(|| def.name.clone()),
      output: string_param(&def.name, params, "output")?,
      timeout: def.timeout,
    }))
  }
}
