use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tandem_config::{StateDef, StateKind, TimeoutPolicy};
use tandem_store::ExecutionStatus;

use crate::context::ExecutionContext;
use crate::contract::{State, TimeoutDefaults};
use crate::error::StateError;
use crate::registry::StepFactory;
use crate::response::ExecutionResponse;
use crate::steps::string_param;

/// Always finishes with a non-success status (`failed` by default).
pub struct FailStep {
  name: String,
  message: String,
  status: ExecutionStatus,
  timeout: TimeoutPolicy,
}

#[async_trait]
impl State for FailStep {
  fn name(&self) -> &str {
    &self.name
  }

  fn kind(&self) -> StateKind {
    StateKind::Step
  }

  async fn execute(&self, ctx: &ExecutionContext) -> Result<ExecutionResponse, StateError> {
    let message = ctx.render_expression(&self.message).await?;
    Ok(ExecutionResponse::with_status(self.status).with_message(message))
  }

  fn timeout(&self, defaults: &TimeoutDefaults) -> Option<Duration> {
    self.timeout.resolve(defaults.default_state)
  }
}

pub struct FailStepFactory;

impl StepFactory for FailStepFactory {
  fn step_type(&self) -> &str {
    "fail"
  }

  fn create(
    &self,
    def: &StateDef,
    params: &Map<String, Value>,
  ) -> Result<Arc<dyn State>, StateError> {
    let status = match string_param(&def.name, params, "status")?.as_deref() {
      None | Some("failed") => ExecutionStatus::Failed,
      Some("error") => ExecutionStatus::Error,
      Some("skipped") => ExecutionStatus::Skipped,
      Some(other) => {
        return Err(StateError::InvalidParams {
          state: def.name.clone(),
          message: format!("unsupported status '{other}'"),
        });
      }
    };
    Ok(Arc::new(FailStep {
      name: def.name.clone(),
      message: string_param(&def.name, params, "message")?
        .unwrap_or_else(|| format!("state '{}' failed", def.name)),
      status,
      timeout: def.timeout,
    }))
  }
}
