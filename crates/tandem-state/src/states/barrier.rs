use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tandem_barrier::{Arrival, ENDURE_MESSAGE};
use tandem_config::{StateKind, TimeoutPolicy};
use tandem_store::BarrierState;
use tandem_waiter::ResponseData;
use tracing::{info, warn};

use crate::context::ExecutionContext;
use crate::contract::{State, TimeoutDefaults};
use crate::data::BarrierExecutionData;
use crate::error::StateError;
use crate::response::ExecutionResponse;

/// Holds a workflow until every planned participant of its parallel group
/// reaches the same barrier identifier.
pub struct BarrierGateState {
  name: String,
  identifier: String,
  timeout: TimeoutPolicy,
}

impl BarrierGateState {
  pub fn new(
    name: impl Into<String>,
    identifier: impl Into<String>,
    timeout: TimeoutPolicy,
  ) -> Self {
    Self {
      name: name.into(),
      identifier: identifier.into(),
      timeout,
    }
  }

  fn data(&self, barrier_id: Option<String>, state: Option<BarrierState>) -> BarrierExecutionData {
    BarrierExecutionData {
      identifier: self.identifier.clone(),
      barrier_id,
      state,
    }
  }
}

#[async_trait]
impl State for BarrierGateState {
  fn name(&self) -> &str {
    &self.name
  }

  fn kind(&self) -> StateKind {
    StateKind::Barrier
  }

  async fn execute(&self, ctx: &ExecutionContext) -> Result<ExecutionResponse, StateError> {
    let Some(scope) = ctx.barrier_scope() else {
      return ExecutionResponse::success().with_data(&self.data(None, None));
    };

    let Some(barrier) = ctx
      .barriers()
      .arrive(&self.identifier, &scope, Arrival::Reached)
      .await?
    else {
      info!(barrier = %self.identifier, "no planned participants, passing through");
      return ExecutionResponse::success().with_data(&self.data(None, None));
    };

    let data = self.data(Some(barrier.id.clone()), Some(barrier.state));
    match barrier.state {
      BarrierState::Down => ExecutionResponse::success().with_data(&data),
      BarrierState::Endure => ExecutionResponse::failed(ENDURE_MESSAGE).with_data(&data),
      BarrierState::Standing => {
        ExecutionResponse::waiting(vec![barrier.id.clone()]).with_data(&data)
      }
    }
  }

  async fn handle_async_response(
    &self,
    ctx: &ExecutionContext,
    responses: &HashMap<String, ResponseData>,
  ) -> Result<ExecutionResponse, StateError> {
    let scope = ctx.barrier_scope();
    let timed_out = responses.values().any(ResponseData::is_timeout);

    if timed_out {
      if let Some(scope) = &scope {
        ctx
          .barriers()
          .arrive(&self.identifier, scope, Arrival::Failed)
          .await?;
      }
      return Ok(ExecutionResponse::failed(format!(
        "timed out waiting on barrier '{}'",
        self.identifier
      )));
    }

    let signalled_failure = responses.values().any(|r| {
      matches!(
        r,
        ResponseData::Error { .. }
          | ResponseData::Barrier {
            state: BarrierState::Endure,
            ..
          }
      )
    });

    let current = match &scope {
      Some(scope) => ctx.barriers().find(&self.identifier, scope).await?,
      None => None,
    };
    let endured = current
      .as_ref()
      .is_some_and(|b| b.state == BarrierState::Endure);

    let data = self.data(
      current.as_ref().map(|b| b.id.clone()),
      current.as_ref().map(|b| b.state),
    );
    if signalled_failure || endured {
      ExecutionResponse::failed(ENDURE_MESSAGE).with_data(&data)
    } else {
      ExecutionResponse::success().with_data(&data)
    }
  }

  async fn handle_abort_event(&self, ctx: &ExecutionContext) {
    let Some(scope) = ctx.barrier_scope() else {
      return;
    };
    if let Err(e) = ctx
      .barriers()
      .arrive(&self.identifier, &scope, Arrival::Failed)
      .await
    {
      warn!(barrier = %self.identifier, error = %e, "failed to record aborted participant");
    }
  }

  fn timeout(&self, defaults: &TimeoutDefaults) -> Option<Duration> {
    self.timeout.resolve(defaults.default_state)
  }
}
