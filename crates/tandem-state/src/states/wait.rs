use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tandem_config::{StateKind, TimeoutPolicy};
use tandem_waiter::ResponseData;
use tracing::debug;
use uuid::Uuid;

use crate::context::ExecutionContext;
use crate::contract::{State, TimeoutDefaults};
use crate::data::WaitExecutionData;
use crate::error::StateError;
use crate::response::ExecutionResponse;

/// Suspends for a fixed duration without holding a worker.
pub struct WaitState {
  name: String,
  duration: Duration,
  timeout: TimeoutPolicy,
}

impl WaitState {
  pub fn new(name: impl Into<String>, duration_secs: u64, timeout: TimeoutPolicy) -> Self {
    Self {
      name: name.into(),
      duration: Duration::from_secs(duration_secs),
      timeout,
    }
  }
}

#[async_trait]
impl State for WaitState {
  fn name(&self) -> &str {
    &self.name
  }

  fn kind(&self) -> StateKind {
    StateKind::Wait
  }

  async fn execute(&self, ctx: &ExecutionContext) -> Result<ExecutionResponse, StateError> {
    let wake_at = chrono::Duration::from_std(self.duration)
      .ok()
      .and_then(|d| Utc::now().checked_add_signed(d))
      .ok_or_else(|| StateError::InvalidParams {
        state: self.name.clone(),
        message: format!("wait of {}s is out of range", self.duration.as_secs()),
      })?;
    let correlation_id = Uuid::new_v4().to_string();

    let coordinator = ctx.coordinator().clone();
    let duration = self.duration;
    let id = correlation_id.clone();
    tokio::spawn(async move {
      tokio::time::sleep(duration).await;
      coordinator.post_response(&id, ResponseData::success());
    });

    debug!(state = %self.name, wake_at = %wake_at, "waiting");
    ExecutionResponse::waiting(vec![correlation_id.clone()]).with_data(&WaitExecutionData {
      duration_secs: self.duration.as_secs(),
      wake_at,
      correlation_id,
    })
  }

  fn timeout(&self, defaults: &TimeoutDefaults) -> Option<Duration> {
    match self.timeout {
      TimeoutPolicy::Default => Some(self.duration.saturating_add(defaults.default_state)),
      policy => policy.resolve(defaults.default_state),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;
  use tandem_config::{StateDef, StateType};
  use tandem_store::{ExecutionIdentity, InMemoryStore, StateExecutionInstance};
  use tandem_waiter::Coordinator;
  use tandem_workflow::StateMachine;

  use crate::context::Services;

  fn context() -> ExecutionContext {
    let state = StateDef::new("pause", StateType::Wait { duration_secs: 1 });
    let machine = StateMachine::single_state("wf", "Workflow", state.clone()).unwrap();
    let instance = StateExecutionInstance::root(
      &state,
      ExecutionIdentity {
        workflow_id: "wf".to_string(),
        workflow_execution_id: "exec-1".to_string(),
        ..Default::default()
      },
    );
    let (coordinator, _rx) = Coordinator::new(Duration::from_secs(60));
    let services = Services::new(
      Arc::new(InMemoryStore::new()),
      coordinator,
      TimeoutDefaults::default(),
    );
    ExecutionContext::new(instance, Arc::new(machine), Arc::new(services))
  }

  #[tokio::test]
  async fn test_out_of_range_duration_is_rejected() {
    let wait = WaitState::new("pause", 10_000_000_000_000, TimeoutPolicy::Default);
    let err = wait.execute(&context()).await.unwrap_err();
    assert!(matches!(err, StateError::InvalidParams { state, .. } if state == "pause"));
  }

  #[tokio::test]
  async fn test_execute_suspends_on_fresh_id() {
    let wait = WaitState::new("pause", 5, TimeoutPolicy::Default);
    let response = wait.execute(&context()).await.unwrap();
    assert!(response.is_async);
    assert_eq!(response.correlation_ids.len(), 1);
  }

  #[test]
  fn test_default_timeout_covers_duration() {
    let defaults = TimeoutDefaults::default();
    let wait = WaitState::new("pause", 5, TimeoutPolicy::Default);
    assert_eq!(
      wait.timeout(&defaults),
      Some(Duration::from_secs(5) + defaults.default_state)
    );

    let fixed = WaitState::new("pause", 5, TimeoutPolicy::FixedMs(100));
    assert_eq!(fixed.timeout(&defaults), Some(Duration::from_millis(100)));

    let endless = WaitState::new("pause", u64::MAX, TimeoutPolicy::Default);
    assert_eq!(endless.timeout(&defaults), Some(Duration::MAX));
  }
}
