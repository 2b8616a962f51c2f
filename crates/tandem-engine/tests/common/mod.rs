#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tandem_config::{StateDef, StateKind, StateType, SubWorkflowDef, TransitionDef, WorkflowDef};
use tandem_engine::{Engine, EngineConfig, ExecutionNotifier, NoopNotifier};
use tandem_state::{
  ExecutionContext, ExecutionResponse, State, StateError, StepFactory, TimeoutDefaults,
};
use tandem_store::{ExecutionStatus, InMemoryStore, Store};
use tokio_util::sync::CancellationToken;

pub fn step(name: &str, step_type: &str, params: Value) -> StateDef {
  StateDef::new(
    name,
    StateType::Step {
      step_type: step_type.to_string(),
      params: params.as_object().cloned().unwrap_or_default(),
    },
  )
}

pub fn log(name: &str) -> StateDef {
  step(name, "log", json!({ "message": format!("running {name}") }))
}

pub fn fail(name: &str, message: &str) -> StateDef {
  step(name, "fail", json!({ "message": message }))
}

pub fn workflow(
  workflow_id: &str,
  states: Vec<StateDef>,
  transitions: Vec<TransitionDef>,
) -> WorkflowDef {
  WorkflowDef {
    workflow_id: workflow_id.to_string(),
    name: workflow_id.to_string(),
    initial_state: states[0].name.clone(),
    states,
    transitions,
    sub_workflows: Vec::<SubWorkflowDef>::new(),
    variables: HashMap::new(),
  }
}

/// Suspends until `approval:<execution id>` is answered.
pub struct ApprovalStep {
  name: String,
}

#[async_trait]
impl State for ApprovalStep {
  fn name(&self) -> &str {
    &self.name
  }

  fn kind(&self) -> StateKind {
    StateKind::Step
  }

  async fn execute(&self, ctx: &ExecutionContext) -> Result<ExecutionResponse, StateError> {
    Ok(ExecutionResponse::waiting(vec![format!(
      "approval:{}",
      ctx.identity().workflow_execution_id
    )]))
  }

  fn timeout(&self, _defaults: &TimeoutDefaults) -> Option<Duration> {
    Some(Duration::from_secs(30))
  }
}

pub struct ApprovalFactory;

impl StepFactory for ApprovalFactory {
  fn step_type(&self) -> &str {
    "approval"
  }

  fn create(
    &self,
    def: &StateDef,
    _params: &Map<String, Value>,
  ) -> Result<Arc<dyn State>, StateError> {
    Ok(Arc::new(ApprovalStep {
      name: def.name.clone(),
    }))
  }
}

pub struct TestEngine {
  pub engine: Engine,
  pub store: Arc<InMemoryStore>,
  pub cancel: CancellationToken,
}

impl Drop for TestEngine {
  fn drop(&mut self) {
    self.cancel.cancel();
  }
}

pub fn engine() -> TestEngine {
  engine_with(Arc::new(NoopNotifier))
}

pub fn engine_with(notifier: Arc<dyn ExecutionNotifier>) -> TestEngine {
  let store = Arc::new(InMemoryStore::new());
  let engine = Engine::with_notifier(EngineConfig::default(), store.clone(), notifier);
  let cancel = CancellationToken::new();
  engine.run(cancel.clone()).unwrap();
  TestEngine {
    engine,
    store,
    cancel,
  }
}

/// Poll until some instance of the execution named `state` is WAITING.
pub async fn until_waiting(store: &InMemoryStore, execution_id: &str, state: &str) {
  for _ in 0..200 {
    let instances = store.list_instances(execution_id).await.unwrap();
    if instances
      .iter()
      .any(|i| i.state_name == state && i.status == ExecutionStatus::Waiting)
    {
      return;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
  }
  panic!("state '{state}' never started waiting");
}
