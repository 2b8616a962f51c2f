use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use tandem_config::{StateDef, StateType};

use crate::contract::State;
use crate::error::StateError;
use crate::states::{
  BarrierGateState, EnvLoopResumeState, EnvResumeState, ForkState, SubWorkflowState, WaitState,
};
use crate::steps::{FailStepFactory, LogStepFactory};

/// Builds the state for a `step` definition of one step type.
pub trait StepFactory: Send + Sync {
  fn step_type(&self) -> &str;

  fn create(
    &self,
    def: &StateDef,
    params: &Map<String, Value>,
  ) -> Result<Arc<dyn State>, StateError>;
}

/// Turns state definitions into executable states.
///
/// Built-in kinds are fixed; `step` kinds are looked up by `step_type`.
#[derive(Clone, Default)]
pub struct StateRegistry {
  steps: HashMap<String, Arc<dyn StepFactory>>,
}

impl StateRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// A registry with the `log` and `fail` steps.
  pub fn with_builtin_steps() -> Self {
    let mut registry = Self::new();
    registry.register(Arc::new(LogStepFactory));
    registry.register(Arc::new(FailStepFactory));
    registry
  }

  pub fn register(&mut self, factory: Arc<dyn StepFactory>) {
    self.steps.insert(factory.step_type().to_string(), factory);
  }

  pub fn step_types(&self) -> Vec<&str> {
    let mut types: Vec<&str> = self.steps.keys().map(String::as_str).collect();
    types.sort();
    types
  }

  pub fn build(&self, def: &StateDef) -> Result<Arc<dyn State>, StateError> {
    let name = def.name.clone();
    let state: Arc<dyn State> = match &def.state_type {
      StateType::Step { step_type, params } => {
        let factory = self
          .steps
          .get(step_type)
          .ok_or_else(|| StateError::UnknownStepType(step_type.clone()))?;
        return factory.create(def, params);
      }
      StateType::Fork { children } => Arc::new(ForkState::new(name, children.clone())),
      StateType::Barrier { identifier } => {
        Arc::new(BarrierGateState::new(name, identifier.clone(), def.timeout))
      }
      StateType::SubWorkflow { sub_workflow_id } => {
        Arc::new(SubWorkflowState::new(name, sub_workflow_id.clone()))
      }
      StateType::Wait { duration_secs } => {
        Arc::new(WaitState::new(name, *duration_secs, def.timeout))
      }
      StateType::EnvResume {
        prev_pipeline_execution_id,
        prev_state_execution_id,
      } => Arc::new(EnvResumeState::new(
        name,
        prev_pipeline_execution_id.clone(),
        prev_state_execution_id.clone(),
        def.timeout,
      )),
      StateType::EnvLoopResume {
        resume_state,
        prev_pipeline_execution_id,
        prev_executions,
      } => Arc::new(EnvLoopResumeState::new(
        name,
        resume_state.clone(),
        prev_pipeline_execution_id.clone(),
        prev_executions.clone(),
        def.timeout,
      )),
    };
    Ok(state)
  }
}
