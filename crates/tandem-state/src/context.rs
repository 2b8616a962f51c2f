use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use tandem_barrier::{BarrierScope, BarrierService};
use tandem_store::{
  ContextElement, ExecutionIdentity, OutputScope, StateExecutionInstance, Store, SweepingOutput,
};
use tandem_waiter::Coordinator;
use tandem_workflow::StateMachine;

use crate::contract::TimeoutDefaults;
use crate::error::StateError;

/// Shared collaborators handed to every state.
pub struct Services {
  pub store: Arc<dyn Store>,
  pub coordinator: Coordinator,
  pub barriers: Arc<BarrierService>,
  pub timeouts: TimeoutDefaults,
}

impl Services {
  pub fn new(store: Arc<dyn Store>, coordinator: Coordinator, timeouts: TimeoutDefaults) -> Self {
    let barriers = Arc::new(BarrierService::new(store.clone(), coordinator.clone()));
    Self {
      store,
      coordinator,
      barriers,
      timeouts,
    }
  }
}

/// What a state sees while it runs: a snapshot of its own instance, the
/// machine it belongs to, and the shared services.
#[derive(Clone)]
pub struct ExecutionContext {
  instance: StateExecutionInstance,
  machine: Arc<StateMachine>,
  services: Arc<Services>,
}

impl ExecutionContext {
  pub fn new(
    instance: StateExecutionInstance,
    machine: Arc<StateMachine>,
    services: Arc<Services>,
  ) -> Self {
    Self {
      instance,
      machine,
      services,
    }
  }

  pub fn instance(&self) -> &StateExecutionInstance {
    &self.instance
  }

  pub fn instance_id(&self) -> &str {
    &self.instance.id
  }

  pub fn identity(&self) -> &ExecutionIdentity {
    &self.instance.identity
  }

  pub fn machine(&self) -> &StateMachine {
    &self.machine
  }

  pub fn services(&self) -> &Services {
    &self.services
  }

  pub fn store(&self) -> &dyn Store {
    self.services.store.as_ref()
  }

  pub fn coordinator(&self) -> &Coordinator {
    &self.services.coordinator
  }

  pub fn barriers(&self) -> &BarrierService {
    &self.services.barriers
  }

  /// Barrier scope of this instance, when it runs as a pipeline stage.
  pub fn barrier_scope(&self) -> Option<BarrierScope> {
    let identity = self.identity();
    Some(BarrierScope {
      pipeline_execution_id: identity.pipeline_execution_id.clone()?,
      parallel_index: identity.pipeline_stage_parallel_index,
      pipeline_stage_element_id: identity.pipeline_stage_element_id.clone()?,
      workflow_execution_id: identity.workflow_execution_id.clone(),
    })
  }

  pub fn context_element(&self, name: &str) -> Option<&ContextElement> {
    self.instance.context_element(name)
  }

  pub fn context_elements(&self) -> &[ContextElement] {
    &self.instance.context_elements
  }

  pub fn state_param(&self, name: &str) -> Option<&Value> {
    self.instance.state_params.get(name)
  }

  /// Decode the execution data written by an earlier `execute`.
  pub fn execution_data<T: DeserializeOwned>(&self) -> Result<Option<T>, StateError> {
    match &self.instance.execution_data {
      Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
      None => Ok(None),
    }
  }

  /// Save a sweeping output. Pipeline scope falls back to the workflow
  /// execution when the instance is not part of a pipeline.
  pub async fn save_output(
    &self,
    scope: OutputScope,
    name: &str,
    value: Value,
  ) -> Result<SweepingOutput, StateError> {
    let identity = self.identity();
    let (scope, scope_id) = match (scope, &identity.pipeline_execution_id) {
      (OutputScope::Pipeline, Some(pipeline_execution_id)) => {
        (OutputScope::Pipeline, pipeline_execution_id.clone())
      }
      _ => (OutputScope::Workflow, identity.workflow_execution_id.clone()),
    };
    let output = SweepingOutput {
      scope,
      scope_id,
      name: name.to_string(),
      value,
      produced_by: Some(self.instance.id.clone()),
    };
    self.store().save_output(&output).await?;
    Ok(output)
  }

  /// Find an output by name, workflow scope first.
  pub async fn find_output(&self, name: &str) -> Result<Option<SweepingOutput>, StateError> {
    let identity = self.identity();
    if let Some(output) = self
      .store()
      .find_output(OutputScope::Workflow, &identity.workflow_execution_id, name)
      .await?
    {
      return Ok(Some(output));
    }
    match &identity.pipeline_execution_id {
      Some(pipeline_execution_id) => Ok(
        self
          .store()
          .find_output(OutputScope::Pipeline, pipeline_execution_id, name)
          .await?,
      ),
      None => Ok(None),
    }
  }

  /// Variables visible to expressions.
  ///
  /// ```text
  /// context.<element>     context elements by name
  /// variables.<name>      workflow variables
  /// params.<name>         per-instance state params
  /// outputs.<name>        sweeping outputs (workflow scope shadows pipeline)
  /// workflow.id, workflow.execution_id
  /// pipeline.execution_id, pipeline.stage
  /// app.id, app.account_id
  /// ```
  async fn expression_scope(&self) -> Result<Value, StateError> {
    let identity = self.identity();

    let mut outputs = Map::new();
    if let Some(pipeline_execution_id) = &identity.pipeline_execution_id {
      for output in self
        .store()
        .list_outputs(OutputScope::Pipeline, pipeline_execution_id)
        .await?
      {
        outputs.insert(output.name, output.value);
      }
    }
    for output in self
      .store()
      .list_outputs(OutputScope::Workflow, &identity.workflow_execution_id)
      .await?
    {
      outputs.insert(output.name, output.value);
    }

    let context: Map<String, Value> = self
      .instance
      .context_elements
      .iter()
      .map(|e| (e.name.clone(), e.value.clone()))
      .collect();

    Ok(json!({
      "context": context,
      "variables": self.instance.variables,
      "params": self.instance.state_params,
      "outputs": outputs,
      "workflow": {
        "id": identity.workflow_id,
        "execution_id": identity.workflow_execution_id,
      },
      "pipeline": {
        "execution_id": identity.pipeline_execution_id,
        "stage": identity.pipeline_stage_element_id,
      },
      "app": {
        "id": identity.app_id,
        "account_id": identity.account_id,
      },
    }))
  }

  /// Render a template string, e.g. `"deploying {{ context.artifact }}"`.
  pub async fn render_expression(&self, template: &str) -> Result<String, StateError> {
    let scope = self.expression_scope().await?;
    let env = minijinja::Environment::new();
    Ok(env.render_str(template, minijinja::Value::from_serialize(&scope))?)
  }

  /// Evaluate an expression to a JSON value, e.g. `"context.replicas > 2"`.
  pub async fn evaluate_expression(&self, expression: &str) -> Result<Value, StateError> {
    let scope = self.expression_scope().await?;
    let env = minijinja::Environment::new();
    let compiled = env.compile_expression(expression)?;
    let value = compiled.eval(minijinja::Value::from_serialize(&scope))?;
    Ok(serde_json::to_value(&value)?)
  }
}
