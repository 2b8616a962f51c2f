use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
  BarrierInstance, BarrierKey, BarrierPlan, ExecutionStatus, OutputScope, StateExecutionInstance,
  Store, StoreError, SweepingOutput, WorkflowExecution,
};

#[derive(Default)]
struct Tables {
  instances: HashMap<String, StateExecutionInstance>,
  /// Instance ids in creation order.
  instance_order: Vec<String>,
  executions: HashMap<String, WorkflowExecution>,
  execution_order: Vec<String>,
  plans: HashMap<String, BarrierPlan>,
  barriers: HashMap<BarrierKey, BarrierInstance>,
  outputs: HashMap<(OutputScope, String, String), SweepingOutput>,
}

/// Store backed by process memory. Everything is lost on drop.
#[derive(Default)]
pub struct InMemoryStore {
  tables: RwLock<Tables>,
}

impl InMemoryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl Store for InMemoryStore {
  async fn create_instance(&self, instance: &StateExecutionInstance) -> Result<(), StoreError> {
    let mut tables = self.tables.write().await;
    if tables.instances.contains_key(&instance.id) {
      return Err(StoreError::AlreadyExists(instance.id.clone()));
    }
    tables.instance_order.push(instance.id.clone());
    tables.instances.insert(instance.id.clone(), instance.clone());
    Ok(())
  }

  async fn get_instance(&self, instance_id: &str) -> Result<StateExecutionInstance, StoreError> {
    let tables = self.tables.read().await;
    tables
      .instances
      .get(instance_id)
      .cloned()
      .ok_or_else(|| StoreError::NotFound(instance_id.to_string()))
  }

  async fn update_instance(
    &self,
    instance: &StateExecutionInstance,
    expected: &[ExecutionStatus],
  ) -> Result<bool, StoreError> {
    let mut tables = self.tables.write().await;
    let stored = tables
      .instances
      .get_mut(&instance.id)
      .ok_or_else(|| StoreError::NotFound(instance.id.clone()))?;
    if !expected.contains(&stored.status) {
      return Ok(false);
    }
    *stored = instance.clone();
    Ok(true)
  }

  async fn list_children(
    &self,
    parent_instance_id: &str,
  ) -> Result<Vec<StateExecutionInstance>, StoreError> {
    let tables = self.tables.read().await;
    Ok(
      tables
        .instance_order
        .iter()
        .filter_map(|id| tables.instances.get(id))
        .filter(|i| i.parent_instance_id.as_deref() == Some(parent_instance_id))
        .cloned()
        .collect(),
    )
  }

  async fn list_instances(
    &self,
    workflow_execution_id: &str,
  ) -> Result<Vec<StateExecutionInstance>, StoreError> {
    let tables = self.tables.read().await;
    Ok(
      tables
        .instance_order
        .iter()
        .filter_map(|id| tables.instances.get(id))
        .filter(|i| i.identity.workflow_execution_id == workflow_execution_id)
        .cloned()
        .collect(),
    )
  }

  async fn create_execution(&self, execution: &WorkflowExecution) -> Result<(), StoreError> {
    let mut tables = self.tables.write().await;
    if tables.executions.contains_key(&execution.execution_id) {
      return Err(StoreError::AlreadyExists(execution.execution_id.clone()));
    }
    tables.execution_order.push(execution.execution_id.clone());
    tables
      .executions
      .insert(execution.execution_id.clone(), execution.clone());
    Ok(())
  }

  async fn get_execution(&self, execution_id: &str) -> Result<WorkflowExecution, StoreError> {
    let tables = self.tables.read().await;
    tables
      .executions
      .get(execution_id)
      .cloned()
      .ok_or_else(|| StoreError::NotFound(execution_id.to_string()))
  }

  async fn update_execution(&self, execution: &WorkflowExecution) -> Result<(), StoreError> {
    let mut tables = self.tables.write().await;
    let stored = tables
      .executions
      .get_mut(&execution.execution_id)
      .ok_or_else(|| StoreError::NotFound(execution.execution_id.clone()))?;
    *stored = execution.clone();
    Ok(())
  }

  async fn list_executions(
    &self,
    pipeline_execution_id: &str,
  ) -> Result<Vec<WorkflowExecution>, StoreError> {
    let tables = self.tables.read().await;
    Ok(
      tables
        .execution_order
        .iter()
        .filter_map(|id| tables.executions.get(id))
        .filter(|e| e.pipeline_execution_id.as_deref() == Some(pipeline_execution_id))
        .cloned()
        .collect(),
    )
  }

  async fn save_barrier_plan(&self, plan: &BarrierPlan) -> Result<(), StoreError> {
    let mut tables = self.tables.write().await;
    tables
      .plans
      .insert(plan.pipeline_execution_id.clone(), plan.clone());
    Ok(())
  }

  async fn get_barrier_plan(
    &self,
    pipeline_execution_id: &str,
  ) -> Result<Option<BarrierPlan>, StoreError> {
    let tables = self.tables.read().await;
    Ok(tables.plans.get(pipeline_execution_id).cloned())
  }

  async fn get_barrier(&self, key: &BarrierKey) -> Result<Option<BarrierInstance>, StoreError> {
    let tables = self.tables.read().await;
    Ok(tables.barriers.get(key).cloned())
  }

  async fn create_barrier_if_absent(
    &self,
    barrier: &BarrierInstance,
  ) -> Result<BarrierInstance, StoreError> {
    let mut tables = self.tables.write().await;
    let stored = tables
      .barriers
      .entry(barrier.key.clone())
      .or_insert_with(|| barrier.clone());
    Ok(stored.clone())
  }

  async fn compare_and_set_barrier(&self, barrier: &BarrierInstance) -> Result<bool, StoreError> {
    let mut tables = self.tables.write().await;
    let stored = tables
      .barriers
      .get_mut(&barrier.key)
      .ok_or_else(|| StoreError::NotFound(barrier.key.identifier.clone()))?;
    if stored.version != barrier.version {
      return Ok(false);
    }
    *stored = barrier.clone();
    stored.version += 1;
    Ok(true)
  }

  async fn list_barriers(
    &self,
    pipeline_execution_id: &str,
  ) -> Result<Vec<BarrierInstance>, StoreError> {
    let tables = self.tables.read().await;
    Ok(
      tables
        .barriers
        .values()
        .filter(|b| b.key.pipeline_execution_id == pipeline_execution_id)
        .cloned()
        .collect(),
    )
  }

  async fn save_output(&self, output: &SweepingOutput) -> Result<(), StoreError> {
    let mut tables = self.tables.write().await;
    tables.outputs.insert(
      (output.scope, output.scope_id.clone(), output.name.clone()),
      output.clone(),
    );
    Ok(())
  }

  async fn find_output(
    &self,
    scope: OutputScope,
    scope_id: &str,
    name: &str,
  ) -> Result<Option<SweepingOutput>, StoreError> {
    let tables = self.tables.read().await;
    Ok(
      tables
        .outputs
        .get(&(scope, scope_id.to_string(), name.to_string()))
        .cloned(),
    )
  }

  async fn list_outputs(
    &self,
    scope: OutputScope,
    scope_id: &str,
  ) -> Result<Vec<SweepingOutput>, StoreError> {
    let tables = self.tables.read().await;
    let mut outputs: Vec<_> = tables
      .outputs
      .values()
      .filter(|o| o.scope == scope && o.scope_id == scope_id)
      .cloned()
      .collect();
    outputs.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(outputs)
  }

  async fn copy_pipeline_outputs(
    &self,
    from_pipeline_execution_id: &str,
    to_pipeline_execution_id: &str,
  ) -> Result<usize, StoreError> {
    let mut tables = self.tables.write().await;
    let source: Vec<SweepingOutput> = tables
      .outputs
      .values()
      .filter(|o| o.scope == OutputScope::Pipeline && o.scope_id == from_pipeline_execution_id)
      .cloned()
      .collect();

    let mut copied = 0;
    for output in source {
      let key = (
        OutputScope::Pipeline,
        to_pipeline_execution_id.to_string(),
        output.name.clone(),
      );
      if tables.outputs.contains_key(&key) {
        continue;
      }
      tables.outputs.insert(
        key,
        SweepingOutput {
          scope_id: to_pipeline_execution_id.to_string(),
          ..output
        },
      );
      copied += 1;
    }
    Ok(copied)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{BarrierState, ExecutionIdentity};
  use serde_json::json;
  use tandem_config::{StateDef, StateKind, StateType};

  fn instance(execution_id: &str) -> StateExecutionInstance {
    StateExecutionInstance::root(
      &StateDef::new("wait", StateType::Wait { duration_secs: 1 }),
      ExecutionIdentity {
        workflow_execution_id: execution_id.to_string(),
        ..Default::default()
      },
    )
  }

  #[tokio::test]
  async fn test_update_instance_checks_status() {
    let store = InMemoryStore::new();
    let mut inst = instance("exec-1");
    store.create_instance(&inst).await.unwrap();

    inst.status = ExecutionStatus::Running;
    assert!(store.update_instance(&inst, &[ExecutionStatus::New]).await.unwrap());

    // Already RUNNING, so a second NEW -> RUNNING claim loses.
    assert!(!store.update_instance(&inst, &[ExecutionStatus::New]).await.unwrap());
    assert_eq!(
      store.get_instance(&inst.id).await.unwrap().status,
      ExecutionStatus::Running
    );
  }

  #[tokio::test]
  async fn test_create_instance_twice_fails() {
    let store = InMemoryStore::new();
    let inst = instance("exec-1");
    store.create_instance(&inst).await.unwrap();
    let err = store.create_instance(&inst).await.unwrap_err();
    assert!(matches!(err, StoreError::AlreadyExists(_)));
  }

  #[tokio::test]
  async fn test_list_children_in_creation_order() {
    let store = InMemoryStore::new();
    let parent = instance("exec-1");
    store.create_instance(&parent).await.unwrap();
    for name in ["a", "b", "c"] {
      let child = parent.spawn_child(crate::ChildSpec::new(name, StateKind::Step, name));
      store.create_instance(&child).await.unwrap();
    }
    store.create_instance(&instance("exec-2")).await.unwrap();

    let names: Vec<_> = store
      .list_children(&parent.id)
      .await
      .unwrap()
      .into_iter()
      .map(|c| c.state_name)
      .collect();
    assert_eq!(names, vec!["a", "b", "c"]);
    assert_eq!(store.list_instances("exec-1").await.unwrap().len(), 4);
  }

  #[tokio::test]
  async fn test_barrier_compare_and_set() {
    let store = InMemoryStore::new();
    let key = BarrierKey {
      identifier: "gate".to_string(),
      pipeline_execution_id: "pipe-1".to_string(),
      parallel_index: 0,
    };
    let first = store
      .create_barrier_if_absent(&BarrierInstance::new(key.clone(), &["a".to_string()]))
      .await
      .unwrap();
    let second = store
      .create_barrier_if_absent(&BarrierInstance::new(key.clone(), &["a".to_string()]))
      .await
      .unwrap();
    assert_eq!(first.id, second.id);

    let mut update = first.clone();
    update.state = BarrierState::Down;
    assert!(store.compare_and_set_barrier(&update).await.unwrap());

    // Stale version.
    let mut stale = first;
    stale.state = BarrierState::Endure;
    assert!(!store.compare_and_set_barrier(&stale).await.unwrap());

    let stored = store.get_barrier(&key).await.unwrap().unwrap();
    assert_eq!(stored.state, BarrierState::Down);
    assert_eq!(stored.version, 1);
  }

  #[tokio::test]
  async fn test_copy_pipeline_outputs_keeps_existing() {
    let store = InMemoryStore::new();
    for (scope_id, name, value) in [
      ("old", "artifact", json!("v1")),
      ("old", "region", json!("us-east")),
      ("new", "region", json!("eu-west")),
    ] {
      store
        .save_output(&SweepingOutput {
          scope: OutputScope::Pipeline,
          scope_id: scope_id.to_string(),
          name: name.to_string(),
          value,
          produced_by: None,
        })
        .await
        .unwrap();
    }

    let copied = store.copy_pipeline_outputs("old", "new").await.unwrap();
    assert_eq!(copied, 1);

    let region = store
      .find_output(OutputScope::Pipeline, "new", "region")
      .await
      .unwrap()
      .unwrap();
    assert_eq!(region.value, json!("eu-west"));
    assert_eq!(store.list_outputs(OutputScope::Pipeline, "new").await.unwrap().len(), 2);
  }
}
